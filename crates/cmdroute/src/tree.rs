use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::condition::{Condition, EvaluatorGroup, group_conditions};
use crate::error::BuildError;
use crate::invoker::Target;
use crate::param::{Arity, ParamShape, Parameter};

/// Build input for one tree node.
pub enum NodeSpec {
    Group(GroupSpec),
    Command(CommandSpec),
}

pub struct GroupSpec {
    pub aliases: Vec<String>,
    pub summary: String,
    /// Inherited by every descendant command.
    pub conditions: Vec<Arc<dyn Condition>>,
    pub children: Vec<NodeSpec>,
}

impl GroupSpec {
    pub fn new<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aliases: aliases.into_iter().map(Into::into).collect(),
            summary: String::new(),
            conditions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn child(mut self, node: impl Into<NodeSpec>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

pub struct CommandSpec {
    /// Empty inside a group: the group's default command.
    pub aliases: Vec<String>,
    pub summary: String,
    pub parameters: Vec<Parameter>,
    pub target: Target,
    pub conditions: Vec<Arc<dyn Condition>>,
}

impl CommandSpec {
    pub fn new<I, S>(aliases: I, target: Target) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aliases: aliases.into_iter().map(Into::into).collect(),
            summary: String::new(),
            parameters: Vec::new(),
            target,
            conditions: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

impl From<GroupSpec> for NodeSpec {
    fn from(group: GroupSpec) -> Self {
        Self::Group(group)
    }
}

impl From<CommandSpec> for NodeSpec {
    fn from(command: CommandSpec) -> Self {
        Self::Command(command)
    }
}

/// Aliases stored alongside their lowercased match keys.
#[derive(Debug, Clone)]
struct Aliases {
    display: Vec<String>,
    keys: Vec<String>,
}

impl Aliases {
    fn new(display: Vec<String>) -> Self {
        let keys = display.iter().map(|a| a.to_lowercase()).collect();
        Self { display, keys }
    }

    fn matches(&self, token: &str) -> bool {
        let token = token.to_lowercase();
        self.keys.iter().any(|k| *k == token)
    }
}

/// A command as built into the tree.
pub struct Command {
    aliases: Aliases,
    path: Vec<String>,
    summary: String,
    parameters: Vec<Parameter>,
    target: Target,
    evaluators: Vec<Arc<EvaluatorGroup>>,
    arity: Arity,
    order: usize,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path)
            .field("arity", &self.arity)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn aliases(&self) -> &[String] {
        &self.aliases.display
    }

    /// First alias of every node from the root to this command.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn display_path(&self) -> String {
        self.path.join(" ")
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn evaluators(&self) -> &[Arc<EvaluatorGroup>] {
        &self.evaluators
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Pre-order registration index; breaks ties between equal-height candidates.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_default(&self) -> bool {
        self.aliases.display.is_empty()
    }

    pub(crate) fn matches(&self, token: &str) -> bool {
        self.aliases.matches(token)
    }

    /// `math add <x> <y> [z]`
    pub fn usage(&self) -> String {
        let mut parts = vec![self.display_path()];
        parts.extend(
            self.parameters
                .iter()
                .map(Parameter::usage)
                .filter(|s| !s.is_empty()),
        );
        parts.join(" ")
    }
}

pub struct Group {
    aliases: Aliases,
    summary: String,
    children: Vec<Node>,
    default: Option<Arc<Command>>,
}

impl Group {
    pub fn aliases(&self) -> &[String] {
        &self.aliases.display
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn default_command(&self) -> Option<&Arc<Command>> {
        self.default.as_ref()
    }

    pub(crate) fn matches(&self, token: &str) -> bool {
        self.aliases.matches(token)
    }
}

pub enum Node {
    Group(Group),
    Command(Arc<Command>),
}

/// Immutable command tree.
#[derive(Default)]
pub struct ComponentTree {
    nodes: Vec<Node>,
    commands: Vec<Arc<Command>>,
}

impl fmt::Debug for ComponentTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentTree")
            .field("commands", &self.commands)
            .finish()
    }
}

struct Builder {
    order: usize,
    commands: Vec<Arc<Command>>,
}

fn check_alias(alias: &str, path: &str) -> Result<(), BuildError> {
    if alias.is_empty() || alias.chars().any(char::is_whitespace) || alias.starts_with('-') {
        return Err(BuildError::InvalidAlias {
            alias: alias.to_string(),
            path: path.to_string(),
        });
    }
    Ok(())
}

fn check_parameters(
    command: &str,
    parameters: &[Parameter],
    nested: bool,
) -> Result<(), BuildError> {
    let mut seen = HashSet::new();
    for (i, p) in parameters.iter().enumerate() {
        for leaf in p.named_leaves() {
            if !seen.insert(leaf.name().to_lowercase()) {
                return Err(BuildError::DuplicateParameter {
                    command: command.to_string(),
                    parameter: leaf.name().to_string(),
                });
            }
        }
        match p.shape() {
            ParamShape::Remainder { .. } if nested => {
                return Err(BuildError::NestedRemainder {
                    command: command.to_string(),
                    parameter: p.name().to_string(),
                });
            }
            ParamShape::Remainder { .. } if i + 1 != parameters.len() => {
                return Err(BuildError::RemainderNotLast {
                    command: command.to_string(),
                    parameter: p.name().to_string(),
                });
            }
            ParamShape::Composite(c) => {
                if c.parameters().is_empty() {
                    return Err(BuildError::EmptyComposite {
                        command: command.to_string(),
                        parameter: p.name().to_string(),
                    });
                }
                check_parameters(command, c.parameters(), true)?;
            }
            _ => {}
        }
    }
    Ok(())
}

impl Builder {
    fn command(
        &mut self,
        spec: CommandSpec,
        prefix: &[String],
        inherited: &[Arc<dyn Condition>],
    ) -> Result<Arc<Command>, BuildError> {
        let mut path = prefix.to_vec();
        if let Some(first) = spec.aliases.first() {
            path.push(first.clone());
        }
        let display = path.join(" ");
        for alias in &spec.aliases {
            check_alias(alias, &display)?;
        }
        check_parameters(&display, &spec.parameters, false)?;

        let arity = spec
            .parameters
            .iter()
            .fold(Arity::ZERO, |acc, p| acc.plus(p.arity()));
        let evaluators = group_conditions(inherited.iter().chain(spec.conditions.iter()));

        let command = Arc::new(Command {
            aliases: Aliases::new(spec.aliases),
            path,
            summary: spec.summary,
            parameters: spec.parameters,
            target: spec.target,
            evaluators,
            arity,
            order: self.order,
        });
        self.order += 1;
        self.commands.push(Arc::clone(&command));
        Ok(command)
    }

    fn nodes(
        &mut self,
        specs: Vec<NodeSpec>,
        prefix: &[String],
        inherited: &[Arc<dyn Condition>],
    ) -> Result<(Vec<Node>, Option<Arc<Command>>), BuildError> {
        let scope = prefix.join(" ");
        let mut seen: HashSet<(&'static str, String)> = HashSet::new();
        let mut nodes = Vec::with_capacity(specs.len());
        let mut default = None;

        for spec in specs {
            // A group and a command may share an alias; two nodes of one kind may not.
            let (kind, aliases) = match &spec {
                NodeSpec::Group(g) => ("group", &g.aliases),
                NodeSpec::Command(c) => ("command", &c.aliases),
            };
            for alias in aliases {
                if !seen.insert((kind, alias.to_lowercase())) {
                    return Err(BuildError::DuplicateAlias {
                        alias: alias.clone(),
                        path: scope.clone(),
                    });
                }
            }

            match spec {
                NodeSpec::Group(group) => {
                    let Some(first) = group.aliases.first().cloned() else {
                        return Err(BuildError::MissingAlias {
                            kind: "group",
                            path: scope,
                        });
                    };
                    for alias in &group.aliases {
                        check_alias(alias, &scope)?;
                    }
                    let mut child_prefix = prefix.to_vec();
                    child_prefix.push(first);
                    let mut child_inherited = inherited.to_vec();
                    child_inherited.extend(group.conditions.iter().cloned());

                    let (children, group_default) =
                        self.nodes(group.children, &child_prefix, &child_inherited)?;
                    nodes.push(Node::Group(Group {
                        aliases: Aliases::new(group.aliases),
                        summary: group.summary,
                        children,
                        default: group_default,
                    }));
                }
                NodeSpec::Command(command) if command.aliases.is_empty() => {
                    if prefix.is_empty() {
                        return Err(BuildError::MissingAlias {
                            kind: "command",
                            path: scope,
                        });
                    }
                    if default.is_some() {
                        return Err(BuildError::DuplicateDefault { path: scope });
                    }
                    default = Some(self.command(command, prefix, inherited)?);
                }
                NodeSpec::Command(command) => {
                    let command = self.command(command, prefix, inherited)?;
                    nodes.push(Node::Command(command));
                }
            }
        }
        Ok((nodes, default))
    }
}

impl ComponentTree {
    /// Validate and freeze a tree. Commands are numbered in pre-order.
    pub fn build(specs: Vec<NodeSpec>) -> Result<Self, BuildError> {
        let mut builder = Builder {
            order: 0,
            commands: Vec::new(),
        };
        let (nodes, _) = builder.nodes(specs, &[], &[])?;
        tracing::debug!(commands = builder.commands.len(), "component tree built");
        Ok(Self {
            nodes,
            commands: builder.commands,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Every command in registration order.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
