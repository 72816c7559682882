//! Named building blocks for declarative trees.
//!
//! A [`TreeDescriptor`] names handlers, conditions, composite constructors and
//! enum types by string. A [`Catalog`] maps those names to the real values and
//! turns the descriptor into a [`ComponentTree`].

use std::sync::Arc;

use cmdroute_metadata::{
    CommandDescriptor, FORMAT_VERSION, GroupDescriptor, NodeDescriptor, ParamDescriptor,
    ParamShapeDescriptor, TreeDescriptor,
};
use indexmap::IndexMap;
use thiserror::Error;

use crate::condition::Condition;
use crate::error::BuildError;
use crate::invoker::Target;
use crate::param::{Constructor, Parameter};
use crate::tree::{CommandSpec, ComponentTree, GroupSpec, NodeSpec};
use crate::value::{EnumType, Value, ValueKind};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unsupported descriptor format version {found} (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },
    #[error("unknown handler '{0}'")]
    UnknownHandler(String),
    #[error("unknown condition '{0}'")]
    UnknownCondition(String),
    #[error("unknown constructor '{name}' for parameter '{parameter}'")]
    UnknownConstructor { name: String, parameter: String },
    #[error("composite parameter '{0}' names no constructor")]
    MissingConstructor(String),
    #[error("unknown enum type '{0}'")]
    UnknownEnum(String),
    #[error(transparent)]
    Build(#[from] BuildError),
}

#[derive(Clone, Default)]
pub struct Catalog {
    handlers: IndexMap<String, Target>,
    conditions: IndexMap<String, Arc<dyn Condition>>,
    constructors: IndexMap<String, Constructor>,
    enums: IndexMap<String, Arc<EnumType>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target under its own name.
    pub fn handler(&mut self, target: Target) -> &mut Self {
        self.handlers.insert(target.name().to_string(), target);
        self
    }

    pub fn condition(
        &mut self,
        name: impl Into<String>,
        condition: Arc<dyn Condition>,
    ) -> &mut Self {
        self.conditions.insert(name.into(), condition);
        self
    }

    pub fn constructor<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn enumeration(&mut self, def: EnumType) -> &mut Self {
        self.enums.insert(def.name.clone(), Arc::new(def));
        self
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Resolve a type name such as `i32`, `enum:Color`, `list<u8>` or a custom key.
    pub fn value_kind(&self, type_name: &str) -> Result<ValueKind, CatalogError> {
        let name = type_name.trim();
        if let Some(inner) = name.strip_prefix("list<").and_then(|s| s.strip_suffix('>')) {
            return Ok(ValueKind::List(Box::new(self.value_kind(inner)?)));
        }
        if let Some(enum_name) = name.strip_prefix("enum:") {
            return self
                .enums
                .get(enum_name)
                .map(|def| ValueKind::Enum(Arc::clone(def)))
                .ok_or_else(|| CatalogError::UnknownEnum(enum_name.to_string()));
        }
        Ok(ValueKind::scalar(name).unwrap_or_else(|| ValueKind::Custom(name.to_string())))
    }

    pub fn build(&self, tree: &TreeDescriptor) -> Result<ComponentTree, CatalogError> {
        if tree.format_version != FORMAT_VERSION {
            return Err(CatalogError::UnsupportedFormat {
                found: tree.format_version,
                expected: FORMAT_VERSION,
            });
        }
        let specs = tree
            .nodes
            .iter()
            .map(|node| self.node(node))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ComponentTree::build(specs)?)
    }

    fn node(&self, node: &NodeDescriptor) -> Result<NodeSpec, CatalogError> {
        match node {
            NodeDescriptor::Group(group) => self.group(group).map(NodeSpec::Group),
            NodeDescriptor::Command(command) => self.command(command).map(NodeSpec::Command),
        }
    }

    fn group(&self, desc: &GroupDescriptor) -> Result<GroupSpec, CatalogError> {
        let mut spec = GroupSpec::new(desc.aliases.iter().cloned()).summary(desc.summary.clone());
        spec.conditions = self.conditions_for(&desc.conditions)?;
        spec.children = desc
            .children
            .iter()
            .map(|child| self.node(child))
            .collect::<Result<_, _>>()?;
        Ok(spec)
    }

    fn command(&self, desc: &CommandDescriptor) -> Result<CommandSpec, CatalogError> {
        let target = self
            .handlers
            .get(&desc.handler)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownHandler(desc.handler.clone()))?;
        let mut spec =
            CommandSpec::new(desc.aliases.iter().cloned(), target).summary(desc.summary.clone());
        spec.conditions = self.conditions_for(&desc.conditions)?;
        spec.parameters = desc
            .parameters
            .iter()
            .map(|p| self.parameter(p))
            .collect::<Result<_, _>>()?;
        Ok(spec)
    }

    fn conditions_for(&self, names: &[String]) -> Result<Vec<Arc<dyn Condition>>, CatalogError> {
        names
            .iter()
            .map(|name| {
                self.conditions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CatalogError::UnknownCondition(name.clone()))
            })
            .collect()
    }

    fn parameter(&self, desc: &ParamDescriptor) -> Result<Parameter, CatalogError> {
        let mut parameter = match desc.shape {
            ParamShapeDescriptor::Positional => {
                Parameter::positional(&desc.name, self.value_kind(&desc.value_type)?)
            }
            ParamShapeDescriptor::Remainder => {
                let p = Parameter::remainder(&desc.name, self.value_kind(&desc.value_type)?);
                match &desc.separator {
                    Some(sep) => p.separator(sep.clone()),
                    None => p,
                }
            }
            ParamShapeDescriptor::Resource => {
                Parameter::resource(&desc.name, self.value_kind(&desc.value_type)?)
            }
            ParamShapeDescriptor::Composite => {
                let name = desc
                    .constructor
                    .as_ref()
                    .ok_or_else(|| CatalogError::MissingConstructor(desc.name.clone()))?;
                let constructor = self
                    .constructors
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CatalogError::UnknownConstructor {
                        name: name.clone(),
                        parameter: desc.name.clone(),
                    })?;
                let parts = desc
                    .parameters
                    .iter()
                    .map(|p| self.parameter(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Parameter::composite_with(&desc.name, parts, constructor)
            }
        };
        if desc.optional {
            parameter = parameter.optional();
        }
        if desc.collection {
            parameter = parameter.collection();
        }
        if let Some(raw) = &desc.default_value {
            parameter = parameter.default_value(raw.clone());
        }
        if !desc.help.is_empty() {
            parameter = parameter.help(desc.help.clone());
        }
        Ok(parameter)
    }
}
