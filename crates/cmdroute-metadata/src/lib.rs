//! Declarative descriptors for cmdroute command trees.
//!
//! This crate intentionally does **not** depend on the dispatch engine.
//! The descriptors here name handlers, conditions and constructors by string;
//! the engine resolves those names against a catalog when it builds the
//! immutable tree. They are used for:
//! - loading a command tree from a JSON manifest
//! - rendering usage information without building a tree

use serde::{Deserialize, Serialize};

/// Current descriptor format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParamShapeDescriptor {
    /// Bound from a named token or the next positional token.
    #[default]
    Positional,
    /// Takes every unconsumed token. Must be the last parameter.
    Remainder,
    /// Filled from the caller's resource payload, not from tokens.
    Resource,
    /// Built by a named constructor from its own sub-parameters.
    Composite,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ParamDescriptor {
    pub name: String,
    /// Value type name, e.g. `i32`, `string`, `list<u8>`, `enum:Color`.
    #[serde(rename = "type", default = "default_type")]
    pub value_type: String,
    #[serde(default)]
    pub shape: ParamShapeDescriptor,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub collection: bool,
    /// Raw default used when an optional parameter is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Join separator for non-collection remainder parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    /// Constructor name for composite parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamDescriptor>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
}

fn default_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CommandDescriptor {
    /// Empty inside a group declares the group's default command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Handler name resolved against the catalog.
    pub handler: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct GroupDescriptor {
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeDescriptor {
    Group(GroupDescriptor),
    Command(CommandDescriptor),
}

impl NodeDescriptor {
    pub fn aliases(&self) -> &[String] {
        match self {
            Self::Group(g) => g.aliases.as_slice(),
            Self::Command(c) => c.aliases.as_slice(),
        }
    }
}

/// JSON payload describing a whole tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TreeDescriptor {
    pub format_version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeDescriptor>,
}

impl Default for TreeDescriptor {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl TreeDescriptor {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            nodes,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode as pretty JSON.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Every command with its alias path, in pre-order.
    pub fn commands(&self) -> Vec<(Vec<String>, &CommandDescriptor)> {
        fn walk<'a>(
            nodes: &'a [NodeDescriptor],
            prefix: &mut Vec<String>,
            out: &mut Vec<(Vec<String>, &'a CommandDescriptor)>,
        ) {
            for node in nodes {
                match node {
                    NodeDescriptor::Group(g) => {
                        prefix.push(g.aliases.first().cloned().unwrap_or_default());
                        walk(&g.children, prefix, out);
                        prefix.pop();
                    }
                    NodeDescriptor::Command(c) => {
                        let mut path = prefix.clone();
                        if let Some(first) = c.aliases.first() {
                            path.push(first.clone());
                        }
                        out.push((path, c));
                    }
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.nodes, &mut Vec::new(), &mut out);
        out
    }
}
