use std::fmt;
use std::sync::Arc;

use crate::value::{Value, ValueKind};

/// Builds a composite value from its ordered sub-values.
pub type Constructor = Arc<dyn Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync>;

/// Token-count bounds. `max == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const ZERO: Arity = Arity {
        min: 0,
        max: Some(0),
    };

    pub fn new(min: usize, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn plus(self, other: Arity) -> Arity {
        Arity {
            min: self.min + other.min,
            max: match (self.max, other.max) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{max}"),
            Some(max) => write!(f, "{}..{max}", self.min),
            None => write!(f, "{}..", self.min),
        }
    }
}

/// How a parameter takes its value.
#[derive(Clone)]
pub enum ParamShape {
    Positional,
    /// Every unconsumed token; always the last parameter.
    Remainder { separator: Option<String> },
    /// Supplied by the caller's resource accessor.
    Resource,
    Composite(Composite),
}

impl fmt::Debug for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional => f.write_str("Positional"),
            Self::Remainder { separator } => f
                .debug_struct("Remainder")
                .field("separator", separator)
                .finish(),
            Self::Resource => f.write_str("Resource"),
            Self::Composite(c) => f
                .debug_struct("Composite")
                .field("parameters", &c.parameters)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone)]
pub struct Composite {
    parameters: Vec<Parameter>,
    constructor: Constructor,
}

impl Composite {
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn construct(&self, values: Vec<Value>) -> anyhow::Result<Value> {
        (self.constructor)(values)
    }
}

/// One declared parameter of a command.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    kind: ValueKind,
    shape: ParamShape,
    optional: bool,
    collection: bool,
    default: Option<String>,
    help: String,
}

impl Parameter {
    fn with_shape(name: impl Into<String>, kind: ValueKind, shape: ParamShape) -> Self {
        Self {
            name: name.into(),
            kind,
            shape,
            optional: false,
            collection: false,
            default: None,
            help: String::new(),
        }
    }

    pub fn positional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::with_shape(name, kind, ParamShape::Positional)
    }

    pub fn remainder(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::with_shape(name, kind, ParamShape::Remainder { separator: None })
    }

    pub fn resource(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::with_shape(name, kind, ParamShape::Resource)
    }

    pub fn composite<F>(name: impl Into<String>, parameters: Vec<Parameter>, constructor: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let kind = ValueKind::Custom(name.clone());
        Self::with_shape(
            name,
            kind,
            ParamShape::Composite(Composite {
                parameters,
                constructor: Arc::new(constructor),
            }),
        )
    }

    pub(crate) fn composite_with(
        name: impl Into<String>,
        parameters: Vec<Parameter>,
        constructor: Constructor,
    ) -> Self {
        let name = name.into();
        let kind = ValueKind::Custom(name.clone());
        Self::with_shape(
            name,
            kind,
            ParamShape::Composite(Composite {
                parameters,
                constructor,
            }),
        )
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Take every remaining token and convert each one.
    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    /// Raw value converted when the parameter is absent. Implies optional.
    pub fn default_value(mut self, raw: impl Into<String>) -> Self {
        self.default = Some(raw.into());
        self.optional = true;
        self
    }

    /// Join separator for a non-collection remainder.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        if let ParamShape::Remainder { separator: sep } = &mut self.shape {
            *sep = Some(separator.into());
        }
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn shape(&self) -> &ParamShape {
        &self.shape
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn default_raw(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn help_text(&self) -> &str {
        &self.help
    }

    pub fn arity(&self) -> Arity {
        let min = usize::from(!self.optional);
        match &self.shape {
            ParamShape::Resource => Arity::ZERO,
            ParamShape::Remainder { .. } => Arity::new(min, None),
            ParamShape::Positional if self.collection => Arity::new(min, None),
            ParamShape::Positional => Arity::new(min, Some(1)),
            ParamShape::Composite(c) => {
                let inner = c
                    .parameters
                    .iter()
                    .fold(Arity::ZERO, |acc, p| acc.plus(p.arity()));
                if self.optional {
                    Arity::new(0, inner.max)
                } else {
                    inner
                }
            }
        }
    }

    /// Every parameter that a named token can satisfy: this one, or the leaves
    /// of a composite.
    pub(crate) fn named_leaves(&self) -> Vec<&Parameter> {
        match &self.shape {
            ParamShape::Composite(c) => {
                c.parameters.iter().flat_map(|p| p.named_leaves()).collect()
            }
            ParamShape::Resource => Vec::new(),
            _ => vec![self],
        }
    }

    /// Usage fragment: `<x>`, `[x]`, `<items>...`.
    pub fn usage(&self) -> String {
        let body = match &self.shape {
            ParamShape::Resource => return String::new(),
            ParamShape::Composite(c) => c
                .parameters
                .iter()
                .map(Parameter::usage)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            ParamShape::Remainder { .. } => format!("{}...", self.name),
            ParamShape::Positional if self.collection => format!("{}...", self.name),
            ParamShape::Positional => self.name.clone(),
        };
        match (&self.shape, self.optional) {
            (ParamShape::Composite(_), false) => body,
            (_, true) => format!("[{body}]"),
            (_, false) => format!("<{body}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Parameter {
        Parameter::composite(
            "point",
            vec![
                Parameter::positional("x", ValueKind::I32),
                Parameter::positional("y", ValueKind::I32),
            ],
            |values| Ok(Value::List(values)),
        )
    }

    #[test]
    fn arity_per_shape() {
        assert_eq!(Parameter::positional("a", ValueKind::I32).arity(), Arity::new(1, Some(1)));
        assert_eq!(
            Parameter::positional("a", ValueKind::I32).optional().arity(),
            Arity::new(0, Some(1))
        );
        assert_eq!(
            Parameter::positional("a", ValueKind::I32).collection().arity(),
            Arity::new(1, None)
        );
        assert_eq!(
            Parameter::remainder("r", ValueKind::String).optional().arity(),
            Arity::new(0, None)
        );
        assert_eq!(Parameter::resource("file", ValueKind::String).arity(), Arity::ZERO);
        assert_eq!(point().arity(), Arity::new(2, Some(2)));
        assert_eq!(point().optional().arity(), Arity::new(0, Some(2)));
    }

    #[test]
    fn default_value_implies_optional() {
        let p = Parameter::positional("z", ValueKind::I64).default_value("0");
        assert!(p.is_optional());
        assert_eq!(p.default_raw(), Some("0"));
    }

    #[test]
    fn usage_fragments() {
        assert_eq!(Parameter::positional("x", ValueKind::I32).usage(), "<x>");
        assert_eq!(Parameter::positional("x", ValueKind::I32).optional().usage(), "[x]");
        assert_eq!(Parameter::remainder("text", ValueKind::String).usage(), "<text...>");
        assert_eq!(point().usage(), "<x> <y>");
        assert_eq!(point().optional().usage(), "[<x> <y>]");
        assert_eq!(Parameter::resource("f", ValueKind::String).usage(), "");
    }
}
