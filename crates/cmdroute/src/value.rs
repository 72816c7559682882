use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use uuid::Uuid;

/// Declared type of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    F32,
    F64,
    String,
    DateTime,
    Date,
    Time,
    Duration,
    Uuid,
    Enum(Arc<EnumType>),
    /// Comma-separated sequence of the inner kind.
    List(Box<ValueKind>),
    /// A type only user-registered converters know about.
    Custom(String),
}

const SCALARS: &[(&str, ValueKind)] = &[
    ("bool", ValueKind::Bool),
    ("char", ValueKind::Char),
    ("i8", ValueKind::I8),
    ("i16", ValueKind::I16),
    ("i32", ValueKind::I32),
    ("i64", ValueKind::I64),
    ("i128", ValueKind::I128),
    ("isize", ValueKind::Isize),
    ("u8", ValueKind::U8),
    ("u16", ValueKind::U16),
    ("u32", ValueKind::U32),
    ("u64", ValueKind::U64),
    ("u128", ValueKind::U128),
    ("usize", ValueKind::Usize),
    ("f32", ValueKind::F32),
    ("f64", ValueKind::F64),
    ("string", ValueKind::String),
    ("datetime", ValueKind::DateTime),
    ("date", ValueKind::Date),
    ("time", ValueKind::Time),
    ("duration", ValueKind::Duration),
    ("uuid", ValueKind::Uuid),
];

impl ValueKind {
    /// Look up a built-in scalar kind by its type name.
    pub fn scalar(name: &str) -> Option<Self> {
        SCALARS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, k)| k.clone())
    }

    /// Exact converter key, e.g. `i32`, `enum:Color`, `list<u8>`.
    pub fn key(&self) -> String {
        match self {
            Self::Enum(def) => format!("enum:{}", def.name),
            Self::List(inner) => format!("list<{}>", inner.key()),
            Self::Custom(name) => name.clone(),
            scalar => scalar.family().to_string(),
        }
    }

    /// Converter family used when no exact key is registered.
    pub fn family(&self) -> &str {
        match self {
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Custom(name) => name.as_str(),
            scalar => SCALARS
                .iter()
                .find(|(_, k)| k == scalar)
                .map(|(n, _)| *n)
                .unwrap_or("string"),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Named enumeration whose variants are matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Canonical spelling of `raw`, if it names a variant.
    pub fn variant(&self, raw: &str) -> Option<&str> {
        self.variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(raw))
            .map(String::as_str)
    }
}

/// A bound parameter value or a command's response payload.
#[derive(Clone)]
pub enum Value {
    /// Placeholder for an absent optional parameter.
    Missing,
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    Isize(isize),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    Usize(usize),
    F32(f32),
    F64(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(Duration),
    Uuid(Uuid),
    Enum { type_name: String, variant: String },
    List(Vec<Value>),
    Json(serde_json::Value),
    /// Opaque value produced by a composite constructor, resource accessor or target.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Enum { variant, .. } => Some(variant.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer variant that fits into `i128`.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v.into()),
            Self::I128(v) => Some(v),
            Self::Isize(v) => i128::try_from(v).ok(),
            Self::U8(v) => Some(v.into()),
            Self::U16(v) => Some(v.into()),
            Self::U32(v) => Some(v.into()),
            Self::U64(v) => Some(v.into()),
            Self::U128(v) => i128::try_from(v).ok(),
            Self::Usize(v) => i128::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(v.into()),
            Self::F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Downcast an [`Value::Object`] payload.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Object(obj) => Arc::clone(obj).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// JSON rendering for transports that emit structured output.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Missing => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::I8(_) | Self::I16(_) | Self::I32(_) | Self::I64(_) | Self::Isize(_) => self
                .as_i128()
                .and_then(|v| i64::try_from(v).ok())
                .map(J::from)
                .unwrap_or(J::Null),
            Self::U8(_) | Self::U16(_) | Self::U32(_) | Self::U64(_) | Self::Usize(_) => self
                .as_i128()
                .and_then(|v| u64::try_from(v).ok())
                .map(J::from)
                .unwrap_or(J::Null),
            Self::I128(_) | Self::U128(_) => J::String(self.to_string()),
            Self::F32(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(J::Number)
                .unwrap_or(J::Null),
            Self::F64(v) => serde_json::Number::from_f64(*v)
                .map(J::Number)
                .unwrap_or(J::Null),
            Self::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Self::Json(v) => v.clone(),
            other => J::String(other.to_string()),
        }
    }
}

/// Render a duration in the compact form the converter accepts (`1h30m`, `250ms`).
pub(crate) fn format_duration(d: &Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    let mut rest = total_ms;
    let units = [("d", 86_400_000u128), ("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)];
    for (unit, ms) in units {
        let n = rest / ms;
        if n > 0 {
            out.push_str(&format!("{n}{unit}"));
            rest -= n * ms;
        }
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::I128(v) => write!(f, "{v}"),
            Self::Isize(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::U128(v) => write!(f, "{v}"),
            Self::Usize(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::DateTime(v) => f.write_str(&v.to_rfc3339()),
            Self::Date(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}"),
            Self::Duration(v) => f.write_str(&format_duration(v)),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Enum { variant, .. } => f.write_str(variant),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Json(v) => write!(f, "{v}"),
            Self::Object(_) => f.write_str("<object>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("Missing"),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Enum { type_name, variant } => write!(f, "Enum({type_name}::{variant})"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
            other => write!(f, "{}({other})", other.variant_name()),
        }
    }
}

impl Value {
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Missing => "Missing",
            Self::Bool(_) => "Bool",
            Self::Char(_) => "Char",
            Self::I8(_) => "I8",
            Self::I16(_) => "I16",
            Self::I32(_) => "I32",
            Self::I64(_) => "I64",
            Self::I128(_) => "I128",
            Self::Isize(_) => "Isize",
            Self::U8(_) => "U8",
            Self::U16(_) => "U16",
            Self::U32(_) => "U32",
            Self::U64(_) => "U64",
            Self::U128(_) => "U128",
            Self::Usize(_) => "Usize",
            Self::F32(_) => "F32",
            Self::F64(_) => "F64",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Date(_) => "Date",
            Self::Time(_) => "Time",
            Self::Duration(_) => "Duration",
            Self::Uuid(_) => "Uuid",
            Self::Enum { .. } => "Enum",
            Self::List(_) => "List",
            Self::Json(_) => "Json",
            Self::Object(_) => "Object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Missing, Missing) => true,
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (I128(a), I128(b)) => a == b,
            (Isize(a), Isize(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (U128(a), U128(b)) => a == b,
            (Usize(a), Usize(b)) => a == b,
            (F32(a), F32(b)) => a == b,
            (F64(a), F64(b)) => a == b,
            (String(a), String(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (
                Enum {
                    type_name: ta,
                    variant: va,
                },
                Enum {
                    type_name: tb,
                    variant: vb,
                },
            ) => ta == tb && va == vb,
            (List(a), List(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

/// Typed extraction of a bound [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

value_conversions! {
    bool => Bool,
    char => Char,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    i128 => I128,
    isize => Isize,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    u128 => U128,
    usize => Usize,
    f32 => F32,
    f64 => F64,
    String => String,
    DateTime<FixedOffset> => DateTime,
    NaiveDate => Date,
    NaiveTime => Time,
    Duration => Duration,
    Uuid => Uuid,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_list()?.iter().map(T::from_value).collect()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Missing => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}
