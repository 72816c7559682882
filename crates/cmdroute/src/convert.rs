//! Raw token to typed value conversion.
//!
//! Converters are looked up by the parameter's exact type key first
//! (`enum:Color`, `list<i32>`, a custom name) and then by family (`enum`,
//! `list`). Registering a key again replaces the earlier converter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::caller::Caller;
use crate::error::ConversionError;
use crate::param::Parameter;
use crate::services::Services;
use crate::value::{Value, ValueKind};

/// Everything a converter may consult besides the raw token.
pub struct ConvertCall<'a> {
    pub caller: &'a dyn Caller,
    pub parameter: &'a Parameter,
    /// Kind being produced; differs from the parameter's for list elements.
    pub kind: &'a ValueKind,
    pub services: &'a dyn Services,
    pub registry: &'a ConverterRegistry,
}

impl<'a> ConvertCall<'a> {
    pub fn error(&self, raw: &str, reason: impl Into<String>) -> ConversionError {
        ConversionError {
            parameter: self.parameter.name().to_string(),
            raw: raw.to_string(),
            expected: self.kind.key(),
            reason: reason.into(),
        }
    }

    /// Convert `raw` as another kind, e.g. an element of a sequence.
    pub fn convert_as(&self, kind: &ValueKind, raw: &str) -> Result<Value, ConversionError> {
        let call = ConvertCall {
            caller: self.caller,
            parameter: self.parameter,
            kind,
            services: self.services,
            registry: self.registry,
        };
        self.registry.convert(&call, raw)
    }
}

pub trait Converter: Send + Sync {
    fn convert(&self, call: &ConvertCall<'_>, raw: &str) -> Result<Value, ConversionError>;
}

impl<F> Converter for F
where
    F: Fn(&ConvertCall<'_>, &str) -> Result<Value, ConversionError> + Send + Sync,
{
    fn convert(&self, call: &ConvertCall<'_>, raw: &str) -> Result<Value, ConversionError> {
        self(call, raw)
    }
}

#[derive(Clone)]
pub struct ConverterRegistry {
    by_key: IndexMap<String, Arc<dyn Converter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! parse_numbers {
    ($registry:expr; $($key:literal => $ty:ty, $variant:ident);* $(;)?) => {
        $(
            $registry.register($key, |call: &ConvertCall<'_>, raw: &str| {
                raw.trim()
                    .parse::<$ty>()
                    .map(Value::$variant)
                    .map_err(|e| call.error(raw, e.to_string()))
            });
        )*
    };
}

impl ConverterRegistry {
    /// Registry with every built-in converter.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    pub fn empty() -> Self {
        Self {
            by_key: IndexMap::new(),
        }
    }

    pub fn register(
        &mut self,
        key: impl Into<String>,
        converter: impl Converter + 'static,
    ) -> &mut Self {
        let key = key.into();
        if self.by_key.contains_key(&key) {
            tracing::debug!(%key, "replacing converter");
        }
        self.by_key.insert(key, Arc::new(converter));
        self
    }

    pub fn lookup(&self, kind: &ValueKind) -> Option<&Arc<dyn Converter>> {
        self.by_key
            .get(kind.key().as_str())
            .or_else(|| self.by_key.get(kind.family()))
    }

    /// Whether `kind` (and, for lists, its element kind) has a converter.
    pub fn supports(&self, kind: &ValueKind) -> bool {
        if self.lookup(kind).is_none() {
            return false;
        }
        match kind {
            ValueKind::List(inner) => {
                self.by_key.contains_key(kind.key().as_str()) || self.supports(inner)
            }
            _ => true,
        }
    }

    pub fn convert(&self, call: &ConvertCall<'_>, raw: &str) -> Result<Value, ConversionError> {
        match self.lookup(call.kind) {
            Some(converter) => converter.convert(call, raw),
            None => Err(call.error(raw, "no converter registered")),
        }
    }

    fn register_builtins(&mut self) {
        parse_numbers! { self;
            "i8" => i8, I8;
            "i16" => i16, I16;
            "i32" => i32, I32;
            "i64" => i64, I64;
            "i128" => i128, I128;
            "isize" => isize, Isize;
            "u8" => u8, U8;
            "u16" => u16, U16;
            "u32" => u32, U32;
            "u64" => u64, U64;
            "u128" => u128, U128;
            "usize" => usize, Usize;
            "f32" => f32, F32;
            "f64" => f64, F64;
        }

        self.register("string", |_: &ConvertCall<'_>, raw: &str| {
            Ok(Value::String(raw.to_string()))
        });
        self.register("char", |call: &ConvertCall<'_>, raw: &str| {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err(call.error(raw, "expected a single character")),
            }
        });
        self.register("bool", |call: &ConvertCall<'_>, raw: &str| {
            parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| call.error(raw, "expected true/false, yes/no, on/off, 1/0 or y/n"))
        });
        self.register("datetime", |call: &ConvertCall<'_>, raw: &str| {
            parse_datetime(raw)
                .map(Value::DateTime)
                .ok_or_else(|| call.error(raw, "expected an RFC 3339 date-time"))
        });
        self.register("date", |call: &ConvertCall<'_>, raw: &str| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| call.error(raw, e.to_string()))
        });
        self.register("time", |call: &ConvertCall<'_>, raw: &str| {
            let raw_t = raw.trim();
            NaiveTime::parse_from_str(raw_t, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(raw_t, "%H:%M"))
                .map(Value::Time)
                .map_err(|e| call.error(raw, e.to_string()))
        });
        self.register("duration", |call: &ConvertCall<'_>, raw: &str| {
            parse_duration(raw)
                .map(Value::Duration)
                .ok_or_else(|| {
                    call.error(raw, "expected a duration such as 1h30m, 250ms or 01:30:00")
                })
        });
        self.register("uuid", |call: &ConvertCall<'_>, raw: &str| {
            Uuid::parse_str(raw.trim())
                .map(Value::Uuid)
                .map_err(|e| call.error(raw, e.to_string()))
        });
        self.register("enum", |call: &ConvertCall<'_>, raw: &str| {
            let ValueKind::Enum(def) = call.kind else {
                return Err(call.error(raw, "not an enum type"));
            };
            match def.variant(raw.trim()) {
                Some(variant) => Ok(Value::Enum {
                    type_name: def.name.clone(),
                    variant: variant.to_string(),
                }),
                None => Err(call.error(
                    raw,
                    format!("possible values: {}", def.variants.join(", ")),
                )),
            }
        });
        self.register("list", |call: &ConvertCall<'_>, raw: &str| {
            let ValueKind::List(inner) = call.kind else {
                return Err(call.error(raw, "not a list type"));
            };
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|item| call.convert_as(inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        });
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" | "y" => Some(true),
        "false" | "no" | "off" | "0" | "n" => Some(false),
        _ => None,
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<chrono::FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    // Offset-less input is taken as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

/// `1h30m`, `250ms`, `2d`, `90` (seconds), or `HH:MM:SS`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains(':') {
        let parts: Vec<&str> = raw.split(':').collect();
        let nums: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();
        return match nums?.as_slice() {
            [h, m, s] if *m < 60 && *s < 60 => h
                .checked_mul(3600)
                .and_then(|secs| secs.checked_add(m * 60 + s))
                .map(Duration::from_secs),
            [m, s] if *s < 60 => m
                .checked_mul(60)
                .and_then(|secs| secs.checked_add(*s))
                .map(Duration::from_secs),
            _ => None,
        };
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let n: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let part = match unit {
            "ms" => Duration::from_millis(n),
            "s" | "sec" => Duration::from_secs(n),
            "m" | "min" => Duration::from_secs(n.checked_mul(60)?),
            "h" => Duration::from_secs(n.checked_mul(3600)?),
            "d" => Duration::from_secs(n.checked_mul(86_400)?),
            "w" => Duration::from_secs(n.checked_mul(604_800)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
    }
    Some(total)
}
