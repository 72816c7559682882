//! Parameter binding.
//!
//! Binding walks a command's parameters in order against one cursor. It is
//! fail-fast: the first conversion or arity error ends the candidate.

use cmdroute_args::{ArgumentSet, Cursor};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::caller::Caller;
use crate::cancel::CancelSignal;
use crate::config::DispatchConfig;
use crate::convert::{ConvertCall, ConverterRegistry};
use crate::error::{ArityReason, ConversionError, Failure};
use crate::param::{ParamShape, Parameter};
use crate::services::Services;
use crate::tree::Command;
use crate::value::{Value, ValueKind};

pub(crate) struct BindContext<'a> {
    pub caller: &'a dyn Caller,
    pub services: &'a dyn Services,
    pub registry: &'a ConverterRegistry,
    pub config: &'a DispatchConfig,
    pub cancel: &'a CancelSignal,
    pub command: &'a Command,
}

/// Parameters that a named token in `args` satisfies.
fn named_matches(parameters: &[Parameter], args: &ArgumentSet) -> usize {
    parameters
        .iter()
        .flat_map(Parameter::named_leaves)
        .filter(|p| args.named(p.name()).is_some())
        .count()
}

/// Reject a candidate on token count alone, before anything is converted.
pub fn check_arity(command: &Command, cursor: &Cursor<'_>) -> Result<(), Failure> {
    let arity = command.arity();
    let remaining = cursor.remaining();
    let named = named_matches(command.parameters(), cursor.args());

    let available = remaining + named;

    let reason = if available < arity.min {
        Some(ArityReason::TooFew { min: arity.min, available })
    } else {
        arity
            .max
            .filter(|max| available > *max)
            .map(|max| ArityReason::TooMany { max, available })
    };

    match reason {
        Some(reason) => {
            tracing::debug!(command = %command.display_path(), %reason, "arity rejected");
            Err(Failure::ArityMismatch {
                command: command.display_path(),
                reason,
            })
        }
        None => Ok(()),
    }
}

/// Bind every parameter of `ctx.command` starting at `cursor`.
pub(crate) async fn bind(
    ctx: &BindContext<'_>,
    mut cursor: Cursor<'_>,
) -> Result<Vec<Value>, Failure> {
    bind_list(ctx, ctx.command.parameters(), &mut cursor).await
}

fn bind_list<'a>(
    ctx: &'a BindContext<'a>,
    parameters: &'a [Parameter],
    cursor: &'a mut Cursor<'_>,
) -> BoxFuture<'a, Result<Vec<Value>, Failure>> {
    async move {
        let mut values = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let value = match parameter.shape() {
                ParamShape::Remainder { separator } => {
                    let value = bind_remainder(ctx, parameter, separator.as_deref(), cursor)?;
                    values.push(value);
                    break;
                }
                ParamShape::Resource => bind_resource(ctx, parameter).await?,
                ParamShape::Composite(composite) => {
                    let start = *cursor;
                    let bound = bind_list(ctx, composite.parameters(), cursor).await;
                    match bound {
                        Ok(sub_values) => match composite.construct(sub_values) {
                            Ok(value) => value,
                            Err(_) if parameter.is_optional() => {
                                *cursor = start;
                                Value::Missing
                            }
                            Err(error) => {
                                return Err(Failure::ConversionFailure(ConversionError {
                                    parameter: parameter.name().to_string(),
                                    raw: start.args().join_from(start.position(), " "),
                                    expected: parameter.kind().key(),
                                    reason: format!("{error:#}"),
                                }));
                            }
                        },
                        Err(failure)
                            if parameter.is_optional() && failure.is_recoverable_bind() =>
                        {
                            tracing::trace!(
                                parameter = parameter.name(),
                                %failure,
                                "optional composite skipped"
                            );
                            *cursor = start;
                            Value::Missing
                        }
                        Err(failure) => return Err(failure),
                    }
                }
                ParamShape::Positional if parameter.is_collection() => {
                    bind_collection(ctx, parameter, cursor)?
                }
                ParamShape::Positional => {
                    let raw = cursor.args().named(parameter.name()).or_else(|| cursor.next());
                    match raw {
                        Some(raw) => convert(ctx, parameter, parameter.kind(), raw)?,
                        None => absent(ctx, parameter)?,
                    }
                }
            };
            values.push(value);
        }
        Ok(values)
    }
    .boxed()
}

fn bind_remainder(
    ctx: &BindContext<'_>,
    parameter: &Parameter,
    separator: Option<&str>,
    cursor: &mut Cursor<'_>,
) -> Result<Value, Failure> {
    if cursor.is_exhausted() {
        if let Some(raw) = cursor.args().named(parameter.name()) {
            return convert(ctx, parameter, parameter.kind(), raw);
        }
        return absent(ctx, parameter);
    }
    if parameter.is_collection() {
        let raws = cursor.take_remaining();
        return convert_each(ctx, parameter, &raws);
    }
    let separator = separator.unwrap_or(&ctx.config.remainder_separator);
    let joined = cursor.join_remaining(separator);
    convert(ctx, parameter, parameter.kind(), &joined)
}

fn bind_collection(
    ctx: &BindContext<'_>,
    parameter: &Parameter,
    cursor: &mut Cursor<'_>,
) -> Result<Value, Failure> {
    if let Some(raw) = cursor.args().named(parameter.name()) {
        return convert_each(ctx, parameter, &[raw.to_string()]);
    }
    if cursor.is_exhausted() {
        return absent(ctx, parameter);
    }
    let raws = cursor.take_remaining();
    convert_each(ctx, parameter, &raws)
}

async fn bind_resource(ctx: &BindContext<'_>, parameter: &Parameter) -> Result<Value, Failure> {
    let resource = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Failure::Cancelled),
        resource = ctx.caller.resource() => resource,
    };
    match resource {
        Ok(Some(value)) => Ok(value),
        Ok(None) if parameter.is_optional() => Ok(Value::Missing),
        Ok(None) => Err(Failure::ArityMismatch {
            command: ctx.command.display_path(),
            reason: ArityReason::Missing {
                parameter: parameter.name().to_string(),
            },
        }),
        Err(error) => Err(Failure::Unhandled(
            error.context(format!("reading resource for '{}'", parameter.name())),
        )),
    }
}

/// Value for a parameter with no token: its default, `Missing`, or an error.
fn absent(ctx: &BindContext<'_>, parameter: &Parameter) -> Result<Value, Failure> {
    if let Some(raw) = parameter.default_raw() {
        return if parameter.is_collection() {
            convert_each(ctx, parameter, &[raw.to_string()])
        } else {
            convert(ctx, parameter, parameter.kind(), raw)
        };
    }
    if parameter.is_optional() {
        return Ok(Value::Missing);
    }
    Err(Failure::ArityMismatch {
        command: ctx.command.display_path(),
        reason: ArityReason::Missing {
            parameter: parameter.name().to_string(),
        },
    })
}

fn convert(
    ctx: &BindContext<'_>,
    parameter: &Parameter,
    kind: &ValueKind,
    raw: &str,
) -> Result<Value, Failure> {
    let call = ConvertCall {
        caller: ctx.caller,
        parameter,
        kind,
        services: ctx.services,
        registry: ctx.registry,
    };
    ctx.registry.convert(&call, raw).map_err(|error| {
        tracing::debug!(command = %ctx.command.display_path(), %error, "conversion failed");
        Failure::ConversionFailure(error)
    })
}

fn convert_each(
    ctx: &BindContext<'_>,
    parameter: &Parameter,
    raws: &[String],
) -> Result<Value, Failure> {
    raws.iter()
        .map(|raw| convert(ctx, parameter, parameter.kind(), raw))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cmdroute_args::tokenize;

    use crate::caller::BufferedCaller;
    use crate::invoker::{Returned, Target};
    use crate::services::NoServices;
    use crate::tree::{CommandSpec, ComponentTree};

    fn command(params: Vec<Parameter>) -> Arc<Command> {
        let mut spec = CommandSpec::new(["cmd"], Target::sync("cmd", |_| Ok(Returned::Void)));
        spec.parameters = params;
        let tree = ComponentTree::build(vec![spec.into()]).unwrap();
        tree.commands().next().cloned().unwrap()
    }

    async fn bind_line(
        params: Vec<Parameter>,
        line: &str,
        registry: &ConverterRegistry,
    ) -> Result<Vec<Value>, Failure> {
        let command = command(params);
        let caller = BufferedCaller::new(tokenize(line)).with_resource(Value::from("payload"));
        let config = DispatchConfig::default();
        let cancel = CancelSignal::never();
        let ctx = BindContext {
            caller: &caller,
            services: &NoServices,
            registry,
            config: &config,
            cancel: &cancel,
            command: &command,
        };
        let cursor = Cursor::at(caller.arguments(), 1);
        check_arity(&command, &cursor)?;
        bind(&ctx, cursor).await
    }

    fn xy() -> Vec<Parameter> {
        vec![
            Parameter::positional("x", ValueKind::I64),
            Parameter::positional("y", ValueKind::I64),
        ]
    }

    #[tokio::test]
    async fn arity_is_checked_before_any_conversion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ConverterRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register("i64", move |_: &ConvertCall<'_>, raw: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::I64(raw.parse().unwrap_or_default()))
        });

        let failure = bind_line(xy(), "cmd 1", &registry).await.unwrap_err();
        assert!(matches!(
            failure,
            Failure::ArityMismatch {
                reason: ArityReason::TooFew { min: 2, available: 1 },
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let failure = bind_line(xy(), "cmd 1 2 3", &registry).await.unwrap_err();
        assert!(matches!(
            failure,
            Failure::ArityMismatch { reason: ArityReason::TooMany { .. }, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn named_tokens_take_precedence_and_count_toward_arity() {
        let registry = ConverterRegistry::new();
        let values = bind_line(xy(), "cmd --y 9 4", &registry).await.unwrap();
        assert_eq!(values, vec![Value::I64(4), Value::I64(9)]);

        let failure = bind_line(xy(), "cmd --y 9 4 5", &registry).await.unwrap_err();
        assert!(matches!(
            failure,
            Failure::ArityMismatch {
                reason: ArityReason::TooMany { max: 2, available: 3 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn optional_and_default_values() {
        let registry = ConverterRegistry::new();
        let params = vec![
            Parameter::positional("x", ValueKind::I64),
            Parameter::positional("y", ValueKind::I64).optional(),
            Parameter::positional("z", ValueKind::I64).default_value("7"),
        ];
        let values = bind_line(params, "cmd 1", &registry).await.unwrap();
        assert_eq!(values, vec![Value::I64(1), Value::Missing, Value::I64(7)]);
    }

    #[tokio::test]
    async fn remainder_joins_or_collects() {
        let registry = ConverterRegistry::new();
        let joined = bind_line(
            vec![Parameter::remainder("text", ValueKind::String)],
            "cmd hello big world",
            &registry,
        )
        .await
        .unwrap();
        assert_eq!(joined, vec![Value::from("hello big world")]);

        let items = bind_line(
            vec![Parameter::remainder("n", ValueKind::U8).collection()],
            "cmd 1 2 3",
            &registry,
        )
        .await
        .unwrap();
        assert_eq!(items, vec![Value::List(vec![Value::U8(1), Value::U8(2), Value::U8(3)])]);

        let dashed = bind_line(
            vec![Parameter::remainder("text", ValueKind::String).separator("-")],
            "cmd a b",
            &registry,
        )
        .await
        .unwrap();
        assert_eq!(dashed, vec![Value::from("a-b")]);
    }

    #[tokio::test]
    async fn optional_composite_with_missing_part_yields_missing_and_rewinds() {
        let registry = ConverterRegistry::new();
        let params = vec![
            Parameter::composite(
                "point",
                vec![
                    Parameter::positional("px", ValueKind::I32),
                    Parameter::positional("py", ValueKind::I32),
                ],
                |parts| Ok(Value::List(parts)),
            )
            .optional(),
            Parameter::positional("label", ValueKind::String).optional(),
        ];
        let values = bind_line(params, "cmd origin", &registry).await.unwrap();
        assert_eq!(values, vec![Value::Missing, Value::from("origin")]);
    }

    #[tokio::test]
    async fn required_composite_failure_fails_bind() {
        let registry = ConverterRegistry::new();
        let params = vec![Parameter::composite(
            "point",
            vec![
                Parameter::positional("px", ValueKind::I32),
                Parameter::positional("py", ValueKind::I32),
            ],
            |parts| Ok(Value::List(parts)),
        )];
        let failure = bind_line(params, "cmd 1 nope", &registry).await.unwrap_err();
        assert!(matches!(failure, Failure::ConversionFailure(ref e) if e.parameter == "py"));
    }

    #[tokio::test]
    async fn resource_parameters_take_no_tokens() {
        let registry = ConverterRegistry::new();
        let params = vec![
            Parameter::resource("body", ValueKind::String),
            Parameter::positional("x", ValueKind::I64),
        ];
        let values = bind_line(params, "cmd 5", &registry).await.unwrap();
        assert_eq!(values, vec![Value::from("payload"), Value::I64(5)]);
    }

    #[tokio::test]
    async fn conversion_failure_names_parameter() {
        let registry = ConverterRegistry::new();
        let failure = bind_line(xy(), "cmd 1 two", &registry).await.unwrap_err();
        let Failure::ConversionFailure(error) = failure else {
            panic!("expected conversion failure");
        };
        assert_eq!(error.parameter, "y");
        assert_eq!(error.raw, "two");
        assert_eq!(error.expected, "i64");
    }
}
