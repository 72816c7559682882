use std::fmt;

use thiserror::Error;

use crate::condition::Trigger;

/// Why a candidate's token count was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArityReason {
    TooFew { min: usize, available: usize },
    TooMany { max: usize, available: usize },
    /// A required parameter had neither a token nor a default.
    Missing { parameter: String },
}

impl fmt::Display for ArityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFew { min, available } => {
                write!(f, "expected at least {min} argument(s), got {available}")
            }
            Self::TooMany { max, available } => {
                write!(f, "expected at most {max} argument(s), got {available}")
            }
            Self::Missing { parameter } => write!(f, "missing required argument '{parameter}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value '{raw}' for '{parameter}' ({expected}): {reason}")]
pub struct ConversionError {
    pub parameter: String,
    pub raw: String,
    pub expected: String,
    pub reason: String,
}

/// A caller refused or failed to deliver a response.
#[derive(Debug, Error)]
pub enum RespondError {
    #[error("a response was already sent for this request")]
    AlreadyResponded,
    #[error("response transport failed: {0}")]
    Transport(#[from] std::io::Error),
}

/// Every way a request can end without a successful response.
///
/// Expected failures are plain values; fault variants carry the
/// `anyhow::Error` raised by a target, condition or collaborator.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("unknown command '{input}'")]
    ComponentsNotFound { input: String },
    #[error("'{path}' needs a subcommand")]
    RouteIncomplete { path: String },
    #[error("{command}: {reason}")]
    ArityMismatch { command: String, reason: ArityReason },
    #[error(transparent)]
    ConversionFailure(#[from] ConversionError),
    #[error("condition '{condition}' not met: {message}")]
    ConditionUnmet {
        condition: String,
        message: String,
        trigger: Trigger,
    },
    #[error("{command} failed: {error:#}")]
    InvocationFault {
        command: String,
        error: anyhow::Error,
    },
    #[error("unhandled: {0:#}")]
    Unhandled(anyhow::Error),
    #[error("request cancelled")]
    Cancelled,
}

impl Failure {
    /// How far the pipeline got before this failure.
    ///
    /// When several candidates fail the one with the greatest progress is
    /// reported.
    pub fn progress(&self) -> u8 {
        match self {
            Self::ComponentsNotFound { .. } => 0,
            Self::RouteIncomplete { .. } => 1,
            Self::ConditionUnmet {
                trigger: Trigger::AfterInvoke,
                ..
            } => 6,
            Self::ConditionUnmet { .. } => 2,
            Self::ArityMismatch { .. } => 3,
            Self::ConversionFailure(_) => 4,
            Self::InvocationFault { .. } => 5,
            Self::Unhandled(_) => 7,
            Self::Cancelled => 8,
        }
    }

    /// Failures a binder may absorb when an optional composite cannot be built.
    pub(crate) fn is_recoverable_bind(&self) -> bool {
        matches!(self, Self::ArityMismatch { .. } | Self::ConversionFailure(_))
    }

    /// The innermost error behind a fault; the failure itself otherwise.
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            Self::InvocationFault { error, .. } | Self::Unhandled(error) => error.root_cause(),
            other => other,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::InvocationFault { .. } | Self::Unhandled(_))
    }
}

/// A component tree or dispatcher could not be assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{kind} at '{path}' has no alias")]
    MissingAlias { kind: &'static str, path: String },
    #[error("invalid alias '{alias}' at '{path}'")]
    InvalidAlias { alias: String, path: String },
    #[error("alias '{alias}' is declared twice under '{path}'")]
    DuplicateAlias { alias: String, path: String },
    #[error("group '{path}' declares more than one default command")]
    DuplicateDefault { path: String },
    #[error("{command}: remainder parameter '{parameter}' must be last")]
    RemainderNotLast { command: String, parameter: String },
    #[error("{command}: remainder parameter '{parameter}' cannot be nested in a composite")]
    NestedRemainder { command: String, parameter: String },
    #[error("{command}: parameter '{parameter}' is declared twice")]
    DuplicateParameter { command: String, parameter: String },
    #[error("{command}: composite parameter '{parameter}' has no sub-parameters")]
    EmptyComposite { command: String, parameter: String },
    #[error("{command}: no converter registered for '{type_key}' (parameter '{parameter}')")]
    MissingConverter {
        command: String,
        parameter: String,
        type_key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_orders_pipeline_stages() {
        let pre = Failure::ConditionUnmet {
            condition: "c".into(),
            message: "no".into(),
            trigger: Trigger::BeforeInvoke,
        };
        let arity = Failure::ArityMismatch {
            command: "x".into(),
            reason: ArityReason::TooFew {
                min: 1,
                available: 0,
            },
        };
        let conversion = Failure::ConversionFailure(ConversionError {
            parameter: "p".into(),
            raw: "r".into(),
            expected: "i32".into(),
            reason: "bad".into(),
        });
        let fault = Failure::InvocationFault {
            command: "x".into(),
            error: anyhow::anyhow!("boom"),
        };
        let post = Failure::ConditionUnmet {
            condition: "c".into(),
            message: "no".into(),
            trigger: Trigger::AfterInvoke,
        };
        let ranks: Vec<u8> = [&pre, &arity, &conversion, &fault, &post]
            .iter()
            .map(|f| f.progress())
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]), "{ranks:?}");
    }

    #[test]
    fn root_cause_unwraps_fault_chain() {
        let inner = std::io::Error::other("disk gone");
        let err = anyhow::Error::new(inner).context("loading state");
        let failure = Failure::InvocationFault {
            command: "load".into(),
            error: err,
        };
        assert_eq!(failure.root_cause().to_string(), "disk gone");
        assert!(failure.to_string().contains("loading state: disk gone"));
    }
}
