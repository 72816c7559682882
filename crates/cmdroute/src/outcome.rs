use std::fmt;
use std::sync::Arc;

use crate::error::Failure;
use crate::tree::Command;
use crate::value::Value;

/// Pipeline stage an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Parse,
    Condition,
    Invoke,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Search => "search",
            Self::Parse => "parse",
            Self::Condition => "condition",
            Self::Invoke => "invoke",
        })
    }
}

/// A target ran to completion.
#[derive(Debug, Clone)]
pub struct Invoked {
    pub command: Arc<Command>,
    /// `None` when the target returned nothing.
    pub response: Option<Value>,
}

/// The command a failure is attributed to, if resolution got that far.
#[derive(Debug)]
pub struct Attempt {
    pub command: Option<Arc<Command>>,
    pub failure: Failure,
}

/// Result of one request, one case per pipeline stage.
#[derive(Debug)]
pub enum Outcome {
    Search(Result<Arc<Command>, Attempt>),
    Parse(Result<Arc<Command>, Attempt>),
    Condition(Result<Arc<Command>, Attempt>),
    Invoke(Result<Invoked, Attempt>),
}

impl Outcome {
    pub(crate) fn failed(stage: Stage, command: Option<Arc<Command>>, failure: Failure) -> Self {
        let attempt = Err(Attempt { command, failure });
        match stage {
            Stage::Search => Self::Search(attempt),
            Stage::Parse => Self::Parse(attempt),
            Stage::Condition => Self::Condition(attempt),
            Stage::Invoke => Self::Invoke(
                attempt.map(|command: Arc<Command>| Invoked {
                    command,
                    response: None,
                }),
            ),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Search(_) => Stage::Search,
            Self::Parse(_) => Stage::Parse,
            Self::Condition(_) => Stage::Condition,
            Self::Invoke(_) => Stage::Invoke,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Invoke(Ok(_)))
    }

    fn attempt(&self) -> Option<&Attempt> {
        match self {
            Self::Search(Err(a))
            | Self::Parse(Err(a))
            | Self::Condition(Err(a))
            | Self::Invoke(Err(a)) => Some(a),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.attempt().map(|a| &a.failure)
    }

    pub fn command(&self) -> Option<&Arc<Command>> {
        match self {
            Self::Search(Ok(c)) | Self::Parse(Ok(c)) | Self::Condition(Ok(c)) => Some(c),
            Self::Invoke(Ok(invoked)) => Some(&invoked.command),
            other => other.attempt().and_then(|a| a.command.as_ref()),
        }
    }

    pub fn response(&self) -> Option<&Value> {
        match self {
            Self::Invoke(Ok(invoked)) => invoked.response.as_ref(),
            _ => None,
        }
    }

    /// Whether this outcome's failure beats `other`'s. Ties keep `other`.
    pub(crate) fn outranks(&self, other: &Outcome) -> bool {
        match (self.failure(), other.failure()) {
            (Some(a), Some(b)) => a.progress() > b.progress(),
            (None, Some(_)) => true,
            _ => false,
        }
    }

    /// Whether a target was dispatched; no further candidates may be tried.
    pub(crate) fn is_terminal(&self) -> bool {
        match self {
            Self::Invoke(_) => true,
            Self::Condition(Err(a)) => matches!(
                a.failure,
                Failure::ConditionUnmet {
                    trigger: crate::condition::Trigger::AfterInvoke,
                    ..
                }
            ),
            _ => matches!(self.failure(), Some(Failure::Cancelled)),
        }
    }
}
