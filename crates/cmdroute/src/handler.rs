use futures_util::future::BoxFuture;

use crate::caller::Caller;
use crate::error::Failure;
use crate::outcome::Outcome;
use crate::services::Services;

/// Returned by a handler to stop or continue propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Claimed,
}

/// Observer of terminal outcomes, offered each one in registration order.
pub trait ResultHandler: Send + Sync {
    fn on_success<'a>(
        &'a self,
        _caller: &'a dyn Caller,
        _outcome: &'a Outcome,
        _services: &'a dyn Services,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async { Flow::Continue })
    }

    /// `failure.root_cause()` is the innermost error behind a fault.
    fn on_failure<'a>(
        &'a self,
        _caller: &'a dyn Caller,
        _outcome: &'a Outcome,
        _failure: &'a Failure,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async { Flow::Continue })
    }
}

/// Logs every outcome through `tracing` and never claims it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHandler;

impl ResultHandler for TracingHandler {
    fn on_success<'a>(
        &'a self,
        caller: &'a dyn Caller,
        outcome: &'a Outcome,
        _services: &'a dyn Services,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            let command = outcome.command().map(|c| c.display_path()).unwrap_or_default();
            tracing::info!(caller = caller.kind(), %command, "command completed");
            Flow::Continue
        })
    }

    fn on_failure<'a>(
        &'a self,
        caller: &'a dyn Caller,
        outcome: &'a Outcome,
        failure: &'a Failure,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            let stage = outcome.stage();
            if failure.is_fault() {
                tracing::warn!(
                    caller = caller.kind(),
                    %stage,
                    cause = %failure.root_cause(),
                    "{failure}"
                );
            } else {
                tracing::debug!(caller = caller.kind(), %stage, "{failure}");
            }
            Flow::Continue
        })
    }
}
