use std::sync::Arc;

use anyhow::anyhow;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::caller::Caller;
use crate::cancel::CancelSignal;
use crate::error::Failure;
use crate::handler::{Flow, ResultHandler};
use crate::invoker::Returned;
use crate::outcome::{Invoked, Outcome, Stage};
use crate::services::Services;
use crate::value::Value;

/// Reduce a target's return to the payload to respond with, awaiting
/// deferred values until a plain value or `Void` is reached.
pub(crate) fn reduce<'a>(
    command: &'a str,
    returned: Returned,
    cancel: &'a CancelSignal,
) -> BoxFuture<'a, Result<Option<Value>, Failure>> {
    async move {
        match returned {
            Returned::Void => Ok(None),
            Returned::Value(value) => Ok(Some(value)),
            Returned::Deferred(future) => {
                let inner = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Failure::Cancelled),
                    inner = future => inner,
                };
                match inner {
                    Ok(next) => reduce(command, next, cancel).await,
                    Err(error) => Err(Failure::InvocationFault {
                        command: command.to_string(),
                        error,
                    }),
                }
            }
        }
    }
    .boxed()
}

/// Send the response of a successful outcome, then offer the outcome to every
/// handler until one claims it.
pub(crate) async fn finish(
    outcome: Outcome,
    caller: &dyn Caller,
    services: &dyn Services,
    handlers: &[Arc<dyn ResultHandler>],
    cancel: &CancelSignal,
) -> Outcome {
    let outcome = match outcome {
        Outcome::Invoke(Ok(Invoked {
            command,
            response: Some(payload),
        })) => {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Failure::Cancelled),
                sent = caller.respond(payload.clone()) => sent.map_err(|error| {
                    let context = format!("responding to '{}'", command.display_path());
                    Failure::Unhandled(anyhow!(error).context(context))
                }),
            };
            match sent {
                Ok(()) => Outcome::Invoke(Ok(Invoked {
                    command,
                    response: Some(payload),
                })),
                Err(failure) => Outcome::failed(Stage::Invoke, Some(command), failure),
            }
        }
        other => other,
    };

    for handler in handlers {
        let flow = match outcome.failure() {
            None => handler.on_success(caller, &outcome, services).await,
            Some(failure) => handler.on_failure(caller, &outcome, failure).await,
        };
        if flow == Flow::Claimed {
            break;
        }
    }
    outcome
}
