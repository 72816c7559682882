use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use cmdroute_args::ArgumentSet;
use futures_util::future::BoxFuture;

use crate::error::RespondError;
use crate::value::Value;

/// The transport-facing side of one request.
pub trait Caller: Send + Sync {
    fn arguments(&self) -> &ArgumentSet;

    /// Discriminator matched against [`crate::Condition::caller_kind`].
    fn kind(&self) -> &str {
        "generic"
    }

    /// Deliver the response payload. The dispatcher calls this at most once.
    fn respond<'a>(&'a self, payload: Value) -> BoxFuture<'a, Result<(), RespondError>>;

    /// Payload for resource parameters, e.g. an uploaded file or request body.
    fn resource<'a>(&'a self) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        Box::pin(async { Ok(None) })
    }
}

/// One-shot latch for callers that must reject a second response.
#[derive(Debug, Default)]
pub struct ResponseGuard {
    sent: AtomicBool,
}

impl ResponseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> Result<(), RespondError> {
        if self.sent.swap(true, Ordering::SeqCst) {
            Err(RespondError::AlreadyResponded)
        } else {
            Ok(())
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }
}

/// In-memory caller that records responses.
///
/// Useful for embedding the engine behind a transport that collects the
/// response after dispatch returns.
#[derive(Debug, Default)]
pub struct BufferedCaller {
    arguments: ArgumentSet,
    kind: String,
    resource: Option<Value>,
    guard: ResponseGuard,
    responses: Mutex<Vec<Value>>,
}

impl BufferedCaller {
    pub fn new(arguments: ArgumentSet) -> Self {
        Self {
            arguments,
            kind: "generic".to_string(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn responses(&self) -> Vec<Value> {
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Caller for BufferedCaller {
    fn arguments(&self) -> &ArgumentSet {
        &self.arguments
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn respond<'a>(&'a self, payload: Value) -> BoxFuture<'a, Result<(), RespondError>> {
        Box::pin(async move {
            self.guard.claim()?;
            self.responses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(payload);
            Ok(())
        })
    }

    fn resource<'a>(&'a self) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        Box::pin(async move { Ok(self.resource.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_caller_rejects_second_response() {
        let caller = BufferedCaller::new(ArgumentSet::default());
        caller.respond(Value::from("first")).await.unwrap();
        let err = caller.respond(Value::from("second")).await.unwrap_err();
        assert!(matches!(err, RespondError::AlreadyResponded));
        assert_eq!(caller.responses(), vec![Value::from("first")]);
    }
}
