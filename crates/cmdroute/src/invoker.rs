use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::caller::Caller;
use crate::cancel::CancelSignal;
use crate::error::Failure;
use crate::services::{Dependency, Service, Services};
use crate::value::{FromValue, Value};

/// What a target hands back.
pub enum Returned {
    Void,
    Value(Value),
    /// Awaited by the finalizer; may itself resolve to another `Returned`.
    Deferred(BoxFuture<'static, anyhow::Result<Returned>>),
}

impl Returned {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Returned>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }
}

impl fmt::Debug for Returned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("Void"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<Value> for Returned {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Bound arguments and injected services for one call.
pub struct Invocation {
    command: String,
    arguments: Vec<Value>,
    services: Vec<(Dependency, Option<Service>)>,
    caller: Option<Arc<dyn Caller>>,
    cancel: CancelSignal,
}

impl Invocation {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[Value] {
        &self.arguments
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// Typed argument at `index`. A type mismatch is a declaration bug and
    /// surfaces as an invocation fault.
    pub fn arg<T: FromValue>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .arguments
            .get(index)
            .ok_or_else(|| anyhow!("{}: no argument at index {index}", self.command))?;
        T::from_value(value).ok_or_else(|| {
            anyhow!(
                "{}: argument {index} ({value:?}) is not a {}",
                self.command,
                std::any::type_name::<T>()
            )
        })
    }

    /// Like [`Invocation::arg`] but `Missing` maps to `None`.
    pub fn opt<T: FromValue>(&self, index: usize) -> anyhow::Result<Option<T>> {
        self.arg::<Option<T>>(index)
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let wanted = Dependency::of::<T>();
        self.services
            .iter()
            .find(|(dep, _)| dep.type_id() == wanted.type_id())
            .and_then(|(_, service)| service.clone())
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Present only for targets declared `with_context`.
    pub fn caller(&self) -> Option<&Arc<dyn Caller>> {
        self.caller.as_ref()
    }

    pub fn cancel(&self) -> &CancelSignal {
        &self.cancel
    }
}

type TargetFn = dyn Fn(Invocation) -> BoxFuture<'static, anyhow::Result<Returned>> + Send + Sync;

/// A command's invocation target.
#[derive(Clone)]
pub struct Target {
    name: String,
    dependencies: Vec<Dependency>,
    bind_context: bool,
    func: Arc<TargetFn>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("bind_context", &self.bind_context)
            .finish_non_exhaustive()
    }
}

impl Target {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Returned>> + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            bind_context: false,
            func: Arc::new(move |inv: Invocation| -> BoxFuture<'static, anyhow::Result<Returned>> {
                Box::pin(func(inv))
            }),
        }
    }

    pub fn sync<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Invocation) -> anyhow::Result<Returned> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            bind_context: false,
            func: Arc::new(move |inv: Invocation| -> BoxFuture<'static, anyhow::Result<Returned>> {
                let func = Arc::clone(&func);
                Box::pin(async move { func(inv) })
            }),
        }
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Hand the caller to the target through [`Invocation::caller`].
    pub fn with_context(mut self) -> Self {
        self.bind_context = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `target` with bound `arguments`. Errors, panics and missing required
/// services become [`Failure::InvocationFault`].
pub(crate) async fn invoke(
    command: &str,
    target: &Target,
    arguments: Vec<Value>,
    services: &dyn Services,
    caller: &Arc<dyn Caller>,
    cancel: &CancelSignal,
) -> Result<Returned, Failure> {
    let fault = |error: anyhow::Error| Failure::InvocationFault {
        command: command.to_string(),
        error,
    };

    let mut resolved = Vec::with_capacity(target.dependencies.len());
    for dependency in &target.dependencies {
        let service = services.resolve(dependency);
        if service.is_none() && !dependency.is_optional() {
            return Err(fault(anyhow!(
                "required service {} is not available",
                dependency.type_name()
            )));
        }
        resolved.push((dependency.clone(), service));
    }

    let invocation = Invocation {
        command: command.to_string(),
        arguments,
        services: resolved,
        caller: target.bind_context.then(|| Arc::clone(caller)),
        cancel: cancel.clone(),
    };

    tracing::debug!(command, target = %target.name, "invoking");
    let func = Arc::clone(&target.func);
    let future = std::panic::catch_unwind(AssertUnwindSafe(move || func(invocation)))
        .map_err(|payload| fault(anyhow!("target panicked: {}", panic_message(&*payload))))?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Failure::Cancelled),
        result = AssertUnwindSafe(future).catch_unwind() => match result {
            Ok(Ok(returned)) => Ok(returned),
            Ok(Err(error)) => Err(fault(error)),
            Err(payload) => Err(fault(anyhow!("target panicked: {}", panic_message(&*payload)))),
        },
    }
}
