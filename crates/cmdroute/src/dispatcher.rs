use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;

use cmdroute_args::{ArgumentSet, Cursor};
use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::binder::{self, BindContext};
use crate::caller::Caller;
use crate::cancel::CancelSignal;
use crate::condition::{self, ConditionContext, Trigger};
use crate::config::DispatchConfig;
use crate::convert::ConverterRegistry;
use crate::error::{BuildError, Failure};
use crate::finalize;
use crate::handler::ResultHandler;
use crate::invoker;
use crate::outcome::{Invoked, Outcome, Stage};
use crate::param::{ParamShape, Parameter};
use crate::resolver::{self, Candidate};
use crate::services::{NoServices, Services};
use crate::tree::{Command, ComponentTree};

/// Per-request collaborators.
#[derive(Clone)]
pub struct ExecuteOptions {
    pub services: Arc<dyn Services>,
    pub cancel: CancelSignal,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            services: Arc::new(NoServices),
            cancel: CancelSignal::never(),
        }
    }
}

impl ExecuteOptions {
    pub fn with_services(mut self, services: Arc<dyn Services>) -> Self {
        self.services = services;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

struct Inner {
    tree: ComponentTree,
    converters: ConverterRegistry,
    handlers: Vec<Arc<dyn ResultHandler>>,
    config: DispatchConfig,
}

/// Runs requests through resolve, guard, bind, invoke and finalize.
///
/// Cheap to clone; every clone shares the same tree and registries.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

fn check_converters(
    command: &Command,
    parameters: &[Parameter],
    converters: &ConverterRegistry,
) -> Result<(), BuildError> {
    for parameter in parameters {
        match parameter.shape() {
            ParamShape::Resource => {}
            ParamShape::Composite(composite) => {
                check_converters(command, composite.parameters(), converters)?
            }
            _ if !converters.supports(parameter.kind()) => {
                return Err(BuildError::MissingConverter {
                    command: command.display_path(),
                    parameter: parameter.name().to_string(),
                    type_key: parameter.kind().key(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

impl Dispatcher {
    /// Fails if a parameter's type has no converter.
    pub fn new(
        tree: ComponentTree,
        converters: ConverterRegistry,
        handlers: Vec<Arc<dyn ResultHandler>>,
        config: DispatchConfig,
    ) -> Result<Self, BuildError> {
        for command in tree.commands() {
            check_converters(command, command.parameters(), &converters)?;
        }
        Ok(Self {
            inner: Arc::new(Inner {
                tree,
                converters,
                handlers,
                config,
            }),
        })
    }

    /// Built-in converters, no handlers, default config.
    pub fn from_tree(tree: ComponentTree) -> Result<Self, BuildError> {
        Self::new(tree, ConverterRegistry::new(), Vec::new(), DispatchConfig::default())
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.inner.tree
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Tokenize a console line with the configured quotes.
    pub fn tokenize(&self, line: &str) -> ArgumentSet {
        cmdroute_args::tokenize_with(line, &self.inner.config.tokenizer_options())
    }

    /// Run one request to its terminal outcome.
    pub async fn execute(&self, caller: Arc<dyn Caller>, options: ExecuteOptions) -> Outcome {
        let services = options.services.as_ref();
        let cancel = &options.cancel;
        let outcome = self.run(&caller, services, cancel).await;
        tracing::debug!(
            stage = %outcome.stage(),
            success = outcome.is_success(),
            "request finished"
        );
        finalize::finish(outcome, caller.as_ref(), services, &self.inner.handlers, cancel).await
    }

    /// Run one request on its own task.
    pub fn spawn(&self, caller: Arc<dyn Caller>, options: ExecuteOptions) -> JoinHandle<Outcome> {
        let this = self.clone();
        tokio::spawn(async move { this.execute(caller, options).await })
    }

    /// Honor [`DispatchConfig::async_dispatch`]: spawn and return `None`, or
    /// await inline.
    pub async fn dispatch(
        &self,
        caller: Arc<dyn Caller>,
        options: ExecuteOptions,
    ) -> Option<Outcome> {
        if self.inner.config.async_dispatch {
            drop(self.spawn(caller, options));
            None
        } else {
            Some(self.execute(caller, options).await)
        }
    }

    async fn run(
        &self,
        caller: &Arc<dyn Caller>,
        services: &dyn Services,
        cancel: &CancelSignal,
    ) -> Outcome {
        let args = caller.arguments();
        let search = resolver::find(&self.inner.tree, args);
        tracing::debug!(candidates = search.len(), "resolved");
        if search.is_empty() {
            return Outcome::failed(Stage::Search, None, search.miss(args));
        }

        let mut best: Option<Outcome> = None;
        for candidate in search.candidates() {
            let command = Some(Arc::clone(&candidate.command));
            if cancel.is_cancelled() {
                return Outcome::failed(Stage::Search, command, Failure::Cancelled);
            }
            let attempt = AssertUnwindSafe(self.attempt(candidate, caller, services, cancel));
            let outcome = match attempt.catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let path = candidate.command.display_path();
                    let message = invoker::panic_message(&*payload);
                    tracing::warn!(command = %path, %message, "panicked while dispatching");
                    let failure = Failure::Unhandled(anyhow!("'{path}' panicked: {message}"));
                    return Outcome::failed(Stage::Invoke, command, failure);
                }
            };
            if outcome.is_success() || outcome.is_terminal() {
                return outcome;
            }
            tracing::trace!(
                command = %candidate.command.display_path(),
                stage = %outcome.stage(),
                "candidate rejected"
            );
            best = match best {
                Some(current) if !outcome.outranks(&current) => Some(current),
                _ => Some(outcome),
            };
        }
        best.unwrap_or_else(|| Outcome::failed(Stage::Search, None, search.miss(args)))
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        caller: &Arc<dyn Caller>,
        services: &dyn Services,
        cancel: &CancelSignal,
    ) -> Outcome {
        let command = &candidate.command;
        let fail = |stage: Stage, failure: Failure| {
            Outcome::failed(stage, Some(Arc::clone(command)), failure)
        };
        let cursor = Cursor::at(caller.arguments(), candidate.height);

        let pre = ConditionContext {
            caller: caller.as_ref(),
            command,
            services,
            at: Trigger::BeforeInvoke,
            returned: None,
        };
        if let Err(failure) = condition::evaluate(command.evaluators(), &pre, cancel).await {
            return fail(Stage::Condition, failure);
        }

        if let Err(failure) = binder::check_arity(command, &cursor) {
            return fail(Stage::Parse, failure);
        }
        let bind_ctx = BindContext {
            caller: caller.as_ref(),
            services,
            registry: &self.inner.converters,
            config: &self.inner.config,
            cancel,
            command,
        };
        let values = match binder::bind(&bind_ctx, cursor).await {
            Ok(values) => values,
            Err(failure) => return fail(Stage::Parse, failure),
        };

        let path = command.display_path();
        let invoked = invoker::invoke(&path, command.target(), values, services, caller, cancel);
        let returned = match invoked.await {
            Ok(returned) => returned,
            Err(failure) => {
                tracing::debug!(command = %path, %failure, "invocation failed");
                return fail(Stage::Invoke, failure);
            }
        };
        let response = match finalize::reduce(&path, returned, cancel).await {
            Ok(response) => response,
            Err(failure) => return fail(Stage::Invoke, failure),
        };

        let post = ConditionContext {
            caller: caller.as_ref(),
            command,
            services,
            at: Trigger::AfterInvoke,
            returned: response.as_ref(),
        };
        if let Err(failure) = condition::evaluate(command.evaluators(), &post, cancel).await {
            return fail(Stage::Condition, failure);
        }

        Outcome::Invoke(Ok(Invoked {
            command: Arc::clone(command),
            response,
        }))
    }
}
