//! Command dispatch engine.
//!
//! A request flows through one pipeline:
//! - the tokenized [`ArgumentSet`] is resolved against a [`ComponentTree`] into
//!   ranked candidates
//! - each candidate runs its pre-invoke conditions, then has its parameters
//!   bound and converted, then its [`Target`] invoked and its post-invoke
//!   conditions checked
//! - the first success, or the failure that got furthest, is finalized: the
//!   response is sent through the [`Caller`] and offered to [`ResultHandler`]s
//!
//! Once a target has run no further candidates are tried.

pub mod binder;
pub mod caller;
pub mod cancel;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod convert;
pub mod dispatcher;
pub mod error;
mod finalize;
pub mod handler;
pub mod invoker;
pub mod outcome;
pub mod param;
pub mod resolver;
pub mod services;
pub mod tree;
pub mod value;

pub use cmdroute_args::{ArgumentSet, Cursor, TokenizerOptions};

pub use caller::{BufferedCaller, Caller, ResponseGuard};
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use catalog::{Catalog, CatalogError};
pub use condition::{
    Algebra, Condition, ConditionContext, EvaluatorGroup, PredicateCondition, Trigger, Verdict,
};
pub use config::DispatchConfig;
pub use convert::{ConvertCall, Converter, ConverterRegistry};
pub use dispatcher::{Dispatcher, ExecuteOptions};
pub use error::{ArityReason, BuildError, ConversionError, Failure, RespondError};
pub use handler::{Flow, ResultHandler, TracingHandler};
pub use invoker::{Invocation, Returned, Target};
pub use outcome::{Attempt, Invoked, Outcome, Stage};
pub use param::{Arity, Parameter};
pub use resolver::{Candidate, Search};
pub use services::{Dependency, NoServices, ServiceMap, Services};
pub use tree::{Command, CommandSpec, ComponentTree, GroupSpec, NodeSpec};
pub use value::{EnumType, FromValue, Value, ValueKind};
