//! Gating conditions.
//!
//! A command's own conditions and those inherited from its groups are grouped
//! at build time by `(family, algebra, trigger)`. Conditions inside one group
//! combine with the group's algebra; groups combine with AND.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;

use crate::caller::Caller;
use crate::cancel::CancelSignal;
use crate::error::Failure;
use crate::services::Services;
use crate::tree::Command;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algebra {
    And,
    Or,
}

/// When a condition runs relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    BeforeInvoke,
    AfterInvoke,
    Both,
}

impl Trigger {
    /// Whether a condition with this trigger runs at point `at`.
    pub fn fires_at(self, at: Trigger) -> bool {
        self == Trigger::Both || self == at
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeInvoke => "before-invoke",
            Self::AfterInvoke => "after-invoke",
            Self::Both => "both",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

impl Verdict {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

pub struct ConditionContext<'a> {
    pub caller: &'a dyn Caller,
    pub command: &'a Command,
    pub services: &'a dyn Services,
    /// The point being evaluated: `BeforeInvoke` or `AfterInvoke`.
    pub at: Trigger,
    /// The target's response, after invoke.
    pub returned: Option<&'a Value>,
}

pub trait Condition: Send + Sync {
    fn name(&self) -> &str;

    /// Declaring family; conditions of one family share an evaluator.
    fn family(&self) -> &str {
        self.name()
    }

    fn algebra(&self) -> Algebra {
        Algebra::And
    }

    fn trigger(&self) -> Trigger {
        Trigger::BeforeInvoke
    }

    /// Restrict the condition to callers of this kind. Other callers skip it.
    fn caller_kind(&self) -> Option<&str> {
        None
    }

    /// `Err` is a fault, not an unmet condition.
    fn check<'a>(&'a self, ctx: &'a ConditionContext<'a>) -> BoxFuture<'a, anyhow::Result<Verdict>>;
}

/// Condition backed by a synchronous closure.
pub struct PredicateCondition<F> {
    name: String,
    family: Option<String>,
    algebra: Algebra,
    trigger: Trigger,
    caller_kind: Option<String>,
    predicate: F,
}

impl<F> PredicateCondition<F>
where
    F: Fn(&ConditionContext<'_>) -> Verdict + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            family: None,
            algebra: Algebra::And,
            trigger: Trigger::BeforeInvoke,
            caller_kind: None,
            predicate,
        }
    }

    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn any_of(mut self) -> Self {
        self.algebra = Algebra::Or;
        self
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn for_caller(mut self, kind: impl Into<String>) -> Self {
        self.caller_kind = Some(kind.into());
        self
    }
}

impl<F> Condition for PredicateCondition<F>
where
    F: Fn(&ConditionContext<'_>) -> Verdict + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> &str {
        self.family.as_deref().unwrap_or(&self.name)
    }

    fn algebra(&self) -> Algebra {
        self.algebra
    }

    fn trigger(&self) -> Trigger {
        self.trigger
    }

    fn caller_kind(&self) -> Option<&str> {
        self.caller_kind.as_deref()
    }

    fn check<'a>(
        &'a self,
        ctx: &'a ConditionContext<'a>,
    ) -> BoxFuture<'a, anyhow::Result<Verdict>> {
        let verdict = (self.predicate)(ctx);
        Box::pin(async move { Ok(verdict) })
    }
}

/// Conditions sharing one `(family, algebra, trigger)` key.
pub struct EvaluatorGroup {
    family: String,
    algebra: Algebra,
    trigger: Trigger,
    conditions: Vec<Arc<dyn Condition>>,
}

impl fmt::Debug for EvaluatorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.conditions.iter().map(|c| c.name()).collect();
        f.debug_struct("EvaluatorGroup")
            .field("family", &self.family)
            .field("algebra", &self.algebra)
            .field("trigger", &self.trigger)
            .field("conditions", &names)
            .finish()
    }
}

impl EvaluatorGroup {
    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn algebra(&self) -> Algebra {
        self.algebra
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    async fn run(&self, ctx: &ConditionContext<'_>) -> Result<(), Failure> {
        let mut failures: Vec<(String, String)> = Vec::new();
        let mut any_ran = false;
        for condition in &self.conditions {
            if let Some(kind) = condition.caller_kind()
                && kind != ctx.caller.kind()
            {
                tracing::trace!(
                    condition = condition.name(),
                    caller = ctx.caller.kind(),
                    "skipped for caller"
                );
                continue;
            }
            any_ran = true;
            let verdict = condition.check(ctx).await.map_err(|error| Failure::InvocationFault {
                command: ctx.command.display_path(),
                error: error.context(format!("condition '{}'", condition.name())),
            })?;
            match (verdict, self.algebra) {
                (Verdict::Pass, Algebra::Or) => return Ok(()),
                (Verdict::Pass, Algebra::And) => {}
                (Verdict::Fail(message), Algebra::And) => {
                    return Err(Failure::ConditionUnmet {
                        condition: condition.name().to_string(),
                        message,
                        trigger: ctx.at,
                    });
                }
                (Verdict::Fail(message), Algebra::Or) => {
                    failures.push((condition.name().to_string(), message));
                }
            }
        }
        if self.algebra == Algebra::Or && any_ran {
            let message = failures
                .iter()
                .map(|(name, msg)| format!("{name}: {msg}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Failure::ConditionUnmet {
                condition: self.family.clone(),
                message,
                trigger: ctx.at,
            });
        }
        Ok(())
    }
}

/// Group conditions in declaration order, ancestors first.
pub fn group_conditions<'a, I>(conditions: I) -> Vec<Arc<EvaluatorGroup>>
where
    I: IntoIterator<Item = &'a Arc<dyn Condition>>,
{
    let mut groups: IndexMap<(String, Algebra, Trigger), Vec<Arc<dyn Condition>>> = IndexMap::new();
    for condition in conditions {
        let key = (
            condition.family().to_string(),
            condition.algebra(),
            condition.trigger(),
        );
        groups.entry(key).or_default().push(Arc::clone(condition));
    }
    groups
        .into_iter()
        .map(|((family, algebra, trigger), conditions)| {
            Arc::new(EvaluatorGroup {
                family,
                algebra,
                trigger,
                conditions,
            })
        })
        .collect()
}

/// Run every group that fires at `ctx.at`; the first failing group fails the command.
pub async fn evaluate(
    groups: &[Arc<EvaluatorGroup>],
    ctx: &ConditionContext<'_>,
    cancel: &CancelSignal,
) -> Result<(), Failure> {
    for group in groups.iter().filter(|g| g.trigger.fires_at(ctx.at)) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Failure::Cancelled),
            result = group.run(ctx) => {
                if let Err(failure) = &result {
                    tracing::debug!(family = group.family(), %failure, "condition group failed");
                }
                result?
            }
        }
    }
    Ok(())
}
