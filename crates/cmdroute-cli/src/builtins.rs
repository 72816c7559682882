//! Handlers and conditions available to manifest trees, plus the demo tree
//! written by `cmdroute init`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Datelike, FixedOffset, Utc};
use cmdroute::{
    Catalog, Condition, ConditionContext, Dependency, Invocation, PredicateCondition, Returned,
    ServiceMap, Services, Target, Value, Verdict,
};
use cmdroute_metadata::{
    CommandDescriptor, GroupDescriptor, NodeDescriptor, ParamDescriptor, ParamShapeDescriptor,
    TreeDescriptor,
};
use serde_json::json;
use uuid::Uuid;

use crate::console;

pub const ROLE_ENV: &str = "CMDROUTE_ROLE";

/// Role of the person at the console, injected as a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role(pub String);

impl Role {
    pub fn from_env() -> Self {
        let role = std::env::var(ROLE_ENV)
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "guest".to_string());
        Self(role)
    }
}

pub fn services(role: Role) -> Arc<dyn Services> {
    let mut services = ServiceMap::new();
    services.insert(role);
    Arc::new(services)
}

fn current_role(services: &dyn Services) -> Option<Arc<Role>> {
    services
        .resolve(&Dependency::of::<Role>())
        .and_then(|service| service.downcast::<Role>().ok())
}

/// Members of the `role` family share an OR evaluator: any one listed role admits.
fn role_condition(role: &'static str) -> Arc<dyn Condition> {
    let name = format!("role:{role}");
    Arc::new(
        PredicateCondition::new(name, move |ctx: &ConditionContext<'_>| {
            match current_role(ctx.services) {
                Some(current) if current.0.eq_ignore_ascii_case(role) => Verdict::Pass,
                Some(current) => Verdict::fail(format!("role '{}' is not '{role}'", current.0)),
                None => Verdict::fail(format!("no role set; export {ROLE_ENV}")),
            }
        })
        .family("role")
        .any_of(),
    )
}

fn console_only() -> Arc<dyn Condition> {
    Arc::new(PredicateCondition::new("console-only", |ctx: &ConditionContext<'_>| {
        if ctx.caller.kind() == console::KIND {
            Verdict::Pass
        } else {
            Verdict::fail("only available from the console")
        }
    }))
}

fn wait(inv: Invocation) -> anyhow::Result<Returned> {
    let period: Duration = inv.arg(0)?;
    Ok(Returned::deferred(async move {
        tokio::time::sleep(period).await;
        Ok(Returned::value(format!("waited {}", Value::Duration(period))))
    }))
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .handler(Target::sync("echo", |inv| Ok(Returned::value(inv.arg::<String>(0)?))))
        .handler(Target::sync("math.add", |inv| {
            let x: i64 = inv.arg(0)?;
            let y: i64 = inv.arg(1)?;
            let sum = x.checked_add(y).ok_or_else(|| anyhow!("{x} + {y} overflows"))?;
            Ok(Returned::value(sum))
        }))
        .handler(Target::sync("math.sum", |inv| {
            let values: Vec<f64> = inv.arg(0)?;
            Ok(Returned::value(values.iter().sum::<f64>()))
        }))
        .handler(Target::sync("time.parse", |inv| {
            let at: DateTime<FixedOffset> = inv.arg(0)?;
            Ok(Returned::value(json!({
                "utc": at.with_timezone(&Utc).to_rfc3339(),
                "unix": at.timestamp(),
                "weekday": at.weekday().to_string(),
            })))
        }))
        .handler(Target::sync("wait", wait))
        .handler(Target::sync("id.new", |inv| {
            let count: u8 = inv.arg(0)?;
            let ids: Vec<Value> = (0..count).map(|_| Value::Uuid(Uuid::new_v4())).collect();
            Ok(Returned::value(ids))
        }))
        .handler(
            Target::sync("whoami", |inv| {
                let caller = inv.caller().map(|c| c.kind().to_string()).unwrap_or_default();
                let role = inv.service::<Role>().map(|r| r.0.clone());
                Ok(Returned::value(json!({ "caller": caller, "role": role })))
            })
            .depends_on(Dependency::of::<Role>().optional())
            .with_context(),
        )
        .condition("role:admin", role_condition("admin"))
        .condition("role:operator", role_condition("operator"))
        .condition("console-only", console_only());
    catalog
}

fn param(name: &str, value_type: &str) -> ParamDescriptor {
    ParamDescriptor {
        name: name.to_string(),
        value_type: value_type.to_string(),
        ..Default::default()
    }
}

fn command(
    alias: &str,
    handler: &str,
    summary: &str,
    parameters: Vec<ParamDescriptor>,
) -> CommandDescriptor {
    CommandDescriptor {
        aliases: vec![alias.to_string()],
        handler: handler.to_string(),
        summary: summary.to_string(),
        parameters,
        ..Default::default()
    }
}

fn group(alias: &str, summary: &str, children: Vec<CommandDescriptor>) -> NodeDescriptor {
    NodeDescriptor::Group(GroupDescriptor {
        aliases: vec![alias.to_string()],
        summary: summary.to_string(),
        children: children.into_iter().map(NodeDescriptor::Command).collect(),
        ..Default::default()
    })
}

pub fn demo_tree() -> TreeDescriptor {
    let text = ParamDescriptor {
        shape: ParamShapeDescriptor::Remainder,
        help: "text to print".to_string(),
        ..param("text", "string")
    };
    let values = ParamDescriptor {
        shape: ParamShapeDescriptor::Remainder,
        collection: true,
        ..param("values", "f64")
    };
    let y = ParamDescriptor {
        default_value: Some("0".to_string()),
        ..param("y", "i64")
    };
    let count = ParamDescriptor {
        default_value: Some("1".to_string()),
        ..param("count", "u8")
    };

    TreeDescriptor::new(vec![
        NodeDescriptor::Command(command("echo", "echo", "Print the given text", vec![text])),
        group(
            "math",
            "Arithmetic",
            vec![
                command("add", "math.add", "Add two integers", vec![param("x", "i64"), y]),
                command("sum", "math.sum", "Sum any number of values", vec![values]),
            ],
        ),
        group(
            "time",
            "Dates and timers",
            vec![
                command(
                    "parse",
                    "time.parse",
                    "Parse an RFC 3339 timestamp",
                    vec![param("at", "datetime")],
                ),
                CommandDescriptor {
                    conditions: vec!["role:admin".to_string(), "role:operator".to_string()],
                    ..command("wait", "wait", "Sleep for a duration such as 1s or 250ms", vec![
                        param("period", "duration"),
                    ])
                },
            ],
        ),
        group(
            "id",
            "Identifiers",
            vec![command("new", "id.new", "Generate random UUIDs", vec![count])],
        ),
        NodeDescriptor::Command(CommandDescriptor {
            conditions: vec!["console-only".to_string()],
            ..command("whoami", "whoami", "Show the caller kind and role", Vec::new())
        }),
    ])
}
