use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cmdroute::{
    ArgumentSet, BufferedCaller, Caller, CommandSpec, ComponentTree, ConditionContext,
    ConversionError, ConvertCall, ConverterRegistry, DispatchConfig, Dispatcher, ExecuteOptions,
    Failure, Flow, GroupSpec, Outcome, Parameter, PredicateCondition, RespondError, ResponseGuard,
    ResultHandler, Returned, Stage, Target, Trigger, Value, ValueKind, Verdict, cancel_pair,
};
use futures_util::future::BoxFuture;

fn add_target() -> Target {
    Target::sync("math.add", |inv| {
        let x: i64 = inv.arg(0)?;
        let y: i64 = inv.arg(1)?;
        Ok(Returned::value(x + y))
    })
}

fn math_tree() -> ComponentTree {
    ComponentTree::build(vec![
        GroupSpec::new(["math"])
            .child(
                CommandSpec::new(["add"], add_target())
                    .param(Parameter::positional("x", ValueKind::I64))
                    .param(Parameter::positional("y", ValueKind::I64)),
            )
            .into(),
    ])
    .unwrap()
}

async fn run(dispatcher: &Dispatcher, line: &str) -> (Outcome, Arc<BufferedCaller>) {
    let caller = Arc::new(BufferedCaller::new(dispatcher.tokenize(line)));
    let outcome = dispatcher
        .execute(caller.clone(), ExecuteOptions::default())
        .await;
    (outcome, caller)
}

/// Caller whose transport rejects any response after the first.
struct StrictCaller {
    args: ArgumentSet,
    guard: ResponseGuard,
    attempts: AtomicUsize,
}

impl Caller for StrictCaller {
    fn arguments(&self) -> &ArgumentSet {
        &self.args
    }

    fn respond<'a>(&'a self, _payload: Value) -> BoxFuture<'a, Result<(), RespondError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.guard.claim()
        })
    }
}

#[tokio::test]
async fn math_add_responds_once_with_sum() {
    let dispatcher = Dispatcher::from_tree(math_tree()).unwrap();
    let (outcome, caller) = run(&dispatcher, "math add 2 3").await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.command().unwrap().display_path(), "math add");
    assert_eq!(caller.responses(), vec![Value::I64(5)]);
}

#[tokio::test]
async fn group_descent_is_tried_before_top_level_command() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str| {
        let hits = Arc::clone(&hits);
        Target::sync(name, move |_| {
            hits.lock().unwrap().push(name);
            Ok(Returned::value(name))
        })
    };
    let tree = ComponentTree::build(vec![
        GroupSpec::new(["a"]).child(CommandSpec::new(["b"], record("a b"))).into(),
        CommandSpec::new(["a"], record("a"))
            .param(Parameter::remainder("rest", ValueKind::String).optional())
            .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();

    let (outcome, caller) = run(&dispatcher, "a b").await;
    assert!(outcome.is_success());
    assert_eq!(caller.responses(), vec![Value::from("a b")]);
    assert_eq!(*hits.lock().unwrap(), vec!["a b"]);

    let (outcome, caller) = run(&dispatcher, "a c").await;
    assert!(outcome.is_success());
    assert_eq!(caller.responses(), vec![Value::from("a")]);
}

#[tokio::test]
async fn arity_mismatch_skips_conversion() {
    let conversions = Arc::new(AtomicUsize::new(0));
    let mut converters = ConverterRegistry::new();
    let counter = Arc::clone(&conversions);
    converters.register("i64", move |call: &ConvertCall<'_>, raw: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        raw.parse().map(Value::I64).map_err(|_| call.error(raw, "not a number"))
    });
    let dispatcher =
        Dispatcher::new(math_tree(), converters, Vec::new(), DispatchConfig::default()).unwrap();

    let (outcome, caller) = run(&dispatcher, "math add 2").await;
    assert_eq!(outcome.stage(), Stage::Parse);
    assert!(matches!(outcome.failure(), Some(Failure::ArityMismatch { .. })));
    assert_eq!(conversions.load(Ordering::SeqCst), 0);
    assert!(caller.responses().is_empty());
}

#[tokio::test]
async fn optional_composite_binds_missing() {
    let tree = ComponentTree::build(vec![
        CommandSpec::new(
            ["mark"],
            Target::sync("mark", |inv| {
                let label: String = inv.arg(1)?;
                let missing = inv.value(0).is_some_and(Value::is_missing);
                let at = if missing { "nowhere" } else { "somewhere" };
                Ok(Returned::value(format!("{label}@{at}")))
            }),
        )
        .param(
            Parameter::composite(
                "at",
                vec![
                    Parameter::positional("x", ValueKind::I32),
                    Parameter::positional("y", ValueKind::I32),
                ],
                |parts| Ok(Value::List(parts)),
            )
            .optional(),
        )
        .param(Parameter::remainder("label", ValueKind::String))
        .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();

    let (_, caller) = run(&dispatcher, "mark home").await;
    assert_eq!(caller.responses(), vec![Value::from("home@nowhere")]);

    let (_, caller) = run(&dispatcher, "mark 1 2 home").await;
    assert_eq!(caller.responses(), vec![Value::from("home@somewhere")]);
}

#[tokio::test]
async fn or_group_passes_but_failing_and_group_blocks() {
    let role = |name: &'static str, pass: bool| -> Arc<dyn cmdroute::Condition> {
        Arc::new(
            PredicateCondition::new(name, move |_: &ConditionContext<'_>| {
                if pass { Verdict::Pass } else { Verdict::fail(format!("not {name}")) }
            })
            .family("role")
            .any_of(),
        )
    };
    let quota_ok = Arc::new(AtomicUsize::new(1));
    let quota_flag = Arc::clone(&quota_ok);
    let quota: Arc<dyn cmdroute::Condition> = Arc::new(PredicateCondition::new(
        "quota",
        move |_: &ConditionContext<'_>| {
            if quota_flag.load(Ordering::SeqCst) == 1 {
                Verdict::Pass
            } else {
                Verdict::fail("quota exhausted")
            }
        },
    ));

    let tree = ComponentTree::build(vec![
        GroupSpec::new(["admin"])
            .condition(role("admin", false))
            .condition(role("owner", true))
            .child(
                CommandSpec::new(["reset"], Target::sync("reset", |_| Ok(Returned::value("reset"))))
                    .condition(quota),
            )
            .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();

    let (outcome, caller) = run(&dispatcher, "admin reset").await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(caller.responses(), vec![Value::from("reset")]);

    quota_ok.store(0, Ordering::SeqCst);
    let (outcome, caller) = run(&dispatcher, "admin reset").await;
    assert_eq!(outcome.stage(), Stage::Condition);
    assert!(matches!(
        outcome.failure(),
        Some(Failure::ConditionUnmet { condition, trigger: Trigger::BeforeInvoke, .. })
            if condition == "quota"
    ));
    assert!(caller.responses().is_empty());
}

#[tokio::test]
async fn deferred_value_is_awaited_then_sent_once() {
    let tree = ComponentTree::build(vec![
        CommandSpec::new(
            ["later"],
            Target::new("later", |_| async {
                Ok(Returned::deferred(async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Returned::value("ok"))
                }))
            }),
        )
        .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();
    let (outcome, caller) = run(&dispatcher, "later").await;
    assert_eq!(outcome.response(), Some(&Value::from("ok")));
    assert_eq!(caller.responses(), vec![Value::from("ok")]);
}

#[tokio::test]
async fn core_responds_at_most_once() {
    let dispatcher = Dispatcher::from_tree(math_tree()).unwrap();
    let caller = Arc::new(StrictCaller {
        args: dispatcher.tokenize("math add 1 1"),
        guard: ResponseGuard::new(),
        attempts: AtomicUsize::new(0),
    });
    let outcome = dispatcher
        .execute(caller.clone(), ExecuteOptions::default())
        .await;
    assert!(outcome.is_success());
    assert_eq!(caller.attempts.load(Ordering::SeqCst), 1);
    assert!(caller.guard.is_sent());

    // A second request on the same caller is rejected by the collaborator.
    let outcome = dispatcher
        .execute(caller.clone(), ExecuteOptions::default())
        .await;
    assert!(matches!(outcome.failure(), Some(Failure::Unhandled(_))));
    assert_eq!(caller.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn best_failure_among_candidates_is_reported() {
    let tree = ComponentTree::build(vec![
        CommandSpec::new(["n"], Target::sync("n.int", |_| Ok(Returned::Void)))
            .param(Parameter::positional("value", ValueKind::I32))
            .into(),
        GroupSpec::new(["n"])
            .child(CommandSpec::new(
                Vec::<String>::new(),
                Target::sync("n.default", |_| Ok(Returned::Void)),
            ))
            .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();
    // First candidate fails conversion, the default command fails arity:
    // conversion got further.
    let (outcome, _) = run(&dispatcher, "n x").await;
    assert!(matches!(outcome.failure(), Some(Failure::ConversionFailure(_))), "{outcome:?}");
}

#[tokio::test]
async fn invoked_target_stops_candidate_search() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let tree = ComponentTree::build(vec![
        GroupSpec::new(["x"])
            .child(CommandSpec::new(
                ["y"],
                Target::sync("x.y", |_| Err(anyhow::anyhow!("broken"))),
            ))
            .into(),
        CommandSpec::new(
            ["x"],
            Target::sync("x", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Returned::Void)
            }),
        )
        .param(Parameter::remainder("rest", ValueKind::String).optional())
        .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();
    let (outcome, _) = run(&dispatcher, "x y").await;
    assert_eq!(outcome.stage(), Stage::Invoke);
    assert!(matches!(outcome.failure(), Some(Failure::InvocationFault { .. })));
    assert_eq!(outcome.failure().unwrap().root_cause().to_string(), "broken");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn post_invoke_condition_withholds_response() {
    let audit: Arc<dyn cmdroute::Condition> = Arc::new(
        PredicateCondition::new("no-secrets", |ctx: &ConditionContext<'_>| {
            match ctx.returned.and_then(Value::as_str) {
                Some(s) if s.contains("secret") => Verdict::fail("response leaks a secret"),
                _ => Verdict::Pass,
            }
        })
        .trigger(Trigger::AfterInvoke),
    );
    let tree = ComponentTree::build(vec![
        CommandSpec::new(
            ["say"],
            Target::sync("say", |inv| Ok(Returned::value(inv.arg::<String>(0)?))),
        )
        .param(Parameter::remainder("text", ValueKind::String))
        .condition(audit)
        .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();

    let (outcome, caller) = run(&dispatcher, "say hello").await;
    assert!(outcome.is_success());
    assert_eq!(caller.responses(), vec![Value::from("hello")]);

    let (outcome, caller) = run(&dispatcher, "say the secret").await;
    assert!(matches!(
        outcome.failure(),
        Some(Failure::ConditionUnmet { trigger: Trigger::AfterInvoke, .. })
    ));
    assert!(caller.responses().is_empty());
}

#[tokio::test]
async fn unknown_and_incomplete_routes() {
    let dispatcher = Dispatcher::from_tree(math_tree()).unwrap();
    let (outcome, _) = run(&dispatcher, "nope").await;
    assert_eq!(outcome.stage(), Stage::Search);
    assert!(matches!(outcome.failure(), Some(Failure::ComponentsNotFound { .. })));

    let (outcome, _) = run(&dispatcher, "math").await;
    assert!(matches!(outcome.failure(), Some(Failure::RouteIncomplete { path }) if path == "math"));

    let (outcome, _) = run(&dispatcher, "").await;
    assert!(matches!(outcome.failure(), Some(Failure::ComponentsNotFound { .. })));
}

#[tokio::test]
async fn cancellation_unwinds_a_waiting_target() {
    let tree = ComponentTree::build(vec![
        CommandSpec::new(
            ["wait"],
            Target::new("wait", |_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Returned::Void)
            }),
        )
        .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();
    let (handle, signal) = cancel_pair();
    let caller = Arc::new(BufferedCaller::new(dispatcher.tokenize("wait")));
    let task = dispatcher.spawn(caller, ExecuteOptions::default().with_cancel(signal));
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome.failure(), Some(Failure::Cancelled)));
}

struct Claimer {
    seen: Arc<AtomicUsize>,
}

impl ResultHandler for Claimer {
    fn on_success<'a>(
        &'a self,
        _caller: &'a dyn Caller,
        _outcome: &'a Outcome,
        _services: &'a dyn cmdroute::Services,
    ) -> BoxFuture<'a, Flow> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Flow::Claimed })
    }
}

#[tokio::test]
async fn claimed_outcome_stops_handler_chain() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let handlers: Vec<Arc<dyn ResultHandler>> = vec![
        Arc::new(Claimer { seen: Arc::clone(&first) }),
        Arc::new(Claimer { seen: Arc::clone(&second) }),
    ];
    let dispatcher =
        Dispatcher::new(math_tree(), ConverterRegistry::new(), handlers, DispatchConfig::default())
            .unwrap();
    let (outcome, _) = run(&dispatcher, "math add 1 2").await;
    assert!(outcome.is_success());
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn dispatcher_rejects_types_without_converters() {
    let tree = ComponentTree::build(vec![
        CommandSpec::new(["geo"], Target::sync("geo", |_| Ok(Returned::Void)))
            .param(Parameter::positional("at", ValueKind::Custom("latlon".into())))
            .into(),
    ])
    .unwrap();
    assert!(matches!(
        Dispatcher::from_tree(tree),
        Err(cmdroute::BuildError::MissingConverter { .. })
    ));
}

#[tokio::test]
async fn async_dispatch_runs_in_the_background() {
    let config = DispatchConfig {
        async_dispatch: true,
        ..Default::default()
    };
    let dispatcher =
        Dispatcher::new(math_tree(), ConverterRegistry::new(), Vec::new(), config).unwrap();
    let caller = Arc::new(BufferedCaller::new(ArgumentSet::from_args(&["math", "add", "2", "2"])));
    let inline = dispatcher
        .dispatch(caller.clone(), ExecuteOptions::default())
        .await;
    assert!(inline.is_none());

    for _ in 0..100 {
        if !caller.responses().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(caller.responses(), vec![Value::I64(4)]);

    let inline = Dispatcher::from_tree(math_tree())
        .unwrap()
        .dispatch(
            Arc::new(BufferedCaller::new(ArgumentSet::from_args(&["math", "add", "1", "1"]))),
            ExecuteOptions::default(),
        )
        .await;
    assert!(inline.is_some_and(|outcome| outcome.is_success()));
}

struct FailureCounter {
    seen: Arc<AtomicUsize>,
}

impl ResultHandler for FailureCounter {
    fn on_failure<'a>(
        &'a self,
        _caller: &'a dyn Caller,
        _outcome: &'a Outcome,
        _failure: &'a Failure,
    ) -> BoxFuture<'a, Flow> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Flow::Continue })
    }
}

#[tokio::test]
async fn panicking_converter_becomes_unhandled_outcome() {
    let mut converters = ConverterRegistry::new();
    converters.register(
        "i64",
        |_: &ConvertCall<'_>, raw: &str| -> Result<Value, ConversionError> {
            panic!("cannot read {raw}")
        },
    );
    let failures = Arc::new(AtomicUsize::new(0));
    let handlers: Vec<Arc<dyn ResultHandler>> = vec![Arc::new(FailureCounter {
        seen: Arc::clone(&failures),
    })];
    let dispatcher =
        Dispatcher::new(math_tree(), converters, handlers, DispatchConfig::default()).unwrap();

    let caller = Arc::new(BufferedCaller::new(dispatcher.tokenize("math add 1 2")));
    let outcome = dispatcher
        .spawn(caller.clone(), ExecuteOptions::default())
        .await
        .expect("dispatch task must not panic");
    assert!(matches!(outcome.failure(), Some(Failure::Unhandled(_))), "{outcome:?}");
    assert!(outcome.failure().unwrap().to_string().contains("cannot read 1"));
    assert_eq!(outcome.command().unwrap().display_path(), "math add");
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(caller.responses().is_empty());
}

#[tokio::test]
async fn panicking_condition_becomes_unhandled_outcome() {
    let broken: Arc<dyn cmdroute::Condition> = Arc::new(PredicateCondition::new(
        "broken",
        |_: &ConditionContext<'_>| -> Verdict { panic!("condition exploded") },
    ));
    let tree = ComponentTree::build(vec![
        CommandSpec::new(["ping"], Target::sync("ping", |_| Ok(Returned::value("pong"))))
            .condition(broken)
            .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();

    let (outcome, caller) = run(&dispatcher, "ping").await;
    assert!(matches!(outcome.failure(), Some(Failure::Unhandled(_))), "{outcome:?}");
    assert!(outcome.failure().unwrap().to_string().contains("condition exploded"));
    assert!(caller.responses().is_empty());
}

#[tokio::test]
async fn both_trigger_condition_runs_before_and_after_invoke() {
    let locked = Arc::new(AtomicBool::new(false));
    let invoked = Arc::new(AtomicUsize::new(0));
    let lock = Arc::clone(&locked);
    let guard: Arc<dyn cmdroute::Condition> = Arc::new(
        PredicateCondition::new("guard", move |ctx: &ConditionContext<'_>| match ctx.at {
            Trigger::AfterInvoke if ctx.returned.and_then(Value::as_str) == Some("secret") => {
                Verdict::fail("response is secret")
            }
            Trigger::AfterInvoke => Verdict::Pass,
            _ if lock.load(Ordering::SeqCst) => Verdict::fail("locked"),
            _ => Verdict::Pass,
        })
        .trigger(Trigger::Both),
    );
    let calls = Arc::clone(&invoked);
    let tree = ComponentTree::build(vec![
        CommandSpec::new(
            ["say"],
            Target::sync("say", move |inv| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Returned::value(inv.arg::<String>(0)?))
            }),
        )
        .param(Parameter::remainder("text", ValueKind::String))
        .condition(guard)
        .into(),
    ])
    .unwrap();
    let dispatcher = Dispatcher::from_tree(tree).unwrap();

    let (outcome, caller) = run(&dispatcher, "say hello").await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(caller.responses(), vec![Value::from("hello")]);
    assert_eq!(invoked.load(Ordering::SeqCst), 1);

    let (outcome, caller) = run(&dispatcher, "say secret").await;
    assert!(matches!(
        outcome.failure(),
        Some(Failure::ConditionUnmet { condition, trigger: Trigger::AfterInvoke, .. })
            if condition == "guard"
    ));
    assert!(caller.responses().is_empty());
    assert_eq!(invoked.load(Ordering::SeqCst), 2);

    locked.store(true, Ordering::SeqCst);
    let (outcome, caller) = run(&dispatcher, "say hello").await;
    assert_eq!(outcome.stage(), Stage::Condition);
    assert!(matches!(
        outcome.failure(),
        Some(Failure::ConditionUnmet { condition, trigger: Trigger::BeforeInvoke, .. })
            if condition == "guard"
    ));
    assert!(caller.responses().is_empty());
    assert_eq!(invoked.load(Ordering::SeqCst), 2);
}
