use cmdroute::{
    ArgumentSet, Caller, Failure, Flow, Outcome, RespondError, ResponseGuard, ResultHandler, Stage,
    Value,
};
use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;

/// Caller kind reported by [`ConsoleCaller`].
pub const KIND: &str = "console";

/// Writes the response to stdout.
pub struct ConsoleCaller {
    arguments: ArgumentSet,
    guard: ResponseGuard,
}

impl ConsoleCaller {
    pub fn new(arguments: ArgumentSet) -> Self {
        Self {
            arguments,
            guard: ResponseGuard::new(),
        }
    }
}

impl Caller for ConsoleCaller {
    fn arguments(&self) -> &ArgumentSet {
        &self.arguments
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn respond<'a>(&'a self, payload: Value) -> BoxFuture<'a, Result<(), RespondError>> {
        Box::pin(async move {
            self.guard.claim()?;
            let mut line = render(&payload);
            line.push('\n');
            let mut out = tokio::io::stdout();
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;
            Ok(())
        })
    }
}

/// Lists and JSON print as pretty JSON, everything else through `Display`.
pub fn render(payload: &Value) -> String {
    match payload {
        Value::Json(_) | Value::List(_) => {
            serde_json::to_string_pretty(&payload.to_json()).unwrap_or_else(|_| payload.to_string())
        }
        other => other.to_string(),
    }
}

/// Lines printed to stderr for a failed request.
pub fn describe_failure(outcome: &Outcome, failure: &Failure) -> Vec<String> {
    let mut lines = vec![format!("error: {failure}")];
    if failure.is_fault() {
        let cause = failure.root_cause().to_string();
        if !lines[0].ends_with(&cause) {
            lines.push(format!("caused by: {cause}"));
        }
    }
    if outcome.stage() == Stage::Parse
        && let Some(command) = outcome.command()
    {
        lines.push(format!("usage: {}", command.usage()));
    }
    lines
}

/// Reports failures to the person at the console and claims them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl ResultHandler for ConsoleReporter {
    fn on_failure<'a>(
        &'a self,
        _caller: &'a dyn Caller,
        outcome: &'a Outcome,
        failure: &'a Failure,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            for line in describe_failure(outcome, failure) {
                eprintln!("{line}");
            }
            Flow::Claimed
        })
    }
}
