mod builtins;
mod console;
mod manifest;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cmdroute::{
    Caller, ConverterRegistry, Dispatcher, ExecuteOptions, Outcome, ResultHandler, Services,
    TracingHandler, cancel_pair,
};
use std::{
    collections::BTreeMap,
    fs,
    io::IsTerminal,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

use crate::builtins::Role;
use crate::console::{ConsoleCaller, ConsoleReporter};
use crate::manifest::{DEFAULT_MANIFEST_NAME, Manifest};

#[derive(Parser)]
#[command(name = "cmdroute")]
#[command(version, about = "Route console input to typed command handlers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a cmdroute.json manifest with the demo command tree
    Init(InitArgs),

    /// Dispatch one command line
    Run(RunArgs),

    /// Read command lines from stdin and dispatch each
    Repl(ReplArgs),

    /// Print how a line tokenizes, as JSON
    Tokenize(TokenizeArgs),

    /// List the commands of the tree with their usage
    Tree(TreeArgs),
}

#[derive(Parser)]
struct InitArgs {
    /// Project directory (default: current directory)
    #[arg(value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Overwrite an existing manifest
    #[arg(long)]
    force: bool,
}

#[derive(Parser)]
struct RunArgs {
    /// Path to cmdroute.json manifest
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Command words, arguments and --named values
    #[arg(
        value_name = "ARGS",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    args: Vec<String>,
}

#[derive(Parser)]
struct ReplArgs {
    /// Path to cmdroute.json manifest
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,
}

#[derive(Parser)]
struct TokenizeArgs {
    /// The line to tokenize
    #[arg(value_name = "LINE")]
    line: String,

    /// Path to cmdroute.json manifest (quote characters)
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,
}

#[derive(Parser)]
struct TreeArgs {
    /// Path to cmdroute.json manifest
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            match cli.command {
                Commands::Init(args) => init(args),
                Commands::Run(args) => run(args).await,
                Commands::Repl(args) => repl(args).await,
                Commands::Tokenize(args) => tokenize(args),
                Commands::Tree(args) => tree(args),
            }
        })
}

fn init(args: InitArgs) -> Result<ExitCode> {
    let dir = args.dir.unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;

    if dir.join(DEFAULT_MANIFEST_NAME).exists() && !args.force {
        bail!("{DEFAULT_MANIFEST_NAME} already exists in {}", dir.display());
    }
    let path = manifest::write_default_manifest(&dir, args.force)?;

    eprintln!("Created: {}", path.display());
    eprintln!("\nNext steps:");
    eprintln!("  1. Edit {DEFAULT_MANIFEST_NAME} to shape your command tree");
    eprintln!("  2. Run: cmdroute tree");
    eprintln!("  3. Run: cmdroute run math add 1 2");

    Ok(ExitCode::SUCCESS)
}

fn load(manifest_path: Option<&Path>) -> Result<Manifest> {
    Ok(match manifest::load_manifest(manifest_path)? {
        Some(loaded) => {
            tracing::debug!(path = %loaded.path.display(), "loaded manifest");
            loaded.manifest
        }
        None => Manifest::default(),
    })
}

fn build_dispatcher(manifest: &Manifest) -> Result<Dispatcher> {
    let tree = builtins::catalog()
        .build(&manifest.tree_or_demo())
        .context("failed to build command tree")?;
    let handlers: Vec<Arc<dyn ResultHandler>> =
        vec![Arc::new(TracingHandler), Arc::new(ConsoleReporter)];
    Dispatcher::new(tree, ConverterRegistry::new(), handlers, manifest.config.clone())
        .context("failed to assemble dispatcher")
}

fn exit_code(outcome: &Outcome) -> ExitCode {
    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    tracing::debug!("executing run command");

    let manifest = load(args.manifest.as_deref())?;
    let dispatcher = build_dispatcher(&manifest)?;
    let arguments = cmdroute_args::tokenize_args(&args.args, &manifest.config.tokenizer_options());

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted");
            handle.cancel();
        }
    });

    let caller: Arc<dyn Caller> = Arc::new(ConsoleCaller::new(arguments));
    let options = ExecuteOptions::default()
        .with_services(builtins::services(Role::from_env()))
        .with_cancel(cancel);
    let outcome = dispatcher.execute(caller, options).await;
    Ok(exit_code(&outcome))
}

async fn repl(args: ReplArgs) -> Result<ExitCode> {
    tracing::debug!("executing repl command");

    let manifest = load(args.manifest.as_deref())?;
    let dispatcher = build_dispatcher(&manifest)?;
    let services: Arc<dyn Services> = builtins::services(Role::from_env());
    let interactive = std::io::stdin().is_terminal();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();
    loop {
        if interactive {
            eprint!("> ");
        }
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let caller: Arc<dyn Caller> = Arc::new(ConsoleCaller::new(dispatcher.tokenize(line)));
        let options = ExecuteOptions::default().with_services(Arc::clone(&services));
        if dispatcher.config().async_dispatch {
            pending.push(dispatcher.spawn(caller, options));
        } else {
            dispatcher.execute(caller, options).await;
        }
    }

    for task in pending {
        if let Err(err) = task.await {
            tracing::warn!(%err, "request task failed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn tokenize(args: TokenizeArgs) -> Result<ExitCode> {
    let manifest = load(args.manifest.as_deref())?;
    let set = cmdroute_args::tokenize_with(&args.line, &manifest.config.tokenizer_options());
    let named: BTreeMap<&str, &str> = set.named_iter().collect();
    let report = serde_json::json!({
        "positional": set.positional(),
        "named": named,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

fn tree(args: TreeArgs) -> Result<ExitCode> {
    let manifest = load(args.manifest.as_deref())?;
    let dispatcher = build_dispatcher(&manifest)?;
    let commands: Vec<_> = dispatcher.tree().commands().collect();
    let width = commands.iter().map(|c| c.usage().len()).max().unwrap_or(0);
    for command in commands {
        let usage = command.usage();
        if command.summary().is_empty() {
            println!("{usage}");
        } else {
            println!("{usage:<width$}  {}", command.summary());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
