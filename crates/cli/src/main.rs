use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use stata_code_chunker::{ChunkPlanner, Chunker, Completeness, DelimiterMode, StatementKind};
use stata_kernel::{CompletionState, Kernel, KernelConfig, StdoutFrontend};
use stata_protocol::{ExecuteStatus, KernelInfo};
use stata_session::ConsoleProcess;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// How long Stata gets to exit once its stdin is closed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "stata-bridge")]
#[command(about = "Run Stata code the way a notebook kernel does", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Configuration file (default: ./stata-bridge.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution plan of a do-file as JSON
    Chunk(ChunkArgs),

    /// Report whether the input is a complete set of statements
    Check(SourceArgs),

    /// Print completions at a cursor position as JSON
    Complete(CompleteArgs),

    /// Run a do-file (or stdin, statement by statement) in a Stata console
    Run(RunArgs),

    /// Print kernel metadata as JSON
    Info,
}

#[derive(Args)]
struct SourceArgs {
    /// Input file; stdin when omitted or `-`
    file: Option<PathBuf>,

    /// Delimiter mode in effect before the first line: cr or ;
    #[arg(long, default_value = "cr")]
    mode: DelimiterMode,
}

#[derive(Args)]
struct ChunkArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct CompleteArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Cursor offset in characters (default: end of input)
    #[arg(long)]
    cursor: Option<usize>,
}

#[derive(Args)]
struct RunArgs {
    /// Do-file to run as one cell; stdin is read interactively when omitted
    file: Option<PathBuf>,

    /// Stata binary (overrides config and STATA_BRIDGE_STATA_PATH)
    #[arg(long)]
    stata: Option<PathBuf>,

    /// Keep running the remaining statements after a failure
    #[arg(long)]
    keep_going: bool,
}

#[derive(Serialize)]
struct CheckOutput {
    #[serde(flatten)]
    completeness: Completeness,
    ending_mode: DelimiterMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = KernelConfig::load(cli.config.as_deref())?;

    let code = match cli.command {
        Commands::Chunk(args) => run_chunk(args, &config)?,
        Commands::Check(args) => run_check(args, &config)?,
        Commands::Complete(args) => run_complete(args)?,
        Commands::Run(args) => run_session(args, config).await?,
        Commands::Info => {
            print_json(&KernelInfo::default(), true)?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn read_source(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn run_chunk(args: ChunkArgs, config: &KernelConfig) -> Result<i32> {
    let text = read_source(args.source.file.as_deref())?;
    let chunker = Chunker::new(config.chunker.clone())?;
    let output = chunker.chunk_str(&text, args.source.mode)?;
    let plan = ChunkPlanner::new(config.chunker.clone()).plan(output, args.source.mode)?;

    log::info!(
        "{} executable statement(s), fingerprint {}",
        plan.executable_count(),
        plan.fingerprint.short()
    );
    print_json(&plan, args.pretty)?;
    Ok(0)
}

fn run_check(args: SourceArgs, config: &KernelConfig) -> Result<i32> {
    let text = read_source(args.file.as_deref())?;
    let output = Chunker::new(config.chunker.clone())?.chunk_str(&text, args.mode)?;
    let complete = output.completeness.is_complete();
    print_json(
        &CheckOutput {
            completeness: output.completeness,
            ending_mode: output.ending_mode,
        },
        false,
    )?;
    Ok(if complete { 0 } else { 1 })
}

fn run_complete(args: CompleteArgs) -> Result<i32> {
    let text = read_source(args.source.file.as_deref())?;
    let cursor = args.cursor.unwrap_or_else(|| text.chars().count());

    let mut state = CompletionState::new()
        .with_magics(stata_kernel::MagicRegistry::builtin().names());
    state.refresh(&text);
    print_json(&state.complete(&text, cursor, args.source.mode), false)?;
    Ok(0)
}

async fn run_session(args: RunArgs, mut config: KernelConfig) -> Result<i32> {
    if let Some(stata) = args.stata {
        config.stata_path = stata;
    }
    if args.keep_going {
        config.dispatch.error_policy = stata_session::ErrorPolicy::ContinueOnError;
    }
    let source = args
        .file
        .as_deref()
        .map(|path| read_source(Some(path)))
        .transpose()?;

    log::info!("Starting {}", config.stata_path.display());
    let mut child = Command::new(&config.stata_path)
        .args(&config.stata_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", config.stata_path.display()))?;
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        bail!("Stata started without piped stdio");
    };

    let chunker = Chunker::new(config.chunker.clone())?;
    let process = ConsoleProcess::new(BufReader::new(stdout), stdin);
    let mut kernel = Kernel::new(process, StdoutFrontend, config)?;

    let failed = match source {
        Some(text) => kernel.execute(&text, false).await.status == ExecuteStatus::Error,
        None => run_interactive(&mut kernel, &chunker).await?,
    };

    drop(kernel);
    shutdown(child).await;
    Ok(i32::from(failed))
}

/// Whether `buffer` can run as is. In `;` mode the last statement must also
/// carry its semicolon, otherwise a statement split over lines runs early.
/// A closed brace block waits for the next line, which may be its `else`.
fn ready_to_run(chunker: &Chunker, buffer: &str, mode: DelimiterMode) -> bool {
    let Ok(output) = chunker.chunk_str(buffer, mode) else {
        return true;
    };
    let awaits_else = output
        .executable()
        .last()
        .is_some_and(|s| s.kind == StatementKind::Block && s.text.ends_with('}'));
    output.completeness.is_complete()
        && !awaits_else
        && (output.ending_mode == DelimiterMode::Newline
            || output.statements.last().map_or(true, |s| s.terminated))
}

/// Feed stdin line by line, executing whenever the buffer is ready.
/// Returns whether any cell failed.
async fn run_interactive<P, F>(kernel: &mut Kernel<P, F>, chunker: &Chunker) -> Result<bool>
where
    P: stata_session::ExternalProcess,
    F: stata_kernel::Frontend,
{
    let mut failed = false;
    let mut buffer = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        buffer.push_str(&line);
        buffer.push('\n');
        if buffer.trim().is_empty() {
            buffer.clear();
            continue;
        }
        if !ready_to_run(chunker, &buffer, kernel.mode()) {
            continue;
        }
        let reply = kernel.execute(&buffer, false).await;
        failed |= reply.status == ExecuteStatus::Error;
        buffer.clear();
        if !kernel.is_alive() {
            break;
        }
    }
    if !buffer.trim().is_empty() && kernel.is_alive() {
        if !chunker.is_complete(&buffer, kernel.mode()) {
            log::warn!("Input ended inside an unfinished statement");
        }
        let reply = kernel.execute(&buffer, false).await;
        failed |= reply.status == ExecuteStatus::Error;
    }
    Ok(failed)
}

async fn shutdown(mut child: Child) {
    match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(Ok(status)) => log::debug!("Stata exited with {status}"),
        Ok(Err(err)) => log::warn!("Failed to wait for Stata: {err}"),
        Err(_) => {
            log::warn!("Stata did not exit after stdin closed; killing it");
            if let Err(err) = child.kill().await {
                log::warn!("Failed to kill Stata: {err}");
            }
        }
    }
}
