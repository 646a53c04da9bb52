//! Gradewatch CLI
//!
//! Watches AI feedback generation for submitted answers and requests
//! regeneration when it fails.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gradewatch_core::{
    Config, FeedbackPoller, HttpFeedbackApi, JobSnapshot, JobStatus, ModuleFeedbackStatus,
    PollSettings, RetryOutcome,
};
use gradewatch_stub::{StubScript, StubState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the stub backend.
const DEFAULT_STUB_PORT: u16 = 8000;

/// Exit code for a job that ended in failure.
const EXIT_FEEDBACK_FAILED: u8 = 2;

/// Gradewatch - AI feedback generation watcher
///
/// Follows feedback generation jobs on the grading backend until they finish,
/// and retries failed ones within the server's retry budget.
#[derive(Parser, Debug)]
#[command(name = "gradewatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: gradewatch.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Backend base URL (overrides config and GRADEWATCH_API_URL)
    #[arg(long, value_name = "URL", global = true)]
    api_url: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll an answer's feedback until it completes or fails
    Watch {
        /// Answer whose feedback is being generated
        #[arg(value_name = "ANSWER_ID")]
        answer_id: String,

        /// Poll interval in milliseconds (overrides pollIntervalMs)
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,

        /// Retry automatically while the retry budget allows it
        #[arg(long)]
        auto_retry: bool,

        /// Print each snapshot as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Fetch an answer's feedback status once
    Status {
        /// Answer to look up
        #[arg(value_name = "ANSWER_ID")]
        answer_id: String,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request regeneration of failed feedback
    Retry {
        /// Answer whose feedback should be regenerated
        #[arg(value_name = "ANSWER_ID")]
        answer_id: String,
    },

    /// Summarize feedback availability for a module attempt
    Module {
        /// Module identifier
        #[arg(value_name = "MODULE_ID")]
        module_id: String,

        /// Student whose attempt is summarized
        #[arg(long, value_name = "ID")]
        student_id: String,

        /// Attempt number
        #[arg(long, default_value_t = 1)]
        attempt: u32,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the scripted stub backend
    Stub {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_STUB_PORT)]
        port: u16,

        /// Job script (default: built-in demo jobs)
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?cli.config, api_url = ?cli.api_url, "Starting gradewatch");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Dispatches the selected subcommand.
async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Command::Stub { port, script } = cli.command {
        run_stub(port, script.as_deref()).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_deref(), cli.api_url.as_deref())?;
    tracing::debug!(api_url = %config.api_url, interval_ms = config.poll_interval_ms, "Configuration loaded");

    match cli.command {
        Command::Watch {
            answer_id,
            interval_ms,
            auto_retry,
            json,
        } => run_watch(&config, &answer_id, interval_ms, auto_retry, json).await,
        Command::Status { answer_id, json } => {
            run_status(&config, &answer_id, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Retry { answer_id } => {
            run_retry(&config, &answer_id).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Module {
            module_id,
            student_id,
            attempt,
            json,
        } => {
            run_module(&config, &module_id, &student_id, attempt, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stub { .. } => Ok(ExitCode::SUCCESS),
    }
}

// ============================================================================
// Commands
// ============================================================================

/// What `watch` should do after a snapshot update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchVerdict {
    /// Keep waiting for updates.
    Continue,
    /// Ask the backend to regenerate.
    Retry,
    /// Stop with the given exit code.
    Done(u8),
}

/// Decides the next `watch` step from a snapshot.
fn watch_verdict(snapshot: &JobSnapshot, auto_retry: bool) -> WatchVerdict {
    if snapshot.is_completed() {
        return WatchVerdict::Done(0);
    }
    if !snapshot.is_failed() || snapshot.retry_in_flight {
        return WatchVerdict::Continue;
    }
    if auto_retry && snapshot.retry_available() {
        WatchVerdict::Retry
    } else {
        WatchVerdict::Done(EXIT_FEEDBACK_FAILED)
    }
}

/// Polls until the job completes or fails, printing every visible change.
async fn run_watch(
    config: &Config,
    answer_id: &str,
    interval_ms: Option<u64>,
    auto_retry: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let answer_id = require_answer_id(answer_id)?;
    let mut settings = PollSettings::from_config(config);
    if let Some(ms) = interval_ms {
        if ms == 0 {
            anyhow::bail!("--interval-ms must be greater than 0");
        }
        settings = settings.with_interval(Duration::from_millis(ms));
    }

    let api = Arc::new(HttpFeedbackApi::from_config(config)?);
    let mut poller = FeedbackPoller::new(api, answer_id, settings);
    let mut updates = poller.subscribe();

    if !json {
        println!("Watching feedback for answer {answer_id}...");
    }
    poller.start();

    let mut last_line = String::new();
    loop {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, stopping");
                poller.stop();
                anyhow::bail!("Interrupted before feedback generation finished");
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    anyhow::bail!("Poller stopped unexpectedly");
                }
                let snapshot = updates.borrow_and_update().clone();

                let line = snapshot_line(&snapshot);
                if line != last_line {
                    print_snapshot(&snapshot, json)?;
                    last_line = line;
                }

                match watch_verdict(&snapshot, auto_retry) {
                    WatchVerdict::Continue => {}
                    WatchVerdict::Retry => {
                        let outcome = poller.retry().await;
                        print_retry_outcome(&outcome, json);
                        if !outcome.is_success() {
                            return Ok(ExitCode::from(EXIT_FEEDBACK_FAILED));
                        }
                    }
                    WatchVerdict::Done(code) => {
                        print_final(&snapshot, json);
                        return Ok(ExitCode::from(code));
                    }
                }
            }
        }
    }
}

/// Fetches and prints a single snapshot.
async fn run_status(config: &Config, answer_id: &str, json: bool) -> anyhow::Result<()> {
    let answer_id = require_answer_id(answer_id)?;
    let poller = single_shot_poller(config, answer_id)?;

    let snapshot = fetch_snapshot(&poller).await?;
    print_snapshot(&snapshot, json)?;
    if !json {
        print_final(&snapshot, false);
    }
    Ok(())
}

/// Fetches the current state, asks for regeneration, then reads the job back
/// so the reported retry usage comes from the server.
async fn run_retry(config: &Config, answer_id: &str) -> anyhow::Result<JobSnapshot> {
    let answer_id = require_answer_id(answer_id)?;
    let mut poller = single_shot_poller(config, answer_id)?;

    let snapshot = fetch_snapshot(&poller).await?;
    print_snapshot(&snapshot, false)?;

    match poller.retry().await {
        RetryOutcome::Success { message } => {
            println!("Retry accepted: {message}");
            let refreshed = fetch_snapshot(&poller).await?;
            print_snapshot(&refreshed, false)?;
            println!(
                "Retries used: {}/{}",
                refreshed.retry_count, refreshed.max_retries
            );
            Ok(refreshed)
        }
        RetryOutcome::Failure { error, rejection } => {
            tracing::debug!(?rejection, "Retry not performed");
            anyhow::bail!("{error}")
        }
    }
}

/// Prints the feedback summary of a module attempt.
async fn run_module(
    config: &Config,
    module_id: &str,
    student_id: &str,
    attempt: u32,
    json: bool,
) -> anyhow::Result<()> {
    let api = HttpFeedbackApi::from_config(config)?;
    let summary = api.module_status(module_id, student_id, attempt).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_module_summary(module_id, attempt, &summary);
    }
    Ok(())
}

/// Serves the stub backend until Ctrl+C.
async fn run_stub(port: u16, script_path: Option<&Path>) -> anyhow::Result<()> {
    let script = match script_path {
        Some(path) => StubScript::load_from_file(path)?,
        None => StubScript::demo(),
    };

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port")
    })?;

    println!("Stub feedback backend running on http://{addr}");
    for answer_id in script.jobs.keys() {
        println!("  answer: {answer_id}");
    }
    println!("Press Ctrl+C to stop");

    let state = StubState::from_script(script);
    tokio::select! {
        result = gradewatch_stub::serve(listener, state) => result?,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down stub");
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration from the specified path or default location, then
/// applies environment and command-line overrides.
fn load_config(config_path: Option<&str>, api_url: Option<&str>) -> anyhow::Result<Config> {
    let config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load()?,
    };

    let mut config = config.with_env_overrides();
    if let Some(url) = api_url {
        config = config.with_api_url(url);
    }

    // Re-validate after overrides
    config.validate()?;
    Ok(config)
}

fn require_answer_id(answer_id: &str) -> anyhow::Result<&str> {
    let trimmed = answer_id.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Answer id must not be empty");
    }
    Ok(trimmed)
}

/// A poller that never arms its timer, for one-off commands.
fn single_shot_poller(
    config: &Config,
    answer_id: &str,
) -> anyhow::Result<FeedbackPoller<HttpFeedbackApi>> {
    let api = Arc::new(HttpFeedbackApi::from_config(config)?);
    let settings = PollSettings::from_config(config).with_enabled(false);
    Ok(FeedbackPoller::new(api, answer_id, settings))
}

/// Fetches once, turning a failed first fetch into an error.
async fn fetch_snapshot(poller: &FeedbackPoller<HttpFeedbackApi>) -> anyhow::Result<JobSnapshot> {
    let snapshot = poller.poll_once().await;
    if snapshot.status == JobStatus::Unknown {
        let message = snapshot
            .error_message
            .unwrap_or_else(|| "Backend returned an unrecognized status".to_string());
        anyhow::bail!("{message}");
    }
    Ok(snapshot)
}

/// One-line human rendering of a snapshot.
fn snapshot_line(snapshot: &JobSnapshot) -> String {
    let mut line = format!("{}: {} {}%", snapshot.answer_id, snapshot.status, snapshot.progress);
    if snapshot.retry_count > 0 {
        line.push_str(&format!(
            " (retry {}/{})",
            snapshot.retry_count, snapshot.max_retries
        ));
    }
    if let Some(error) = &snapshot.error_message {
        line.push_str(&format!(" - {error}"));
    }
    line
}

fn print_snapshot(snapshot: &JobSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        let at = snapshot
            .last_polled_at
            .map_or_else(|| "--:--:--".to_string(), |t| t.format("%H:%M:%S").to_string());
        println!("[{at}] {}", snapshot_line(snapshot));
    }
    Ok(())
}

fn print_retry_outcome(outcome: &RetryOutcome, json: bool) {
    if json {
        return;
    }
    match outcome {
        RetryOutcome::Success { message } => println!("  Retry requested: {message}"),
        RetryOutcome::Failure { error, .. } => println!("  Retry failed: {error}"),
    }
}

/// Prints the closing message of a watch or status run.
fn print_final(snapshot: &JobSnapshot, json: bool) {
    if json {
        return;
    }
    if snapshot.is_completed() {
        println!("Feedback is ready.");
        if let Some(feedback) = &snapshot.feedback {
            if let Ok(pretty) = serde_json::to_string_pretty(feedback) {
                println!("{pretty}");
            }
        }
    } else if snapshot.is_failed() {
        if let Some(kind) = &snapshot.error_type {
            println!("Feedback generation failed ({kind}).");
        } else {
            println!("Feedback generation failed.");
        }
        if snapshot.retry_available() {
            println!(
                "Retries remaining: {}. Run `gradewatch retry {}` to try again.",
                snapshot.max_retries - snapshot.retry_count,
                snapshot.answer_id
            );
        } else {
            println!("No retries remaining. Please contact your instructor for assistance.");
        }
    }
}

fn print_module_summary(module_id: &str, attempt: u32, summary: &ModuleFeedbackStatus) {
    println!("Module {module_id}, attempt {attempt}");
    println!(
        "  Feedback ready: {}/{} ({}%)",
        summary.feedback_ready, summary.total_questions, summary.progress_percentage
    );
    for question in &summary.questions {
        let state = if question.has_feedback { "ready" } else { "pending" };
        println!(
            "  {} (answer {}): {state}",
            question.question_id, question.answer_id
        );
    }
    if summary.all_complete {
        println!("All feedback is ready.");
    }
}
