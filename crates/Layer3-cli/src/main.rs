//! Valet CLI - Main entry point
//!
//! 대화형 디스패처 없이 큐/러너 코어를 직접 구동하는 얇은 드라이버입니다.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use valet_foundation::{RunTrace, TraceStatus, ValetConfig};
use valet_task::{ChatKey, ChatQueue, RunnerConfig, TaskRunner};

/// Valet - personal automation assistant core
#[derive(Parser, Debug)]
#[command(name = "valet")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one command under an agent profile
    Run {
        /// Agent profile name
        #[arg(short, long, default_value = "valet")]
        agent: String,

        /// Chat key to serialize against
        #[arg(short, long, default_value_t = 0.0)]
        chat: f64,

        /// Timeout override in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the full task result as JSON
        #[arg(long)]
        json: bool,

        /// The command line to execute (single line, no shell)
        #[arg(trailing_var_arg = true, required = true)]
        input: Vec<String>,
    },

    /// List configured agent profiles
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = ValetConfig::load_global()?;
    debug!("Loaded {} agent profile(s)", config.agents.len());

    match args.command {
        Command::Agents => {
            for profile in &config.agents {
                println!(
                    "{:<12} cwd={} allow=[{}]",
                    profile.name,
                    profile.cwd.display(),
                    profile.allow_commands.join(", ")
                );
            }
            Ok(())
        }
        Command::Run {
            agent,
            chat,
            timeout_ms,
            json,
            input,
        } => run_command(&config, &agent, chat, timeout_ms, json, input.join(" ")).await,
    }
}

async fn run_command(
    config: &ValetConfig,
    agent: &str,
    chat: f64,
    timeout_ms: Option<u64>,
    json: bool,
    input: String,
) -> anyhow::Result<()> {
    let profile = config
        .agent(agent)
        .ok_or_else(|| anyhow::anyhow!("unknown agent profile '{agent}'"))?
        .clone();

    let chat = ChatKey::new(chat)?;
    let limits = config.limits;
    let runner = TaskRunner::new(RunnerConfig::new(
        Duration::from_millis(timeout_ms.unwrap_or(limits.timeout_ms)),
        limits.max_output_chars,
    ));
    let queue = ChatQueue::new();

    let trace = RunTrace::start(chat.get(), "run_command", "cli");

    let exec_runner = runner.clone();
    let exec_profile = profile.clone();
    let exec_input = input.clone();
    let pending = queue
        .enqueue(chat, move || async move {
            let handle = exec_runner.start(&exec_profile, &exec_input).await?;
            handle.wait().await
        })
        .await;

    let settled = pending.wait().await?;
    match settled.value {
        Ok(result) => {
            let record = if result.is_success() {
                trace.finish(TraceStatus::Success)
            } else if result.timed_out {
                trace.finish_with_error(
                    TraceStatus::Timeout,
                    format!("timed out after {}ms", run_duration(&result)),
                )
            } else {
                trace.finish_with_error(
                    TraceStatus::Failure,
                    format!("task finished with status {}", result.task.status),
                )
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if !result.stdout.is_empty() {
                    print!("{}", result.stdout);
                }
                if !result.stderr.is_empty() {
                    eprint!("{}", result.stderr);
                }
            }
            eprintln!(
                "[{}] {} in {}ms (queued {}ms)",
                result.task.status, record.action, record.duration_ms, settled.wait_ms
            );

            if result.is_success() {
                Ok(())
            } else {
                std::process::exit(result.exit_code.unwrap_or(1));
            }
        }
        Err(e) => {
            let status = match e {
                valet_foundation::Error::CommandNotAllowed { .. } => TraceStatus::Denied,
                _ => TraceStatus::Failure,
            };
            let record = trace.finish_with_error(status, e.to_string());
            eprintln!("valet: {} ({}ms)", e, record.duration_ms);
            std::process::exit(2);
        }
    }
}

fn run_duration(result: &valet_task::TaskResult) -> i64 {
    (result.finished_at - result.task.started_at)
        .num_milliseconds()
        .max(0)
}
