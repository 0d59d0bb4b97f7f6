//! nexus-submit
//!
//! Command-line producer: pushes requests into the daemon inbox, waits for
//! answers, and manages scheduled jobs.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use nexus_common::{Origin, Parameters, ScheduledJob, TaskResult};
use nexusd_client::{NexusClient, DEFAULT_POLL_INTERVAL};
use serde_json::Value;
use tracing::{info, warn};

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Parser, Debug)]
#[command(name = "nexus-submit", version, about = "Submit work to the Nexus daemon")]
struct Cli {
    /// Redis URL of the shared store (or use NEXUS_REDIS_URL)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a message and wait for its answer
    Send {
        message: String,
        #[arg(long, default_value = "tool_protocol")]
        origin: String,
        /// Extra parameter as key=value (value parsed as JSON when possible)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Seconds to wait for an answer
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
        /// Do not request or wait for an answer
        #[arg(long)]
        no_wait: bool,
    },
    /// Schedule a message for later (and optionally every N seconds)
    Schedule {
        message: String,
        #[arg(long, conflicts_with = "at_ms")]
        in_secs: Option<u64>,
        /// Due time as epoch milliseconds
        #[arg(long)]
        at_ms: Option<i64>,
        #[arg(long)]
        every_secs: Option<u64>,
        /// Pre-classified action, skipping classification when the job fires
        #[arg(long, requires = "kind")]
        action: Option<String>,
        #[arg(long, requires = "action")]
        kind: Option<String>,
    },
    /// Cancel a scheduled job
    Cancel { job_id: String },
    /// Show the latest result of a scheduled job
    Result { job_id: String },
    /// Show the last persisted daemon statistics
    Stats,
    /// Show recent daemon log lines
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("nexus-submit: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let redis_url = cli
        .redis_url
        .or_else(|| std::env::var("NEXUS_REDIS_URL").ok())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    let client = NexusClient::connect(&redis_url).await?;

    match cli.command {
        Command::Send {
            message,
            origin,
            params,
            wait_secs,
            no_wait,
        } => {
            let origin = Origin::from(origin.as_str());
            let parameters = parse_params(&params)?;
            if no_wait {
                client.fire_and_forget(&message, origin, parameters).await?;
                info!("Submitted without waiting");
                return Ok(ExitCode::SUCCESS);
            }
            let request_id = client.submit(&message, origin, parameters).await?;
            let answer = client
                .wait_answer(&request_id, Duration::from_secs(wait_secs), DEFAULT_POLL_INTERVAL)
                .await?;
            match answer {
                Some(result) => Ok(print_result(&result)?),
                None => {
                    warn!(%request_id, "No answer yet; outcome unknown");
                    eprintln!("no answer for {request_id} after {wait_secs}s (outcome unknown)");
                    Ok(ExitCode::from(3))
                }
            }
        }
        Command::Schedule {
            message,
            in_secs,
            at_ms,
            every_secs,
            action,
            kind,
        } => {
            let mut job = match (at_ms, in_secs) {
                (Some(at), _) => ScheduledJob::at(&message, at),
                (None, Some(secs)) => ScheduledJob::after(&message, Duration::from_secs(secs)),
                (None, None) => bail!("either --in-secs or --at-ms is required"),
            };
            if let Some(every) = every_secs.filter(|secs| *secs > 0) {
                job = job.every(Duration::from_secs(every));
            }
            if let (Some(kind), Some(action)) = (kind, action) {
                job = job.with_intent(kind, action);
            }
            let job_id = client.schedule(&job).await?;
            println!("{job_id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Cancel { job_id } => {
            if client.cancel(&job_id).await? {
                println!("cancelled {job_id}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("no scheduled job '{job_id}'");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Result { job_id } => match client.job_result(&job_id).await? {
            Some(result) => Ok(print_result(&result)?),
            None => {
                eprintln!("no result for job '{job_id}'");
                Ok(ExitCode::from(3))
            }
        },
        Command::Stats => {
            let stats = client
                .stats()
                .await?
                .ok_or_else(|| anyhow!("no statistics persisted yet"))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs { limit } => {
            for line in client.recent_logs(limit).await? {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_result(result: &TaskResult) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn parse_params(raw: &[String]) -> Result<Option<Parameters>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut parameters = Parameters::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("parameter '{pair}' is not KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("parameter '{pair}' has an empty key");
        }
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        parameters.insert(key.to_string(), value);
    }
    Ok(Some(parameters))
}
