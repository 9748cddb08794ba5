//! tracker CLI: operator and hook interface to the enhancement tracker.

use clap::{Parser, Subcommand};
use enhancement_tracker::config::Config;
use enhancement_tracker::config::secrets::ExposeSecret;
use enhancement_tracker::model::{Completion, ItemId, Outcome, PriorityTier, Registration, Status};
use enhancement_tracker::telemetry::{TelemetryConfig, init_telemetry};
use enhancement_tracker::{Reaper, Tracker};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "tracker", about = "Shared work queue for enhancement workers")]
struct Cli {
    /// Worker identity. Required for complete and fail; other commands
    /// default to a fresh id per invocation.
    #[arg(long, global = true)]
    worker: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a work item (no-op if already tracked)
    Register {
        /// Stable item id, e.g. a file path
        id: String,
        /// Category used for filtering and reporting
        category: String,
        /// Priority tier: urgent, normal, or low
        #[arg(long, default_value = "normal")]
        priority: PriorityTier,
    },
    /// Claim the next pending item and print it as JSON
    Claim {
        /// Only claim from this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Mark a claimed item completed
    Complete {
        id: String,
        /// Reclassify the item's priority tier
        #[arg(long)]
        priority: Option<PriorityTier>,
        /// Audit entry as SOURCE=DESCRIPTION (repeatable)
        #[arg(long = "audit", value_parser = parse_audit)]
        audit: Vec<(String, String)>,
    },
    /// Report a failed attempt on a claimed item
    Fail {
        id: String,
        /// Diagnostic message kept on the item
        message: String,
    },
    /// Return stale in-progress items to pending
    Reap {
        /// Minutes after which a claim is stale (defaults to config)
        #[arg(long)]
        timeout_minutes: Option<u64>,
        /// Keep sweeping every N seconds until Ctrl-C
        #[arg(long)]
        watch: Option<u64>,
    },
    /// Print queue statistics as JSON
    Stats,
    /// Show a work item and its audit log
    Show { id: String },
    /// List work items
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by category
        #[arg(long)]
        category: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

/// Reports must name the worker that claimed the item; anything else may
/// run under a fresh id.
fn worker_id(flag: Option<String>, command: &Command) -> anyhow::Result<String> {
    match (flag, command) {
        (Some(worker), _) => Ok(worker),
        (None, Command::Complete { .. } | Command::Fail { .. }) => {
            anyhow::bail!("--worker is required to report on a claimed item")
        }
        (None, _) => Ok(format!(
            "worker-{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        )),
    }
}

fn parse_audit(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(source, description)| (source.to_string(), description.to_string()))
        .ok_or_else(|| format!("expected SOURCE=DESCRIPTION, got {raw:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let worker = worker_id(cli.worker, &cli.command)?;
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "enhancement-tracker".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let tracker = Arc::new(
        Tracker::open(config.database_url.expose_secret(), config.tracker.clone()).await?,
    );
    let result = run(&tracker, &worker, cli.command).await;
    if let Ok(tracker) = Arc::try_unwrap(tracker) {
        tracker.close().await;
    }
    result
}

async fn run(tracker: &Arc<Tracker>, worker: &str, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Register {
            id,
            category,
            priority,
        } => match tracker.register(id.as_str(), &category, priority).await? {
            Registration::Inserted => println!("Registered: {id} ({category}, {priority})"),
            Registration::AlreadyExists => println!("Already tracked: {id}"),
        },
        Command::Claim { category } => match tracker.claim(worker, category.as_deref()).await? {
            Some(item) => {
                eprintln!("claimed as {worker}; pass --worker {worker} to complete or fail");
                println!("{}", serde_json::to_string_pretty(&item)?);
            }
            None => println!("no work available"),
        },
        Command::Complete {
            id,
            priority,
            audit,
        } => {
            let mut outcome = Outcome::success();
            if let Some(tier) = priority {
                outcome = outcome.reclassify(tier);
            }
            for (source, description) in audit {
                outcome = outcome.audit(source, description);
            }
            let completion = tracker.complete(worker, &ItemId::from(id.as_str()), outcome).await?;
            print_completion(&id, completion);
        }
        Command::Fail { id, message } => {
            let completion = tracker.fail(worker, &ItemId::from(id.as_str()), message).await?;
            print_completion(&id, completion);
        }
        Command::Reap {
            timeout_minutes,
            watch,
        } => {
            let timeout = timeout_minutes
                .map(|m| Duration::from_secs(m.saturating_mul(60)))
                .unwrap_or_else(|| tracker.settings().stale_timeout());
            match watch {
                None => {
                    let count = tracker.reap_stale(timeout).await?;
                    println!("Reset {count} stale claim(s)");
                }
                Some(secs) => cmd_reap_watch(tracker, timeout, secs).await?,
            }
        }
        Command::Stats => {
            let stats = tracker.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Show { id } => {
            let id = ItemId::from(id);
            let item = tracker.get(&id).await?;
            let audit = tracker.audit_log(&id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "item": item, "audit": audit }))?
            );
        }
        Command::List {
            status,
            category,
            limit,
        } => {
            let status: Option<Status> = match status {
                Some(s) => Some(
                    s.parse()
                        .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
                ),
                None => None,
            };
            let items = tracker.list(status, category.as_deref(), limit).await?;
            if items.is_empty() {
                println!("No work items found.");
            }
            for item in items {
                println!(
                    "{:<10} {:<12} {:<7} retries={} {}",
                    item.status,
                    item.category,
                    item.priority_tier,
                    item.retry_count,
                    item.id
                );
            }
        }
    }
    Ok(())
}

async fn cmd_reap_watch(
    tracker: &Arc<Tracker>,
    timeout: Duration,
    secs: u64,
) -> anyhow::Result<()> {
    let reaper = Reaper::new(Arc::clone(tracker), Duration::from_secs(secs))?.timeout(timeout);
    let handle = reaper.spawn();

    tokio::signal::ctrl_c().await?;
    reaper.shutdown();

    let total = handle.await??;
    println!("Reset {total} stale claim(s)");
    Ok(())
}

fn print_completion(id: &str, completion: Completion) {
    match completion {
        Completion::Completed => println!("Completed: {id}"),
        Completion::Retrying { retry_count } => {
            println!("Failed: {id} (attempt {retry_count}, back to pending)")
        }
        Completion::PermanentlyFailed { retry_count } => {
            println!("Failed permanently: {id} after {retry_count} attempt(s)")
        }
    }
}
