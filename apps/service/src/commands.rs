//! Handlers behind the CLI subcommands.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use watchdog::database::models::Target;
use watchdog::database::{Database, DatabaseImpl, initialize_database};
use watchdog::metrics::MetricsWriter;
use watchdog::pool::open_pool;
use watchdog::registry::{TargetRegistry, TargetUpdate};
use watchdog::{Config, Orchestrator};

use crate::cli::{Commands, TargetArgs};

pub(crate) async fn execute(command: Commands, config: Config) -> Result<()> {
    if let Commands::Run = command {
        let pool = open_pool(&config.database.path, config.database.pool_size).await?;
        return Orchestrator::start(config, pool).await;
    }
    if let Commands::Config = command {
        println!("{config}");
        return Ok(());
    }

    let database = open_database(&config).await?;
    let registry = TargetRegistry::new(database.clone(), config.checker.allow_private_targets);

    match command {
        Commands::Add { url, options, paused } => {
            let mut target = Target::new(url);
            target.enabled = !paused;
            let update = options.into_update(None);
            let target = registry.add(apply_new(target, update)).await?;
            println!("Added {} ({})", target.uuid, target.url);
        }
        Commands::Update { id, url, options } => {
            let target = registry.find(&id).await?;
            let update = options.into_update(url);
            if update.is_empty() {
                println!("Nothing to update");
                return Ok(());
            }
            let target = registry.update(target.uuid, update).await?;
            println!("Updated {}", target.uuid);
        }
        Commands::Remove { id } => {
            let target = registry.find(&id).await?;
            registry.remove(target.uuid).await?;
            println!("Removed {} ({})", target.uuid, target.url);
        }
        Commands::List { json } => {
            let targets = registry.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&targets)?);
            } else {
                print_targets(database.as_ref(), &targets).await?;
            }
        }
        Commands::Pause { id } => {
            let target = registry.find(&id).await?;
            registry.set_enabled(target.uuid, false).await?;
            println!("Paused {}", target.uuid);
        }
        Commands::Resume { id } => {
            let target = registry.find(&id).await?;
            registry.set_enabled(target.uuid, true).await?;
            println!("Resumed {}", target.uuid);
        }
        Commands::StartAll => {
            let changed = registry.set_all_enabled(true).await?;
            println!("Resumed {changed} target(s)");
        }
        Commands::StopAll => {
            let changed = registry.set_all_enabled(false).await?;
            println!("Paused {changed} target(s)");
        }
        Commands::Results { id, limit } => {
            let target = registry.find(&id).await?;
            let metrics = MetricsWriter::new(database.clone(), &config.metrics);
            println!("{:<25} {:>6} {:>9}  OUTCOME", "TIME", "STATUS", "LATENCY");
            for result in metrics.recent(target.uuid, limit).await? {
                let status = result.status_code.map(|code| code.to_string()).unwrap_or_else(|| "-".into());
                let outcome = match &result.failure {
                    None => "ok".to_string(),
                    Some(reason) => reason.to_string(),
                };
                println!(
                    "{:<25} {:>6} {:>7}ms  {}",
                    format_time(result.timestamp),
                    status,
                    result.latency_ms,
                    outcome
                );
            }
        }
        Commands::Stats { id, hours } => {
            let target = registry.find(&id).await?;
            let metrics = MetricsWriter::new(database.clone(), &config.metrics);
            let summary = metrics.uptime(target.uuid, Duration::from_secs(hours.saturating_mul(3600))).await?;
            let state = database.load_target_state(target.uuid).await?;

            println!("{} ({})", target.display_name(), target.uuid);
            println!("  URL:       {}", target.url);
            match state {
                Some(state) => {
                    println!("  Status:    {}", state.status);
                    if let Some(at) = state.last_transition_at {
                        println!("  Since:     {}", format_time(at));
                    }
                }
                None => println!("  Status:    unknown"),
            }
            match summary.uptime_percentage() {
                Some(uptime) => println!(
                    "  Uptime:    {:.2}% of {} checks in the last {}h",
                    uptime, summary.total_checks, hours
                ),
                None => println!("  Uptime:    no checks in the last {hours}h"),
            }
            if let Some(latency) = summary.average_latency_ms {
                println!("  Latency:   {latency:.0}ms average");
            }

            let alerts = database.list_alert_events(target.uuid, 5).await?;
            if !alerts.is_empty() {
                println!("  Recent alerts:");
                for alert in alerts {
                    println!(
                        "    {}  {:<10} {}",
                        format_time(alert.occurred_at),
                        alert.kind,
                        alert.delivery_status
                    );
                }
            }
        }
        Commands::Run | Commands::Config => {}
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<Arc<DatabaseImpl>> {
    let pool = open_pool(&config.database.path, config.database.pool_size)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }
    Ok(Arc::new(DatabaseImpl::new_from_pool(pool)))
}

impl TargetArgs {
    fn into_update(self, url: Option<String>) -> TargetUpdate {
        TargetUpdate {
            name: self.name,
            url,
            method: self.method,
            headers: (!self.headers.is_empty()).then(|| self.headers.into_iter().collect()),
            body: self.body,
            interval_seconds: self.interval,
            timeout_seconds: self.timeout,
            expected_status: self.expect,
            enabled: None,
            owner_chat_id: self.chat_id,
        }
    }
}

/// Fill a fresh target from the optional CLI fields
fn apply_new(mut target: Target, update: TargetUpdate) -> Target {
    if let Some(name) = update.name {
        target.name = Some(name);
    }
    if let Some(method) = update.method {
        target.method = method;
    }
    if let Some(headers) = update.headers {
        target.headers = headers;
    }
    target.body = update.body;
    if let Some(interval) = update.interval_seconds {
        target.interval_seconds = interval;
    }
    if let Some(timeout) = update.timeout_seconds {
        target.timeout_seconds = timeout;
    }
    if let Some(range) = update.expected_status {
        target.expected_status = range;
    }
    target.owner_chat_id = update.owner_chat_id;
    target
}

async fn print_targets(database: &dyn Database, targets: &[Target]) -> Result<()> {
    if targets.is_empty() {
        println!("No targets configured");
        return Ok(());
    }

    println!("{:<8}  {:<7}  {:<7}  {:>8}  {:<20}  URL", "ID", "STATUS", "ENABLED", "INTERVAL", "NAME");
    for target in targets {
        let status = database
            .load_target_state(target.uuid)
            .await?
            .map(|state| state.status.to_string())
            .unwrap_or_else(|| "unknown".into());
        let id = target.uuid.to_string();
        println!(
            "{:<8}  {:<7}  {:<7}  {:>7}s  {:<20}  {}",
            &id[..8],
            status,
            if target.enabled { "yes" } else { "paused" },
            target.interval_seconds,
            target.name.as_deref().unwrap_or("-"),
            target.url
        );
    }
    Ok(())
}

fn format_time(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
