/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Manages the lifecycle of the scheduler, dispatcher and retention tasks
/// - Consumes check results: metrics first, then state evaluation
/// - Hands confirmed transitions to the alert dispatcher
pub mod retention;


pub use retention::{RetentionCleanup, RetentionPolicy, RetentionReport};

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerting::{AlertDispatcher, NotificationSender, build_sender};
use crate::config::Config;
use crate::database::models::AlertEvent;
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::metrics::MetricsWriter;
use crate::monitoring::{CheckResult, CheckWorker, Checker, HttpChecker, MonitoringScheduler, StateEvaluator};
use crate::pool::LibsqlPool;

const RESULT_QUEUE_SIZE: usize = 256;
const ALERT_QUEUE_SIZE: usize = 256;
/// How long in-progress alert deliveries may finish after shutdown was requested
const DISPATCH_GRACE: Duration = Duration::from_secs(5);

/// Main orchestrator for the watchdog service
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    metrics: MetricsWriter,
    evaluator: StateEvaluator,
    scheduler: Arc<MonitoringScheduler>,
    dispatcher: Arc<AlertDispatcher>,
    result_rx: mpsc::Receiver<CheckResult>,
    alert_tx: mpsc::Sender<Uuid>,
    alert_rx: Option<mpsc::Receiver<Uuid>>,
}

impl Orchestrator {
    /// Create and run an orchestrator until Ctrl-C
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let orchestrator = Self::new(config, pool).await?;
        orchestrator
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Shutdown requested");
            })
            .await
    }

    /// Create an orchestrator backed by the HTTP checker and the configured
    /// alert channel
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let conn = pool.get().await?;
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));
        let checker = Arc::new(HttpChecker::new(&config.checker)?);
        let sender = build_sender(&config.alerting)?;
        info!("Alert channel: {}", sender.channel());

        Ok(Self::with_components(config, database, checker, sender))
    }

    /// Wire the pipeline around the given storage, checker and sender
    pub fn with_components(
        config: Config,
        database: Arc<dyn Database>,
        checker: Arc<dyn Checker>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        let config = Arc::new(config);
        let (result_tx, result_rx) = mpsc::channel(RESULT_QUEUE_SIZE);
        let (alert_tx, alert_rx) = mpsc::channel(ALERT_QUEUE_SIZE);

        let worker = Arc::new(CheckWorker::new(checker));
        let scheduler = Arc::new(MonitoringScheduler::new(
            Arc::clone(&database),
            worker,
            result_tx,
            config.scheduler.clone(),
        ));

        Self {
            metrics: MetricsWriter::new(Arc::clone(&database), &config.metrics),
            evaluator: StateEvaluator::new(Arc::clone(&database), (&config.evaluator).into()),
            dispatcher: Arc::new(AlertDispatcher::new(Arc::clone(&database), sender, &config.alerting)),
            scheduler,
            database,
            config,
            result_rx,
            alert_tx,
            alert_rx: Some(alert_rx),
        }
    }

    /// Run until `shutdown` completes, then stop the background tasks
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Starting watchdog orchestrator...");

        let alert_rx = self.alert_rx.take().ok_or_else(|| anyhow::anyhow!("orchestrator already ran"))?;
        let dispatcher_handle = Arc::clone(&self.dispatcher).spawn(alert_rx);
        self.dispatcher.requeue_pending(&self.alert_tx).await?;

        let targets = self.scheduler.reload().await?;
        info!("Loaded {} enabled targets", targets);

        let policy = RetentionPolicy::from(&self.config.retention);
        info!(
            "Retention policy: results={}d, alerts={}d",
            policy.result_days, policy.alert_days
        );
        let retention_handle = RetentionCleanup::new(Arc::clone(&self.database), policy).start_periodic_cleanup();
        let scheduler_handle = Arc::clone(&self.scheduler).spawn();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(result) = self.result_rx.recv() => {
                    if let Err(e) = self.process_result(&result).await {
                        error!(target = %result.target_id, "Failed to process check result: {:#}", e);
                    }
                }
                _ = &mut shutdown => break,
            }
        }

        info!("Stopping orchestrator...");
        scheduler_handle.abort();
        retention_handle.abort();
        self.drain_results().await;

        // closing the queue lets the dispatcher finish what it already holds
        drop(self);
        let abort_handle = dispatcher_handle.abort_handle();
        if tokio::time::timeout(DISPATCH_GRACE, dispatcher_handle).await.is_err() {
            warn!("Alert dispatcher did not finish in time, pending alerts will be retried on next start");
            abort_handle.abort();
        }

        let stopped = futures::future::join_all([scheduler_handle, retention_handle]).await;
        debug!("{} background tasks stopped", stopped.len());
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Store a result, evaluate it and queue any resulting alert
    pub async fn process_result(&self, result: &CheckResult) -> Result<Option<AlertEvent>> {
        // checks already running when their target was removed
        if self.database.get_target(result.target_id).await?.is_none() {
            debug!(target = %result.target_id, "Dropping result of removed target");
            self.evaluator.forget(result.target_id).await;
            return Ok(None);
        }

        if let Err(e) = self.metrics.record(result).await {
            // already logged by the writer; evaluation still runs
            debug!(target = %result.target_id, attempts = e.attempts, "Evaluating unstored result");
        }

        let Some(event) = self.evaluator.evaluate(result).await? else {
            return Ok(None);
        };

        info!(target = %event.target_uuid, kind = %event.kind, "Queueing alert");
        self.alert_tx.send(event.uuid).await?;
        Ok(Some(event))
    }

    /// Results of checks that finished while shutting down
    async fn drain_results(&mut self) {
        while let Ok(result) = self.result_rx.try_recv() {
            if let Err(e) = self.process_result(&result).await {
                error!(target = %result.target_id, "Failed to process check result: {:#}", e);
            }
        }
    }

    pub fn scheduler(&self) -> &Arc<MonitoringScheduler> {
        &self.scheduler
    }

    pub fn evaluator(&self) -> &StateEvaluator {
        &self.evaluator
    }
}
