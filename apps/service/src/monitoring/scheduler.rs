use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::CheckWorker;
use super::types::CheckResult;
use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::database::models::Target;

/// First slot strictly after `now` on the wall-clock grid of `interval`.
///
/// A target with a 60s interval is due on whole minutes, whatever time it
/// was added or last checked.
pub fn next_aligned_time(now: SystemTime, interval: Duration) -> SystemTime {
    let step = interval.as_millis().max(1);
    let now_ms = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let next_ms = (now_ms / step + 1) * step;
    UNIX_EPOCH + Duration::from_millis(next_ms as u64)
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    target: Target,
    next_due: SystemTime,
}

/// Due-time bookkeeping for the enabled targets.
///
/// Pure data structure: no clock, no I/O, so the cadence rules can be tested
/// with synthetic timestamps.
#[derive(Debug, Default)]
pub struct Schedule {
    entries: HashMap<Uuid, ScheduleEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_due(&self, target_uuid: &Uuid) -> Option<SystemTime> {
        self.entries.get(target_uuid).map(|entry| entry.next_due)
    }

    /// Replace the tracked targets with `targets`.
    ///
    /// New targets are due right away. Known targets keep their slot unless
    /// their interval changed, in which case they move to the new grid.
    /// Targets no longer listed are dropped.
    pub fn sync_targets(&mut self, targets: Vec<Target>, now: SystemTime) {
        let mut next = HashMap::with_capacity(targets.len());

        for target in targets.into_iter().filter(|target| target.enabled) {
            let next_due = match self.entries.remove(&target.uuid) {
                Some(entry) if entry.target.interval_seconds == target.interval_seconds => entry.next_due,
                Some(_) => next_aligned_time(now, target.interval()),
                None => now,
            };
            next.insert(target.uuid, ScheduleEntry { target, next_due });
        }

        for removed in self.entries.keys() {
            debug!(target = %removed, "Target left the schedule");
        }
        self.entries = next;
    }

    /// Collect up to `limit` targets that are due at `now`.
    ///
    /// Every taken target advances to its next aligned slot, so slots missed
    /// while the process was busy or asleep are skipped rather than replayed.
    /// A due target that is still in flight is skipped the same way. Due
    /// targets beyond `limit` stay due for the next call.
    pub fn take_due(&mut self, now: SystemTime, limit: usize, in_flight: &HashSet<Uuid>) -> Vec<Target> {
        let mut due: Vec<&mut ScheduleEntry> =
            self.entries.values_mut().filter(|entry| entry.next_due <= now).collect();
        due.sort_by_key(|entry| entry.next_due);

        let mut taken = Vec::new();
        for entry in due {
            if in_flight.contains(&entry.target.uuid) {
                debug!(target = %entry.target.uuid, "Previous check still running, skipping slot");
                entry.next_due = next_aligned_time(now, entry.target.interval());
                continue;
            }
            if taken.len() >= limit {
                break;
            }
            entry.next_due = next_aligned_time(now, entry.target.interval());
            taken.push(entry.target.clone());
        }
        taken
    }
}

/// Releases a target's in-flight slot when dropped, including on panic or
/// task cancellation.
struct InFlightGuard {
    target_uuid: Uuid,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.target_uuid);
        }
    }
}

/// Monitoring scheduler - decides when each target is probed
pub struct MonitoringScheduler {
    database: Arc<dyn Database>,
    worker: Arc<CheckWorker>,
    result_tx: mpsc::Sender<CheckResult>,
    settings: SchedulerConfig,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    schedule: Mutex<Schedule>,
}

impl MonitoringScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        worker: Arc<CheckWorker>,
        result_tx: mpsc::Sender<CheckResult>,
        settings: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_checks.max(1)));
        Self {
            database,
            worker,
            result_tx,
            settings,
            permits,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            schedule: Mutex::new(Schedule::new()),
        }
    }

    /// Re-read the enabled targets from the registry
    pub async fn reload(&self) -> anyhow::Result<usize> {
        let targets = self.database.get_enabled_targets().await?;
        let mut schedule = self.lock_schedule()?;
        schedule.sync_targets(targets, SystemTime::now());
        Ok(schedule.len())
    }

    /// Number of checks currently running or waiting for a permit
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Spawn one check job for every target due at `now`
    pub fn dispatch_due(&self, now: SystemTime) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let due = {
            let in_flight = self
                .in_flight
                .lock()
                .map_err(|_| anyhow::anyhow!("in-flight set lock poisoned"))?;
            self.lock_schedule()?.take_due(now, self.settings.max_dispatch_per_tick, &in_flight)
        };

        let mut handles = Vec::with_capacity(due.len());
        for target in due {
            let guard = self.claim(target.uuid)?;
            let database = Arc::clone(&self.database);
            let worker = Arc::clone(&self.worker);
            let permits = Arc::clone(&self.permits);
            let result_tx = self.result_tx.clone();

            handles.push(tokio::spawn(async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                // the schedule only learns about removals on reload
                let target = match database.get_target(target.uuid).await {
                    Ok(Some(current)) if current.enabled => current,
                    Ok(Some(_)) => {
                        debug!(target = %target.uuid, "Target paused, skipping check");
                        return;
                    }
                    Ok(None) => {
                        debug!(target = %target.uuid, "Target removed, skipping check");
                        return;
                    }
                    Err(e) => {
                        warn!(target = %target.uuid, "Failed to re-read target, using cached definition: {}", e);
                        target
                    }
                };

                let result = worker.probe(&target).await;
                if let Err(e) = result_tx.send(result).await {
                    warn!(target = %target.uuid, "Result channel closed, dropping result: {}", e);
                }
            }));
        }
        Ok(handles)
    }

    /// Run the tick loop until the result channel closes
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.settings.tick());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_reload: Option<Instant> = None;

            info!(
                "Scheduler started (tick {:?}, up to {} concurrent checks)",
                self.settings.tick(),
                self.settings.max_concurrent_checks
            );

            loop {
                ticker.tick().await;
                if self.result_tx.is_closed() {
                    info!("Result channel closed, stopping scheduler");
                    break;
                }

                let reload_due = last_reload.is_none_or(|at| at.elapsed() >= self.settings.reload_interval());
                if reload_due {
                    match self.reload().await {
                        Ok(count) => debug!("Schedule reloaded: {} enabled targets", count),
                        Err(e) => error!("Failed to reload targets: {}", e),
                    }
                    last_reload = Some(Instant::now());
                }

                match self.dispatch_due(SystemTime::now()) {
                    Ok(handles) if !handles.is_empty() => debug!("Dispatched {} checks", handles.len()),
                    Ok(_) => {}
                    Err(e) => error!("Failed to dispatch checks: {}", e),
                }
            }
        })
    }

    fn claim(&self, target_uuid: Uuid) -> anyhow::Result<InFlightGuard> {
        self.in_flight
            .lock()
            .map_err(|_| anyhow::anyhow!("in-flight set lock poisoned"))?
            .insert(target_uuid);
        Ok(InFlightGuard { target_uuid, in_flight: Arc::clone(&self.in_flight) })
    }

    fn lock_schedule(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Schedule>> {
        self.schedule.lock().map_err(|_| anyhow::anyhow!("schedule lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::temp_database;
    use crate::error::ProbeError;
    use crate::monitoring::checker::{Checker, ProbeResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn target(interval: u64) -> Target {
        Target::new("https://example.com").with_interval(interval, 1)
    }

    #[test]
    fn aligned_time_is_strictly_after_now() {
        assert_eq!(next_aligned_time(at(120), Duration::from_secs(60)), at(180));
        assert_eq!(next_aligned_time(at(121), Duration::from_secs(60)), at(180));
        assert_eq!(next_aligned_time(at(179), Duration::from_secs(60)), at(180));
    }

    #[test]
    fn new_targets_are_due_immediately_then_aligned() {
        let mut schedule = Schedule::new();
        let t = target(60);
        let id = t.uuid;
        schedule.sync_targets(vec![t], at(1_000));

        let due = schedule.take_due(at(1_000), 100, &HashSet::new());
        assert_eq!(due.len(), 1);
        assert_eq!(schedule.next_due(&id), Some(at(1_020)));
        assert!(schedule.take_due(at(1_010), 100, &HashSet::new()).is_empty());
    }

    #[test]
    fn missed_slots_are_not_backfilled() {
        let mut schedule = Schedule::new();
        let t = target(10);
        let id = t.uuid;
        schedule.sync_targets(vec![t], at(100));
        schedule.take_due(at(100), 100, &HashSet::new());

        // the process slept through five slots
        let due = schedule.take_due(at(165), 100, &HashSet::new());
        assert_eq!(due.len(), 1);
        assert_eq!(schedule.next_due(&id), Some(at(170)));
        assert!(schedule.take_due(at(166), 100, &HashSet::new()).is_empty());
    }

    #[test]
    fn in_flight_target_skips_its_slot() {
        let mut schedule = Schedule::new();
        let t = target(10);
        let id = t.uuid;
        schedule.sync_targets(vec![t], at(100));

        let busy: HashSet<Uuid> = [id].into_iter().collect();
        assert!(schedule.take_due(at(100), 100, &busy).is_empty());
        assert_eq!(schedule.next_due(&id), Some(at(110)));
    }

    #[test]
    fn dispatch_is_capped_per_call() {
        let mut schedule = Schedule::new();
        schedule.sync_targets((0..5).map(|_| target(60)).collect(), at(0));

        assert_eq!(schedule.take_due(at(0), 2, &HashSet::new()).len(), 2);
        assert_eq!(schedule.take_due(at(0), 2, &HashSet::new()).len(), 2);
        assert_eq!(schedule.take_due(at(0), 2, &HashSet::new()).len(), 1);
    }

    #[test]
    fn sync_drops_removed_and_paused_targets() {
        let mut schedule = Schedule::new();
        let kept = target(60);
        let mut paused = target(60);
        schedule.sync_targets(vec![kept.clone(), paused.clone(), target(60)], at(0));
        assert_eq!(schedule.len(), 3);

        paused.enabled = false;
        schedule.sync_targets(vec![kept.clone(), paused], at(5));
        assert_eq!(schedule.len(), 1);
        assert!(schedule.next_due(&kept.uuid).is_some());
    }

    #[test]
    fn interval_change_moves_target_to_new_grid() {
        let mut schedule = Schedule::new();
        let mut t = target(60);
        schedule.sync_targets(vec![t.clone()], at(0));
        schedule.take_due(at(0), 100, &HashSet::new());
        assert_eq!(schedule.next_due(&t.uuid), Some(at(60)));

        t.interval_seconds = 15;
        schedule.sync_targets(vec![t.clone()], at(5));
        assert_eq!(schedule.next_due(&t.uuid), Some(at(15)));
    }

    /// Blocks every probe until released, counting calls and peak concurrency
    #[derive(Default)]
    struct GatedChecker {
        release: Notify,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Checker for GatedChecker {
        async fn check(&self, _target: &Target) -> Result<ProbeResponse, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            self.release.notified().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ProbeResponse { status_code: 200 })
        }
    }

    async fn wait_for(predicate: impl Fn() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn at_most_one_check_in_flight_per_target() -> anyhow::Result<()> {
        let (_dir, database) = temp_database().await;
        let t = Target::new("https://example.com").with_interval(1, 1);
        database.save_target(&t).await?;

        let checker = Arc::new(GatedChecker::default());
        let worker = Arc::new(CheckWorker::new(checker.clone()));
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = MonitoringScheduler::new(database, worker, tx, SchedulerConfig::default());
        assert_eq!(scheduler.reload().await?, 1);

        let now = SystemTime::now();
        let first = scheduler.dispatch_due(now)?;
        assert_eq!(first.len(), 1);
        wait_for(|| checker.calls.load(Ordering::SeqCst) == 1).await;

        // next slots pass while the first probe hangs
        assert!(scheduler.dispatch_due(now + Duration::from_secs(2))?.is_empty());
        assert!(scheduler.dispatch_due(now + Duration::from_secs(3))?.is_empty());
        assert_eq!(scheduler.in_flight_count(), 1);

        checker.release.notify_waiters();
        for handle in first {
            handle.await?;
        }
        assert_eq!(scheduler.in_flight_count(), 0);
        assert!(rx.recv().await.is_some());

        let later = scheduler.dispatch_due(now + Duration::from_secs(5))?;
        assert_eq!(later.len(), 1);
        wait_for(|| checker.calls.load(Ordering::SeqCst) == 2).await;
        checker.release.notify_waiters();
        for handle in later {
            handle.await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn removed_and_paused_targets_are_not_probed() -> anyhow::Result<()> {
        let (_dir, database) = temp_database().await;
        let removed = Target::new("https://example.com").with_interval(60, 5);
        let paused = Target::new("https://example.org").with_interval(60, 5);
        let kept = Target::new("https://example.net").with_interval(60, 5);
        for t in [&removed, &paused, &kept] {
            database.save_target(t).await?;
        }

        let checker = Arc::new(GatedChecker::default());
        let worker = Arc::new(CheckWorker::new(checker.clone()));
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = MonitoringScheduler::new(database.clone(), worker, tx, SchedulerConfig::default());
        assert_eq!(scheduler.reload().await?, 3);

        // changed after the last reload
        database.delete_target(removed.uuid).await?;
        database.set_target_enabled(paused.uuid, false).await?;

        let handles = scheduler.dispatch_due(SystemTime::now())?;
        wait_for(|| checker.calls.load(Ordering::SeqCst) == 1).await;
        checker.release.notify_waiters();
        for handle in handles {
            handle.await?;
        }

        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
        let result = rx.recv().await.expect("result of the kept target");
        assert_eq!(result.target_id, kept.uuid);
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.in_flight_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_permits() -> anyhow::Result<()> {
        let (_dir, database) = temp_database().await;
        for _ in 0..3 {
            database.save_target(&Target::new("https://example.com").with_interval(60, 5)).await?;
        }

        let checker = Arc::new(GatedChecker::default());
        let worker = Arc::new(CheckWorker::new(checker.clone()));
        let (tx, mut rx) = mpsc::channel(16);
        let settings = SchedulerConfig { max_concurrent_checks: 1, ..SchedulerConfig::default() };
        let scheduler = MonitoringScheduler::new(database, worker, tx, settings);
        scheduler.reload().await?;

        let handles = scheduler.dispatch_due(SystemTime::now())?;
        assert_eq!(handles.len(), 3);

        for completed in 1..=3 {
            wait_for(|| checker.calls.load(Ordering::SeqCst) == completed).await;
            checker.release.notify_waiters();
            assert!(rx.recv().await.is_some());
        }
        for handle in handles {
            handle.await?;
        }

        assert_eq!(checker.peak.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
