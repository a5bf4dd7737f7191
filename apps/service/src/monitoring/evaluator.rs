use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{CheckResult, TargetStatus};
use crate::config::EvaluatorConfig;
use crate::database::Database;
use crate::database::models::{AlertEvent, TargetState, TransitionKind};

/// Consecutive-result thresholds for confirming a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub failure: u32,
    pub recovery: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { failure: 3, recovery: 1 }
    }
}

impl From<&EvaluatorConfig> for Thresholds {
    fn from(config: &EvaluatorConfig) -> Self {
        Self { failure: config.failure_threshold.max(1), recovery: config.recovery_threshold.max(1) }
    }
}

/// A status change caused by one result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TargetStatus,
    pub to: TargetStatus,
    /// Set when the change must be notified
    pub alert: Option<TransitionKind>,
}

/// Whether `result` is not newer than what `state` already reflects
pub fn is_stale(state: &TargetState, result: &CheckResult) -> bool {
    state.last_result_at.is_some_and(|last| result.timestamp <= last)
}

/// Fold one result into `state`.
///
/// Stale results leave the state untouched. `unknown` becomes `up` on the
/// first success without an alert; any other change needs the configured
/// run of consecutive results and produces an alert.
pub fn apply(state: &mut TargetState, result: &CheckResult, thresholds: &Thresholds) -> Option<Transition> {
    if is_stale(state, result) {
        return None;
    }
    state.last_result_at = Some(result.timestamp);

    let from = state.status;
    let (to, alert) = if result.is_success() {
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        state.consecutive_failures = 0;
        match from {
            TargetStatus::Unknown => (TargetStatus::Up, None),
            TargetStatus::Down if state.consecutive_successes >= thresholds.recovery => {
                (TargetStatus::Up, Some(TransitionKind::Recovered))
            }
            _ => return None,
        }
    } else {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_successes = 0;
        match from {
            TargetStatus::Up | TargetStatus::Unknown if state.consecutive_failures >= thresholds.failure => {
                (TargetStatus::Down, Some(TransitionKind::WentDown))
            }
            _ => return None,
        }
    };

    state.status = to;
    state.last_transition_at = Some(result.timestamp);
    Some(Transition { from, to, alert })
}

/// State evaluator - turns the result stream into confirmed transitions.
///
/// Results for one target are folded under that target's mutex, so they are
/// serialized, while different targets evaluate in parallel.
pub struct StateEvaluator {
    database: Arc<dyn Database>,
    thresholds: Thresholds,
    states: RwLock<HashMap<Uuid, Arc<Mutex<TargetState>>>>,
}

impl StateEvaluator {
    pub fn new(database: Arc<dyn Database>, thresholds: Thresholds) -> Self {
        Self { database, thresholds, states: RwLock::new(HashMap::new()) }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Evaluate one result, returning the stored alert event if it confirmed
    /// a notifiable transition.
    ///
    /// The alert event is written before the new state, so a crash between
    /// the two re-derives the alert instead of losing it.
    pub async fn evaluate(&self, result: &CheckResult) -> anyhow::Result<Option<AlertEvent>> {
        let slot = self.slot(result.target_id).await?;
        let mut state = slot.lock().await;

        if is_stale(&state, result) {
            debug!(target = %result.target_id, "Ignoring stale or duplicate result");
            return Ok(None);
        }

        let mut next = state.clone();
        let transition = apply(&mut next, result, &self.thresholds);

        let mut event = None;
        if let Some(transition) = transition {
            info!(
                target = %result.target_id,
                from = %transition.from,
                to = %transition.to,
                "Target changed state"
            );

            if let Some(kind) = transition.alert {
                let mut alert = AlertEvent::new(result.target_id, kind, result.timestamp);
                alert.reason = result.failure.clone();
                alert.status_code = result.status_code;
                alert.latency_ms = Some(result.latency_ms);
                self.database.insert_alert_event(&alert).await?;
                event = Some(alert);
            }
        }

        self.database.save_target_state(&next).await?;
        *state = next;
        Ok(event)
    }

    /// Current state of a target, if it has been evaluated or persisted
    pub async fn snapshot(&self, target_uuid: Uuid) -> anyhow::Result<Option<TargetState>> {
        if let Some(slot) = self.states.read().await.get(&target_uuid).cloned() {
            return Ok(Some(slot.lock().await.clone()));
        }
        self.database.load_target_state(target_uuid).await
    }

    /// Drop the cached state of a removed target
    pub async fn forget(&self, target_uuid: Uuid) {
        self.states.write().await.remove(&target_uuid);
    }

    async fn slot(&self, target_uuid: Uuid) -> anyhow::Result<Arc<Mutex<TargetState>>> {
        if let Some(slot) = self.states.read().await.get(&target_uuid) {
            return Ok(Arc::clone(slot));
        }

        let stored = self
            .database
            .load_target_state(target_uuid)
            .await?
            .unwrap_or_else(|| TargetState::unknown(target_uuid));

        let mut states = self.states.write().await;
        let slot = states.entry(target_uuid).or_insert_with(|| Arc::new(Mutex::new(stored)));
        Ok(Arc::clone(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{DeliveryStatus, Target};
    use crate::database::testing::temp_database;
    use crate::monitoring::types::FailureReason;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn ok(id: Uuid, secs: u64) -> CheckResult {
        CheckResult::success(id, at(secs), 40, 200)
    }

    fn fail(id: Uuid, secs: u64) -> CheckResult {
        CheckResult::failure(id, at(secs), 5_000, None, FailureReason::Timeout)
    }

    fn alerts(state: &mut TargetState, results: &[CheckResult], thresholds: &Thresholds) -> Vec<(usize, TransitionKind)> {
        results
            .iter()
            .enumerate()
            .filter_map(|(i, result)| apply(state, result, thresholds).and_then(|t| t.alert).map(|kind| (i, kind)))
            .collect()
    }

    #[test]
    fn down_is_confirmed_by_third_consecutive_failure() {
        let id = Uuid::new_v4();
        let mut state = TargetState::unknown(id);
        let results = [ok(id, 0), fail(id, 1), fail(id, 2), fail(id, 3), fail(id, 4)];

        let emitted = alerts(&mut state, &results, &Thresholds::default());

        assert_eq!(emitted, vec![(3, TransitionKind::WentDown)]);
        assert_eq!(state.status, TargetStatus::Down);
        assert_eq!(state.consecutive_failures, 4);
    }

    #[test]
    fn first_success_is_up_without_alert() {
        let id = Uuid::new_v4();
        let mut state = TargetState::unknown(id);

        let transition = apply(&mut state, &ok(id, 0), &Thresholds::default());
        assert_eq!(
            transition,
            Some(Transition { from: TargetStatus::Unknown, to: TargetStatus::Up, alert: None })
        );
    }

    #[test]
    fn target_broken_from_start_still_alerts() {
        let id = Uuid::new_v4();
        let mut state = TargetState::unknown(id);
        let results = [fail(id, 0), fail(id, 1), fail(id, 2)];

        assert_eq!(alerts(&mut state, &results, &Thresholds::default()), vec![(2, TransitionKind::WentDown)]);
    }

    #[test]
    fn interrupted_failure_run_does_not_alert() {
        let id = Uuid::new_v4();
        let mut state = TargetState::unknown(id);
        let results = [ok(id, 0), fail(id, 1), fail(id, 2), ok(id, 3), fail(id, 4), fail(id, 5)];

        assert!(alerts(&mut state, &results, &Thresholds::default()).is_empty());
        assert_eq!(state.status, TargetStatus::Up);
    }

    #[test]
    fn recovery_honours_threshold() {
        let id = Uuid::new_v4();
        let thresholds = Thresholds { failure: 1, recovery: 2 };
        let mut state = TargetState::unknown(id);
        let results = [ok(id, 0), fail(id, 1), ok(id, 2), fail(id, 3), ok(id, 4), ok(id, 5), ok(id, 6)];

        assert_eq!(
            alerts(&mut state, &results, &thresholds),
            vec![(1, TransitionKind::WentDown), (5, TransitionKind::Recovered)]
        );
    }

    #[test]
    fn stale_results_are_ignored() {
        let id = Uuid::new_v4();
        let thresholds = Thresholds { failure: 1, recovery: 1 };
        let mut state = TargetState::unknown(id);
        apply(&mut state, &ok(id, 10), &thresholds);

        assert_eq!(apply(&mut state, &fail(id, 10), &thresholds), None);
        assert_eq!(apply(&mut state, &fail(id, 5), &thresholds), None);
        assert_eq!(state.status, TargetStatus::Up);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn evaluator_persists_alerts_and_state() -> anyhow::Result<()> {
        let (_dir, database) = temp_database().await;
        let target = Target::new("https://example.com");
        database.save_target(&target).await?;
        let id = target.uuid;

        let evaluator = StateEvaluator::new(database.clone(), Thresholds::default());
        let mut events = Vec::new();
        for result in [ok(id, 0), fail(id, 1), fail(id, 2), fail(id, 3), fail(id, 4)] {
            events.extend(evaluator.evaluate(&result).await?);
        }

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, TransitionKind::WentDown);
        assert_eq!(event.reason, Some(FailureReason::Timeout));
        assert_eq!(event.occurred_at, at(3));

        let stored = database.get_alert_event(event.uuid).await?.expect("event stored");
        assert_eq!(stored.delivery_status, DeliveryStatus::Pending);

        // a fresh evaluator picks up where the previous one stopped
        let restarted = StateEvaluator::new(database.clone(), Thresholds::default());
        let state = restarted.snapshot(id).await?.expect("state stored");
        assert_eq!(state.status, TargetStatus::Down);
        assert_eq!(state.consecutive_failures, 4);

        let recovered = restarted.evaluate(&ok(id, 5)).await?.expect("recovery alert");
        assert_eq!(recovered.kind, TransitionKind::Recovered);
        Ok(())
    }

    #[tokio::test]
    async fn replayed_result_does_not_double_count() -> anyhow::Result<()> {
        let (_dir, database) = temp_database().await;
        let target = Target::new("https://example.com");
        database.save_target(&target).await?;
        let id = target.uuid;
        let evaluator = StateEvaluator::new(database, Thresholds { failure: 2, recovery: 1 });

        assert!(evaluator.evaluate(&fail(id, 1)).await?.is_none());
        assert!(evaluator.evaluate(&fail(id, 1)).await?.is_none());

        let state = evaluator.snapshot(id).await?.expect("state cached");
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.status, TargetStatus::Unknown);
        Ok(())
    }
}
