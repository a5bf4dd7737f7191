/// Monitoring engine module - turns targets into results and results into state
///
/// This module is responsible for:
/// - Probing HTTP/HTTPS targets
/// - Scheduling probes at each target's cadence
/// - Folding results into up/down state
/// - Validating target definitions
pub mod checker;
pub mod evaluator;
pub mod executor;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use checker::{Checker, HttpChecker};
pub use evaluator::{StateEvaluator, Thresholds};
pub use executor::CheckWorker;
pub use scheduler::MonitoringScheduler;
pub use types::{CheckResult, FailureReason, TargetStatus};
