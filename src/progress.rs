//! Progress reporting for long-running operations.
//!
//! An optional, non-mandatory progress channel a caller can ignore
//! entirely. `upload` and `download` fan out many concurrent oracle
//! calls, so progress is updated from several tasks at once. A `watch`
//! channel gives exactly one writer's-eye view (the orchestrator holds
//! the `Sender`) with any number of readers, matching the
//! single-writer/many-reader shape this needs; a plain callback would
//! have to be `Arc<Mutex<..>>`-wrapped to be called from concurrent
//! tasks, which is what `watch` already is.

use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

/// Lifecycle state of an operation being reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Queued,
    Running,
    Completed,
    Error,
}

/// One snapshot of an operation's progress. Cheap to clone; sent whole on
/// every update rather than diffed, since consumers only ever care about
/// the latest value (per `watch`'s semantics: readers can miss
/// intermediate updates, never the final one).
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub operation_id: Uuid,
    pub state: ProgressState,
    /// 0–100. Always 100 once `state` is `Completed`; meaningless (but
    /// present, pinned to the last known value) once `state` is `Error`.
    pub percent: u8,
    pub elapsed: Duration,
    pub est_remaining: Option<Duration>,
    pub message: String,
}

impl ProgressEvent {
    fn started(operation_id: Uuid) -> Self {
        Self {
            operation_id,
            state: ProgressState::Queued,
            percent: 0,
            elapsed: Duration::ZERO,
            est_remaining: None,
            message: "queued".to_string(),
        }
    }
}

/// Single-writer handle held by the orchestrator. Reporting is entirely
/// optional: an operation that never calls any `report_*` method just
/// leaves the channel at its `Queued` initial state, same as passing
/// `None` for the scanner's progress callback.
pub struct ProgressReporter {
    operation_id: Uuid,
    start: std::time::Instant,
    sender: watch::Sender<ProgressEvent>,
    total_units: u64,
    completed_units: std::sync::atomic::AtomicU64,
}

/// Read-only subscription handle. Cloned freely; many readers may observe
/// the same operation.
pub type ProgressSubscriber = watch::Receiver<ProgressEvent>;

impl ProgressReporter {
    /// Create a reporter for an operation expected to complete
    /// `total_units` of work (e.g. one unit per chunk).
    pub fn new(total_units: u64) -> (Self, ProgressSubscriber) {
        let operation_id = Uuid::new_v4();
        let (sender, receiver) = watch::channel(ProgressEvent::started(operation_id));
        let reporter = Self {
            operation_id,
            start: std::time::Instant::now(),
            sender,
            total_units: total_units.max(1),
            completed_units: std::sync::atomic::AtomicU64::new(0),
        };
        (reporter, receiver)
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    fn publish(&self, state: ProgressState, message: impl Into<String>) {
        let completed = self.completed_units.load(std::sync::atomic::Ordering::Relaxed);
        let percent = ((completed * 100) / self.total_units).min(100) as u8;
        let elapsed = self.start.elapsed();
        let est_remaining = if completed > 0 && state == ProgressState::Running {
            let per_unit = elapsed.as_secs_f64() / completed as f64;
            let remaining_units = self.total_units.saturating_sub(completed);
            Some(Duration::from_secs_f64(per_unit * remaining_units as f64))
        } else {
            None
        };

        // A `watch::Sender::send` only fails when every receiver has been
        // dropped; progress is best-effort and the caller never needs to
        // know whether anyone is listening.
        let _ = self.sender.send(ProgressEvent {
            operation_id: self.operation_id,
            state,
            percent,
            elapsed,
            est_remaining,
            message: message.into(),
        });
    }

    pub fn start(&self, message: impl Into<String>) {
        self.completed_units.store(0, std::sync::atomic::Ordering::Relaxed);
        self.publish(ProgressState::Running, message);
    }

    /// Record that one more unit of work finished and republish.
    pub fn advance(&self, message: impl Into<String>) {
        self.completed_units.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.publish(ProgressState::Running, message);
    }

    pub fn complete(&self, message: impl Into<String>) {
        self.completed_units.store(self.total_units, std::sync::atomic::Ordering::Relaxed);
        self.publish(ProgressState::Completed, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(ProgressState::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_queued() {
        let (_reporter, subscriber) = ProgressReporter::new(4);
        assert_eq!(subscriber.borrow().state, ProgressState::Queued);
        assert_eq!(subscriber.borrow().percent, 0);
    }

    #[test]
    fn advancing_increases_percent_monotonically() {
        let (reporter, subscriber) = ProgressReporter::new(4);
        reporter.start("starting");
        let mut last = 0u8;
        for _ in 0..4 {
            reporter.advance("chunk done");
            let current = subscriber.borrow().percent;
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn completion_pins_percent_at_100() {
        let (reporter, subscriber) = ProgressReporter::new(10);
        reporter.start("go");
        reporter.complete("done");
        let event = subscriber.borrow();
        assert_eq!(event.state, ProgressState::Completed);
        assert_eq!(event.percent, 100);
    }

    #[test]
    fn error_state_is_observable() {
        let (reporter, subscriber) = ProgressReporter::new(1);
        reporter.start("go");
        reporter.error("oracle unreachable");
        assert_eq!(subscriber.borrow().state, ProgressState::Error);
    }

    #[test]
    fn dropped_subscribers_do_not_panic_sender() {
        let (reporter, subscriber) = ProgressReporter::new(1);
        drop(subscriber);
        reporter.start("go"); // must not panic even with zero receivers
    }
}
