//! Single-flight background delivery worker
//!
//! Drains the durable queue through the collector port. One atomic flag
//! enforces single-flight: a request to run while a round is in flight is
//! a harmless no-op reported back to the caller. The worker state machine
//! is `Idle -> Running -> Idle`; at the Running -> Idle boundary it
//! re-checks the queue and loops straight back into Running when leftovers
//! exist (records that stayed queued, or new ones that arrived mid-round),
//! instead of waiting for the next scheduled trigger.
//!
//! The "anything new?" check is a delta test on the pending file names:
//! a non-forced run is skipped unless the name snapshot differs from the
//! one stored at the previous check. That keeps a persistently-failing
//! queue from busy-looping between scheduler triggers. The snapshot has a
//! single writer by construction - only the facade's delivery context
//! calls into the worker.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use faultline_core::config::Config;
use faultline_core::domain::{RecordKind, SessionId};
use faultline_core::ports::{
    BreadcrumbSource, CollectorClient, Disposition, LifecycleProbe, PreviousReportsListener,
};
use faultline_store::{DurableQueue, PendingFile};

use crate::events::{AgentEvent, EventBus};
use crate::synchronizer::Synchronizer;

// ============================================================================
// Outcome types
// ============================================================================

/// Result of one `run` invocation
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// A delivery cycle ran to completion
    Completed(DeliveryOutcome),
    /// Nothing to do, or another cycle was already in flight
    Skipped,
    /// The cycle was abandoned by an external cancellation signal
    Cancelled,
}

impl RunResult {
    /// The outcome, when a cycle actually completed.
    pub fn outcome(&self) -> Option<&DeliveryOutcome> {
        match self {
            RunResult::Completed(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Aggregate result of a delivery cycle (all rounds included)
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    /// Whether the final round left no record in a retryable state
    pub success: bool,
    /// Files accepted by the collector
    pub delivered: usize,
    /// Files dropped after a terminal rejection
    pub rejected: usize,
    /// Files that stayed queued for a later attempt
    pub failed: usize,
    /// Contents of the delivered crash files, surfaced to the host
    pub delivered_crashes: Vec<String>,
}

impl DeliveryOutcome {
    fn empty() -> Self {
        Self {
            success: true,
            delivered: 0,
            rejected: 0,
            failed: 0,
            delivered_crashes: Vec::new(),
        }
    }

    fn from_outcomes(outcomes: Vec<FileOutcome>) -> Self {
        let mut aggregate = Self::empty();
        for outcome in outcomes {
            match outcome.disposition {
                Disposition::Delivered => {
                    aggregate.delivered += 1;
                    if outcome.kind == RecordKind::Crash {
                        if let Some(content) = outcome.content {
                            aggregate.delivered_crashes.push(content);
                        }
                    }
                }
                Disposition::Rejected => aggregate.rejected += 1,
                Disposition::Retry => {
                    aggregate.failed += 1;
                    aggregate.success = false;
                }
            }
        }
        aggregate
    }

    /// Folds a later round in; the final round decides overall success.
    fn absorb(&mut self, later: Self) {
        self.success = later.success;
        self.delivered += later.delivered;
        self.rejected += later.rejected;
        self.failed += later.failed;
        self.delivered_crashes.extend(later.delivered_crashes);
    }
}

/// Terminal state of one file within a round
#[derive(Debug, Clone)]
struct FileOutcome {
    kind: RecordKind,
    disposition: Disposition,
    /// Serialized record, kept for terminal outcomes
    content: Option<String>,
}

// ============================================================================
// DeliveryWorker
// ============================================================================

/// Drains the durable queue to the collector, one single-flight cycle at a
/// time
pub struct DeliveryWorker {
    enabled: bool,
    queue: Arc<DurableQueue>,
    collector: Arc<dyn CollectorClient>,
    breadcrumbs: Arc<dyn BreadcrumbSource>,
    lifecycle: Arc<dyn LifecycleProbe>,
    events: EventBus,
    previous_reports_listener: Mutex<Option<Arc<dyn PreviousReportsListener>>>,
    previous_crashes: Mutex<Vec<String>>,
    running: AtomicBool,
    /// Pending-name snapshot from the previous delta check
    last_names: Mutex<Option<(BTreeSet<String>, BTreeSet<String>)>>,
    last_completed: Mutex<Option<DateTime<Utc>>>,
    cancel: Mutex<CancellationToken>,
}

impl DeliveryWorker {
    pub fn new(
        config: &Config,
        queue: Arc<DurableQueue>,
        collector: Arc<dyn CollectorClient>,
        breadcrumbs: Arc<dyn BreadcrumbSource>,
        lifecycle: Arc<dyn LifecycleProbe>,
        events: EventBus,
    ) -> Self {
        Self {
            enabled: config.enabled,
            queue,
            collector,
            breadcrumbs,
            lifecycle,
            events,
            previous_reports_listener: Mutex::new(None),
            previous_crashes: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            last_names: Mutex::new(None),
            last_completed: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Registers the host listener for delivered crash contents.
    pub fn set_previous_reports_listener(
        &self,
        listener: Option<Arc<dyn PreviousReportsListener>>,
    ) {
        *lock(&self.previous_reports_listener) = listener;
    }

    /// Whether a delivery cycle is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// When the last cycle completed, if any did.
    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_completed)
    }

    /// Drains the delivered-crash contents stashed by past cycles.
    pub fn previous_crash_reports(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.previous_crashes))
    }

    /// Whether a non-forced run would do anything right now: the feature
    /// must be enabled, no cycle in flight, and the pending-name snapshot
    /// must differ from the previous check's.
    pub fn should_run(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.is_running() {
            return false;
        }
        self.pending_changed()
    }

    /// Runs a delivery cycle.
    ///
    /// Skipped unless `forced` or [`should_run`](Self::should_run). Rounds
    /// repeat while leftovers keep appearing; the aggregate outcome covers
    /// every round of this invocation.
    pub async fn run(&self, forced: bool) -> RunResult {
        if !(forced || self.should_run()) {
            debug!("Delivery run skipped (disabled, busy, or nothing new)");
            return RunResult::Skipped;
        }

        let cancel = lock(&self.cancel).clone();
        let mut aggregate: Option<DeliveryOutcome> = None;

        loop {
            if self.running.swap(true, Ordering::SeqCst) {
                // Lost the flag to a concurrent caller; single-flight says
                // this request becomes a no-op.
                debug!("Delivery already in flight; skipping");
                return match aggregate {
                    Some(outcome) => {
                        self.surface_previous_crashes(&outcome);
                        RunResult::Completed(outcome)
                    }
                    None => RunResult::Skipped,
                };
            }

            let round = self.round(&cancel).await;
            self.running.store(false, Ordering::SeqCst);

            match round {
                Some(outcome) => match aggregate.as_mut() {
                    Some(aggregate) => aggregate.absorb(outcome),
                    None => aggregate = Some(outcome),
                },
                None => {
                    info!("Delivery cycle cancelled");
                    return RunResult::Cancelled;
                }
            }

            // Running -> Idle boundary: loop straight back when the queue
            // changed under us (leftovers or fresh records).
            if !self.pending_changed() {
                break;
            }
            debug!("Leftover records detected; starting another round");
        }

        *lock(&self.last_completed) = Some(Utc::now());
        let outcome = aggregate.unwrap_or_else(DeliveryOutcome::empty);
        self.surface_previous_crashes(&outcome);
        RunResult::Completed(outcome)
    }

    /// Convenience entry point for explicit and scheduled triggers: calls
    /// back immediately with a no-op when a cycle is in flight.
    pub async fn run_if_idle(&self) -> RunResult {
        if self.is_running() {
            debug!("Delivery busy; run_if_idle is a no-op");
            return RunResult::Skipped;
        }
        self.run(false).await
    }

    /// Abandons the in-flight cycle, if any: its synchronizers never
    /// complete, the single-flight flag is released, and the next `run`
    /// starts from a fresh cancellation token.
    pub fn cancel(&self) {
        let mut guard = lock(&self.cancel);
        guard.cancel();
        *guard = CancellationToken::new();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Delta test on the pending file names (crash ∪ error), updating the
    /// stored snapshot. The very first check always counts as changed, so
    /// an explicit first run goes through (and reports success) even on an
    /// empty queue; afterwards an unchanged snapshot suppresses the run.
    fn pending_changed(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let crashes = name_set(self.queue.list_pending(RecordKind::Crash));
        let errors = name_set(self.queue.list_pending(RecordKind::Error));

        let mut last = lock(&self.last_names);
        let changed = match last.as_ref() {
            Some((last_crashes, last_errors)) => {
                *last_crashes != crashes || *last_errors != errors
            }
            None => true,
        };
        *last = Some((crashes, errors));
        changed
    }

    /// One round: fan out every pending file of both kinds, wait for both
    /// fan-in aggregates. Returns `None` when cancelled.
    async fn round(&self, cancel: &CancellationToken) -> Option<DeliveryOutcome> {
        let crash_files = self.queue.list_pending(RecordKind::Crash);
        let error_files = self.queue.list_pending(RecordKind::Error);

        if crash_files.is_empty() && error_files.is_empty() {
            // No records at all; carry on
            return Some(DeliveryOutcome::empty());
        }
        info!(
            crashes = crash_files.len(),
            errors = error_files.len(),
            "Starting delivery round"
        );

        let (crash_sync, crash_rx) = self.submit_kind(crash_files);
        let (error_sync, error_rx) = self.submit_kind(error_files);

        let outcomes = tokio::select! {
            _ = cancel.cancelled() => {
                // Abandon the aggregates without firing their completions
                if let Some(sync) = &crash_sync {
                    sync.cancel();
                }
                if let Some(sync) = &error_sync {
                    sync.cancel();
                }
                return None;
            }
            outcomes = async {
                let mut all = crash_rx.await.unwrap_or_default();
                all.extend(error_rx.await.unwrap_or_default());
                all
            } => outcomes,
        };

        Some(DeliveryOutcome::from_outcomes(outcomes))
    }

    /// Fans one kind out: a holder and a submission task per pending file.
    /// With zero files there is nothing to aggregate and the caller
    /// short-circuits to success; the synchronizer never learns about the
    /// round.
    fn submit_kind(
        &self,
        files: Vec<PendingFile>,
    ) -> (
        Option<Synchronizer<FileOutcome>>,
        oneshot::Receiver<Vec<FileOutcome>>,
    ) {
        let (tx, rx) = oneshot::channel();
        if files.is_empty() {
            let _ = tx.send(Vec::new());
            return (None, rx);
        }

        let synchronizer = Synchronizer::new(move |results| {
            let _ = tx.send(results);
        });

        // Register every expected contribution before any submission can
        // release; an early answer must not complete the aggregate while
        // later files are still being fanned out.
        let holders: Vec<_> = files.iter().map(|_| synchronizer.create_holder()).collect();

        for (file, holder) in files.into_iter().zip(holders) {
            let queue = Arc::clone(&self.queue);
            let collector = Arc::clone(&self.collector);
            let breadcrumbs = Arc::clone(&self.breadcrumbs);
            tokio::spawn(async move {
                let outcome = deliver_one(queue, collector, breadcrumbs, file).await;
                holder.release(outcome);
            });
        }

        (Some(synchronizer), rx)
    }

    /// Stashes delivered crash contents and notifies the host while it is
    /// in the foreground.
    fn surface_previous_crashes(&self, outcome: &DeliveryOutcome) {
        if outcome.delivered_crashes.is_empty() {
            return;
        }
        lock(&self.previous_crashes).extend(outcome.delivered_crashes.iter().cloned());
        self.events.publish(AgentEvent::PreviousReportsAvailable {
            count: outcome.delivered_crashes.len(),
        });

        if self.lifecycle.is_in_foreground() {
            if let Some(listener) = lock(&self.previous_reports_listener).as_ref() {
                listener.on_previous_reports(&outcome.delivered_crashes);
            }
        }
    }
}

/// Submits one file and resolves its fate: terminal outcomes delete the
/// local file, retryable ones leave it queued.
async fn deliver_one(
    queue: Arc<DurableQueue>,
    collector: Arc<dyn CollectorClient>,
    breadcrumbs: Arc<dyn BreadcrumbSource>,
    file: PendingFile,
) -> FileOutcome {
    let kind = file.kind();
    let name = file.file_name();

    let content = match queue.read(&file) {
        Ok(content) => content,
        Err(e) => {
            warn!(file = %name, error = %e, "Failed to read queued record");
            return FileOutcome {
                kind,
                disposition: Disposition::Retry,
                content: None,
            };
        }
    };

    let payload = attach_breadcrumbs(&content, breadcrumbs.as_ref(), file.session_id());

    match collector.submit(&payload).await {
        Ok(response) => {
            let disposition = response.disposition();
            match disposition {
                Disposition::Delivered => {
                    queue.delete(&file);
                    debug!(file = %name, status = response.status, "Record delivered");
                }
                Disposition::Rejected => {
                    queue.delete(&file);
                    info!(
                        file = %name,
                        status = response.status,
                        "Record permanently rejected; dropping it"
                    );
                }
                Disposition::Retry => {
                    debug!(
                        file = %name,
                        status = response.status,
                        "Collector unavailable; record stays queued"
                    );
                }
            }
            FileOutcome {
                kind,
                disposition,
                content: disposition.is_terminal().then_some(content),
            }
        }
        Err(e) => {
            debug!(file = %name, error = %e, "Submission failed; record stays queued");
            FileOutcome {
                kind,
                disposition: Disposition::Retry,
                content: None,
            }
        }
    }
}

/// Injects the session's breadcrumbs into the serialized record, leaving
/// the stored file untouched. A payload that doesn't parse ships as-is.
fn attach_breadcrumbs(
    content: &str,
    source: &dyn BreadcrumbSource,
    session_id: Option<SessionId>,
) -> String {
    let Some(session_id) = session_id else {
        return content.to_string();
    };
    let traces = source.traces_report(&session_id);
    if traces.is_empty() {
        return content.to_string();
    }

    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(mut value) => match value.as_object_mut() {
            Some(object) => {
                object.insert(
                    "breadcrumbs".to_string(),
                    serde_json::to_value(&traces).unwrap_or_default(),
                );
                value.to_string()
            }
            None => content.to_string(),
        },
        Err(_) => content.to_string(),
    }
}

fn name_set(files: Vec<PendingFile>) -> BTreeSet<String> {
    files.into_iter().map(|f| f.file_name()).collect()
}

/// Lock acquisition that survives a poisoned mutex; worker state must stay
/// reachable after an unrelated thread panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
