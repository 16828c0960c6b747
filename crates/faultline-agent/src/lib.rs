//! Faultline Agent - the capture-and-delivery pipeline
//!
//! Ties the pieces together: the panic interceptor captures failures into
//! immutable records, the durable queue persists them on the crashing
//! thread, and a single-flight delivery worker drains the queue to the
//! remote collector from a dedicated background thread.
//!
//! # Architecture
//!
//! [`Faultline`] is an explicit context object: the host constructs it once
//! at startup from a [`Config`] and its port implementations, and every
//! component receives its collaborators through the constructor - there is
//! no global singleton to reach for. Delivery runs on its own thread with a
//! current-thread tokio runtime, fed by a command channel; the crash path
//! never touches the network.
//!
//! ```rust,no_run
//! use faultline_agent::FaultlineBuilder;
//! use faultline_core::config::Config;
//! use faultline_core::domain::HostAppInfo;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = Config::enabled_with_defaults();
//!     config.collector.base_url = "https://collector.example.com".to_string();
//!     config.collector.client_id = "my-client".to_string();
//!
//!     let agent = FaultlineBuilder::new(config)
//!         .app_info(HostAppInfo::new("demo-app", "1.0.0"))
//!         .build()?;
//!     agent.install()?;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::Context;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use faultline_collector::HttpCollector;
use faultline_core::config::Config;
use faultline_core::domain::{HostAppInfo, Record, RecordKind, SessionId, TelemetryError};
use faultline_core::ports::{
    AlwaysForeground, BreadcrumbSource, CollectorClient, CrashListener, DeliveryTrigger,
    LifecycleProbe, NoBreadcrumbs, NoScheduler, NoThreadDump, PeriodicScheduler,
    PreviousReportsListener, ThreadDumpSource,
};
use faultline_store::DurableQueue;

pub mod events;
pub mod interceptor;
pub mod snapshot;
pub mod synchronizer;
pub mod worker;

pub use events::{AgentEvent, EventBus};
pub use interceptor::{PanicInterceptor, TEST_CRASH_SENTINEL};
pub use synchronizer::{Holder, Synchronizer};
pub use worker::{DeliveryOutcome, DeliveryWorker, RunResult};

// ============================================================================
// Delivery commands
// ============================================================================

/// Work items for the background delivery thread
enum DeliveryCommand {
    Run {
        forced: bool,
        reply: Option<oneshot::Sender<RunResult>>,
    },
    RunIfIdle {
        reply: Option<oneshot::Sender<RunResult>>,
    },
    Shutdown,
}

async fn execute(worker: Arc<DeliveryWorker>, command: DeliveryCommand) {
    match command {
        DeliveryCommand::Run { forced, reply } => {
            let result = worker.run(forced).await;
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        DeliveryCommand::RunIfIdle { reply } => {
            let result = worker.run_if_idle().await;
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        DeliveryCommand::Shutdown => {}
    }
}

// ============================================================================
// FaultlineBuilder
// ============================================================================

/// Builder assembling a [`Faultline`] agent from a config and the host's
/// port implementations
///
/// Every port has a sensible default: the reqwest collector from the
/// config, no breadcrumbs, always-foreground, no thread dump, no scheduler.
pub struct FaultlineBuilder {
    config: Config,
    app_info: HostAppInfo,
    collector: Option<Arc<dyn CollectorClient>>,
    breadcrumbs: Arc<dyn BreadcrumbSource>,
    lifecycle: Arc<dyn LifecycleProbe>,
    thread_dump: Arc<dyn ThreadDumpSource>,
    scheduler: Arc<dyn PeriodicScheduler>,
}

impl FaultlineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            app_info: HostAppInfo::default(),
            collector: None,
            breadcrumbs: Arc::new(NoBreadcrumbs),
            lifecycle: Arc::new(AlwaysForeground),
            thread_dump: Arc::new(NoThreadDump),
            scheduler: Arc::new(NoScheduler),
        }
    }

    /// Name and version of the host application, stamped on every record.
    pub fn app_info(mut self, info: HostAppInfo) -> Self {
        self.app_info = info;
        self
    }

    /// Replaces the default HTTP collector adapter.
    pub fn collector(mut self, collector: Arc<dyn CollectorClient>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Wires the host's UI trace source.
    pub fn breadcrumbs(mut self, source: Arc<dyn BreadcrumbSource>) -> Self {
        self.breadcrumbs = source;
        self
    }

    /// Wires the host's foreground/background probe.
    pub fn lifecycle(mut self, probe: Arc<dyn LifecycleProbe>) -> Self {
        self.lifecycle = probe;
        self
    }

    /// Wires a platform-specific all-threads stack dumper.
    pub fn thread_dump(mut self, source: Arc<dyn ThreadDumpSource>) -> Self {
        self.thread_dump = source;
        self
    }

    /// Wires the host's periodic scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn PeriodicScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Validates the config, opens the queue and starts the delivery
    /// thread. The panic hook is not touched until
    /// [`install`](Faultline::install).
    pub fn build(self) -> anyhow::Result<Faultline> {
        self.config.validate()?;

        let session_id = SessionId::new();
        let queue = Arc::new(
            DurableQueue::open(&self.config.data_dir)
                .context("failed to open the record queue")?,
        );
        let events = EventBus::default();
        let metadata = Arc::new(Mutex::new(Map::new()));

        let interceptor = Arc::new(PanicInterceptor::new(
            &self.config,
            session_id,
            Arc::clone(&queue),
            events.clone(),
            self.app_info,
            Arc::clone(&metadata),
            self.thread_dump,
        ));

        let collector = self
            .collector
            .unwrap_or_else(|| Arc::new(HttpCollector::new(&self.config.collector)));
        let worker = Arc::new(DeliveryWorker::new(
            &self.config,
            Arc::clone(&queue),
            collector,
            self.breadcrumbs,
            self.lifecycle,
            events.clone(),
        ));

        // Delivery gets its own thread and runtime, separate from whatever
        // runtime the host runs; commands fan out as tasks so concurrent
        // triggers still race on the worker's single-flight flag.
        let (commands, mut command_rx) = mpsc::unbounded_channel::<DeliveryCommand>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build the delivery runtime")?;
        let thread_worker = Arc::clone(&worker);
        let delivery_thread = std::thread::Builder::new()
            .name("faultline-delivery".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(command) = command_rx.recv().await {
                        if matches!(command, DeliveryCommand::Shutdown) {
                            break;
                        }
                        let worker = Arc::clone(&thread_worker);
                        tokio::spawn(execute(worker, command));
                    }
                });
            })
            .context("failed to spawn the delivery thread")?;

        // An explicit report requests an immediate, non-forced cycle
        let trigger_commands = commands.clone();
        let report_trigger: DeliveryTrigger = Arc::new(move || {
            let _ = trigger_commands.send(DeliveryCommand::Run {
                forced: false,
                reply: None,
            });
        });
        interceptor.set_delivery_trigger(Some(report_trigger));

        debug!(session = %session_id, "Faultline agent constructed");
        Ok(Faultline {
            config: self.config,
            session_id,
            queue,
            interceptor,
            worker,
            scheduler: self.scheduler,
            events,
            metadata,
            commands,
            delivery_thread: Some(delivery_thread),
        })
    }
}

// ============================================================================
// Faultline
// ============================================================================

/// Host-facing entry point of the telemetry agent
///
/// Owns the session id, the durable queue, the panic interceptor, the
/// delivery worker and the background delivery thread. Dropping the agent
/// cancels any in-flight delivery cycle, restores the previous panic hook
/// and stops the delivery thread.
pub struct Faultline {
    config: Config,
    session_id: SessionId,
    queue: Arc<DurableQueue>,
    interceptor: Arc<PanicInterceptor>,
    worker: Arc<DeliveryWorker>,
    scheduler: Arc<dyn PeriodicScheduler>,
    events: EventBus,
    metadata: Arc<Mutex<Map<String, Value>>>,
    commands: mpsc::UnboundedSender<DeliveryCommand>,
    delivery_thread: Option<JoinHandle<()>>,
}

impl Faultline {
    /// Takes over the process panic hook and registers the periodic
    /// delivery trigger with the host scheduler. A no-op while the agent is
    /// disabled.
    pub fn install(&self) -> anyhow::Result<()> {
        if !self.config.enabled {
            debug!("Telemetry disabled; install is a no-op");
            return Ok(());
        }
        self.interceptor.install();
        self.scheduler
            .register(self.config.worker.periodic_interval(), self.delivery_trigger())
            .context("failed to register the periodic delivery trigger")?;
        Ok(())
    }

    /// Restores the previous panic hook and unregisters the periodic
    /// trigger.
    pub fn uninstall(&self) -> anyhow::Result<()> {
        self.scheduler
            .unregister()
            .context("failed to unregister the periodic delivery trigger")?;
        self.interceptor.uninstall();
        Ok(())
    }

    /// Whether the interceptor currently owns the process panic hook.
    pub fn is_installed(&self) -> bool {
        self.interceptor.is_installed()
    }

    /// This process session's id, stamped on every record.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Registers the host callback for freshly captured crashes.
    pub fn set_crash_listener(&self, listener: Option<Arc<dyn CrashListener>>) {
        self.interceptor.set_crash_listener(listener);
    }

    /// Registers the host callback for crash contents delivered on a later
    /// run.
    pub fn set_previous_reports_listener(
        &self,
        listener: Option<Arc<dyn PreviousReportsListener>>,
    ) {
        self.worker.set_previous_reports_listener(listener);
    }

    /// Replaces or merges the host metadata attached to every subsequent
    /// record. With `merge`, existing keys not present in `values` survive;
    /// without it, the whole map is replaced.
    pub fn set_metadata(&self, values: Map<String, Value>, merge: bool) {
        let mut metadata = lock(&self.metadata);
        if merge {
            for (key, value) in values {
                metadata.insert(key, value);
            }
        } else {
            *metadata = values;
        }
    }

    /// Explicit non-fatal capture: persists an error record built from the
    /// given title, details and synthesized stack trace, then requests an
    /// immediate delivery cycle.
    pub fn report(
        &self,
        title: &str,
        details: Map<String, Value>,
        stack_trace: Vec<String>,
    ) -> Result<(), TelemetryError> {
        if !self.config.enabled {
            debug!("Telemetry disabled; report dropped");
            return Ok(());
        }
        self.interceptor.report(title, details, stack_trace)?;
        Ok(())
    }

    /// Forces a delivery cycle and waits for its aggregate outcome. A
    /// cycle already in flight makes this a no-op reported as
    /// [`RunResult::Skipped`].
    pub async fn run_now(&self) -> RunResult {
        self.send_and_wait(|reply| DeliveryCommand::Run {
            forced: true,
            reply: Some(reply),
        })
        .await
    }

    /// Runs a non-forced delivery cycle unless one is already in flight.
    pub async fn run_if_idle(&self) -> RunResult {
        self.send_and_wait(|reply| DeliveryCommand::RunIfIdle { reply: Some(reply) })
            .await
    }

    /// Fire-and-forget delivery request, callable from synchronous host
    /// code. Equivalent to a scheduler tick.
    pub fn trigger_delivery(&self) {
        let _ = self.commands.send(DeliveryCommand::Run {
            forced: false,
            reply: None,
        });
    }

    /// Abandons the in-flight delivery cycle, if any. Safe to call from a
    /// scheduler revoking its job; the single-flight flag is released and
    /// queued records stay on disk.
    pub fn cancel_delivery(&self) {
        self.worker.cancel();
    }

    /// Drains the delivered-crash contents collected by past cycles.
    pub fn previous_crash_reports(&self) -> Vec<String> {
        self.worker.previous_crash_reports()
    }

    /// Loads every readable queued record of one kind, for diagnostics.
    pub fn history(&self, kind: RecordKind) -> Vec<Record> {
        self.queue.read_all(kind)
    }

    /// Wipes the whole record queue.
    pub fn clear_all_history(&self) -> bool {
        self.queue.clear_all()
    }

    /// Subscribes to agent events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Raises the intentional test crash on the calling thread.
    pub fn crash(&self) -> ! {
        trigger_test_crash()
    }

    fn delivery_trigger(&self) -> DeliveryTrigger {
        let commands = self.commands.clone();
        Arc::new(move || {
            let _ = commands.send(DeliveryCommand::Run {
                forced: false,
                reply: None,
            });
        })
    }

    async fn send_and_wait(
        &self,
        command: impl FnOnce(oneshot::Sender<RunResult>) -> DeliveryCommand,
    ) -> RunResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(command(reply_tx)).is_err() {
            warn!("Delivery thread is gone; run request dropped");
            return RunResult::Skipped;
        }
        reply_rx.await.unwrap_or(RunResult::Skipped)
    }
}

impl Drop for Faultline {
    fn drop(&mut self) {
        self.worker.cancel();
        self.interceptor.set_delivery_trigger(None);
        if self.interceptor.is_installed() {
            if let Err(e) = self.uninstall() {
                warn!(error = %e, "Failed to uninstall cleanly");
            }
        }
        let _ = self.commands.send(DeliveryCommand::Shutdown);
        if let Some(thread) = self.delivery_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Panics with the intentional test-crash sentinel. The interceptor
/// records the crash but never classifies it as an SDK-internal failure.
pub fn trigger_test_crash() -> ! {
    panic!("{}", TEST_CRASH_SENTINEL)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(dir: &std::path::Path) -> Faultline {
        let mut config = Config::enabled_with_defaults();
        config.data_dir = dir.to_path_buf();
        FaultlineBuilder::new(config)
            .app_info(HostAppInfo::new("facade-demo", "0.0.1"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_metadata_merge_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let queue = DurableQueue::open(dir.path()).unwrap();

        let mut first = Map::new();
        first.insert("tenant".to_string(), Value::from("acme"));
        first.insert("region".to_string(), Value::from("eu"));
        agent.set_metadata(first, false);

        let mut second = Map::new();
        second.insert("region".to_string(), Value::from("us"));
        agent.set_metadata(second, true);

        agent.report("merged", Map::new(), Vec::new()).unwrap();
        let records = queue.read_all(RecordKind::Error);
        let merged = records
            .iter()
            .find(|r| r.origin().message == "merged")
            .unwrap();
        assert_eq!(merged.metadata()["tenant"], "acme");
        assert_eq!(merged.metadata()["region"], "us");

        let mut third = Map::new();
        third.insert("only".to_string(), Value::from("this"));
        agent.set_metadata(third, false);

        agent.report("replaced", Map::new(), Vec::new()).unwrap();
        let records = queue.read_all(RecordKind::Error);
        let replaced = records
            .iter()
            .find(|r| r.origin().message == "replaced")
            .unwrap();
        assert!(replaced.metadata().get("tenant").is_none());
        assert_eq!(replaced.metadata()["only"], "this");
    }

    #[test]
    fn test_disabled_agent_drops_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let agent = FaultlineBuilder::new(config).build().unwrap();

        assert!(agent.report("ignored", Map::new(), Vec::new()).is_ok());
        assert!(agent.history(RecordKind::Error).is_empty());

        // install is a no-op; the panic hook stays untouched
        agent.install().unwrap();
        assert!(!agent.is_installed());
    }

    #[test]
    fn test_clear_all_history() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());

        agent.report("to be wiped", Map::new(), Vec::new()).unwrap();
        assert_eq!(agent.history(RecordKind::Error).len(), 1);

        assert!(agent.clear_all_history());
        assert!(agent.history(RecordKind::Error).is_empty());
    }

    #[tokio::test]
    async fn test_run_now_on_empty_queue_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());

        match agent.run_now().await {
            RunResult::Completed(outcome) => {
                assert!(outcome.success);
                assert_eq!(outcome.delivered + outcome.rejected + outcome.failed, 0);
            }
            other => panic!("expected a completed cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_if_idle_skips_an_unchanged_queue() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());

        // The default collector is unconfigured, so the record stays queued
        agent.report("stuck", Map::new(), Vec::new()).unwrap();

        // Wait out any cycle the report itself triggered
        let first = agent.run_now().await;
        assert!(matches!(first, RunResult::Completed(_) | RunResult::Skipped));
        while agent.run_now().await == RunResult::Skipped {
            tokio::task::yield_now().await;
        }

        // Nothing changed since the last completed cycle
        assert_eq!(agent.run_if_idle().await, RunResult::Skipped);
        assert_eq!(agent.history(RecordKind::Error).len(), 1);
    }

    #[test]
    fn test_install_registers_the_periodic_trigger() {
        use std::time::Duration;

        #[derive(Default)]
        struct RecordingScheduler {
            registered: Mutex<Option<Duration>>,
            trigger: Mutex<Option<DeliveryTrigger>>,
        }

        impl PeriodicScheduler for RecordingScheduler {
            fn register(
                &self,
                interval: Duration,
                trigger: DeliveryTrigger,
            ) -> anyhow::Result<()> {
                *self.registered.lock().unwrap() = Some(interval);
                *self.trigger.lock().unwrap() = Some(trigger);
                Ok(())
            }

            fn unregister(&self) -> anyhow::Result<()> {
                *self.registered.lock().unwrap() = None;
                *self.trigger.lock().unwrap() = None;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::enabled_with_defaults();
        config.data_dir = dir.path().to_path_buf();
        let scheduler = Arc::new(RecordingScheduler::default());
        let agent = FaultlineBuilder::new(config)
            .scheduler(scheduler.clone())
            .build()
            .unwrap();

        agent.install().unwrap();
        assert_eq!(
            *scheduler.registered.lock().unwrap(),
            Some(Duration::from_secs(20 * 60))
        );

        // A scheduler tick maps to a non-forced run and never blocks
        let tick = scheduler.trigger.lock().unwrap().clone().unwrap();
        tick();

        agent.uninstall().unwrap();
        assert!(scheduler.registered.lock().unwrap().is_none());
        assert!(!agent.is_installed());
    }

    #[test]
    fn test_drop_stops_the_delivery_thread() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        agent.trigger_delivery();
        drop(agent);
    }
}
