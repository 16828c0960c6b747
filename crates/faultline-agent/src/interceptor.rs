//! Process-wide panic interceptor
//!
//! Becomes the process panic hook without breaking whatever hook was
//! installed before it: the previous hook is captured at install time as
//! the explicit next handler in the chain and is delegated to in all
//! cases, so the platform's normal crash behavior (stderr output, abort
//! semantics) is preserved. The interceptor's own work - building a crash
//! record and persisting it - happens synchronously on the crashing
//! thread, must complete quickly, and must never itself escalate: every
//! internal failure is caught and logged.
//!
//! Internal-origin panics (our own code crashing) are subject to loop
//! protection: a second internal panic within the cool-down window is
//! suppressed entirely, so a crash-reporting bug cannot persist records in
//! a loop.

use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use faultline_core::config::Config;
use faultline_core::domain::{
    DeviceInfo, HostAppInfo, Origin, Record, RecordKind, SessionId, TelemetryError,
};
use faultline_core::ports::{CrashListener, ThreadDumpSource};
use faultline_store::{DurableQueue, PendingFile};

use crate::events::{AgentEvent, EventBus};
use crate::snapshot;

/// Panic message of the intentional test crash; never treated as an
/// SDK-internal failure.
pub const TEST_CRASH_SENTINEL: &str = "faultline intentional test crash";

/// Frame marker of the intended test-crash entry point.
const INTENDED_CRASH_MARKER: &str = "trigger_test_crash";

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Global panic handler that turns genuine application crashes into
/// persisted records
pub struct PanicInterceptor {
    enabled: bool,
    cooldown: std::time::Duration,
    session_id: SessionId,
    queue: Arc<DurableQueue>,
    events: EventBus,
    app_info: HostAppInfo,
    metadata: Arc<Mutex<Map<String, Value>>>,
    thread_dump: Arc<dyn ThreadDumpSource>,
    crash_listener: Mutex<Option<Arc<dyn CrashListener>>>,
    delivery_trigger: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    installed: AtomicBool,
    /// Next handler in the chain; set once at install, never to ourselves.
    previous_hook: Mutex<Option<PanicHook>>,
    last_internal_crash: Mutex<Option<Instant>>,
}

impl PanicInterceptor {
    pub fn new(
        config: &Config,
        session_id: SessionId,
        queue: Arc<DurableQueue>,
        events: EventBus,
        app_info: HostAppInfo,
        metadata: Arc<Mutex<Map<String, Value>>>,
        thread_dump: Arc<dyn ThreadDumpSource>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            cooldown: config.worker.crash_loop_cooldown(),
            session_id,
            queue,
            events,
            app_info,
            metadata,
            thread_dump,
            crash_listener: Mutex::new(None),
            delivery_trigger: Mutex::new(None),
            installed: AtomicBool::new(false),
            previous_hook: Mutex::new(None),
            last_internal_crash: Mutex::new(None),
        }
    }

    /// Registers the host crash listener (replaces any previous one).
    pub fn set_crash_listener(&self, listener: Option<Arc<dyn CrashListener>>) {
        *lock_recovering(&self.crash_listener) = listener;
    }

    /// Wires the callback that requests an immediate delivery cycle after
    /// an explicit report.
    pub fn set_delivery_trigger(&self, trigger: Option<Arc<dyn Fn() + Send + Sync>>) {
        *lock_recovering(&self.delivery_trigger) = trigger;
    }

    /// Takes over the process panic hook. Idempotent: a second call is a
    /// no-op, which also guarantees the captured previous hook can never
    /// be this interceptor itself.
    pub fn install(self: &Arc<Self>) {
        if !self.enabled {
            return;
        }
        if self.installed.swap(true, Ordering::SeqCst) {
            warn!("Panic interceptor installed twice; ignoring");
            return;
        }

        let previous = panic::take_hook();
        *lock_recovering(&self.previous_hook) = Some(previous);

        let interceptor = Arc::clone(self);
        panic::set_hook(Box::new(move |info| interceptor.handle(info)));
        debug!("Panic interceptor installed");
    }

    /// Restores the previously-installed hook and clears the host listener.
    pub fn uninstall(&self) {
        if !self.installed.swap(false, Ordering::SeqCst) {
            return;
        }
        match lock_recovering(&self.previous_hook).take() {
            Some(previous) => panic::set_hook(previous),
            None => {
                let _ = panic::take_hook();
            }
        }
        self.set_crash_listener(None);
        debug!("Panic interceptor uninstalled");
    }

    /// Whether the interceptor currently owns the process panic hook.
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// The panic hook body. A panic raised from inside a panic hook aborts
    /// the process before any unwinding, so `capture` is written to be
    /// panic-free: every fallible operation goes through `Result`, and
    /// poisoned locks are recovered instead of unwrapped. The previous
    /// hook runs in all cases.
    fn handle(&self, info: &PanicHookInfo<'_>) {
        self.capture(info);

        if let Some(previous) = lock_recovering(&self.previous_hook).as_ref() {
            previous(info);
        }
    }

    fn capture(&self, info: &PanicHookInfo<'_>) {
        if !self.enabled {
            return;
        }

        let message = panic_message(info);
        let frames = snapshot::capture_origin_frames();

        if is_internal_origin(&message, &frames) {
            if let Err(e) = self.check_crash_loop() {
                warn!(error = %e, "Suppressing SDK-internal panic");
                return;
            }
            error!(message = %message, "Panic originated inside the telemetry SDK");
        }

        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_default();
        let origin = Origin::new(message.as_str())
            .with_stack_trace(frames)
            .with_extra("location", Value::from(location));

        let record = self.build_record(RecordKind::Crash, origin);

        match self.queue.write(&record) {
            Ok(file) => debug!(file = %file.file_name(), "Crash record persisted"),
            Err(e) => error!(error = %e, "Failed to persist crash record"),
        }

        if let Some(listener) = lock_recovering(&self.crash_listener).as_ref() {
            listener.on_crash(&record);
        }

        self.events.publish(AgentEvent::CrashOccurred {
            session_id: self.session_id,
            message,
        });
    }

    /// Explicit non-fatal path: builds an error record from a synthesized
    /// stack trace, persists it, and requests an immediate delivery cycle.
    pub fn report(
        &self,
        title: &str,
        details: Map<String, Value>,
        stack_trace: Vec<String>,
    ) -> Result<PendingFile, TelemetryError> {
        let origin = Origin::new(title)
            .with_stack_trace(stack_trace)
            .with_extra("errorTitle", Value::from(title))
            .with_extra("errorDetails", Value::Object(details));

        let record = self.build_record(RecordKind::Error, origin);
        let file = self.queue.write(&record)?;
        debug!(file = %file.file_name(), "Error record persisted");

        if let Some(trigger) = lock_recovering(&self.delivery_trigger).as_ref() {
            trigger();
        }
        Ok(file)
    }

    fn build_record(&self, kind: RecordKind, origin: Origin) -> Record {
        let metadata = lock_recovering(&self.metadata).clone();

        Record::builder(kind, self.session_id)
            .origin(origin)
            .origin_thread(snapshot::current_thread_name())
            .other_threads(self.thread_dump.other_threads())
            .device_info(DeviceInfo::collect())
            .app_info(self.app_info.clone())
            .metadata(metadata)
            .build()
    }

    /// Loop protection for internal-origin panics: at most one capture per
    /// cool-down window.
    fn check_crash_loop(&self) -> Result<(), TelemetryError> {
        let mut last = lock_recovering(&self.last_internal_crash);
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.cooldown {
                return Err(TelemetryError::RecursiveCrashLoop {
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// Acquires a mutex, recovering the guard if a crashing thread poisoned
/// it. The hook path cannot afford an unwrap.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Extracts the human-readable panic message from hook info.
fn panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Whether a panic originated from this SDK's own code.
///
/// The intentional test crash is never internal, and neither is a trace
/// that only touches the SDK through the intended test-crash entry point.
fn is_internal_origin(message: &str, frames: &[String]) -> bool {
    if message == TEST_CRASH_SENTINEL {
        return false;
    }

    let from_sdk = frames.iter().any(|f| f.contains("faultline_"));
    let intended = frames.iter().any(|f| f.contains(INTENDED_CRASH_MARKER));
    from_sdk && !intended
}
