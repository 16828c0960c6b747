//! End-to-end capture tests for the panic interceptor
//!
//! Panic hooks are process-global, so the whole flow lives in one test
//! function in its own binary: hook chaining, capture of a real panic on
//! another thread, the intentional test crash, and uninstall.

use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use faultline_agent::{AgentEvent, FaultlineBuilder, TEST_CRASH_SENTINEL};
use faultline_core::config::Config;
use faultline_core::domain::{HostAppInfo, Record, RecordKind};
use faultline_core::ports::CrashListener;
use faultline_store::DurableQueue;

struct RememberCrash {
    seen: Mutex<Vec<String>>,
}

impl CrashListener for RememberCrash {
    fn on_crash(&self, record: &Record) {
        self.seen
            .lock()
            .unwrap()
            .push(record.origin().message.clone());
    }
}

#[test]
fn panic_capture_end_to_end() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::enabled_with_defaults();
    config.data_dir = dir.path().to_path_buf();

    // A hook installed before the agent must keep running after install
    let chained = Arc::new(AtomicBool::new(false));
    let chained_flag = chained.clone();
    let harness_hook = panic::take_hook();
    panic::set_hook(Box::new(move |_| {
        chained_flag.store(true, Ordering::SeqCst);
    }));

    let agent = FaultlineBuilder::new(config)
        .app_info(HostAppInfo::new("capture-demo", "0.9.0"))
        .build()
        .unwrap();

    let listener = Arc::new(RememberCrash {
        seen: Mutex::new(Vec::new()),
    });
    agent.set_crash_listener(Some(listener.clone()));
    let mut events = agent.subscribe();

    agent.install().unwrap();
    assert!(agent.is_installed());

    // A genuine application panic on another thread
    let crashing = std::thread::Builder::new()
        .name("render-worker".to_string())
        .spawn(|| panic!("texture atlas exhausted"))
        .unwrap();
    assert!(crashing.join().is_err());

    let queue = DurableQueue::open(dir.path()).unwrap();
    let crashes = queue.read_all(RecordKind::Crash);
    assert_eq!(crashes.len(), 1);
    assert!(crashes[0].is_fatal());
    assert_eq!(crashes[0].origin().message, "texture atlas exhausted");
    assert_eq!(crashes[0].origin_thread(), "render-worker");
    assert_eq!(crashes[0].session_id(), &agent.session_id());

    // The pre-install hook ran, the listener fired, the event went out
    assert!(chained.load(Ordering::SeqCst));
    assert_eq!(
        listener.seen.lock().unwrap().as_slice(),
        ["texture atlas exhausted"]
    );
    match events.try_recv() {
        Ok(AgentEvent::CrashOccurred { message, .. }) => {
            assert_eq!(message, "texture atlas exhausted");
        }
        other => panic!("expected a crash event, got {other:?}"),
    }

    // The intentional test crash is captured but never treated as an
    // SDK-internal failure, so no loop suppression kicks in
    let crashed = panic::catch_unwind(|| {
        faultline_agent::trigger_test_crash();
    });
    assert!(crashed.is_err());
    let crashes = queue.read_all(RecordKind::Crash);
    assert_eq!(crashes.len(), 2);
    assert!(crashes
        .iter()
        .any(|c| c.origin().message == TEST_CRASH_SENTINEL));

    // Uninstall restores the pre-install chain and stops capturing
    agent.uninstall().unwrap();
    assert!(!agent.is_installed());
    chained.store(false, Ordering::SeqCst);
    let _ = panic::catch_unwind(|| panic!("after uninstall"));
    assert!(chained.load(Ordering::SeqCst));
    assert_eq!(queue.read_all(RecordKind::Crash).len(), 2);

    drop(agent);
    let _ = panic::take_hook();
    panic::set_hook(harness_hook);
}
