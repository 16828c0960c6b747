//! End-to-end delivery pipeline tests
//!
//! Runs the assembled agent against a wiremock collector: records go in
//! through `report()` or straight into the queue, and come out over HTTP
//! with the retry policy applied.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use faultline_agent::{Faultline, FaultlineBuilder, RunResult};
use faultline_collector::HttpCollector;
use faultline_core::config::Config;
use faultline_core::domain::{HostAppInfo, Origin, Record, RecordKind, SessionId};
use faultline_store::DurableQueue;

fn config_for(dir: &std::path::Path) -> Config {
    let mut config = Config::enabled_with_defaults();
    config.data_dir = dir.to_path_buf();
    config
}

fn agent_against(server: &MockServer, dir: &std::path::Path) -> Faultline {
    let collector = Arc::new(HttpCollector::with_base_url("cid-e2e", server.uri()));
    FaultlineBuilder::new(config_for(dir))
        .app_info(HostAppInfo::new("pipeline-demo", "1.0.0"))
        .collector(collector)
        .build()
        .unwrap()
}

fn write_crash(queue: &DurableQueue, session: SessionId, message: &str) {
    let record = Record::builder(RecordKind::Crash, session)
        .origin(Origin::new(message).with_stack_trace(vec!["demo::main".to_string()]))
        .origin_thread("main")
        .app_info(HostAppInfo::new("pipeline-demo", "1.0.0"))
        .build();
    queue.write(&record).unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within 5 s");
}

#[tokio::test]
async fn partial_failure_leaves_only_the_failing_record() {
    let server = MockServer::start().await;
    // First match wins: the gamma record hits a persistent 500
    Mock::given(method("POST"))
        .and(path("/records"))
        .and(body_string_contains("crash gamma"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let queue = DurableQueue::open(dir.path()).unwrap();
    let session = SessionId::new();
    write_crash(&queue, session, "crash alpha");
    write_crash(&queue, session, "crash beta");
    write_crash(&queue, session, "crash gamma");

    let agent = agent_against(&server, dir.path());
    let outcome = match agent.run_now().await {
        RunResult::Completed(outcome) => outcome,
        other => panic!("expected a completed cycle, got {other:?}"),
    };

    assert!(!outcome.success);
    assert_eq!(outcome.delivered, 2);

    let pending = queue.list_pending(RecordKind::Crash);
    assert_eq!(pending.len(), 1);
    assert!(queue.read(&pending[0]).unwrap().contains("crash gamma"));

    // The two delivered crash contents are surfaced to the host
    let previous = agent.previous_crash_reports();
    assert_eq!(previous.len(), 2);
    assert!(previous.iter().all(|p| !p.contains("crash gamma")));
}

#[tokio::test]
async fn reported_errors_reach_the_collector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .and(header("faultline-client-id", "cid-e2e"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let agent = agent_against(&server, dir.path());

    let mut details = Map::new();
    details.insert("screen".to_string(), Value::from("checkout"));
    agent
        .report(
            "payment declined",
            details,
            vec!["demo::checkout::pay".to_string()],
        )
        .unwrap();
    agent.report("cart desync", Map::new(), Vec::new()).unwrap();

    // report() requests an immediate cycle on the delivery thread
    let queue = DurableQueue::open(dir.path()).unwrap();
    wait_until(|| queue.list_pending(RecordKind::Error).is_empty()).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let bodies: Vec<String> = requests
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .collect();
    assert!(bodies.iter().any(|b| b.contains("payment declined")));
    assert!(bodies.iter().any(|b| b.contains("checkout")));
    assert!(bodies.iter().all(|b| b.contains("\"isFatal\":false")));
}

#[tokio::test]
async fn empty_queue_round_trips_without_submissions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let agent = agent_against(&server, dir.path());

    let outcome = match agent.run_now().await {
        RunResult::Completed(outcome) => outcome,
        other => panic!("expected a completed cycle, got {other:?}"),
    };
    assert!(outcome.success);
    assert_eq!(outcome.delivered + outcome.rejected + outcome.failed, 0);
}

#[tokio::test]
async fn rejected_records_are_dropped_without_being_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let queue = DurableQueue::open(dir.path()).unwrap();
    write_crash(&queue, SessionId::new(), "never again");

    let agent = agent_against(&server, dir.path());
    let outcome = match agent.run_now().await {
        RunResult::Completed(outcome) => outcome,
        other => panic!("expected a completed cycle, got {other:?}"),
    };

    assert!(outcome.success);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.delivered, 0);
    assert!(queue.list_pending(RecordKind::Crash).is_empty());
    assert!(agent.previous_crash_reports().is_empty());
}

#[tokio::test]
async fn report_round_trips_with_title_and_details() {
    // Default collector stays unconfigured, so the record survives the
    // delivery attempt the report triggers
    let dir = tempfile::tempdir().unwrap();
    let agent = FaultlineBuilder::new(config_for(dir.path()))
        .app_info(HostAppInfo::new("pipeline-demo", "1.0.0"))
        .build()
        .unwrap();

    let mut details = Map::new();
    details.insert("k".to_string(), Value::from("v"));
    agent
        .report("T", details, vec!["demo::site".to_string()])
        .unwrap();

    let queue = DurableQueue::open(dir.path()).unwrap();
    let records = queue.read_all(RecordKind::Error);
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_fatal());
    assert_eq!(records[0].origin().message, "T");
    assert_eq!(records[0].origin().extra["errorDetails"]["k"], "v");
    assert_eq!(records[0].origin().stack_trace, vec!["demo::site".to_string()]);
    assert_eq!(records[0].session_id(), &agent.session_id());
}
