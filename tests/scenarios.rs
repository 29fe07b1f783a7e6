//! End-to-end runs through the public engine and scheduler API

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flowrelay::integrations::{
    CallError, DataStore, ExternalCaller, ExternalResponse, MemoryAuditSink, MemoryDataStore,
    NotificationChannel, Notifier, Severity,
};
use flowrelay::runtime::{
    Engine, LogLevel, RunOutcome, RunStatus, ScheduleRequest, SchedulerService, Signal,
};
use flowrelay::workflow::{RetryPolicy, WorkflowDefinition};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers each endpoint with a fixed status
#[derive(Default)]
struct RoutedCaller {
    statuses: HashMap<String, u16>,
}

impl RoutedCaller {
    fn with(mut self, endpoint: &str, status: u16) -> Self {
        self.statuses.insert(endpoint.to_string(), status);
        self
    }
}

#[async_trait]
impl ExternalCaller for RoutedCaller {
    async fn invoke(
        &self,
        _service: Option<&str>,
        endpoint: &str,
        _method: &str,
        _headers: &HashMap<String, String>,
        _body: Option<&Value>,
    ) -> Result<ExternalResponse, CallError> {
        let status = self.statuses.get(endpoint).copied().unwrap_or(200);
        Ok(ExternalResponse {
            status,
            headers: HashMap::new(),
            body: json!({ "endpoint": endpoint }),
        })
    }
}

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl NotificationChannel for Inbox {
    async fn send(&self, message: &str, recipients: &[String], _severity: Severity) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), recipients.to_vec()));
        Ok(())
    }
}

fn definition(value: Value) -> WorkflowDefinition {
    serde_json::from_value(value).unwrap()
}

fn registration_workflow() -> WorkflowDefinition {
    definition(json!({
        "name": "user_registration",
        "display_name": "User registration",
        "trigger": {"id": "signup", "kind": "trigger", "next": ["validate"]},
        "steps": [
            {"id": "validate", "name": "Validate input", "kind": "action", "action": "data_validation",
             "config": {"rules": {"email": ["required"]}}, "next": ["store"]},
            {"id": "store", "name": "Store user", "kind": "action", "action": "database_operation",
             "config": {"operation": "insert", "table": "users", "data": {"email": "{{email}}"}},
             "next": ["notify"]},
            {"id": "notify", "name": "Welcome", "kind": "action", "action": "notification",
             "config": {"channels": ["inbox"], "recipients": ["{{email}}"],
                        "message": "Welcome {{email}}"}}
        ]
    }))
}

struct Harness {
    engine: Engine,
    store: Arc<MemoryDataStore>,
    inbox: Arc<Inbox>,
    audit: Arc<MemoryAuditSink>,
}

fn harness(caller: RoutedCaller) -> Harness {
    let store = Arc::new(MemoryDataStore::new());
    let inbox = Arc::new(Inbox::default());
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = Engine::builder()
        .caller(Arc::new(caller))
        .data_store(store.clone())
        .notifier(Notifier::new().with_channel("inbox", inbox.clone()))
        .audit(audit.clone())
        .default_retry(RetryPolicy::default().with_base_delay_ms(10))
        .build();
    Harness {
        engine,
        store,
        inbox,
        audit,
    }
}

#[tokio::test]
async fn scenario_a_registration_completes() {
    let h = harness(RoutedCaller::default());
    h.engine.register_workflow(registration_workflow()).await.unwrap();

    let outcome = h
        .engine
        .execute_workflow("user_registration", json!({"email": "a@b.com"}))
        .await
        .unwrap();
    let RunOutcome::Completed { run_id, context } = outcome else {
        panic!("registration did not complete");
    };
    assert_eq!(context["validate"]["success"], json!(true));
    assert_eq!(context["store"]["data"]["count"], json!(1));

    let stored = h.store.find("users", &Map::new(), None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["email"], json!("a@b.com"));

    let messages = h.inbox.messages.lock().unwrap().clone();
    assert_eq!(messages, vec![("Welcome a@b.com".to_string(), vec!["a@b.com".to_string()])]);

    let log = h.engine.get_log(&run_id).await.unwrap();
    let infos: Vec<_> = log.iter().filter(|e| e.level == LogLevel::Info).collect();
    assert_eq!(infos.len(), 4);
    assert_eq!(infos[0].step.as_deref(), Some("validate"));
    assert_eq!(infos[1].step.as_deref(), Some("store"));
    assert_eq!(infos[2].step.as_deref(), Some("notify"));
    assert!(infos[3].step.is_none());
    assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let source = format!("run:{}", run_id);
    assert_eq!(
        h.audit.records().iter().filter(|r| r.source == source).count(),
        log.len()
    );
}

#[tokio::test]
async fn scenario_b_missing_email_fails_validation() {
    let h = harness(RoutedCaller::default());
    h.engine.register_workflow(registration_workflow()).await.unwrap();

    let outcome = h
        .engine
        .execute_workflow("user_registration", json!({}))
        .await
        .unwrap();
    let RunOutcome::Failed { run_id, failed_step, error, step_result, .. } = outcome else {
        panic!("registration should fail");
    };
    assert_eq!(failed_step.as_deref(), Some("validate"));
    assert!(error.contains("email"), "error was {}", error);

    let violations = step_result
        .as_ref()
        .and_then(|r| r["data"]["violations"].as_array())
        .cloned()
        .unwrap_or_default();
    assert!(violations.iter().any(|v| v["field"] == json!("email")));
    assert!(violations.iter().all(|v| v["rule"].is_string()));

    let run = h.engine.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.context.get("store").is_none());
    assert!(run.context.get("notify").is_none());
    assert_eq!(run.context["validate"]["data"]["valid"], json!(false));
    assert!(h.inbox.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_c_parallel_partial_failure() {
    let h = harness(RoutedCaller::default().with("/two", 400));
    h.engine
        .register_workflow(definition(json!({
            "name": "fan_out",
            "trigger": {"id": "start", "kind": "trigger", "next": ["group"]},
            "steps": [{
                "id": "group", "kind": "parallel",
                "config": {"steps": [
                    {"id": "one", "kind": "action", "action": "api_call", "config": {"endpoint": "/one"}},
                    {"id": "two", "kind": "action", "action": "api_call", "config": {"endpoint": "/two"}},
                    {"id": "three", "kind": "action", "action": "api_call", "config": {"endpoint": "/three"}}
                ]}
            }]
        })))
        .await
        .unwrap();

    let outcome = h.engine.execute_workflow("fan_out", json!({})).await.unwrap();
    let RunOutcome::Failed { run_id, failed_step, .. } = outcome else {
        panic!("group should fail");
    };
    assert_eq!(failed_step.as_deref(), Some("group"));

    let run = h.engine.get_run(&run_id).await.unwrap();
    let group = &run.context["group"];
    assert_eq!(group["success"], json!(false));
    let results = group["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["id"], json!("one"));
    assert_eq!(results[0]["success"], json!(true));
    assert_eq!(results[1]["success"], json!(false));
    assert_eq!(results[2]["id"], json!("three"));
    assert_eq!(results[2]["success"], json!(true));
}

#[tokio::test]
async fn scenario_d_hourly_schedule_fires_after_boundary() {
    let h = harness(RoutedCaller::default());
    h.engine.register_workflow(registration_workflow()).await.unwrap();
    let scheduler = SchedulerService::new(h.engine.clone(), None);

    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 20, 0).unwrap();
    let boundary = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
    let schedule = scheduler
        .create_schedule_at(ScheduleRequest::new("user_registration", "0 * * * *"), t0)
        .await
        .unwrap();
    assert_eq!(schedule.next_run, Some(boundary));

    assert!(scheduler.tick_at(boundary - chrono::Duration::seconds(1)).await.is_empty());
    assert!(h.engine.list_runs().await.unwrap().is_empty());

    let started = scheduler.tick_at(boundary + chrono::Duration::seconds(3)).await;
    assert_eq!(started.len(), 1);

    // the schedule payload has no email, so the run fails but the schedule survives
    let outcome = h.engine.wait_for_run(&started[0]).await.unwrap();
    assert_eq!(outcome.status(), RunStatus::Failed);
    let run = h.engine.get_run(&started[0]).await.unwrap();
    assert_eq!(run.context["triggered"], json!("schedule"));
    assert_eq!(run.context["scheduledAt"], json!(boundary.to_rfc3339()));

    let after = scheduler.get_schedule(&schedule.id).await.unwrap();
    assert!(after.enabled);
    assert_eq!(after.next_run, Some(boundary + chrono::Duration::hours(1)));
}

#[tokio::test(start_paused = true)]
async fn scenario_e_pause_waits_for_in_flight_step() {
    let h = harness(RoutedCaller::default());
    h.engine
        .register_workflow(definition(json!({
            "name": "four_steps",
            "trigger": {"id": "start", "kind": "trigger", "next": ["s1"]},
            "steps": [
                {"id": "s1", "kind": "wait", "config": {"duration_ms": 100}, "next": ["s2"]},
                {"id": "s2", "kind": "wait", "config": {"duration_ms": 100}, "next": ["s3"]},
                {"id": "s3", "kind": "wait", "config": {"duration_ms": 100}, "next": ["s4"]},
                {"id": "s4", "kind": "wait", "config": {"duration_ms": 100}}
            ]
        })))
        .await
        .unwrap();

    let run_id = h.engine.start_workflow("four_steps", json!({})).await.unwrap();
    loop {
        let run = h.engine.get_run(&run_id).await.unwrap();
        if run.current_step.as_deref() == Some("s2") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    h.engine.signal(&run_id, Signal::Pause).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let run = h.engine.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Paused);
    assert_eq!(run.context["s2"]["success"], json!(true));
    assert!(run.context.get("s3").is_none());

    h.engine.signal(&run_id, Signal::Resume).await.unwrap();
    let RunOutcome::Completed { context, .. } = h.engine.wait_for_run(&run_id).await.unwrap() else {
        panic!("run should complete after resume");
    };
    assert!(context.get("s3").is_some());
    assert!(context.get("s4").is_some());

    let log = h.engine.get_log(&run_id).await.unwrap();
    assert!(log.iter().any(|e| e.level == LogLevel::Warn && e.message.contains("paused before step s3")));
}

#[tokio::test]
async fn replacing_a_definition_does_not_touch_running_runs() {
    let h = harness(RoutedCaller::default());
    let slow = definition(json!({
        "name": "versioned",
        "trigger": {"id": "start", "kind": "trigger", "next": ["pause"]},
        "steps": [{"id": "pause", "kind": "wait", "config": {"duration_ms": 50}, "next": ["tail"]},
                  {"id": "tail", "kind": "wait", "config": {"duration_ms": 0}}]
    }));
    h.engine.register_workflow(slow).await.unwrap();
    let run_id = h.engine.start_workflow("versioned", json!({})).await.unwrap();

    h.engine
        .register_workflow(definition(json!({
            "name": "versioned",
            "trigger": {"id": "start", "kind": "trigger"}
        })))
        .await
        .unwrap();

    let RunOutcome::Completed { context, .. } = h.engine.wait_for_run(&run_id).await.unwrap() else {
        panic!("run should complete");
    };
    assert!(context.get("tail").is_some());
}
