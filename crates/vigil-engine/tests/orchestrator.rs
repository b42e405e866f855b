//! Full runs against scripted connectors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vigil_classifier::{Classifier, ProcessorInput, ProcessorOutput, ProcessorRunner};
use vigil_connector::{
    CommandExecutor, CommandOutput, Connector, ConnectorError, ConnectorFactory, Preflight,
    PrivilegeProbe, RetryPolicy,
};
use vigil_core::{CheckStatus, Credential, ErrorCode, Host, Protocol, Script, TaskSpec};
use vigil_engine::{InMemoryStore, Orchestrator, ProgressEvent, Stage};

/// Behaviour is selected by the host address.
struct Scripted {
    address: String,
    open: bool,
}

#[async_trait]
impl Connector for Scripted {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn endpoint(&self) -> (&str, u16) {
        (&self.address, 22)
    }

    async fn probe_network(&self, _timeout: Duration) -> vigil_connector::Result<()> {
        if self.address == "down" {
            return Err(ConnectorError::Unreachable("no route to host".into()));
        }
        Ok(())
    }

    async fn open(&mut self) -> vigil_connector::Result<()> {
        if self.address == "badauth" {
            return Err(ConnectorError::Auth("authentication failed".into()));
        }
        self.open = true;
        Ok(())
    }

    async fn probe_privilege(&mut self) -> vigil_connector::Result<PrivilegeProbe> {
        Ok(PrivilegeProbe {
            elevated: self.address != "nosudo",
            detail: "sudo: a password is required".into(),
        })
    }

    async fn run(
        &mut self,
        command: &str,
        _timeout: Duration,
    ) -> vigil_connector::Result<CommandOutput> {
        assert!(self.open, "command before login");
        let out = |exit_code, stdout: &str, stderr: &str| CommandOutput {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        };
        match command {
            "pass" => Ok(out(0, "PermitRootLogin no\n", "")),
            "fail" => Ok(out(1, "PermitRootLogin yes\n", "")),
            "missing" => Ok(out(1, "", "cat: /etc/x: No such file or directory")),
            "drop" => Err(ConnectorError::SessionLost("connection reset".into())),
            "slow" => Err(ConnectorError::Timeout { ms: 10 }),
            "boom" => panic!("connector crashed"),
            other => panic!("unexpected command {other}"),
        }
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

struct Factory;

impl ConnectorFactory for Factory {
    fn connector_for(&self, host: &Host) -> Box<dyn Connector> {
        Box::new(Scripted {
            address: host.address.clone(),
            open: false,
        })
    }
}

/// Every processor reports a configuration mismatch.
struct AlwaysMismatch;

#[async_trait]
impl ProcessorRunner for AlwaysMismatch {
    async fn run(
        &self,
        _script: &str,
        _input: &ProcessorInput,
    ) -> vigil_classifier::Result<ProcessorOutput> {
        Ok(ProcessorOutput {
            exit_code: 41,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

fn host(id: &str, address: &str) -> Host {
    Host {
        id: id.into(),
        address: address.into(),
        port: None,
        protocol: Protocol::Ssh,
        username: "audit".into(),
        credential: Credential::Password {
            password: "x".into(),
        },
        use_tls: false,
    }
}

fn script(id: &str, command: &str) -> Script {
    Script {
        id: id.into(),
        name: id.into(),
        command: command.into(),
        processor: None,
        reference: Some("PermitRootLogin no".into()),
    }
}

fn setup() -> (Orchestrator, Arc<InMemoryStore>) {
    let mut store = InMemoryStore::new();
    for (id, addr) in [
        ("web", "ok"),
        ("dark", "down"),
        ("locked", "badauth"),
        ("plain", "nosudo"),
    ] {
        store = store.with_host(host(id, addr));
    }
    for (id, cmd) in [
        ("s-pass", "pass"),
        ("s-fail", "fail"),
        ("s-missing", "missing"),
        ("s-drop", "drop"),
        ("s-slow", "slow"),
        ("s-boom", "boom"),
    ] {
        store = store.with_script(script(id, cmd));
    }
    store = store.with_script(Script {
        processor: Some("exit 41".into()),
        ..script("s-processed", "pass")
    });
    let store = Arc::new(store);

    let orchestrator = Orchestrator::new(
        Arc::new(Factory),
        store.clone(),
        store.clone(),
        Preflight::new(Duration::from_millis(100), RetryPolicy::none()),
        CommandExecutor::new(Duration::from_secs(5), 10_000),
        Classifier::new(Arc::new(AlwaysMismatch)),
    );
    (orchestrator, store)
}

fn task(host_id: &str, scripts: &[&str]) -> TaskSpec {
    TaskSpec {
        host_id: host_id.into(),
        script_ids: scripts.iter().map(|s| s.to_string()).collect(),
    }
}

async fn drain(orchestrator: &Orchestrator, tasks: Vec<TaskSpec>) -> Vec<ProgressEvent> {
    let mut handle = orchestrator.start(tasks);
    let mut events = Vec::new();
    while let Some(e) = handle.events.recv().await {
        events.push(e);
    }
    handle.join.await.unwrap();
    events
}

fn stage_names(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| {
            serde_json::to_value(e).unwrap()["stage"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn unreachable_host_fails_every_script_with_code_11() {
    let (orchestrator, store) = setup();
    let events = drain(&orchestrator, vec![task("dark", &["s-pass", "s-fail"])]).await;

    assert_eq!(
        stage_names(&events),
        ["status", "task_start", "check_network", "task_error", "complete"]
    );
    assert!(matches!(events[2].stage, Stage::CheckNetwork { success: false, .. }));
    assert!(matches!(
        events.last().unwrap().stage,
        Stage::Complete {
            total_tasks: 1,
            failed: 1
        }
    ));

    let results = store.results();
    assert_eq!(results.len(), 2);
    for r in &results {
        assert_eq!(r.check_status, CheckStatus::Error);
        assert_eq!(r.error_code, Some(ErrorCode::NetworkUnreachable));
        assert!(!r.success);
    }
}

#[tokio::test]
async fn seq_numbers_are_contiguous() {
    let (orchestrator, _) = setup();
    let tasks = vec![task("web", &["s-pass", "s-fail"]), task("dark", &["s-pass"])];
    let events = drain(&orchestrator, tasks).await;
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(seqs, expected);
}

#[tokio::test]
async fn healthy_host_runs_and_classifies_each_script() {
    let (orchestrator, store) = setup();
    let events = drain(
        &orchestrator,
        vec![task("web", &["s-pass", "s-fail", "s-missing", "s-processed", "s-slow"])],
    )
    .await;

    assert_eq!(
        stage_names(&events),
        [
            "status",
            "task_start",
            "check_network",
            "check_login",
            "check_sudo",
            "script_progress",
            "script_progress",
            "script_progress",
            "script_progress",
            "script_progress",
            "task_complete",
            "complete",
        ]
    );

    let results = store.results();
    let by_id = |id: &str| results.iter().find(|r| r.script_id == id).unwrap();

    assert_eq!(by_id("s-pass").check_status, CheckStatus::Passed);

    let failed = by_id("s-fail");
    assert_eq!(failed.check_status, CheckStatus::Failed);
    assert!(failed.error_description.is_some());
    assert_eq!(failed.actual_data.as_deref(), Some("PermitRootLogin yes"));

    let missing = by_id("s-missing");
    assert_eq!(missing.check_status, CheckStatus::Error);
    assert_eq!(missing.error_code, Some(ErrorCode::FileNotFound));

    let processed = by_id("s-processed");
    assert_eq!(processed.check_status, CheckStatus::Failed);
    assert_eq!(processed.error_code, Some(ErrorCode::ConfigMismatch));

    assert_eq!(by_id("s-slow").error_code, Some(ErrorCode::CommandTimeout));
}

#[tokio::test]
async fn gate_failures_map_to_their_codes() {
    let (orchestrator, store) = setup();
    drain(&orchestrator, vec![task("locked", &["s-pass"]), task("plain", &["s-pass"])]).await;
    let codes: Vec<_> = store.results().iter().map(|r| r.error_code).collect();
    assert_eq!(
        codes,
        vec![Some(ErrorCode::LoginFailed), Some(ErrorCode::InsufficientPrivilege)]
    );
}

#[tokio::test]
async fn lost_session_fails_the_rest_of_the_task_only() {
    let (orchestrator, store) = setup();
    let events = drain(
        &orchestrator,
        vec![task("web", &["s-pass", "s-drop", "s-fail"]), task("web", &["s-pass"])],
    )
    .await;

    let results = store.results();
    assert_eq!(results.len(), 4);
    assert_eq!(results[1].error_code, Some(ErrorCode::ConnectionLost));
    assert_eq!(results[2].script_id, "s-fail");
    assert_eq!(results[2].error_code, Some(ErrorCode::ConnectionLost));
    assert_eq!(results[3].check_status, CheckStatus::Passed);

    assert!(matches!(
        events.last().unwrap().stage,
        Stage::Complete {
            total_tasks: 2,
            failed: 1
        }
    ));
}

#[tokio::test]
async fn unknown_host_and_script_fail_their_task() {
    let (orchestrator, store) = setup();
    let events = drain(
        &orchestrator,
        vec![task("ghost", &["s-pass"]), task("web", &["s-pass", "nope"])],
    )
    .await;
    let results = store.results();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.check_status == CheckStatus::Error));
    assert!(matches!(
        events.last().unwrap().stage,
        Stage::Complete { failed: 2, .. }
    ));
}

#[tokio::test]
async fn dropping_the_receiver_does_not_cancel_the_run() {
    let (orchestrator, store) = setup();
    let handle = orchestrator.start(vec![task("web", &["s-pass", "s-fail"])]);
    drop(handle.events);
    let summary = handle.join.await.unwrap();
    assert_eq!(summary.total_tasks, 1);
    assert!(summary.success());
    assert_eq!(store.results().len(), 2);
}

#[tokio::test]
async fn panicking_task_fails_its_scripts_and_the_run_goes_on() {
    let (orchestrator, store) = setup();
    let events = drain(
        &orchestrator,
        vec![task("web", &["s-pass", "s-boom", "s-fail"]), task("web", &["s-pass"])],
    )
    .await;

    assert_eq!(
        stage_names(&events),
        [
            "status",
            "task_start",
            "check_network",
            "check_login",
            "check_sudo",
            "script_progress",
            "task_error",
            "task_start",
            "check_network",
            "check_login",
            "check_sudo",
            "script_progress",
            "task_complete",
            "complete",
        ]
    );
    assert!(matches!(
        events.last().unwrap().stage,
        Stage::Complete {
            total_tasks: 2,
            failed: 1
        }
    ));

    let results = store.results();
    let ids: Vec<_> = results.iter().map(|r| r.script_id.as_str()).collect();
    assert_eq!(ids, ["s-pass", "s-boom", "s-fail", "s-pass"]);
    assert_eq!(results[0].check_status, CheckStatus::Passed);
    for r in &results[1..3] {
        assert_eq!(r.check_status, CheckStatus::Error);
        assert!(r.error_description.as_deref().unwrap().contains("connector crashed"));
    }
    assert_eq!(results[3].check_status, CheckStatus::Passed);
}
