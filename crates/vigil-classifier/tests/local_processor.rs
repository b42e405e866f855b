//! End-to-end classification with real local processor processes.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use vigil_classifier::{Classifier, LocalProcessRunner};
use vigil_connector::{CommandOutcome, CommandOutput};
use vigil_core::{config::ClassifierConfig, CheckStatus, ErrorCode, Script};

fn classifier(timeout: Duration) -> Classifier {
    Classifier::new(Arc::new(
        LocalProcessRunner::new(&ClassifierConfig::default()).with_timeout(timeout),
    ))
}

fn outcome(stdout: &str) -> CommandOutcome {
    CommandOutcome {
        output: CommandOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        },
        failure: None,
        session_lost: false,
    }
}

fn script(processor: &str, reference: Option<&str>) -> Script {
    Script {
        id: "sshd-root-login".into(),
        name: "Root login over SSH is disabled".into(),
        command: "cat /etc/ssh/sshd_config".into(),
        processor: Some(processor.into()),
        reference: reference.map(str::to_string),
    }
}

const COMPARE: &str = r#"
expected=$(cat "$2")
if grep -qx "$expected" "$1"; then
  echo Passed
else
  echo "VIGIL_STATUS: 41"
fi
"#;

#[tokio::test]
async fn compliant_host_passes() {
    let v = classifier(Duration::from_secs(10))
        .classify(
            &outcome("Port 22\nPermitRootLogin no\n"),
            &script(COMPARE, Some("PermitRootLogin no")),
        )
        .await;
    assert_eq!(v.check_status, CheckStatus::Passed);
    assert_eq!(v.error_code, None);
}

#[tokio::test]
async fn mismatch_reports_code_and_actual_value() {
    let v = classifier(Duration::from_secs(10))
        .classify(
            &outcome("#PermitRootLogin no\r\nPermitRootLogin yes\r\n"),
            &script(COMPARE, Some("PermitRootLogin no")),
        )
        .await;
    assert_eq!(v.check_status, CheckStatus::Failed);
    assert_eq!(v.error_code, Some(ErrorCode::ConfigMismatch));
    assert_eq!(v.actual_data.as_deref(), Some("PermitRootLogin yes"));
}

#[tokio::test]
async fn failed_word_without_code_has_description() {
    let v = classifier(Duration::from_secs(10))
        .classify(&outcome("anything"), &script("printf 'Failed\\n'", None))
        .await;
    assert_eq!(v.check_status, CheckStatus::Failed);
    assert!(v.error_description.is_some());
}

#[tokio::test]
async fn hung_processor_is_error_52() {
    let v = classifier(Duration::from_millis(300))
        .classify(&outcome("x"), &script("sleep 30", None))
        .await;
    assert_eq!(v.check_status, CheckStatus::Error);
    assert_eq!(v.error_code, Some(ErrorCode::ProcessorTimeout));
}
