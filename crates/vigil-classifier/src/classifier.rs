use std::sync::Arc;

use tracing::{debug, warn};
use vigil_connector::CommandOutcome;
use vigil_core::{CheckStatus, ErrorCode, Script, Verdict};

use crate::{
    extract::extract_actual,
    runner::ProcessorRunner,
    status::resolve_status,
    types::{normalize_newlines, ProcessorInput},
};

/// Turns a command outcome into the final verdict for one script.
#[derive(Clone)]
pub struct Classifier {
    runner: Arc<dyn ProcessorRunner>,
}

impl Classifier {
    pub fn new(runner: Arc<dyn ProcessorRunner>) -> Self {
        Self { runner }
    }

    pub async fn classify(&self, outcome: &CommandOutcome, script: &Script) -> Verdict {
        let raw_output = normalize_newlines(raw_output(outcome));
        let reference = script.reference.as_deref().map(normalize_newlines);

        let mut verdict = match (outcome.failure, script.processor.as_deref()) {
            // A technical failure on the host is final; the processor never sees it.
            (Some(code), _) => technical(code, outcome),
            (None, None) => from_exit_status(outcome.output.exit_code),
            (None, Some(processor)) => {
                let input = ProcessorInput {
                    raw_output: raw_output.clone(),
                    reference: reference.clone(),
                };
                match self.runner.run(processor, &input).await {
                    Ok(out) => {
                        debug!(
                            script_id = %script.id,
                            exit_code = out.exit_code,
                            timed_out = out.timed_out,
                            "processor finished"
                        );
                        resolve_status(&out)
                    }
                    Err(e) => {
                        warn!(script_id = %script.id, err = %e, "processor could not run");
                        Verdict::from_code(ErrorCode::ProcessorFailed)
                            .with_description(e.to_string())
                    }
                }
            }
        };

        if verdict.check_status == CheckStatus::Failed {
            if verdict.error_description.is_none() {
                verdict.error_description = Some("check failed".to_string());
            }
            if let Some(reference) = reference.as_deref() {
                verdict.actual_data = extract_actual(&raw_output, reference);
            }
        }
        verdict
    }
}

/// What the check printed. Commands that only write to stderr (a missing
/// setting reported by the tool itself) still give the processor something.
fn raw_output(outcome: &CommandOutcome) -> &str {
    if outcome.output.stdout.trim().is_empty() {
        &outcome.output.stderr
    } else {
        &outcome.output.stdout
    }
}

fn technical(code: ErrorCode, outcome: &CommandOutcome) -> Verdict {
    let detail = outcome
        .output
        .stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty());
    let verdict = Verdict::from_code(code);
    match detail {
        Some(detail) => verdict.with_description(format!("{}: {detail}", code.description())),
        None => verdict,
    }
}

fn from_exit_status(exit_code: i32) -> Verdict {
    if exit_code == 0 {
        Verdict::passed()
    } else {
        Verdict {
            check_status: CheckStatus::Failed,
            error_code: None,
            error_description: Some(format!("check exited with status {exit_code}")),
            actual_data: None,
        }
    }
}
