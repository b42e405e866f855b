//! Local execution of processor scripts.
//!
//! Each run gets a private temp directory holding the script and both inputs:
//!
//! ```text
//! processor      script text (LF-normalized)
//! output.txt     raw command output   -> $1, and stdin
//! reference.txt  reference text       -> $2 (empty file when absent)
//! ```
//!
//! The directory is removed when the run finishes.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use vigil_core::config::ClassifierConfig;

use crate::{
    error::{ClassifierError, Result},
    types::{normalize_newlines, ProcessorInput, ProcessorOutput},
};

/// Runs a processor script against one command's output.
#[async_trait]
pub trait ProcessorRunner: Send + Sync {
    async fn run(&self, script: &str, input: &ProcessorInput) -> Result<ProcessorOutput>;
}

pub struct LocalProcessRunner {
    interpreter: String,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl LocalProcessRunner {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program and leading arguments: the shebang if present, otherwise the
    /// configured interpreter.
    fn program_for(&self, script: &str) -> (String, Vec<String>) {
        if let Some(line) = script.lines().next().and_then(|l| l.strip_prefix("#!")) {
            let mut parts = line.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                return (program, parts.collect());
            }
        }
        (self.interpreter.clone(), Vec::new())
    }
}

#[async_trait]
impl ProcessorRunner for LocalProcessRunner {
    async fn run(&self, script: &str, input: &ProcessorInput) -> Result<ProcessorOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClassifierError::PoolClosed)?;

        let script = normalize_newlines(script);
        let dir = tempfile::Builder::new().prefix("vigil-proc-").tempdir()?;
        let script_path = dir.path().join("processor");
        let output_path = dir.path().join("output.txt");
        let reference_path = dir.path().join("reference.txt");
        tokio::fs::write(&script_path, &script).await?;
        tokio::fs::write(&output_path, &input.raw_output).await?;
        tokio::fs::write(&reference_path, input.reference.as_deref().unwrap_or_default()).await?;

        let (program, leading) = self.program_for(&script);
        debug!(program = %program, dir = %dir.path().display(), "processor start");

        let mut child = Command::new(&program)
            .args(&leading)
            .arg(&script_path)
            .arg(&output_path)
            .arg(&reference_path)
            .current_dir(dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClassifierError::Spawn(format!("{program}: {e}")))?;

        // Fed from a separate task so a script that never reads stdin cannot
        // stall on a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let data = input.raw_output.clone().into_bytes();
            tokio::spawn(async move {
                let _ = stdin.write_all(&data).await;
            });
        }

        // Dropping the future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProcessorOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: normalize_newlines(&String::from_utf8_lossy(&output.stdout)),
                stderr: normalize_newlines(&String::from_utf8_lossy(&output.stderr)),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(ClassifierError::Workspace(e)),
            Err(_elapsed) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    dir = %dir.path().display(),
                    "processor timed out, killed"
                );
                Ok(ProcessorOutput {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("processor timed out after {}ms", self.timeout.as_millis()),
                    timed_out: true,
                })
            }
        }
    }
}
