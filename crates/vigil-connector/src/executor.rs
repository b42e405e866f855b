//! Runs check commands and recognises technical failures.
//!
//! A non-zero exit status alone says nothing about compliance (`grep` exits
//! 1 when a setting is absent). Only well-known failure signatures are turned
//! into taxonomy codes here; everything else is left to the classifier.

use std::time::Duration;

use tracing::{debug, warn};
use vigil_core::ErrorCode;

use crate::{
    connector::Connector,
    error::ConnectorError,
    truncate::truncate_middle,
    types::CommandOutput,
};

/// Signatures checked in order; the first hit wins. Patterns are lowercase
/// and cover English and Russian locales so a remote `LANG` does not matter.
const FAILURE_PATTERNS: &[(ErrorCode, &[&str])] = &[
    (
        ErrorCode::CommandNotFound,
        &[
            "command not found",
            "not recognized as the name of a cmdlet",
            "is not recognized as an internal or external command",
            "команда не найдена",
        ],
    ),
    (
        ErrorCode::ServiceNotFound,
        &[
            "could not be found.",
            "unit not found",
            "no such service",
            "cannot find any service with service name",
            "unrecognized service",
            "служба не найдена",
        ],
    ),
    (
        ErrorCode::ServiceStopped,
        &[
            "inactive (dead)",
            "is not running",
            "service is stopped",
            "служба не запущена",
        ],
    ),
    (
        ErrorCode::FileNotFound,
        &[
            "no such file or directory",
            "cannot find path",
            "cannot find the file",
            "нет такого файла или каталога",
        ],
    ),
    (
        ErrorCode::PermissionDenied,
        &[
            "permission denied",
            "access is denied",
            "operation not permitted",
            "отказано в доступе",
        ],
    ),
    (
        ErrorCode::FileUnreadable,
        &["is a directory", "input/output error", "ошибка ввода/вывода"],
    ),
    (
        ErrorCode::CommandTimeout,
        &["timed out", "timeout expired", "время ожидания истекло"],
    ),
];

/// What the executor hands to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub output: CommandOutput,
    /// Recognised technical failure, if any.
    pub failure: Option<ErrorCode>,
    /// The session is gone; the remaining scripts of this task cannot run.
    pub session_lost: bool,
}

impl CommandOutcome {
    fn failed(code: ErrorCode, message: String, session_lost: bool) -> Self {
        Self {
            output: CommandOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: message,
            },
            failure: Some(code),
            session_lost,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pub timeout: Duration,
    pub max_output_chars: usize,
}

impl CommandExecutor {
    pub fn new(timeout: Duration, max_output_chars: usize) -> Self {
        Self {
            timeout,
            max_output_chars,
        }
    }

    /// Run `command` on an open session. Never fails: transport problems are
    /// folded into the outcome.
    pub async fn execute(&self, connector: &mut dyn Connector, command: &str) -> CommandOutcome {
        match connector.run(command, self.timeout).await {
            Ok(mut output) => {
                let failure = detect_failure(&output);
                if let Some(code) = failure {
                    debug!(
                        exit_code = output.exit_code,
                        code = %code,
                        "technical failure recognised"
                    );
                }
                output.stdout = truncate_middle(&output.stdout, self.max_output_chars);
                output.stderr = truncate_middle(&output.stderr, self.max_output_chars);
                CommandOutcome {
                    output,
                    failure,
                    session_lost: false,
                }
            }
            Err(ConnectorError::Timeout { ms }) => {
                warn!(timeout_ms = ms, "check command timed out");
                CommandOutcome::failed(
                    ErrorCode::CommandTimeout,
                    format!("command timed out after {ms}ms"),
                    false,
                )
            }
            Err(e) => {
                warn!(err = %e, "check command could not run");
                CommandOutcome::failed(ErrorCode::ConnectionLost, e.to_string(), true)
            }
        }
    }
}

/// Map a non-zero exit to a technical failure code, if the output carries a
/// known signature. Exit 0 is never a technical failure.
pub fn detect_failure(output: &CommandOutput) -> Option<ErrorCode> {
    if output.exit_code == 0 {
        return None;
    }

    let stderr = output.stderr.to_lowercase();
    let stdout = output.stdout.to_lowercase();
    for text in [&stderr, &stdout] {
        if text.trim().is_empty() {
            continue;
        }
        for (code, patterns) in FAILURE_PATTERNS {
            if patterns.iter().any(|p| text.contains(p)) {
                return Some(*code);
            }
        }
    }

    // POSIX shells: 127 = not found, 126 = found but not executable.
    match output.exit_code {
        127 => Some(ErrorCode::CommandNotFound),
        126 => Some(ErrorCode::PermissionDenied),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn zero_exit_is_never_a_failure() {
        assert_eq!(detect_failure(&out(0, "", "bash: foo: command not found")), None);
    }

    #[test]
    fn plain_nonzero_is_left_to_classifier() {
        assert_eq!(detect_failure(&out(1, "", "")), None);
    }

    #[test]
    fn recognises_english_signatures() {
        assert_eq!(
            detect_failure(&out(2, "", "cat: /etc/ssh/sshd_config: No such file or directory")),
            Some(ErrorCode::FileNotFound)
        );
        assert_eq!(
            detect_failure(&out(1, "", "cat: /etc/shadow: Permission denied")),
            Some(ErrorCode::PermissionDenied)
        );
        assert_eq!(
            detect_failure(&out(4, "", "Unit auditd.service could not be found.")),
            Some(ErrorCode::ServiceNotFound)
        );
        assert_eq!(
            detect_failure(&out(3, "   Active: inactive (dead)", "")),
            Some(ErrorCode::ServiceStopped)
        );
    }

    #[test]
    fn recognises_russian_signatures() {
        assert_eq!(
            detect_failure(&out(2, "", "cat: /etc/foo: Нет такого файла или каталога")),
            Some(ErrorCode::FileNotFound)
        );
        assert_eq!(
            detect_failure(&out(1, "", "bash: auditctl: команда не найдена")),
            Some(ErrorCode::CommandNotFound)
        );
    }

    #[test]
    fn shell_exit_codes_without_text() {
        assert_eq!(detect_failure(&out(127, "", "")), Some(ErrorCode::CommandNotFound));
        assert_eq!(detect_failure(&out(126, "", "")), Some(ErrorCode::PermissionDenied));
    }

    #[test]
    fn stderr_is_consulted_before_stdout() {
        let o = out(1, "No such file or directory", "Permission denied");
        assert_eq!(detect_failure(&o), Some(ErrorCode::PermissionDenied));
    }
}
