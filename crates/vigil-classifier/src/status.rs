//! Status inference from processor output.
//!
//! [`resolve_status`] walks a fixed priority chain and returns at the first
//! signal it recognises:
//!
//! 1. exit status that is a catalog code
//! 2. a `VIGIL_STATUS: <code>` line on stdout
//! 3. an embedded code in the text, then a status keyword line
//! 4. exit status fallback
//!
//! Only the timeout flag is checked before the chain, since a killed process
//! has nothing trustworthy to say.

use std::sync::OnceLock;

use regex::Regex;
use vigil_core::{CheckStatus, ErrorCode, Verdict};

use crate::types::ProcessorOutput;

pub const STATUS_LINE_PREFIX: &str = "VIGIL_STATUS:";

/// Keyword forms, lowercase. Matched against the whole candidate, so
/// "не пройдено" never reads as "пройдено".
const KEYWORDS: &[(&str, CheckStatus)] = &[
    ("non-compliant", CheckStatus::Failed),
    ("noncompliant", CheckStatus::Failed),
    ("не пройдено", CheckStatus::Failed),
    ("не соответствует", CheckStatus::Failed),
    ("провалено", CheckStatus::Failed),
    ("failed", CheckStatus::Failed),
    ("fail", CheckStatus::Failed),
    ("passed", CheckStatus::Passed),
    ("pass", CheckStatus::Passed),
    ("compliant", CheckStatus::Passed),
    ("пройдено", CheckStatus::Passed),
    ("соответствует", CheckStatus::Passed),
    ("успешно", CheckStatus::Passed),
    ("error", CheckStatus::Error),
    ("ошибка", CheckStatus::Error),
    ("operator", CheckStatus::Operator),
    ("manual", CheckStatus::Operator),
    ("оператор", CheckStatus::Operator),
    ("ручная проверка", CheckStatus::Operator),
];

/// Lowercase stderr fragments that mean the processor itself broke.
const CRITICAL_STDERR: &[&str] = &[
    "syntax error",
    "command not found",
    "no such file or directory",
    "traceback (most recent call last)",
    "segmentation fault",
    "core dumped",
    "panicked at",
    "unbound variable",
    "синтаксическая ошибка",
    "команда не найдена",
];

fn embedded_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\berror_code\s*[:=]\s*|\bcode\s*[:=]\s*|\[E)(\d{2})\b\]?")
            .unwrap_or_else(|e| panic!("embedded code pattern: {e}"))
    })
}

fn status_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:status|result|статус|результат)\s*[:=]\s*(.+)$")
            .unwrap_or_else(|e| panic!("status keyword pattern: {e}"))
    })
}

/// Decide a verdict from processor output. Pure; never fails.
pub fn resolve_status(output: &ProcessorOutput) -> Verdict {
    if output.timed_out {
        return Verdict::from_code(ErrorCode::ProcessorTimeout);
    }

    if let Some(code) = ErrorCode::from_code(output.exit_code as i64) {
        return Verdict::from_code(code);
    }

    if let Some(verdict) = status_line(&output.stdout) {
        return verdict;
    }

    if let Some(code) = embedded_code(&output.stdout) {
        return Verdict::from_code(code);
    }

    if let Some(status) = last_keyword(&output.stdout) {
        return keyword_verdict(status, output);
    }

    fallback(output)
}

/// First `VIGIL_STATUS:` line. A value that is neither a catalog code nor a
/// status word is a malformed result.
fn status_line(stdout: &str) -> Option<Verdict> {
    let value = stdout
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix(STATUS_LINE_PREFIX))?
        .trim();

    if let Ok(n) = value.parse::<i64>() {
        if n == 0 {
            return Some(Verdict::passed());
        }
        if let Some(code) = ErrorCode::from_code(n) {
            return Some(Verdict::from_code(code));
        }
    } else if let Some(status) = keyword(value) {
        return Some(keyword_verdict(status, &ProcessorOutput::default()));
    }

    Some(
        Verdict::from_code(ErrorCode::ProcessorOutputInvalid)
            .with_description(format!("unrecognised status line value: {value:?}")),
    )
}

fn embedded_code(text: &str) -> Option<ErrorCode> {
    embedded_code_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<i64>().ok())
        .find_map(ErrorCode::from_code)
}

/// Status word of the last line that is a bare keyword or `status: keyword`.
fn last_keyword(stdout: &str) -> Option<CheckStatus> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let candidate = status_keyword_re()
                .captures(line)
                .and_then(|c| c.get(1))
                .map_or(line, |m| m.as_str());
            keyword(candidate)
        })
        .last()
}

fn keyword(candidate: &str) -> Option<CheckStatus> {
    let word = candidate
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | ';' | ','))
        .to_lowercase();
    KEYWORDS
        .iter()
        .find(|(kw, _)| *kw == word)
        .map(|(_, status)| *status)
}

fn keyword_verdict(status: CheckStatus, output: &ProcessorOutput) -> Verdict {
    match status {
        CheckStatus::Passed => Verdict::passed(),
        CheckStatus::Failed => Verdict {
            check_status: CheckStatus::Failed,
            error_code: None,
            error_description: Some("check reported non-compliance without an error code".into()),
            actual_data: None,
        },
        CheckStatus::Error => Verdict {
            check_status: CheckStatus::Error,
            error_code: None,
            error_description: Some(
                first_line(&output.stderr)
                    .unwrap_or("check reported an error without an error code")
                    .to_string(),
            ),
            actual_data: None,
        },
        CheckStatus::Operator => Verdict {
            check_status: CheckStatus::Operator,
            error_code: None,
            error_description: Some("manual review required".into()),
            actual_data: None,
        },
    }
}

fn fallback(output: &ProcessorOutput) -> Verdict {
    if output.exit_code == 0 {
        return Verdict::passed();
    }

    let stderr = output.stderr.to_lowercase();
    if CRITICAL_STDERR.iter().any(|p| stderr.contains(p)) {
        let detail = first_line(&output.stderr).unwrap_or_default();
        return Verdict::from_code(ErrorCode::ProcessorFailed)
            .with_description(format!("{}: {detail}", ErrorCode::ProcessorFailed.description()));
    }

    Verdict {
        check_status: CheckStatus::Failed,
        error_code: None,
        error_description: Some(format!("check exited with status {}", output.exit_code)),
        actual_data: None,
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(exit_code: i32, stdout: &str, stderr: &str) -> ProcessorOutput {
        ProcessorOutput {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    #[test]
    fn taxonomy_exit_code_is_authoritative() {
        let v = resolve_status(&out(42, "Passed\nVIGIL_STATUS: 0\n", ""));
        assert_eq!(v.check_status, CheckStatus::Failed);
        assert_eq!(v.error_code, Some(ErrorCode::ConfigMissing));
        assert!(v.error_description.is_some());
    }

    #[test]
    fn technical_exit_code_is_error() {
        let v = resolve_status(&out(21, "", ""));
        assert_eq!(v.check_status, CheckStatus::Error);
        assert_eq!(v.error_code, Some(ErrorCode::FileNotFound));
    }

    #[test]
    fn timeout_wins_over_everything() {
        let mut o = out(0, "Passed", "");
        o.timed_out = true;
        let v = resolve_status(&o);
        assert_eq!(v.error_code, Some(ErrorCode::ProcessorTimeout));
        assert_eq!(v.check_status, CheckStatus::Error);
    }

    #[test]
    fn status_line_carries_codes_beyond_exit_range() {
        let v = resolve_status(&out(1, "checking...\nVIGIL_STATUS: 44\nPassed\n", ""));
        assert_eq!(v.error_code, Some(ErrorCode::PolicyNotApplied));
        assert_eq!(v.check_status, CheckStatus::Failed);

        let v = resolve_status(&out(1, "VIGIL_STATUS: 0\n", ""));
        assert_eq!(v.check_status, CheckStatus::Passed);
    }

    #[test]
    fn malformed_status_line_is_invalid_output() {
        let v = resolve_status(&out(0, "VIGIL_STATUS: 99\n", ""));
        assert_eq!(v.error_code, Some(ErrorCode::ProcessorOutputInvalid));
        assert_eq!(v.check_status, CheckStatus::Error);
    }

    #[test]
    fn embedded_code_forms() {
        for text in ["error_code=43", "Code: 43", "[E43] bad value"] {
            let v = resolve_status(&out(1, text, ""));
            assert_eq!(v.error_code, Some(ErrorCode::ConfigInvalid), "{text}");
        }
    }

    #[test]
    fn codes_on_stderr_are_not_results() {
        // A diagnostic mentioning a code must not override the exit status.
        let v = resolve_status(&out(1, "", "warning: code: 43 deprecated"));
        assert_eq!(v.check_status, CheckStatus::Failed);
        assert_eq!(v.error_code, None);
    }

    #[test]
    fn non_catalog_embedded_code_is_ignored() {
        let v = resolve_status(&out(0, "code: 99", ""));
        assert_eq!(v.check_status, CheckStatus::Passed);
        assert_eq!(v.error_code, None);
    }

    #[test]
    fn last_keyword_line_wins() {
        let v = resolve_status(&out(0, "Failed\nretrying\nPassed\n", ""));
        assert_eq!(v.check_status, CheckStatus::Passed);
        let v = resolve_status(&out(0, "status: passed\nstatus: failed\n", ""));
        assert_eq!(v.check_status, CheckStatus::Failed);
    }

    #[test]
    fn keyword_inside_a_sentence_does_not_count() {
        let v = resolve_status(&out(0, "no checks failed here", ""));
        assert_eq!(v.check_status, CheckStatus::Passed);
    }

    #[test]
    fn russian_keywords() {
        assert_eq!(
            resolve_status(&out(0, "Не пройдено\n", "")).check_status,
            CheckStatus::Failed
        );
        assert_eq!(
            resolve_status(&out(1, "Статус: Пройдено\n", "")).check_status,
            CheckStatus::Passed
        );
    }

    #[test]
    fn failed_keyword_gets_fallback_description() {
        let v = resolve_status(&out(0, "Failed\n", ""));
        assert_eq!(v.check_status, CheckStatus::Failed);
        assert_eq!(v.error_code, None);
        assert!(v.error_description.is_some());
    }

    #[test]
    fn operator_keyword() {
        let v = resolve_status(&out(0, "Operator", ""));
        assert_eq!(v.check_status, CheckStatus::Operator);
    }

    #[test]
    fn clean_exit_without_signal_passes() {
        let v = resolve_status(&out(0, "PermitRootLogin no\n", ""));
        assert_eq!(v, Verdict::passed());
    }

    #[test]
    fn critical_stderr_is_processor_failure() {
        let v = resolve_status(&out(2, "", "processor.sh: line 3: syntax error near `fi'"));
        assert_eq!(v.error_code, Some(ErrorCode::ProcessorFailed));
        assert_eq!(v.check_status, CheckStatus::Error);
    }

    #[test]
    fn plain_nonzero_is_failed_with_description() {
        let v = resolve_status(&out(1, "", ""));
        assert_eq!(v.check_status, CheckStatus::Failed);
        assert_eq!(v.error_description.as_deref(), Some("check exited with status 1"));
    }
}
