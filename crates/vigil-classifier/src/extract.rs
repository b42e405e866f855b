//! Pull the audited host's actual setting out of raw output.
//!
//! Reference text names the expected configuration (`PermitRootLogin no`,
//! `PASS_MAX_DAYS=90`). Every word of it is a candidate key; output lines of
//! the form `key = value`, `key: value` or `key value` whose key is a
//! candidate are reported. Active lines beat commented-out ones.

use std::collections::HashSet;

const COMMENT_PREFIXES: &[&str] = &["#", ";", "//"];

/// Reference-derived setting lines found in `raw_output`, newline-joined.
pub fn extract_actual(raw_output: &str, reference: &str) -> Option<String> {
    let keys = candidate_keys(reference);
    if keys.is_empty() {
        return None;
    }

    let mut active = Vec::new();
    let mut commented = Vec::new();

    for line in raw_output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (body, is_comment) = strip_comment(line);
        let Some(key) = setting_key(body) else {
            continue;
        };
        if !keys.contains(&key.to_lowercase()) {
            continue;
        }
        if is_comment {
            commented.push(line);
        } else {
            active.push(line);
        }
    }

    let chosen = if active.is_empty() { commented } else { active };
    if chosen.is_empty() {
        None
    } else {
        Some(chosen.join("\n"))
    }
}

fn candidate_keys(reference: &str) -> HashSet<String> {
    reference
        .split(|c: char| c == ',' || c == '=' || c == ':' || c.is_whitespace())
        .map(str::trim)
        // Values such as "no" or "90" are not useful as keys.
        .filter(|t| t.len() > 2 && t.chars().any(char::is_alphabetic))
        .map(str::to_lowercase)
        .collect()
}

fn strip_comment(line: &str) -> (&str, bool) {
    for prefix in COMMENT_PREFIXES {
        if let Some(rest) = line.strip_prefix(prefix) {
            return (rest.trim_start_matches(prefix).trim_start(), true);
        }
    }
    (line, false)
}

/// Key of a `key = value` / `key: value` / `key value` line; `None` when
/// there is no value.
fn setting_key(body: &str) -> Option<&str> {
    let split_at = body.find(|c: char| c == '=' || c == ':' || c.is_whitespace())?;
    let key = body[..split_at].trim();
    let value = body[split_at..]
        .trim_start_matches(|c: char| c == '=' || c == ':' || c.is_whitespace())
        .trim();
    if key.is_empty() || value.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSHD: &str = "\
# PermitRootLogin prohibit-password
PermitRootLogin yes
PasswordAuthentication no
";

    #[test]
    fn active_line_preferred_over_comment() {
        assert_eq!(
            extract_actual(SSHD, "PermitRootLogin no").as_deref(),
            Some("PermitRootLogin yes")
        );
    }

    #[test]
    fn commented_line_used_when_nothing_active() {
        let out = "#MaxAuthTries 6\nPort 22\n";
        assert_eq!(
            extract_actual(out, "MaxAuthTries 4").as_deref(),
            Some("#MaxAuthTries 6")
        );
    }

    #[test]
    fn separators_and_multiple_keys() {
        let out = "PASS_MAX_DAYS=99999\nPASS_MIN_DAYS: 0\nUMASK 022\n";
        let got = extract_actual(out, "PASS_MAX_DAYS=90, PASS_MIN_DAYS=7").unwrap();
        assert_eq!(got, "PASS_MAX_DAYS=99999\nPASS_MIN_DAYS: 0");
    }

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(
            extract_actual("permitrootlogin yes", "PermitRootLogin no").as_deref(),
            Some("permitrootlogin yes")
        );
    }

    #[test]
    fn nothing_matching_yields_none() {
        assert_eq!(extract_actual(SSHD, "X11Forwarding no"), None);
        assert_eq!(extract_actual(SSHD, "no"), None);
        assert_eq!(extract_actual("PermitRootLogin", "PermitRootLogin no"), None);
    }
}
