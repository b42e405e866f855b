//! Bounded output storage.
//!
//! Check commands occasionally dump whole files. Stored output keeps the head
//! (what was run) and the tail (where the verdict usually is) and drops the
//! middle.

/// Keep at most `max_chars` characters of `output`, eliding the middle.
pub fn truncate_middle(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let keep_head = max_chars / 2;
    let keep_tail = max_chars - keep_head;

    // Byte offsets of the cut points, always on char boundaries.
    let head_end = output
        .char_indices()
        .nth(keep_head)
        .map(|(i, _)| i)
        .unwrap_or(output.len());
    let tail_start = output
        .char_indices()
        .nth(total - keep_tail)
        .map(|(i, _)| i)
        .unwrap_or(output.len());

    format!(
        "{}\n[... {} characters omitted ...]\n{}",
        &output[..head_end],
        total - max_chars,
        &output[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_budget_is_unchanged() {
        assert_eq!(truncate_middle("PermitRootLogin no", 100), "PermitRootLogin no");
        assert_eq!(truncate_middle("", 0), "");
    }

    #[test]
    fn keeps_head_and_tail() {
        let input = format!("{}{}{}", "H".repeat(10), "m".repeat(100), "T".repeat(10));
        let out = truncate_middle(&input, 20);
        assert!(out.starts_with(&"H".repeat(10)));
        assert!(out.ends_with(&"T".repeat(10)));
        assert!(out.contains("100 characters omitted"));
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let input = "пароль".repeat(1_000);
        let out = truncate_middle(&input, 11);
        assert!(out.contains("characters omitted"));
    }
}
