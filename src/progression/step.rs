//! Step label parsing.
//!
//! Curriculum steps are labelled `Step <N>`. Labels are matched
//! case-insensitively and may be embedded in a longer label such as
//! `TRAINING - Step 7 Conversation`; the first `Step <N>` occurrence wins.

const STEP_WORD: &str = "step";

/// Every fifth step is a jump step.
pub const JUMP_INTERVAL: u32 = 5;

/// Finds the first `Step <N>` occurrence in `label` and returns `N`.
pub fn parse_step_number(label: &str) -> Option<u32> {
    let lower = label.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    for (start, _) in lower.match_indices(STEP_WORD) {
        // "footstep 3" is not a step label.
        if start > 0 && bytes[start - 1].is_ascii_alphanumeric() {
            continue;
        }
        if let Some((n, _)) = number_after(&lower[start + STEP_WORD.len()..]) {
            return Some(n);
        }
    }
    None
}

/// Returns `N` only when the whole (trimmed) label is exactly `Step <N>`.
pub fn exact_step_number(label: &str) -> Option<u32> {
    let t = label.trim();
    let head = t.get(..STEP_WORD.len())?;
    if !head.eq_ignore_ascii_case(STEP_WORD) {
        return None;
    }
    match number_after(&t[STEP_WORD.len()..]) {
        Some((n, rest)) if rest.is_empty() => Some(n),
        _ => None,
    }
}

pub fn is_jump_step(label: &str) -> bool {
    matches!(parse_step_number(label), Some(n) if n > 0 && n % JUMP_INTERVAL == 0)
}

pub fn next_step_label(label: &str) -> Option<String> {
    let n = parse_step_number(label)?;
    Some(format!("Step {}", n.checked_add(1)?))
}

/// Parses `<whitespace>+<digits>+` and returns the number plus the remainder.
fn number_after(s: &str) -> Option<(u32, &str)> {
    let digits_start = s.len() - s.trim_start().len();
    if digits_start == 0 {
        return None;
    }
    let rest = &s[digits_start..];
    let digits_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    let n = rest[..digits_len].parse::<u32>().ok()?;
    Some((n, &rest[digits_len..]))
}
