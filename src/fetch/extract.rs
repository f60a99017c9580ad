// src/fetch/extract.rs
use once_cell::sync::OnceCell;
use regex::Regex;

/// Label the district pages print ahead of the daily count.
pub const DEFAULT_CASES_PATTERN: &str =
    r"Positive COVID-19 Cases Reported Since Previous School Day:\s+(\d+)";

pub fn default_pattern() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(DEFAULT_CASES_PATTERN).expect("default cases pattern compiles"))
}

/// Compile a user-supplied pattern; it must have exactly one capture group.
pub fn compile_pattern(pattern: &str) -> anyhow::Result<Regex> {
    let re = Regex::new(pattern)?;
    // captures_len counts the implicit whole-match group
    if re.captures_len() != 2 {
        anyhow::bail!(
            "pattern must have exactly one capture group, found {}",
            re.captures_len() - 1
        );
    }
    Ok(re)
}

/// First match's capture as a count. Every character must be a decimal digit
/// (any script); the value must fit in `u64`.
pub fn extract_count(content: &str, re: &Regex) -> Option<u64> {
    let caps = re.captures(content)?;
    let digits = caps.get(1)?.as_str();
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0u64, |acc, c| {
        acc.checked_mul(10)?.checked_add(u64::from(digit_value(c)?))
    })
}

/// Value of a Unicode decimal digit (`Nd`). Each script's digits are encoded
/// as consecutive runs of ten starting at zero.
fn digit_value(c: char) -> Option<u32> {
    if let Some(d) = c.to_digit(10) {
        return Some(d);
    }
    static ND: OnceCell<Regex> = OnceCell::new();
    let nd = ND.get_or_init(|| Regex::new(r"^\p{Nd}$").expect("decimal digit class compiles"));
    let is_nd = |cp: u32| char::from_u32(cp).is_some_and(|ch| nd.is_match(ch.encode_utf8(&mut [0; 4])));

    let cp = u32::from(c);
    if !is_nd(cp) {
        return None;
    }
    let mut start = cp;
    while start > 0 && is_nd(start - 1) {
        start -= 1;
    }
    Some((cp - start) % 10)
}
