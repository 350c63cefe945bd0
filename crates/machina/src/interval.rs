//! Interval-string grammar: `<integer><unit>` tokens, concatenated or
//! whitespace-separated, summed to seconds (§4.1/§6).
//!
//! Units: `d` (86400), `h` (3600), `m` (60), `s` (1), `ms` (0.001).
//! `"ms"` is tried before `"m"` in the alternation below so a 1-char unit
//! never swallows the first letter of a 2-char one — the `regex` crate's
//! leftmost-first alternation semantics make that ordering sufficient.

use crate::error::MachinaError;
use regex::Regex;
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(ms|d|h|m|s)").expect("static interval token regex"))
}

/// Parse an interval string such as `"1d12h35m59s500ms"` into seconds.
///
/// # Errors
///
/// Returns [`MachinaError::InvalidInterval`] if the input is empty, contains
/// characters that are not part of a valid token (once whitespace is
/// stripped), or has a dangling suffix after the last recognised token.
pub fn interval_to_seconds(input: &str) -> Result<f64, MachinaError> {
    let stripped: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() {
        return Err(MachinaError::InvalidInterval(
            "interval string must not be empty".to_string(),
        ));
    }

    let mut total = 0.0f64;
    let mut consumed = 0usize;
    for caps in token_re().captures_iter(&stripped) {
        let whole = caps.get(0).expect("group 0 always matches");
        if whole.start() != consumed {
            return Err(MachinaError::InvalidInterval(format!(
                "unrecognised characters at byte {consumed} in {stripped:?}"
            )));
        }
        consumed = whole.end();

        let count: u64 = caps[1].parse().map_err(|_| {
            MachinaError::InvalidInterval(format!("integer overflow in {stripped:?}"))
        })?;
        let factor = match &caps[2] {
            "d" => 86_400.0,
            "h" => 3_600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            other => unreachable!("unit alternation only matches known units, got {other}"),
        };
        total += count as f64 * factor;
    }

    if consumed != stripped.len() {
        return Err(MachinaError::InvalidInterval(format!(
            "trailing unrecognised characters in {stripped:?}"
        )));
    }

    Ok(total)
}

/// Parse an interval string into a [`std::time::Duration`].
///
/// Sub-millisecond precision in the input (e.g. fractional seconds from
/// the `ms` factor) rounds to the nearest nanosecond, matching
/// `Duration::from_secs_f64`'s behavior.
pub fn interval_to_duration(input: &str) -> Result<std::time::Duration, MachinaError> {
    interval_to_seconds(input).map(std::time::Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(interval_to_seconds("1d").unwrap(), 86_400.0);
        assert_eq!(interval_to_seconds("1h").unwrap(), 3_600.0);
        assert_eq!(interval_to_seconds("1m").unwrap(), 60.0);
        assert_eq!(interval_to_seconds("1s").unwrap(), 1.0);
        assert_eq!(interval_to_seconds("1000ms").unwrap(), 1.0);
    }

    #[test]
    fn whitespace_separated_and_zero_tokens() {
        assert_eq!(interval_to_seconds("0d 0m 10s").unwrap(), 10.0);
    }

    #[test]
    fn concatenated_mixed_units() {
        assert_eq!(
            interval_to_seconds("1d12h35m59s500ms").unwrap(),
            131_759.5
        );
    }

    #[test]
    fn empty_string_is_an_error() {
        assert!(interval_to_seconds("").is_err());
        assert!(interval_to_seconds("   ").is_err());
    }

    #[test]
    fn unknown_unit_is_rejected() {
        assert!(interval_to_seconds("1y").is_err());
        assert!(interval_to_seconds("5").is_err());
    }

    #[test]
    fn additive_round_trip() {
        // parse(a + b) == parse(a) + parse(b), for concatenation of valid tokens.
        let a = "2h30m";
        let b = "45s";
        let combined = format!("{a}{b}");
        let sum = interval_to_seconds(a).unwrap() + interval_to_seconds(b).unwrap();
        assert_eq!(interval_to_seconds(&combined).unwrap(), sum);
    }

    #[test]
    fn duration_conversion() {
        let d = interval_to_duration("1s500ms").unwrap();
        assert_eq!(d, std::time::Duration::from_millis(1500));
    }
}
