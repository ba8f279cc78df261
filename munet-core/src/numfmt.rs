//! `number64` suffix parsing, shared by the Traffic-Control Applier and any
//! other config field expressed as a human-scaled size (§4.7).
//!
//! Accepts `<number>[K|M|G|T|P|E][i]`, case-insensitive on the unit letter,
//! with an optional trailing `bit`/`bps`/`b` unit-of-measure suffix (all
//! common in `tc`-style configs). The result is always normalised to
//! **bytes**, matching `tc`'s own convention: `bit` denotes a bits-per-
//! second quantity and is divided by 8; `bps` and a bare `b` already
//! denote bytes and pass through unscaled.

use crate::error::MunetError;

/// Parse a `number64` string into a plain `u64`, normalised to bytes.
///
/// Examples: `"10M"` -> 10_000_000, `"1Gi"` -> 1_073_741_824, `"500kbit"` ->
/// 62_500, `"500kbps"` -> 500_000, `"42"` -> 42.
pub fn parse_number64(input: &str) -> Result<u64, MunetError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(MunetError::Internal(format!(
            "empty number64 value {input:?}"
        )));
    }

    let (bare, is_bits) = strip_unit_noise(s);
    let digits_end = bare
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(bare.len());
    let (number_part, suffix) = bare.split_at(digits_end);

    let value: f64 = number_part
        .parse()
        .map_err(|_| MunetError::Internal(format!("invalid number64 value {input:?}")))?;

    let multiplier = parse_multiplier(suffix)
        .ok_or_else(|| MunetError::Internal(format!("invalid number64 suffix in {input:?}")))?;

    let bytes = value * multiplier as f64;
    let bytes = if is_bits { bytes / 8.0 } else { bytes };
    Ok(bytes.round() as u64)
}

/// Strip a trailing `bit`/`bps`/`b` unit-of-measure suffix, case-insensitively,
/// leaving only the magnitude letter (K/M/G/T/P/E) and optional `i`. Returns
/// whether the stripped suffix denoted a bits-per-second quantity (`bit`
/// only — `tc`'s own `bps` unit, despite the name, already means bytes per
/// second) as opposed to bytes (`bps`, `b`, or no unit-of-measure suffix).
fn strip_unit_noise(s: &str) -> (&str, bool) {
    for (noise, is_bits) in [("bit", true), ("bps", false), ("b", false)] {
        if s.len() > noise.len() {
            let (head, tail) = s.split_at(s.len() - noise.len());
            if tail.eq_ignore_ascii_case(noise) {
                return (head, is_bits);
            }
        }
    }
    (s, false)
}

fn parse_multiplier(suffix: &str) -> Option<u64> {
    if suffix.is_empty() {
        return Some(1);
    }
    let mut chars = suffix.chars();
    let unit = chars.next()?.to_ascii_uppercase();
    let rest: String = chars.collect();
    let binary = rest.eq_ignore_ascii_case("i");
    if !rest.is_empty() && !binary {
        return None;
    }

    let base: u64 = if binary { 1024 } else { 1000 };
    let exp = match unit {
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        'P' => 5,
        'E' => 6,
        _ => return None,
    };
    Some(base.pow(exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_integer() {
        assert_eq!(parse_number64("42").unwrap(), 42);
    }

    #[test]
    fn decimal_multipliers() {
        assert_eq!(parse_number64("10K").unwrap(), 10_000);
        assert_eq!(parse_number64("10M").unwrap(), 10_000_000);
        assert_eq!(parse_number64("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn binary_multipliers() {
        assert_eq!(parse_number64("1Ki").unwrap(), 1024);
        assert_eq!(parse_number64("1Mi").unwrap(), 1024 * 1024);
        assert_eq!(parse_number64("1Gi").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn bit_suffix_is_divided_by_8_into_bytes() {
        assert_eq!(parse_number64("500kbit").unwrap(), 62_500);
        assert_eq!(parse_number64("10mbit").unwrap(), 1_250_000);
    }

    #[test]
    fn byte_suffixes_pass_through_unscaled() {
        // `tc`'s own `bps` unit already means bytes/sec despite the name.
        assert_eq!(parse_number64("10mbps").unwrap(), 10_000_000);
        assert_eq!(parse_number64("500kb").unwrap(), 500_000);
        assert_eq!(parse_number64("10mb").unwrap(), 10_000_000);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(parse_number64("10m").unwrap(), parse_number64("10M").unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_number64("").is_err());
        assert!(parse_number64("abc").is_err());
        assert!(parse_number64("10X").is_err());
    }
}
