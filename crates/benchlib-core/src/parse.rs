//! Response parsing helpers.
//!
//! SCPI responses are ASCII: numbers in NR1/NR2/NR3 form (`+2.35000000E+03`),
//! booleans as `1`/`0` or `ON`/`OFF`, strings optionally quoted, and
//! multi-value responses comma separated. Drivers trim and parse with these
//! helpers; any failure is a [`Error::MalformedResponse`] carrying the
//! offending payload.

use crate::error::{Error, Result};

/// SCPI "not a number" / overload sentinel.
///
/// Instruments return 9.9E37 when a measurement could not be made (open
/// input, overload, no signal).
const SCPI_INVALID: f64 = 9.9e37;

/// Parse a floating point response.
pub fn parse_f64(response: &str) -> Result<f64> {
    let s = response.trim();
    let value: f64 = s
        .parse()
        .map_err(|_| Error::malformed(s, "expected a number"))?;
    if !value.is_finite() || value.abs() >= SCPI_INVALID {
        return Err(Error::malformed(s, "instrument reported an invalid measurement"));
    }
    Ok(value)
}

/// Parse an integer response.
///
/// Accepts integers in NR2/NR3 form (`+1.0E+01`) as long as the value has
/// no fractional part.
pub fn parse_i64(response: &str) -> Result<i64> {
    let s = response.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    let f = parse_f64(s)?;
    if f.fract() != 0.0 || f.abs() > i64::MAX as f64 {
        return Err(Error::malformed(s, "expected an integer"));
    }
    Ok(f as i64)
}

/// Parse a boolean response (`1`/`0`/`ON`/`OFF`, case-insensitive).
pub fn parse_bool(response: &str) -> Result<bool> {
    let s = response.trim();
    match s.to_uppercase().as_str() {
        "1" | "ON" | "+1" => Ok(true),
        "0" | "OFF" | "+0" => Ok(false),
        _ => Err(Error::malformed(s, "expected a boolean")),
    }
}

/// Split a comma-separated response into trimmed fields.
///
/// Commas inside double-quoted strings do not split.
pub fn split_fields(response: &str) -> Vec<&str> {
    let s = response.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(s[start..].trim());
    fields
}

/// Strip one level of surrounding double or single quotes.
pub fn unquote(response: &str) -> &str {
    let s = response.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Parse a SCPI error queue entry such as `-113,"Undefined header"`.
///
/// Returns the code and the unquoted message.
pub fn parse_error_entry(response: &str) -> Result<(i32, String)> {
    let s = response.trim();
    let (code, message) = s
        .split_once(',')
        .ok_or_else(|| Error::malformed(s, "expected <code>,<message>"))?;
    let code = parse_i64(code)?;
    let code = i32::try_from(code).map_err(|_| Error::malformed(s, "error code out of range"))?;
    Ok((code, unquote(message).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_nr3() {
        assert_eq!(parse_f64("+2.35000000E+03\n").unwrap(), 2350.0);
        assert_eq!(parse_f64(" -1.5 ").unwrap(), -1.5);
        assert_eq!(parse_f64("1e-3").unwrap(), 0.001);
    }

    #[test]
    fn parse_f64_rejects_garbage() {
        let err = parse_f64("VOLT").unwrap_err();
        match err {
            Error::MalformedResponse { payload, .. } => assert_eq!(payload, "VOLT"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_f64_invalid_measurement_sentinel() {
        assert!(parse_f64("+9.90000000E+37").is_err());
        assert!(parse_f64("-9.9E37").is_err());
        assert!(parse_f64("NaN").is_err());
    }

    #[test]
    fn parse_i64_forms() {
        assert_eq!(parse_i64("5").unwrap(), 5);
        assert_eq!(parse_i64("+1.0E+01").unwrap(), 10);
        assert!(parse_i64("1.5").is_err());
    }

    #[test]
    fn parse_bool_forms() {
        assert!(parse_bool("1").unwrap());
        assert!(parse_bool("on").unwrap());
        assert!(!parse_bool("OFF\n").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("2").is_err());
    }

    #[test]
    fn split_fields_respects_quotes() {
        assert_eq!(split_fields("1, 2,3"), vec!["1", "2", "3"]);
        assert_eq!(
            split_fields("-113,\"Undefined header, really\""),
            vec!["-113", "\"Undefined header, really\""]
        );
        assert!(split_fields("  ").is_empty());
    }

    #[test]
    fn unquote_strips_once() {
        assert_eq!(unquote("\"VOLT\""), "VOLT");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("VOLT"), "VOLT");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn error_entry() {
        assert_eq!(
            parse_error_entry("+0,\"No error\"").unwrap(),
            (0, "No error".to_string())
        );
        assert_eq!(
            parse_error_entry("-113,\"Undefined header\"").unwrap(),
            (-113, "Undefined header".to_string())
        );
        assert!(parse_error_entry("garbage").is_err());
    }
}
