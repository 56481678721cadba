//! Range-query response decoding.
//!
//! The API answers with JSON whose payload is itself JSON-encoded text:
//! the body decodes to a string, and that string decodes to
//! `{"data": {"result": [{"metric": {...}, "values": [[ts, "v"], ...]}]}}`.
//! Bodies that are already a plain object are accepted as well.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::client::{FetchError, FetchResponse};

/// Sample value as sent by the API, normally a decimal string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    Number(f64),
}

impl RawValue {
    /// Float value read the way `parseFloat` reads it: the longest decimal
    /// prefix counts, and a value with no numeric prefix is NaN.
    pub fn parse_float(&self) -> f64 {
        match self {
            RawValue::Text(s) => parse_float(s),
            RawValue::Number(n) => *n,
        }
    }

    /// Leading integer of the value, as `parseInt` reads it.
    pub fn parse_int(&self) -> Option<i64> {
        match self {
            RawValue::Text(s) => parse_int_prefix(s),
            RawValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
            RawValue::Number(_) => None,
        }
    }
}

/// `[timestamp_seconds, value]` pair.
pub type RawSample = (f64, RawValue);

/// One series from `data.result`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RangeResult {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    #[serde(default)]
    pub values: Vec<RawSample>,
}

impl RangeResult {
    /// The `__name__` label, used as the series name.
    pub fn name(&self) -> Option<String> {
        self.metric.get("__name__").cloned()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    result: Vec<RangeResult>,
}

/// A successfully fetched body, reduced to the series that will be shown.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Last entry of a non-empty `data.result`.
    Series(RangeResult),
    /// `data.result` was empty.
    Empty,
    /// Body did not decode to the expected envelope.
    Malformed(String),
}

impl Decoded {
    /// The result to fold into state. Empty and malformed bodies become a
    /// result with no samples, which renders as a gap.
    pub fn into_result(self) -> RangeResult {
        match self {
            Decoded::Series(result) => result,
            Decoded::Empty | Decoded::Malformed(_) => RangeResult::default(),
        }
    }
}

/// Accept or reject a fetched response.
///
/// Non-success statuses are returned as errors and must not touch state.
pub fn parse_response(response: &FetchResponse) -> Result<Decoded, FetchError> {
    if !(200..300).contains(&response.status) {
        return Err(FetchError::Status(response.status));
    }
    Ok(decode_body(&response.body))
}

/// Decode a (possibly double-encoded) range-query body.
///
/// When the API returns several series for one query only the last is kept.
pub fn decode_body(body: &str) -> Decoded {
    let outer: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return Decoded::Malformed(format!("invalid JSON body: {}", e)),
    };

    let payload = match outer {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(v) => v,
            Err(e) => return Decoded::Malformed(format!("invalid JSON payload: {}", e)),
        },
        other => other,
    };

    match serde_json::from_value::<Envelope>(payload) {
        Ok(mut envelope) => match envelope.data.result.pop() {
            Some(result) => Decoded::Series(result),
            None => Decoded::Empty,
        },
        Err(e) => Decoded::Malformed(format!("unexpected payload shape: {}", e)),
    }
}

/// Parse the leading `[+-]digits[.digits][e[+-]digits]` of `s`, or a leading
/// `Infinity`. `"12.5abc"` reads as `12.5`; `"+Inf"` and `"NaN"` read as NaN.
fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let sign_len = match bytes.first() {
        Some(b'+') | Some(b'-') => 1,
        _ => 0,
    };

    if s[sign_len..].starts_with("Infinity") {
        return if bytes.first() == Some(&b'-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    let digits_from = |start: usize| {
        bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = sign_len;
    let int_digits = digits_from(end);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits_from(end + 1);
        end += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return f64::NAN;
    }

    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let exp_digits = digits_from(exp);
        if exp_digits > 0 {
            end = exp + exp_digits;
        }
    }

    s[..end].parse::<f64>().unwrap_or(f64::NAN)
}

/// Parse the leading `[+-]digits` of `s`, ignoring leading whitespace and
/// anything after the digits. `"1545328800.5"` reads as `1545328800`.
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
