//! Shared JSON leaf-walking helpers used by the mutating strategies.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DATE_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Visit every scalar leaf of a JSON document, depth first, in document
/// order. Keys are never added or removed, so the structure is preserved.
pub fn visit_leaves(value: &mut Value, f: &mut dyn FnMut(&mut Value)) {
    match value {
        Value::Object(map) => {
            for (_, child) in map.iter_mut() {
                visit_leaves(child, f);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                visit_leaves(child, f);
            }
        }
        leaf => f(leaf),
    }
}

/// Visit every object entry `(key, value)` in the document, depth first.
pub fn visit_fields(value: &mut Value, f: &mut dyn FnMut(&str, &mut Value)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if child.is_object() || child.is_array() {
                    visit_fields(child, f);
                } else {
                    f(key, child);
                }
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                visit_fields(child, f);
            }
        }
        _ => {}
    }
}

/// Whether a string leaf looks like an ISO date (`YYYY-MM-DD` prefix).
pub fn is_date_string(s: &str) -> bool {
    DATE_PREFIX_RE.is_match(s) && parse_date_prefix(s).is_some()
}

fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    let prefix = s.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Shift the date prefix of a string leaf by `days`, keeping any trailing
/// time component untouched. Returns `None` when the string is not a date.
pub fn shift_date_string(s: &str, days: i64) -> Option<String> {
    let date = parse_date_prefix(s)?;
    let shifted = date.checked_add_signed(Duration::days(days))?;
    let suffix = s.get(10..).unwrap_or_default();
    Some(format!("{}{}", shifted.format("%Y-%m-%d"), suffix))
}

/// Multiply a JSON number in place, preserving integer-ness.
pub fn scale_number(value: &mut Value, factor: f64) {
    let Some(n) = value.as_f64() else {
        return;
    };
    if value.as_i64().is_some() {
        let scaled = (n * factor).round() as i64;
        *value = Value::from(scaled);
    } else {
        *value = Value::from(n * factor);
    }
}

/// Negate a JSON number in place.
pub fn negate_number(value: &mut Value) {
    if let Some(i) = value.as_i64() {
        *value = Value::from(-i);
    } else if let Some(f) = value.as_f64() {
        *value = Value::from(-f);
    }
}
