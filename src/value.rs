//! Tagged scalar values and their coercion to declared field kinds.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::FieldKind;

/// A single field value carried by a [`Record`](crate::Record)
///
/// Values read from files arrive as `String` or `Null`; [`coerce`] turns them
/// into the typed variants the target field expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::String(value.into())
    }

    /// `Null` and the empty string both count as "no value".
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Borrow the text of a non-empty string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::String).unwrap_or(FieldValue::Null)
    }
}

const FALSE_WORDS: [&str; 6] = ["no", "false", "n", "f", "0", ""];
const TRUE_WORDS: [&str; 5] = ["yes", "true", "y", "t", "1"];

/// Coerce a value to the representation expected by a field of `kind`.
///
/// Total over the supported kinds. Booleans treat a blank value as `false`;
/// every other kind maps blanks to `Null`. The error is a human-readable
/// reason, reported against the record that carried the value.
pub fn coerce(value: FieldValue, kind: FieldKind) -> Result<FieldValue, String> {
    if kind == FieldKind::Boolean {
        return coerce_bool(value);
    }

    if value.is_blank() {
        return Ok(FieldValue::Null);
    }

    match kind {
        FieldKind::Id | FieldKind::Reference | FieldKind::String | FieldKind::Picklist | FieldKind::Textarea => {
            Ok(FieldValue::String(value.to_string()))
        }
        FieldKind::Int => match value {
            FieldValue::Int(i) => Ok(FieldValue::Int(i)),
            FieldValue::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Ok(FieldValue::Int(f as i64))
            }
            other => {
                let text = other.to_string();
                text.trim()
                    .parse::<i64>()
                    .map(FieldValue::Int)
                    .map_err(|_| format!("Invalid integer value {}", text))
            }
        },
        FieldKind::Double => match value {
            FieldValue::Float(f) => Ok(FieldValue::Float(f)),
            FieldValue::Int(i) => Ok(FieldValue::Float(i as f64)),
            other => {
                let text = other.to_string();
                text.trim()
                    .parse::<f64>()
                    .map(FieldValue::Float)
                    .map_err(|_| format!("Invalid number value {}", text))
            }
        },
        FieldKind::Date => match value {
            FieldValue::Date(d) => Ok(FieldValue::Date(d)),
            other => {
                let text = other.to_string();
                NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                    .map(FieldValue::Date)
                    .map_err(|_| format!("Invalid date value {}", text))
            }
        },
        FieldKind::DateTime => match value {
            FieldValue::DateTime(dt) => Ok(FieldValue::DateTime(dt)),
            other => {
                let text = other.to_string();
                parse_datetime(text.trim())
                    .map(FieldValue::DateTime)
                    .ok_or_else(|| format!("Invalid date/time value {}", text))
            }
        },
        FieldKind::Boolean => coerce_bool(value),
        FieldKind::Base64 | FieldKind::Location | FieldKind::Address | FieldKind::AnyType => {
            Err(format!("Values of kind {} cannot be loaded", kind))
        }
    }
}

fn coerce_bool(value: FieldValue) -> Result<FieldValue, String> {
    match value {
        FieldValue::Null => Ok(FieldValue::Bool(false)),
        FieldValue::Bool(b) => Ok(FieldValue::Bool(b)),
        FieldValue::Int(0) => Ok(FieldValue::Bool(false)),
        FieldValue::Int(1) => Ok(FieldValue::Bool(true)),
        other => {
            let text = other.to_string().to_lowercase();
            if FALSE_WORDS.contains(&text.as_str()) {
                Ok(FieldValue::Bool(false))
            } else if TRUE_WORDS.contains(&text.as_str()) {
                Ok(FieldValue::Bool(true))
            } else {
                Err(format!("Invalid Boolean value {}", other))
            }
        }
    }
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
