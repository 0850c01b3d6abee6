//! Built-in value operations.
//!
//! Operations are small text/number transformations declared in schema
//! documents. A rule's operation list is folded into a single value converter
//! with [`chain`].

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConvertError;
use crate::mapping::field::Converter;
use crate::value::Value;

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("Invalid year regex"));

/// All available value operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Remove leading and trailing whitespace
    Trim,

    Uppercase,

    Lowercase,

    /// Replace every match of a regex pattern
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },

    /// Left-pad to `length` characters
    PadStart {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Right-pad to `length` characters
    PadEnd {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// First run of four digits, as an integer
    ExtractYear,

    EnsurePrefix {
        value: String,
    },

    EnsureSuffix {
        value: String,
    },

    /// Lookup table
    Map {
        mapping: BTreeMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
        /// Used when nothing matches; otherwise the result is empty text
        #[serde(default)]
        default_unmapped: Option<String>,
    },

    Split {
        #[serde(default = "default_split_separator")]
        separator: String,
    },

    ToBoolean {
        #[serde(default = "default_true_values")]
        true_values: Vec<String>,
    },

    /// Integer from the digits of the value
    ToNumber,

    /// Character range starting at `start`
    Substring {
        start: usize,
        #[serde(default)]
        length: Option<usize>,
    },

    Alphanumeric,

    DigitsOnly,

    /// Parse with a chrono format; date-only formats give midnight
    ParseTimestamp {
        #[serde(default = "default_timestamp_format")]
        format: String,
    },
}

fn default_pad_char() -> String {
    "0".to_string()
}

fn default_split_separator() -> String {
    ",".to_string()
}

fn default_true_values() -> Vec<String> {
    ["true", "1", "yes", "oui", "o", "y"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Operation {
    /// Name as written in documents.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Trim => "trim",
            Operation::Uppercase => "uppercase",
            Operation::Lowercase => "lowercase",
            Operation::Replace { .. } => "replace",
            Operation::PadStart { .. } => "pad_start",
            Operation::PadEnd { .. } => "pad_end",
            Operation::ExtractYear => "extract_year",
            Operation::EnsurePrefix { .. } => "ensure_prefix",
            Operation::EnsureSuffix { .. } => "ensure_suffix",
            Operation::Map { .. } => "map",
            Operation::Split { .. } => "split",
            Operation::ToBoolean { .. } => "to_boolean",
            Operation::ToNumber => "to_number",
            Operation::Substring { .. } => "substring",
            Operation::Alphanumeric => "alphanumeric",
            Operation::DigitsOnly => "digits_only",
            Operation::ParseTimestamp { .. } => "parse_timestamp",
        }
    }

    /// Check parameters that can be wrong before any value is seen.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Operation::Replace { pattern, .. } => Regex::new(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid pattern '{}': {}", pattern, e)),
            Operation::PadStart { char, .. } | Operation::PadEnd { char, .. } if char.is_empty() => {
                Err("pad character can not be empty".to_string())
            }
            Operation::Split { separator } if separator.is_empty() => {
                Err("split separator can not be empty".to_string())
            }
            Operation::ParseTimestamp { format } if format.is_empty() => {
                Err("timestamp format can not be empty".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Apply this operation. Values with no text form pass through unchanged.
    pub fn apply(&self, value: Value) -> Result<Value, ConvertError> {
        let value = value.normalize();
        match self {
            Operation::ToBoolean { true_values } => return Ok(to_boolean(&value, true_values)),
            Operation::ToNumber => return Ok(to_number(value)),
            Operation::ExtractYear => return Ok(extract_year(&value)),
            _ => {}
        }
        let Some(text) = as_text(&value) else {
            return Ok(value);
        };
        let result = match self {
            Operation::Trim => Value::Text(text.trim().to_string()),
            Operation::Uppercase => Value::Text(text.to_uppercase()),
            Operation::Lowercase => Value::Text(text.to_lowercase()),
            Operation::Replace { pattern, value: replacement } => {
                let re = Regex::new(pattern).map_err(|e| ConvertError::msg(e.to_string()))?;
                Value::Text(re.replace_all(&text, replacement.as_str()).into_owned())
            }
            Operation::PadStart { length, char } => Value::Text(pad(&text, *length, char, true)),
            Operation::PadEnd { length, char } => Value::Text(pad(&text, *length, char, false)),
            Operation::EnsurePrefix { value: prefix } if !text.starts_with(prefix.as_str()) => {
                Value::Text(format!("{}{}", prefix, text))
            }
            Operation::EnsureSuffix { value: suffix } if !text.ends_with(suffix.as_str()) => {
                Value::Text(format!("{}{}", text, suffix))
            }
            Operation::EnsurePrefix { .. } | Operation::EnsureSuffix { .. } => Value::Text(text),
            Operation::Map {
                mapping,
                case_insensitive,
                default_unmapped,
            } => {
                let found = if *case_insensitive {
                    let key = text.to_lowercase();
                    mapping.iter().find(|(k, _)| k.to_lowercase() == key).map(|(_, v)| v)
                } else {
                    mapping.get(&text)
                };
                Value::Text(
                    found
                        .or(default_unmapped.as_ref())
                        .cloned()
                        .unwrap_or_default(),
                )
            }
            Operation::Split { separator } => Value::List(
                text.split(separator.as_str())
                    .map(|part| Value::Text(part.trim().to_string()))
                    .collect(),
            ),
            Operation::Substring { start, length } => {
                let chars = text.chars().skip(*start);
                Value::Text(match length {
                    Some(n) => chars.take(*n).collect(),
                    None => chars.collect(),
                })
            }
            Operation::Alphanumeric => {
                Value::Text(text.chars().filter(|c| c.is_alphanumeric()).collect())
            }
            Operation::DigitsOnly => {
                Value::Text(text.chars().filter(|c| c.is_ascii_digit()).collect())
            }
            Operation::ParseTimestamp { format } => Value::Timestamp(parse_timestamp(&text, format)?),
            Operation::ToBoolean { .. } | Operation::ToNumber | Operation::ExtractYear => value,
        };
        Ok(result)
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn pad(text: &str, length: usize, pad_char: &str, start: bool) -> String {
    let count = text.chars().count();
    if count >= length {
        return text.to_string();
    }
    let fill = pad_char.chars().next().unwrap_or('0');
    let padding: String = std::iter::repeat_n(fill, length - count).collect();
    if start {
        format!("{}{}", padding, text)
    } else {
        format!("{}{}", text, padding)
    }
}

fn extract_year(value: &Value) -> Value {
    if let Value::Timestamp(ts) = value {
        return Value::Integer(ts.year().into());
    }
    as_text(value)
        .and_then(|s| YEAR.find(&s).and_then(|m| m.as_str().parse::<i64>().ok()))
        .map(Value::Integer)
        .unwrap_or(Value::Null)
}

fn to_boolean(value: &Value, true_values: &[String]) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(*b),
        other => Value::Bool(
            as_text(other)
                .map(|s| {
                    let lower = s.trim().to_lowercase();
                    true_values.iter().any(|tv| tv.to_lowercase() == lower)
                })
                .unwrap_or(false),
        ),
    }
}

fn to_number(value: Value) -> Value {
    match value {
        Value::Integer(_) | Value::Float(_) => value,
        other => as_text(&other)
            .and_then(|s| {
                let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    return None;
                }
                let sign = if s.trim().starts_with('-') { "-" } else { "" };
                format!("{}{}", sign, digits).parse::<i64>().ok()
            })
            .map(Value::Integer)
            .unwrap_or(Value::Null),
    }
}

fn parse_timestamp(text: &str, format: &str) -> Result<NaiveDateTime, ConvertError> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, format)
        .or_else(|_| {
            NaiveDate::parse_from_str(text, format).map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| ConvertError::msg(format!("'{}' does not match '{}': {}", text, format, e)))
}

/// Fold an operation list into one value converter named after the chain.
pub fn chain(operations: Vec<Operation>) -> Converter {
    let name = operations
        .iter()
        .map(Operation::name)
        .collect::<Vec<_>>()
        .join("|");
    let doc = operations
        .iter()
        .map(|op| serde_json::to_string(op).unwrap_or_else(|_| op.name().to_string()))
        .collect::<Vec<_>>()
        .join("\n");
    Converter::value(name, move |value| {
        operations.iter().try_fold(value, |acc, op| op.apply(acc))
    })
    .with_doc(doc)
}

/// Human-readable table of the available operations.
pub fn operations_description() -> String {
    r#"Available value operations:

| Operation | Description | Parameters |
|-----------|-------------|------------|
| trim | Remove leading/trailing whitespace | - |
| uppercase | Convert to uppercase | - |
| lowercase | Convert to lowercase | - |
| replace | Regex pattern replacement | pattern: regex, value: replacement |
| pad_start | Pad text at start | length: target length, char: pad character (default "0") |
| pad_end | Pad text at end | length: target length, char: pad character (default "0") |
| extract_year | Extract 4-digit year | - |
| ensure_prefix | Add prefix if not present | value: prefix |
| ensure_suffix | Add suffix if not present | value: suffix |
| map | Lookup table | mapping: {source: target}, case_insensitive: bool, default_unmapped: text |
| split | Split into a list | separator (default ",") |
| to_boolean | Convert to boolean | true_values: list of truthy strings |
| to_number | Convert to integer | - |
| substring | Extract characters | start: index, length: optional length |
| alphanumeric | Keep only alphanumeric characters | - |
| digits_only | Keep only digits | - |
| parse_timestamp | Parse a date/time | format: chrono format (default "%Y-%m-%d %H:%M:%S") |

Example operations in JSON:
[
  {"type": "trim"},
  {"type": "replace", "pattern": "[-. ]", "value": ""},
  {"type": "map", "mapping": {"CA": "Composer", "A": "Author"}, "case_insensitive": true},
  {"type": "to_number"},
  {"type": "parse_timestamp", "format": "%d/%m/%Y"}
]"#
    .to_string()
}
