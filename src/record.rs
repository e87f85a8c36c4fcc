//! Typed records and the permissive coercion from raw CSV rows.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::Serialize;

use crate::schema::{FieldSchema, FieldType};

/// One CSV data line: column name to raw cell, in column order.
pub type RawRow = IndexMap<String, String>;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    /// Enum tag, kept verbatim even when not in the allowed set.
    Tag(String),
    /// `YYYY-MM` or `YYYY-MM-DD`; sorts correctly as a string.
    Date(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Tag(s) | Value::Date(s) => Some(s),
            Value::Integer(_) | Value::Float(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Render the value the way it is matched against filters and used as a key.
    pub fn to_key(&self) -> String {
        match self {
            Value::Integer(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::String(s) | Value::Tag(s) | Value::Date(s) => s.clone(),
        }
    }

    /// Equality against a user-supplied needle: numeric fields compare by
    /// value, so `85.0` and `85` match the same cell.
    pub fn matches_text(&self, needle: &str) -> bool {
        match self.as_f64() {
            Some(n) => parse_number(needle).map_or_else(|| self.to_key() == needle, |m| n == m),
            None => self.to_key() == needle,
        }
    }
}

/// Numeric reading of a text cell or filter needle.
fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Order two optional values: numerically when either side is numeric
/// (missing counts as zero), otherwise as text. Text that reads as a number
/// sorts by value and before all other text; the rest compares
/// case-insensitively.
pub fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let numeric = a.is_some_and(Value::is_numeric) || b.is_some_and(Value::is_numeric);
    if numeric {
        let a = a.and_then(Value::as_f64).unwrap_or(0.0);
        let b = b.and_then(Value::as_f64).unwrap_or(0.0);
        return a.total_cmp(&b);
    }
    let a = a.and_then(Value::as_str).unwrap_or_default();
    let b = b.and_then(Value::as_str).unwrap_or_default();
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => return x.total_cmp(&y),
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (None, None) => {}
    }
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TypedRecord {
    fields: IndexMap<String, Value>,
}

impl TypedRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Numeric view of a field; missing or non-numeric fields read as zero.
    pub fn number(&self, field: &str) -> f64 {
        self.get(field).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Text view of a field; numeric fields are rendered, missing ones are empty.
    pub fn text(&self, field: &str) -> String {
        self.get(field).map(Value::to_key).unwrap_or_default()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub(crate) fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for TypedRecord {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

fn coerce_integer(field: &str, raw: &str) -> i64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return n;
    }
    // Exporters sometimes write integral columns as `12.0`.
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 => n as i64,
        _ => {
            crate::warn_cell!("{field}: `{raw}` is not an integer, defaulted to 0");
            0
        }
    }
}

fn coerce_float(field: &str, raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => {
            crate::warn_cell!("{field}: `{raw}` is not a number, defaulted to 0");
            0.0
        }
    }
}

fn coerce_value(field: &str, raw: &str, ty: &FieldType) -> Value {
    match ty {
        FieldType::Integer => Value::Integer(coerce_integer(field, raw)),
        FieldType::Float => Value::Float(coerce_float(field, raw)),
        FieldType::String { unknown_if_empty } => {
            if raw.is_empty() && *unknown_if_empty {
                Value::String(UNKNOWN.to_owned())
            } else {
                Value::String(raw.to_owned())
            }
        }
        FieldType::Enum { .. } => Value::Tag(raw.to_owned()),
        FieldType::Date => Value::Date(raw.to_owned()),
    }
}

/// Coerce one raw row into a typed record. Never fails: every schema field is
/// populated, defaulting per its type when the cell is missing or malformed.
pub fn coerce(row: &RawRow, schema: &FieldSchema) -> TypedRecord {
    let mut fields: IndexMap<String, Value> = schema
        .fields()
        .map(|(name, ty)| {
            let raw = row.get(name).map(String::as_str).unwrap_or_default();
            (name.to_owned(), coerce_value(name, raw, ty))
        })
        .collect();
    if schema.passthrough() {
        for (name, raw) in row {
            if !fields.contains_key(name) {
                fields.insert(name.clone(), Value::String(raw.clone()));
            }
        }
    }
    TypedRecord { fields }
}
