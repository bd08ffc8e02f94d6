use std::fmt;

use serde::Serialize;

/// Value carried by a structured log [`Attribute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    /// Arbitrary structured data, rendered as JSON.
    Json(serde_json::Value),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// A key/value pair attached to a log message.
///
/// Features report their startup information as attributes, transports
/// describe themselves with them, and the error factory uses them to tag
/// submitted errors with their classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub key: String,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: AttrValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, AttrValue::String(value.into()))
    }

    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, AttrValue::Int(value))
    }

    pub fn uint(key: impl Into<String>, value: u64) -> Self {
        Self::new(key, AttrValue::Uint(value))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, AttrValue::Bool(value))
    }

    /// Serializes `value` into a JSON attribute. Values that fail to
    /// serialize are recorded as their error text.
    pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Self {
        let value = serde_json::to_value(value)
            .unwrap_or_else(|e| serde_json::Value::String(e.to_string()));
        Self::new(key, AttrValue::Json(value))
    }

    /// Standard attribute for an error cause.
    pub fn error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::string("error", err.to_string())
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl AttrValue {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => (*i).into(),
            Self::Uint(u) => (*u).into(),
            Self::Float(v) => (*v).into(),
            Self::Bool(b) => (*b).into(),
            Self::Json(v) => v.clone(),
        }
    }
}

/// Collects attributes into one JSON object keyed by attribute key. A
/// repeated key keeps its last value.
#[must_use]
pub fn to_json_object(attrs: &[Attribute]) -> serde_json::Map<String, serde_json::Value> {
    attrs
        .iter()
        .map(|attr| (attr.key.clone(), attr.value.to_json()))
        .collect()
}
