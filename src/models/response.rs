//! Worker responses
//!
//! Workers answer each request with one JSON line of the form
//! `{"path": "<unit>", "status": "OK"}`. Any status other than the success
//! sentinel is an opaque failure message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Status value a worker reports for a passing unit
pub const SUCCESS_SENTINEL: &str = "OK";

/// Outcome of one unit as reported by a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure(String),
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        if raw == SUCCESS_SENTINEL {
            Status::Success
        } else {
            Status::Failure(raw)
        }
    }
}

/// Errors decoding a worker response line
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Response is not a JSON object")]
    NotAnObject,

    #[error("Response is missing field `{0}`")]
    MissingField(&'static str),

    #[error("Response field `{field}` must be a string, got {found}")]
    WrongType { field: &'static str, found: String },
}

/// One decoded response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub unit_id: String,
    pub status: Status,
}

impl Response {
    /// Decode a raw response line
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let unit_id = string_field(object, "path")?;
        let status = string_field(object, "status")?;

        Ok(Self {
            unit_id,
            status: Status::from(status),
        })
    }

}

fn string_field(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, DecodeError> {
    match object.get(field) {
        None => Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(DecodeError::WrongType {
            field,
            found: json_kind(other).to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Success => write!(f, "{}: OK", self.unit_id),
            Status::Failure(message) => write!(f, "{}: {}", self.unit_id, message),
        }
    }
}

#[cfg(test)]
impl Response {
    pub fn success(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: Status::Success,
        }
    }

    pub fn failure(unit_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: Status::Failure(message.into()),
        }
    }

    /// Wire form, as a worker would write it
    pub fn encode(&self) -> String {
        let status = match &self.status {
            Status::Success => SUCCESS_SENTINEL,
            Status::Failure(message) => message.as_str(),
        };
        serde_json::json!({ "path": self.unit_id, "status": status }).to_string()
    }
}
