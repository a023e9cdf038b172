//! Structural checks on the inbound request body.

use serde_json::{Map, Value};
use thiserror::Error;

/// Fields every submission must carry, in validation order.
pub const REQUIRED_FIELDS: [&str; 3] = ["name", "email", "message"];

/// Caller input errors. All map to 400 and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Request body is not a valid JSON object: {0}")]
    MalformedBody(String),

    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("Field {field} must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Image provided without a filename")]
    ImageWithoutFilename,

    #[error("Invalid image format: {0}")]
    InvalidImageFormat(String),
}

impl ValidationError {
    /// Stable code reported in the response `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedBody(_) => "malformed_body",
            Self::MissingRequiredField(_) => "missing_required_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::ImageWithoutFilename | Self::InvalidImageFormat(_) => "invalid_image_format",
        }
    }
}

/// A structurally valid submission, not yet normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    pub timestamp: Option<String>,
    pub image: Option<String>,
    pub filename: Option<String>,
}

impl SubmissionRequest {
    /// Whether an image was supplied.
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Parse and check a raw request body.
pub fn validate(body: &[u8]) -> Result<SubmissionRequest, ValidationError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(ValidationError::MalformedBody(
            "expected a JSON object".to_string(),
        ));
    };

    let [name, email, message] = REQUIRED_FIELDS;
    let name = required(&fields, name)?;
    let email = required(&fields, email)?;
    let message = required(&fields, message)?;

    let timestamp = optional(&fields, "timestamp")?;
    let image = optional(&fields, "image")?;
    let filename = optional(&fields, "filename")?;

    // A filename alone is tolerated; an image alone is not
    if image.is_some() && filename.is_none() {
        return Err(ValidationError::ImageWithoutFilename);
    }

    Ok(SubmissionRequest {
        name,
        email,
        message,
        timestamp,
        image,
        filename,
    })
}

/// Field presence flags for logging without payload contents.
pub fn field_presence(body: &[u8]) -> [(&'static str, bool); 5] {
    let fields = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    ["name", "email", "message", "image", "filename"].map(|key| {
        let present = fields
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        (key, present)
    })
}

fn required(fields: &Map<String, Value>, key: &'static str) -> Result<String, ValidationError> {
    match fields.get(key) {
        None | Some(Value::Null) => Err(ValidationError::MissingRequiredField(key)),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::MissingRequiredField(key))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidField {
            field: key,
            expected: "a string",
        }),
    }
}

/// Absent, null and blank strings all count as "not supplied".
fn optional(
    fields: &Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, ValidationError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::InvalidField {
            field: key,
            expected: "a string",
        }),
    }
}
