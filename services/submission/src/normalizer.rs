//! Canonical submission record and image artifact construction.

use crate::validator::{SubmissionRequest, ValidationError};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;

/// Prefix every accepted image data URL must start with.
pub const DATA_IMAGE_MARKER: &str = "data:image/";

/// Browsers are inconsistent about trailing padding in data URLs.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The record committed for each submission.
///
/// Fields are private: once built the record only changes by producing a new
/// value through [`SubmissionRecord::with_image_ref`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    name: String,
    email: String,
    message: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_ref: Option<String>,
    #[serde(skip)]
    submitted_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Timestamp exactly as it will be stored.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The instant behind [`SubmissionRecord::timestamp`] in UTC, when it
    /// carries an offset. Local times and plain dates have none.
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image_ref.as_deref()
    }

    /// A copy of this record referencing an uploaded image.
    pub fn with_image_ref(self, path: impl Into<String>) -> Self {
        Self {
            image_ref: Some(path.into()),
            ..self
        }
    }

    /// Pretty-printed JSON body for the repository file.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

/// A decoded image taken from a data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    /// The base64 payload as received
    pub raw_base64: String,
    /// Everything before the first comma, e.g. `data:image/png;base64`
    pub declared_mime_prefix: String,
    /// Sanitized single-component filename
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageArtifact {
    /// MIME type named by the data URL, e.g. `image/png`.
    pub fn mime_type(&self) -> &str {
        let declared = self
            .declared_mime_prefix
            .strip_prefix("data:")
            .unwrap_or(&self.declared_mime_prefix);
        declared.split(';').next().unwrap_or(declared)
    }
}

/// Output of normalization: the record plus an optional image to upload first.
#[derive(Debug, Clone)]
pub struct NormalizedSubmission {
    pub record: SubmissionRecord,
    pub image: Option<ImageArtifact>,
}

/// Build the canonical record and decode any embedded image.
///
/// `now` supplies the default timestamp when the caller sent none. A caller
/// timestamp is stored as given.
pub fn normalize(
    request: SubmissionRequest,
    now: DateTime<Utc>,
) -> Result<NormalizedSubmission, ValidationError> {
    let (timestamp, submitted_at) = match request.timestamp {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw.trim())
                .ok()
                .map(|instant| instant.with_timezone(&Utc));
            (raw, parsed)
        }
        None => {
            let now = now.trunc_subsecs(3);
            (now.to_rfc3339_opts(SecondsFormat::Millis, true), Some(now))
        }
    };

    let image = match (request.image.as_deref(), request.filename.as_deref()) {
        (Some(data_url), Some(filename)) => Some(decode_image(data_url, filename)?),
        (Some(_), None) => return Err(ValidationError::ImageWithoutFilename),
        (None, _) => None,
    };

    let record = SubmissionRecord {
        name: request.name,
        email: request.email,
        message: request.message,
        timestamp,
        image_ref: None,
        submitted_at,
    };

    Ok(NormalizedSubmission { record, image })
}

/// Decode a `data:image/<subtype>;base64,<payload>` URL.
pub fn decode_image(data_url: &str, filename: &str) -> Result<ImageArtifact, ValidationError> {
    if !data_url.starts_with(DATA_IMAGE_MARKER) {
        return Err(ValidationError::InvalidImageFormat(format!(
            "image must start with {DATA_IMAGE_MARKER}"
        )));
    }

    let (prefix, payload) = data_url.split_once(',').ok_or_else(|| {
        ValidationError::InvalidImageFormat("data URL has no payload separator".to_string())
    })?;

    let raw_base64: String = payload.split_ascii_whitespace().collect();
    if raw_base64.is_empty() {
        return Err(ValidationError::InvalidImageFormat(
            "data URL payload is empty".to_string(),
        ));
    }

    let bytes = LENIENT_BASE64
        .decode(&raw_base64)
        .map_err(|e| ValidationError::InvalidImageFormat(format!("payload is not base64: {e}")))?;

    let filename = sanitize_filename(filename);
    if filename.is_empty() {
        return Err(ValidationError::InvalidField {
            field: "filename",
            expected: "a non-empty file name",
        });
    }

    Ok(ImageArtifact {
        raw_base64,
        declared_mime_prefix: prefix.to_string(),
        filename,
        bytes,
    })
}

/// Reduce a caller-supplied filename to one safe path component.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized: String = filename
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    // No hidden files, and nothing that reads as `.` or `..`
    if sanitized.starts_with('.') {
        sanitized.replace_range(..1, "_");
    }
    sanitized
}
