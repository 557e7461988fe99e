//! Result normalization: classify a finished run and shape the JSON reply.

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::runner::ExecutionResult;

/// Field that receives the base64 PNG during enrichment.
pub const IMAGE_FIELD: &str = "screenshot";

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Field `path` is not a string")]
    PathNotString,

    #[error("Failed to load image {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode image as PNG: {0}")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResponse {
    /// Script printed a JSON object; merged over `{"success": true}`.
    StructuredSuccess(Map<String, Value>),
    /// Script exited cleanly with non-object output.
    PlainTextSuccess(String),
    /// Inline shell command result.
    CommandOutput {
        success: bool,
        output: String,
        error: Option<String>,
    },
    Failure {
        message: String,
        output: Option<String>,
    },
}

impl NormalizedResponse {
    pub fn is_success(&self) -> bool {
        match self {
            NormalizedResponse::StructuredSuccess(_) | NormalizedResponse::PlainTextSuccess(_) => {
                true
            }
            NormalizedResponse::CommandOutput { success, .. } => *success,
            NormalizedResponse::Failure { .. } => false,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            NormalizedResponse::StructuredSuccess(object) => {
                let mut merged = Map::with_capacity(object.len() + 1);
                merged.insert("success".to_string(), Value::Bool(true));
                merged.extend(object);
                Value::Object(merged)
            }
            NormalizedResponse::PlainTextSuccess(output) => {
                json!({ "success": true, "output": output })
            }
            NormalizedResponse::CommandOutput {
                success,
                output,
                error,
            } => json!({ "success": success, "output": output, "error": error }),
            NormalizedResponse::Failure { message, output } => match output {
                Some(output) => json!({ "success": false, "error": message, "output": output }),
                None => json!({ "success": false, "error": message }),
            },
        }
    }
}

/// Classify a script run. `timeout_secs` only feeds the timeout message.
pub fn normalize_script_output(result: &ExecutionResult, timeout_secs: u64) -> NormalizedResponse {
    if result.timed_out {
        return NormalizedResponse::Failure {
            message: format!("Script timed out after {} seconds", timeout_secs),
            output: Some(result.stdout.trim().to_string()),
        };
    }
    if result.exit_code != 0 {
        let stderr = result.stderr.trim();
        let message = if stderr.is_empty() {
            "Script execution failed".to_string()
        } else {
            stderr.to_string()
        };
        return NormalizedResponse::Failure {
            message,
            output: Some(result.stdout.trim().to_string()),
        };
    }

    match serde_json::from_str::<Value>(&result.stdout) {
        Ok(Value::Object(mut object)) => {
            if wants_enrichment(&object) {
                match enrich_image_artifact(&mut object) {
                    Ok(true) => tracing::debug!("Attached image artifact to result"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "Image enrichment failed, returning result as-is"),
                }
            }
            NormalizedResponse::StructuredSuccess(object)
        }
        _ => NormalizedResponse::PlainTextSuccess(result.stdout.trim().to_string()),
    }
}

/// Shape an inline shell command result.
pub fn normalize_command_output(result: &ExecutionResult, timeout_secs: u64) -> NormalizedResponse {
    if result.timed_out {
        return NormalizedResponse::CommandOutput {
            success: false,
            output: String::new(),
            error: Some(format!("Command timed out after {} seconds", timeout_secs)),
        };
    }
    NormalizedResponse::CommandOutput {
        success: result.exit_code == 0,
        output: result.stdout.trim().to_string(),
        error: if result.stderr.is_empty() {
            None
        } else {
            Some(result.stderr.trim().to_string())
        },
    }
}

/// Truthy `success` together with a `path` field.
pub fn wants_enrichment(object: &Map<String, Value>) -> bool {
    object.get("success").map(is_truthy).unwrap_or(false) && object.contains_key("path")
}

/// Add the file at `path` as a base64 PNG under [`IMAGE_FIELD`].
///
/// Returns `Ok(false)` when the file is missing or the field is already
/// present; existing fields are never overwritten.
pub fn enrich_image_artifact(object: &mut Map<String, Value>) -> Result<bool, EnrichmentError> {
    if object.contains_key(IMAGE_FIELD) {
        return Ok(false);
    }
    let path = match object.get("path") {
        Some(Value::String(p)) => p.clone(),
        _ => return Err(EnrichmentError::PathNotString),
    };
    if path.is_empty() || !Path::new(&path).exists() {
        tracing::debug!(path = %path, "Image artifact not found, skipping enrichment");
        return Ok(false);
    }
    let encoded = encode_image_file(Path::new(&path))?;
    object.insert(IMAGE_FIELD.to_string(), Value::String(encoded.data));
    Ok(true)
}

/// Base64 PNG plus the decoded dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub width: u32,
    pub height: u32,
}

/// Decode any supported raster file and re-encode it as base64 PNG.
pub fn encode_image_file(path: &Path) -> Result<EncodedImage, EnrichmentError> {
    let img = image::open(path).map_err(|source| EnrichmentError::Load {
        path: path.display().to_string(),
        source,
    })?;
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(EnrichmentError::Encode)?;
    Ok(EncodedImage {
        data: STANDARD.encode(buf.into_inner()),
        width: img.width(),
        height: img.height(),
    })
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
