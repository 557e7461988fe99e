//! Wire protocol for `/execute-encrypted`.
//!
//! Decodes the JSON envelope into typed byte buffers. Each helper decodes on
//! its own so one malformed helper does not sink the whole bundle.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} is not valid hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("Field {field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// How the decrypted main object is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Written to the sandbox and run by the interpreter.
    Script,
    /// Run inline through the platform shell.
    ShellCommand,
}

impl ScriptKind {
    /// `"powershell"` selects the shell; anything else is a script.
    pub fn from_type_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("powershell") => ScriptKind::ShellCommand,
            Some("python") | None => ScriptKind::Script,
            Some(other) => {
                tracing::debug!(script_type = %other, "Unknown script type, running as script");
                ScriptKind::Script
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::Script => "script",
            ScriptKind::ShellCommand => "shell_command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedHelper {
    pub name: String,
    pub cipher_text: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// A helper entry that failed to decode, kept so the pipeline can log and skip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedHelper {
    pub name: String,
    pub error: EnvelopeError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub cipher_text: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub key: Vec<u8>,
    pub kind: ScriptKind,
    pub arguments: Vec<String>,
    pub script_name: String,
    pub helpers: Vec<Result<EncryptedHelper, RejectedHelper>>,
}

/// `/execute-encrypted` request body as sent by the dispatcher.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    encrypted_script: Option<String>,
    encrypted_command: Option<String>,
    iv: Option<String>,
    auth_tag: Option<String>,
    decryption: Option<WireDecryption>,
    #[serde(rename = "type")]
    script_type: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<Value>>,
    script_name: Option<String>,
    /// Kept raw so each entry can fail on its own.
    #[serde(default)]
    helper_scripts: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct WireDecryption {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHelper {
    #[serde(default)]
    name: String,
    encrypted_content: Option<String>,
    iv: Option<String>,
    auth_tag: Option<String>,
}

impl EncryptedEnvelope {
    pub fn decode(body: &Value) -> Result<Self, EnvelopeError> {
        if !body.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        let wire = WireEnvelope::deserialize(body)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let cipher_text = match (wire.encrypted_script, wire.encrypted_command) {
            (Some(script), _) => decode_hex("encryptedScript", &script)?,
            (None, Some(command)) => decode_hex("encryptedCommand", &command)?,
            (None, None) => return Err(EnvelopeError::MissingField("encryptedScript")),
        };
        let iv = required_hex("iv", wire.iv)?;
        check_len("iv", &iv, NONCE_LEN)?;
        let auth_tag = required_hex("authTag", wire.auth_tag)?;

        let key = required_hex("decryption.key", wire.decryption.and_then(|d| d.key))?;
        check_len("decryption.key", &key, KEY_LEN)?;

        Ok(Self {
            cipher_text,
            iv,
            auth_tag,
            key,
            kind: ScriptKind::from_type_tag(wire.script_type.as_deref()),
            arguments: wire
                .arguments
                .unwrap_or_default()
                .iter()
                .map(coerce_argument)
                .collect(),
            script_name: wire.script_name.unwrap_or_else(|| "unknown".to_string()),
            helpers: wire
                .helper_scripts
                .unwrap_or_default()
                .iter()
                .map(EncryptedHelper::decode)
                .collect(),
        })
    }
}

impl EncryptedHelper {
    fn decode(value: &Value) -> Result<Self, RejectedHelper> {
        let wire = WireHelper::deserialize(value).map_err(|e| RejectedHelper {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            error: EnvelopeError::Malformed(e.to_string()),
        })?;

        let name = wire.name;
        let reject = |error| RejectedHelper {
            name: name.clone(),
            error,
        };
        if name.is_empty() {
            return Err(reject(EnvelopeError::MissingField("helperScripts[].name")));
        }
        let cipher_text = required_hex("encryptedContent", wire.encrypted_content).map_err(reject)?;
        let iv = required_hex("iv", wire.iv).map_err(reject)?;
        check_len("iv", &iv, NONCE_LEN).map_err(reject)?;
        let auth_tag = required_hex("authTag", wire.auth_tag).map_err(reject)?;
        Ok(Self {
            name,
            cipher_text,
            iv,
            auth_tag,
        })
    }
}

/// Coerce a JSON argument into a process argument.
/// Strings pass through verbatim; anything else uses its compact JSON text.
pub fn coerce_argument(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required_hex(field: &'static str, value: Option<String>) -> Result<Vec<u8>, EnvelopeError> {
    let value = value.ok_or(EnvelopeError::MissingField(field))?;
    decode_hex(field, &value)
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    hex::decode(value.trim()).map_err(|e| EnvelopeError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

fn check_len(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), EnvelopeError> {
    if bytes.len() != expected {
        return Err(EnvelopeError::InvalidLength {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_envelope() -> Value {
        json!({
            "encryptedScript": "deadbeef",
            "iv": "00".repeat(12),
            "authTag": "11".repeat(16),
            "decryption": { "key": "22".repeat(32) },
            "type": "python",
            "arguments": ["a", 1, true, null, {"k": 1}],
            "scriptName": "main.py",
        })
    }

    #[test]
    fn test_decode_full_envelope() {
        let env = EncryptedEnvelope::decode(&base_envelope()).unwrap();
        assert_eq!(env.cipher_text, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(env.iv.len(), 12);
        assert_eq!(env.key.len(), 32);
        assert_eq!(env.kind, ScriptKind::Script);
        assert_eq!(env.script_name, "main.py");
        assert_eq!(env.arguments, vec!["a", "1", "true", "null", "{\"k\":1}"]);
        assert!(env.helpers.is_empty());
    }

    #[test]
    fn test_decode_command_and_defaults() {
        let body = json!({
            "encryptedCommand": "ab",
            "iv": "00".repeat(12),
            "authTag": "",
            "decryption": { "key": "22".repeat(32) },
            "type": "powershell",
        });
        let env = EncryptedEnvelope::decode(&body).unwrap();
        assert_eq!(env.kind, ScriptKind::ShellCommand);
        assert_eq!(env.script_name, "unknown");
        assert!(env.arguments.is_empty());
        assert!(env.auth_tag.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        let mut body = base_envelope();
        body["decryption"]["key"] = json!("22".repeat(16));
        assert_eq!(
            EncryptedEnvelope::decode(&body),
            Err(EnvelopeError::InvalidLength {
                field: "decryption.key",
                expected: 32,
                actual: 16
            })
        );

        let mut body = base_envelope();
        body["iv"] = json!("zz");
        assert!(matches!(
            EncryptedEnvelope::decode(&body),
            Err(EnvelopeError::InvalidHex { field: "iv", .. })
        ));

        let mut body = base_envelope();
        body.as_object_mut().unwrap().remove("encryptedScript");
        assert_eq!(
            EncryptedEnvelope::decode(&body),
            Err(EnvelopeError::MissingField("encryptedScript"))
        );

        assert_eq!(
            EncryptedEnvelope::decode(&json!([1, 2])),
            Err(EnvelopeError::NotAnObject)
        );

        let mut body = base_envelope();
        body["arguments"] = json!("not-a-list");
        assert!(matches!(
            EncryptedEnvelope::decode(&body),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_null_script_falls_back_to_command() {
        let mut body = base_envelope();
        body["encryptedScript"] = Value::Null;
        body["encryptedCommand"] = json!("cafe");
        let env = EncryptedEnvelope::decode(&body).unwrap();
        assert_eq!(env.cipher_text, vec![0xca, 0xfe]);
    }

    #[test]
    fn test_helpers_decode_independently() {
        let mut body = base_envelope();
        body["helperScripts"] = json!([
            { "name": "util.py", "encryptedContent": "aa", "iv": "00".repeat(12), "authTag": "bb" },
            { "name": "broken.py", "encryptedContent": "not-hex", "iv": "00".repeat(12), "authTag": "bb" },
        ]);
        let env = EncryptedEnvelope::decode(&body).unwrap();
        assert_eq!(env.helpers.len(), 2);
        assert_eq!(env.helpers[0].as_ref().unwrap().name, "util.py");
        let rejected = env.helpers[1].as_ref().unwrap_err();
        assert_eq!(rejected.name, "broken.py");
    }

    #[test]
    fn test_helper_with_wrong_field_type_is_rejected_alone() {
        let mut body = base_envelope();
        body["helperScripts"] = json!([
            { "name": "odd.py", "encryptedContent": 42, "iv": "00".repeat(12), "authTag": "bb" },
            { "encryptedContent": "aa", "iv": "00".repeat(12), "authTag": "bb" },
        ]);
        let env = EncryptedEnvelope::decode(&body).unwrap();
        let odd = env.helpers[0].as_ref().unwrap_err();
        assert_eq!(odd.name, "odd.py");
        assert!(matches!(odd.error, EnvelopeError::Malformed(_)));
        let unnamed = env.helpers[1].as_ref().unwrap_err();
        assert_eq!(
            unnamed.error,
            EnvelopeError::MissingField("helperScripts[].name")
        );
    }

    #[test]
    fn test_envelope_error_is_clone() {
        let rejected = RejectedHelper {
            name: "a.py".to_string(),
            error: EnvelopeError::MissingField("iv"),
        };
        assert_eq!(rejected.clone(), rejected);
    }

    #[test]
    fn test_unknown_type_runs_as_script() {
        assert_eq!(ScriptKind::from_type_tag(Some("bash")), ScriptKind::Script);
        assert_eq!(ScriptKind::from_type_tag(None), ScriptKind::Script);
    }
}
