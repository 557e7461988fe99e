//! Encrypted bundle pipeline: decode, decrypt, materialize, execute,
//! normalize, clean up. One call per request; nothing is shared between calls.

use deskrelay_core::config::ExecutionConfig;
use deskrelay_core::observability;
use deskrelay_core::protocol::{EncryptedEnvelope, EncryptedHelper, EnvelopeError, ScriptKind};
use serde_json::Value;
use thiserror::Error;

use crate::crypto::{DecryptionError, Decryptor, Plaintext, TagLayout};
use crate::info_log;
use crate::materialize::{self, MaterializeError};
use crate::normalize::{self, NormalizedResponse};
use crate::runner::{self, Invocation, RunnerError};
use crate::sandbox_dir::SandboxDir;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Run one envelope end to end. Every error becomes a `Failure` response.
pub fn run_envelope(body: &Value, config: &ExecutionConfig, request_id: &str) -> NormalizedResponse {
    match try_run_envelope(body, config, request_id) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Decryption/execution failed");
            NormalizedResponse::Failure {
                message: format!("Decryption/execution failed: {}", e),
                output: None,
            }
        }
    }
}

pub fn try_run_envelope(
    body: &Value,
    config: &ExecutionConfig,
    request_id: &str,
) -> Result<NormalizedResponse, PipelineError> {
    let envelope = EncryptedEnvelope::decode(body)?;
    info_log!(
        "Envelope {}: {} ({}), {} argument(s), {} helper(s)",
        request_id,
        envelope.script_name,
        envelope.kind.as_str(),
        envelope.arguments.len(),
        envelope.helpers.len()
    );
    observability::audit_envelope_received(
        request_id,
        &envelope.script_name,
        envelope.kind.as_str(),
        envelope.helpers.len(),
    );

    // TODO: derive the key from a pre-shared secret instead of reading it from the envelope.
    let decryptor = Decryptor::new(&envelope.key)?;
    let main = open_object(
        &decryptor,
        &envelope.script_name,
        &envelope.iv,
        &envelope.cipher_text,
        &envelope.auth_tag,
    )?;
    let text = String::from_utf8(main.bytes)
        .map_err(|_| MaterializeError::InvalidUtf8(envelope.script_name.clone()))?;

    match envelope.kind {
        ScriptKind::ShellCommand => {
            let invocation = Invocation::Inline { command: text };
            let result = runner::execute(&invocation, config)?;
            Ok(normalize::normalize_command_output(
                &result,
                config.shell_timeout_secs,
            ))
        }
        ScriptKind::Script => {
            let sandbox = SandboxDir::create(config.sandbox_root.as_deref())?;

            for helper in &envelope.helpers {
                match helper {
                    Ok(helper) => {
                        if let Err(e) = materialize_helper(&decryptor, &sandbox, helper) {
                            skip_helper(&helper.name, &e.to_string());
                        }
                    }
                    Err(rejected) => skip_helper(&rejected.name, &rejected.error.to_string()),
                }
            }

            let content = materialize::prepare_main_script(&text);
            let script = materialize::write_script(sandbox.path(), &envelope.script_name, &content)?;

            let invocation = Invocation::Script {
                working_dir: sandbox.path().to_path_buf(),
                script,
                args: envelope.arguments.clone(),
            };
            let result = runner::execute(&invocation, config)?;
            let response = normalize::normalize_script_output(&result, config.script_timeout_secs);
            sandbox.close();
            Ok(response)
        }
    }
}

fn open_object(
    decryptor: &Decryptor,
    label: &str,
    iv: &[u8],
    cipher_text: &[u8],
    tag: &[u8],
) -> Result<Plaintext, DecryptionError> {
    let plaintext = decryptor.open(iv, cipher_text, tag)?;
    if plaintext.layout == TagLayout::Embedded {
        tracing::debug!(object = %label, "Decrypted with embedded tag layout");
        observability::audit_decryption_fallback(label);
    }
    Ok(plaintext)
}

fn materialize_helper(
    decryptor: &Decryptor,
    sandbox: &SandboxDir,
    helper: &EncryptedHelper,
) -> Result<(), PipelineError> {
    let plaintext = open_object(
        decryptor,
        &helper.name,
        &helper.iv,
        &helper.cipher_text,
        &helper.auth_tag,
    )?;
    let text = String::from_utf8(plaintext.bytes)
        .map_err(|_| MaterializeError::InvalidUtf8(helper.name.clone()))?;
    let content = materialize::normalize_line_endings(&text);
    materialize::write_script(sandbox.path(), &helper.name, &content)?;
    tracing::debug!(helper = %helper.name, "Saved helper script");
    Ok(())
}

fn skip_helper(name: &str, reason: &str) {
    tracing::warn!(helper = %name, reason = %reason, "Skipping helper script");
    observability::audit_helper_skipped(name, reason);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use serde_json::json;
    use std::path::{Path, PathBuf};

    const KEY: [u8; 32] = [0x42; 32];

    fn seal(iv: &[u8; 12], plaintext: &str) -> (String, String) {
        let cipher = Aes256Gcm::new_from_slice(&KEY).unwrap();
        let sealed = cipher
            .encrypt(Nonce::from_slice(iv), plaintext.as_bytes())
            .unwrap();
        let (ct, tag) = sealed.split_at(sealed.len() - 16);
        (hex::encode(ct), hex::encode(tag))
    }

    fn envelope(script: &str, kind: &str, helpers: Value) -> Value {
        let iv = [1u8; 12];
        let (ct, tag) = seal(&iv, script);
        json!({
            "encryptedScript": ct,
            "iv": hex::encode(iv),
            "authTag": tag,
            "decryption": { "key": hex::encode(KEY) },
            "type": kind,
            "arguments": [],
            "scriptName": "main.sh",
            "helperScripts": helpers,
        })
    }

    fn helper(name: &str, content: &str) -> Value {
        let iv = [2u8; 12];
        let (ct, tag) = seal(&iv, content);
        json!({ "name": name, "encryptedContent": ct, "iv": hex::encode(iv), "authTag": tag })
    }

    fn config(root: &Path) -> ExecutionConfig {
        ExecutionConfig {
            interpreter: PathBuf::from("sh"),
            shell: PathBuf::from("sh"),
            shell_args: vec!["-c".to_string()],
            script_timeout_secs: 10,
            shell_timeout_secs: 10,
            sandbox_root: Some(root.to_path_buf()),
        }
    }

    fn sandbox_count(root: &Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_structured_script_output() {
        let root = tempfile::tempdir().unwrap();
        let body = envelope(
            "echo '{\"success\": true, \"value\": 42}'\r\n",
            "python",
            json!([]),
        );
        let resp = run_envelope(&body, &config(root.path()), "t1");
        assert_eq!(resp.into_json(), json!({"success": true, "value": 42}));
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_shell_command_envelope() {
        let root = tempfile::tempdir().unwrap();
        let body = envelope("echo hi", "powershell", json!([]));
        let resp = run_envelope(&body, &config(root.path()), "t2");
        assert_eq!(
            resp.into_json(),
            json!({"success": true, "output": "hi", "error": null})
        );
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_failing_script_reports_stderr_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let body = envelope("echo partial\necho boom >&2\nexit 1\n", "python", json!([]));
        let resp = run_envelope(&body, &config(root.path()), "t3");
        assert_eq!(
            resp.into_json(),
            json!({"success": false, "error": "boom", "output": "partial"})
        );
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_helpers_are_readable_by_relative_path() {
        let root = tempfile::tempdir().unwrap();
        let helpers = json!([
            helper("lib/data.txt", "line1\r\nline2\r\n"),
            helper("util.sh", "GREETING=hello\n"),
        ]);
        let body = envelope(". ./util.sh\necho $GREETING\ncat lib/data.txt\n", "python", helpers);
        let resp = run_envelope(&body, &config(root.path()), "t4");
        assert_eq!(
            resp.into_json(),
            json!({"success": true, "output": "hello\nline1\nline2"})
        );
    }

    #[test]
    fn test_broken_helper_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let mut bad = helper("bad.sh", "exit 9\n");
        bad["encryptedContent"] = json!("00ff");
        let helpers = json!([
            bad,
            helper("../escape.sh", "x"),
            { "name": "nohex.sh", "encryptedContent": "zz", "iv": "00", "authTag": "00" },
            helper("good.sh", "echo good\n"),
        ]);
        let body = envelope(
            "[ -f bad.sh ] && echo bad-present\n. ./good.sh\n",
            "python",
            helpers,
        );
        let resp = run_envelope(&body, &config(root.path()), "t5");
        assert_eq!(resp.into_json(), json!({"success": true, "output": "good"}));
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_arguments_are_passed_in_order() {
        let root = tempfile::tempdir().unwrap();
        let mut body = envelope("echo \"$1|$2|$3\"\n", "python", json!([]));
        body["arguments"] = json!(["a b", 7, {"k": true}]);
        let resp = run_envelope(&body, &config(root.path()), "t6");
        assert_eq!(
            resp.into_json(),
            json!({"success": true, "output": "a b|7|{\"k\":true}"})
        );
    }

    #[test]
    fn test_bad_key_is_handled_failure() {
        let root = tempfile::tempdir().unwrap();
        let mut body = envelope("echo hi", "python", json!([]));
        body["decryption"]["key"] = json!(hex::encode([0x11u8; 32]));
        let json = run_envelope(&body, &config(root.path()), "t7").into_json();
        assert_eq!(json["success"], false);
        assert!(json["error"]
            .as_str()
            .unwrap()
            .starts_with("Decryption/execution failed: "));
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_invalid_main_name_is_fatal_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let mut body = envelope("echo hi", "python", json!([]));
        body["scriptName"] = json!("../../main.sh");
        let json = run_envelope(&body, &config(root.path()), "t8").into_json();
        assert_eq!(json["success"], false);
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_script_timeout_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = config(root.path());
        cfg.script_timeout_secs = 1;
        let body = envelope("echo started\nsleep 20\n", "python", json!([]));
        let json = run_envelope(&body, &cfg, "t9").into_json();
        assert_eq!(
            json,
            json!({"success": false, "error": "Script timed out after 1 seconds", "output": "started"})
        );
        assert_eq!(sandbox_count(root.path()), 0);
    }

    #[test]
    fn test_line_continuations_are_repaired() {
        let root = tempfile::tempdir().unwrap();
        let body = envelope("echo one \\\r\n\r\n  two\r\n", "python", json!([]));
        let resp = run_envelope(&body, &config(root.path()), "t10");
        assert_eq!(resp.into_json(), json!({"success": true, "output": "one two"}));
    }
}
