//! Observability: tracing init and the JSONL audit log.
//!
//! Uses config::ObservabilityConfig for DESKRELAY_QUIET, LOG_LEVEL, LOG_JSON, AUDIT_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call at process startup.
/// When DESKRELAY_QUIET=1, only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level: String = if cfg.quiet {
        "deskrelay=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn get_audit_path() -> Option<&'static str> {
    static AUDIT_PATH: OnceLock<Option<String>> = OnceLock::new();
    AUDIT_PATH
        .get_or_init(|| {
            let path = crate::config::ObservabilityConfig::from_env().audit_log.clone()?;
            if let Some(parent) = Path::new(&path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Some(path)
        })
        .as_deref()
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn audit(record: serde_json::Value) {
    if let Some(path) = get_audit_path() {
        append_jsonl(path, &record);
    }
}

/// Audit: bearer credential rejected
pub fn audit_auth_rejected(path: &str, peer: &str) {
    tracing::warn!(path = %path, peer = %peer, "Unauthorized request");
    audit(json!({
        "ts": now_ts(),
        "event": "auth_rejected",
        "path": path,
        "peer": peer,
    }));
}

/// Audit: encrypted envelope accepted for processing
pub fn audit_envelope_received(request_id: &str, script_name: &str, kind: &str, helpers: usize) {
    audit(json!({
        "ts": now_ts(),
        "event": "envelope_received",
        "request_id": request_id,
        "script_name": script_name,
        "kind": kind,
        "helpers": helpers,
    }));
}

/// Audit: appended-tag layout failed and the embedded-tag layout was tried
pub fn audit_decryption_fallback(object: &str) {
    audit(json!({
        "ts": now_ts(),
        "event": "decryption_fallback",
        "object": object,
    }));
}

/// Audit: helper file could not be decrypted or written and was skipped
pub fn audit_helper_skipped(helper: &str, reason: &str) {
    audit(json!({
        "ts": now_ts(),
        "event": "helper_skipped",
        "helper": helper,
        "reason": reason,
    }));
}

/// Audit: execution_started (right before spawn)
pub fn audit_execution_started(cmd: &str, args: &[String], cwd: &str) {
    audit(json!({
        "ts": now_ts(),
        "event": "execution_started",
        "cmd": cmd,
        "args": args,
        "cwd": cwd,
    }));
}

/// Audit: execution_completed
pub fn audit_execution_completed(cmd: &str, exit_code: i32, timed_out: bool, duration_ms: u64, stdout_len: usize) {
    audit(json!({
        "ts": now_ts(),
        "event": "execution_completed",
        "cmd": cmd,
        "exit_code": exit_code,
        "timed_out": timed_out,
        "duration_ms": duration_ms,
        "stdout_len": stdout_len,
        "success": exit_code == 0 && !timed_out,
    }));
}

/// Audit: sandbox directory could not be removed
pub fn audit_sandbox_cleanup_failed(path: &str, error: &str) {
    audit(json!({
        "ts": now_ts(),
        "event": "sandbox_cleanup_failed",
        "path": path,
        "error": error,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_jsonl_writes_one_line_per_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let path_str = path.to_string_lossy().to_string();
        append_jsonl(&path_str, &json!({"event": "a"}));
        append_jsonl(&path_str, &json!({"event": "b"}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "b");
    }

    #[test]
    fn test_timestamp_is_rfc3339_millis() {
        let ts = now_ts();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
