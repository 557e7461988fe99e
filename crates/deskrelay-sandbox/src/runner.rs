//! Process executor: runs a materialized script through the interpreter, or
//! an inline command through the platform shell, under a fixed timeout.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use deskrelay_core::config::ExecutionConfig;
use deskrelay_core::observability;
use thiserror::Error;

use crate::common::wait_with_timeout;
use crate::info_log;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// What to run.
#[derive(Debug, Clone)]
pub enum Invocation {
    /// `interpreter <script> <args...>` with `working_dir` as cwd.
    Script {
        working_dir: PathBuf,
        script: PathBuf,
        args: Vec<String>,
    },
    /// `shell <shell_args...> <command>` in the agent's cwd.
    Inline { command: String },
}

impl Invocation {
    pub fn timeout_secs(&self, config: &ExecutionConfig) -> u64 {
        match self {
            Invocation::Script { .. } => config.script_timeout_secs,
            Invocation::Inline { .. } => config.shell_timeout_secs,
        }
    }
}

/// Captured result of one process run. Output is verbatim; callers trim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Resolve a bare program name through PATH. Paths and unresolvable names are
/// returned unchanged so the spawn error names what was configured.
pub fn resolve_program(program: &Path) -> PathBuf {
    if program.components().count() > 1 || program.is_absolute() {
        return program.to_path_buf();
    }
    which::which(program).unwrap_or_else(|_| program.to_path_buf())
}

pub fn execute(
    invocation: &Invocation,
    config: &ExecutionConfig,
) -> Result<ExecutionResult, RunnerError> {
    let timeout_secs = invocation.timeout_secs(config);
    let (program, args, cwd): (PathBuf, Vec<String>, Option<&Path>) = match invocation {
        Invocation::Script {
            working_dir,
            script,
            args,
        } => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(script.to_string_lossy().into_owned());
            full.extend(args.iter().cloned());
            (
                resolve_program(&config.interpreter),
                full,
                Some(working_dir.as_path()),
            )
        }
        Invocation::Inline { command } => {
            let mut full = config.shell_args.clone();
            full.push(command.clone());
            (resolve_program(&config.shell), full, None)
        }
    };

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    configure_platform(&mut cmd);

    let program_str = program.display().to_string();
    let cwd_str = cwd
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| ".".to_string());
    info_log!("Executing {} (timeout {}s)", program_str, timeout_secs);
    observability::audit_execution_started(&program_str, &args, &cwd_str);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: program_str.clone(),
        source,
    })?;
    let outcome = wait_with_timeout(&mut child, timeout_secs).map_err(RunnerError::Wait)?;
    let duration_ms = start.elapsed().as_millis() as u64;

    if outcome.timed_out {
        tracing::warn!(program = %program_str, timeout_secs, "Process timed out and was killed");
    }
    observability::audit_execution_completed(
        &program_str,
        outcome.exit_code,
        outcome.timed_out,
        duration_ms,
        outcome.stdout.len(),
    );

    Ok(ExecutionResult {
        exit_code: outcome.exit_code,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        timed_out: outcome.timed_out,
        duration_ms,
    })
}

#[cfg(unix)]
fn configure_platform(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn configure_platform(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    cmd.creation_flags(crate::common::CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn configure_platform(_cmd: &mut Command) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_config(script_timeout: u64, shell_timeout: u64) -> ExecutionConfig {
        ExecutionConfig {
            interpreter: PathBuf::from("sh"),
            shell: PathBuf::from("sh"),
            shell_args: vec!["-c".to_string()],
            script_timeout_secs: script_timeout,
            shell_timeout_secs: shell_timeout,
            sandbox_root: None,
        }
    }

    #[test]
    fn test_inline_command() {
        let result = execute(
            &Invocation::Inline {
                command: "echo hi".to_string(),
            },
            &sh_config(10, 10),
        )
        .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hi");
    }

    #[test]
    fn test_script_runs_in_working_dir_with_args() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("helper.txt"), "from helper").unwrap();
        let script = tmp.path().join("main.sh");
        std::fs::write(&script, "cat helper.txt; echo \" $1 $2\"\n").unwrap();

        let result = execute(
            &Invocation::Script {
                working_dir: tmp.path().to_path_buf(),
                script,
                args: vec!["a".to_string(), "b c".to_string()],
            },
            &sh_config(10, 10),
        )
        .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "from helper a b c\n");
    }

    #[test]
    fn test_timeout_uses_invocation_kind() {
        let result = execute(
            &Invocation::Inline {
                command: "sleep 20".to_string(),
            },
            &sh_config(60, 1),
        )
        .unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
    }

    #[test]
    fn test_script_background_job_is_bounded_by_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("main.sh");
        std::fs::write(&script, "sleep 8 &\necho done\n").unwrap();

        let started = std::time::Instant::now();
        let result = execute(
            &Invocation::Script {
                working_dir: tmp.path().to_path_buf(),
                script,
                args: Vec::new(),
            },
            &sh_config(1, 10),
        )
        .unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.stdout, "done\n");
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
    }

    #[test]
    fn test_missing_interpreter_is_spawn_error() {
        let mut config = sh_config(10, 10);
        config.shell = PathBuf::from("/nonexistent/deskrelay-shell");
        let err = execute(
            &Invocation::Inline {
                command: "true".to_string(),
            },
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn test_resolve_program_keeps_paths() {
        assert_eq!(
            resolve_program(Path::new("/bin/custom")),
            PathBuf::from("/bin/custom")
        );
        assert_eq!(
            resolve_program(Path::new("definitely-not-a-real-binary-xyz")),
            PathBuf::from("definitely-not-a-real-binary-xyz")
        );
    }
}
