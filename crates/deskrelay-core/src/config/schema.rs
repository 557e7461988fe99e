//! 按领域分组的配置结构体
//!
//! 从环境变量加载，统一 fallback 逻辑。`AgentConfig` 在进程启动时构建一次，
//! 之后作为显式参数传入 HTTP 层与执行层，不存在全局可变状态。

use super::env_keys::{automation as auto_keys, execution as exec_keys, observability as obv_keys, server as srv_keys};
use super::loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
use std::path::PathBuf;

/// Default listen port of the agent.
pub const DEFAULT_PORT: u16 = 8888;

/// Default maximum request body (10 MB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Default timeout for interpreter-run scripts, in seconds.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 60;

/// Default timeout for inline shell commands, in seconds.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 30;

/// HTTP 监听与鉴权配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared bearer secret. `None` means the agent must refuse to serve.
    pub api_key: Option<String>,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let port = env_optional(srv_keys::DESKRELAY_PORT, srv_keys::PORT_ALIASES)
            .and_then(|s| match s.parse::<u16>() {
                Ok(p) => Some(p),
                Err(_) => {
                    tracing::warn!("Invalid DESKRELAY_PORT: {}, using default ({})", s, DEFAULT_PORT);
                    None
                }
            })
            .unwrap_or(DEFAULT_PORT);
        Self {
            host: env_or(srv_keys::DESKRELAY_HOST, &[], || "0.0.0.0".to_string()),
            port,
            api_key: env_optional(srv_keys::DESKRELAY_API_KEY, srv_keys::API_KEY_ALIASES),
            max_body_bytes: env_u64(srv_keys::DESKRELAY_MAX_BODY_BYTES, &[], DEFAULT_MAX_BODY_BYTES)
                as usize,
        }
    }

    /// `host:port` string for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Masked form of the API key for startup logs (last 4 characters only).
    pub fn masked_api_key(&self) -> String {
        match self.api_key.as_deref() {
            Some(key) => {
                let tail: String = key
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("...{}", tail)
            }
            None => "<unset>".to_string(),
        }
    }
}

/// 脚本执行配置：解释器、shell、超时与沙箱根目录
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Interpreter used for `script` envelopes and tool scripts.
    pub interpreter: PathBuf,
    /// Platform shell used for inline commands.
    pub shell: PathBuf,
    /// Arguments placed between the shell and the inline command (e.g. `-c`).
    pub shell_args: Vec<String>,
    pub script_timeout_secs: u64,
    pub shell_timeout_secs: u64,
    /// Parent directory for per-request sandboxes. `None` uses the OS temp dir.
    pub sandbox_root: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let shell = default_shell();
        Self {
            interpreter: PathBuf::from(default_interpreter()),
            shell_args: shell_args_for(shell),
            shell: PathBuf::from(shell),
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
            shell_timeout_secs: DEFAULT_SHELL_TIMEOUT_SECS,
            sandbox_root: None,
        }
    }
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        let defaults = Self::default();
        let shell = env_optional(exec_keys::DESKRELAY_SHELL, &[]);
        let (shell, shell_args) = match shell {
            Some(s) => {
                let args = shell_args_for(&s);
                (PathBuf::from(s), args)
            }
            None => (defaults.shell, defaults.shell_args),
        };
        Self {
            interpreter: env_optional(exec_keys::DESKRELAY_PYTHON, &[])
                .map(PathBuf::from)
                .unwrap_or(defaults.interpreter),
            shell,
            shell_args,
            script_timeout_secs: env_u64(
                exec_keys::DESKRELAY_SCRIPT_TIMEOUT_SECS,
                &[],
                DEFAULT_SCRIPT_TIMEOUT_SECS,
            ),
            shell_timeout_secs: env_u64(
                exec_keys::DESKRELAY_SHELL_TIMEOUT_SECS,
                &[],
                DEFAULT_SHELL_TIMEOUT_SECS,
            ),
            sandbox_root: env_optional(exec_keys::DESKRELAY_SANDBOX_ROOT, &[]).map(PathBuf::from),
        }
    }

    /// Override with CLI parameters
    pub fn with_cli_overrides(
        mut self,
        script_timeout: Option<u64>,
        shell_timeout: Option<u64>,
    ) -> Self {
        if let Some(t) = script_timeout {
            self.script_timeout_secs = t;
        }
        if let Some(t) = shell_timeout {
            self.shell_timeout_secs = t;
        }
        self
    }
}

fn default_interpreter() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn default_shell() -> &'static str {
    if cfg!(windows) {
        "powershell"
    } else {
        "sh"
    }
}

/// Arguments that make `shell` run a single inline command.
pub fn shell_args_for(shell: &str) -> Vec<String> {
    let name = std::path::Path::new(shell)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match name.as_str() {
        "powershell" | "pwsh" => vec!["-Command".to_string()],
        "cmd" => vec!["/C".to_string()],
        _ => vec!["-c".to_string()],
    }
}

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            load_dotenv();
            Self {
                quiet: env_bool(obv_keys::DESKRELAY_QUIET, &[], false),
                log_level: env_or(obv_keys::DESKRELAY_LOG_LEVEL, &[], || {
                    "deskrelay=info".to_string()
                }),
                log_json: env_bool(obv_keys::DESKRELAY_LOG_JSON, &[], false),
                audit_log: env_optional(obv_keys::DESKRELAY_AUDIT_LOG, &[]),
            }
        })
    }
}

/// Agent 顶层配置：进程启动时构建一次，随后显式传递
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub execution: ExecutionConfig,
    /// Directory containing automation tool scripts (`mouse-click.py`, ...).
    pub tools_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            execution: ExecutionConfig::from_env(),
            tools_dir: env_optional(auto_keys::DESKRELAY_TOOLS_DIR, &[]).map(PathBuf::from),
        }
    }

    /// Override with CLI parameters
    pub fn with_cli_overrides(
        mut self,
        host: Option<String>,
        port: Option<u16>,
        tools_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(h) = host {
            self.server.host = h;
        }
        if let Some(p) = port {
            self.server.port = p;
        }
        if tools_dir.is_some() {
            self.tools_dir = tools_dir;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_args_for_known_shells() {
        assert_eq!(shell_args_for("sh"), vec!["-c"]);
        assert_eq!(shell_args_for("/bin/bash"), vec!["-c"]);
        assert_eq!(shell_args_for("powershell"), vec!["-Command"]);
        assert_eq!(shell_args_for("pwsh.exe"), vec!["-Command"]);
        assert_eq!(shell_args_for("cmd.exe"), vec!["/C"]);
    }

    #[test]
    fn test_execution_defaults_and_overrides() {
        let cfg = ExecutionConfig::default().with_cli_overrides(Some(5), None);
        assert_eq!(cfg.script_timeout_secs, 5);
        assert_eq!(cfg.shell_timeout_secs, DEFAULT_SHELL_TIMEOUT_SECS);
        assert!(cfg.sandbox_root.is_none());
    }

    #[test]
    fn test_masked_api_key_shows_tail_only() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 8888,
            api_key: Some("super-secret-value".into()),
            max_body_bytes: 1024,
        };
        assert_eq!(cfg.masked_api_key(), "...alue");
        assert_eq!(cfg.listen_addr(), "127.0.0.1:8888");
    }
}
