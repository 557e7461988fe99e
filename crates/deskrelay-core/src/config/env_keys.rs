//! 环境变量 key 常量与别名定义
//!
//! 主变量优先使用 `DESKRELAY_*`，兼容旧版 agent 的 `ENCRYPTION_KEY`、`AGENT_PORT`。

/// HTTP 监听与鉴权
pub mod server {
    /// Shared bearer secret
    pub const DESKRELAY_API_KEY: &str = "DESKRELAY_API_KEY";
    pub const API_KEY_ALIASES: &[&str] = &["ENCRYPTION_KEY"];

    pub const DESKRELAY_HOST: &str = "DESKRELAY_HOST";

    pub const DESKRELAY_PORT: &str = "DESKRELAY_PORT";
    pub const PORT_ALIASES: &[&str] = &["AGENT_PORT"];

    pub const DESKRELAY_MAX_BODY_BYTES: &str = "DESKRELAY_MAX_BODY_BYTES";
}

/// 脚本执行：解释器、shell、超时、沙箱目录
pub mod execution {
    pub const DESKRELAY_PYTHON: &str = "DESKRELAY_PYTHON";
    pub const DESKRELAY_SHELL: &str = "DESKRELAY_SHELL";
    pub const DESKRELAY_SCRIPT_TIMEOUT_SECS: &str = "DESKRELAY_SCRIPT_TIMEOUT_SECS";
    pub const DESKRELAY_SHELL_TIMEOUT_SECS: &str = "DESKRELAY_SHELL_TIMEOUT_SECS";
    pub const DESKRELAY_SANDBOX_ROOT: &str = "DESKRELAY_SANDBOX_ROOT";
}

/// 自动化工具脚本目录
pub mod automation {
    pub const DESKRELAY_TOOLS_DIR: &str = "DESKRELAY_TOOLS_DIR";
}

/// 可观测性与日志
pub mod observability {
    pub const DESKRELAY_QUIET: &str = "DESKRELAY_QUIET";
    pub const DESKRELAY_LOG_LEVEL: &str = "DESKRELAY_LOG_LEVEL";
    pub const DESKRELAY_LOG_JSON: &str = "DESKRELAY_LOG_JSON";
    pub const DESKRELAY_AUDIT_LOG: &str = "DESKRELAY_AUDIT_LOG";
}
