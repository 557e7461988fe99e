pub mod cli;
pub mod http;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use cli::{Cli, Commands};
use deskrelay_core::config::{AgentConfig, ExecutionConfig};

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            host,
            port,
            tools_dir,
            script_timeout,
            shell_timeout,
        } => {
            let mut config = AgentConfig::from_env().with_cli_overrides(host, port, tools_dir);
            config.execution = config
                .execution
                .with_cli_overrides(script_timeout, shell_timeout);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(http::serve(config))?;
        }
        Commands::Exec {
            envelope,
            script_timeout,
            shell_timeout,
        } => {
            let execution =
                ExecutionConfig::from_env().with_cli_overrides(script_timeout, shell_timeout);
            let body = read_envelope(&envelope)?;
            let request_id = uuid::Uuid::new_v4().to_string();
            let response = deskrelay_sandbox::run_envelope(&body, &execution, &request_id);
            let success = response.is_success();
            println!("{}", serde_json::to_string_pretty(&response.into_json())?);
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Health => {
            println!("{}", serde_json::to_string_pretty(&http::health_document())?);
        }
    }
    Ok(())
}

/// `-` reads stdin, an existing path reads the file, anything else is parsed
/// as inline JSON.
fn read_envelope(arg: &str) -> Result<Value> {
    let raw = if arg == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read envelope from stdin")?;
        s
    } else if Path::new(arg).is_file() {
        std::fs::read_to_string(arg).with_context(|| format!("Failed to read {}", arg))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&raw).context("Envelope is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_envelope_from_file_and_inline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("envelope.json");
        std::fs::write(&path, r#"{"iv": "00"}"#).unwrap();
        let value = read_envelope(path.to_str().unwrap()).unwrap();
        assert_eq!(value["iv"], "00");

        let inline = read_envelope(r#"{"scriptName": "a.py"}"#).unwrap();
        assert_eq!(inline["scriptName"], "a.py");

        assert!(read_envelope("not json").is_err());
    }
}
