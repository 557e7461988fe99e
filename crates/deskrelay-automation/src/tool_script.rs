//! AutomationDriver backed by the desktop tool scripts
//! (`mouse-click.py`, `screenshot.py`, ...). Each call runs one script with
//! `--json` through the process executor and reads its JSON result.

use std::path::PathBuf;

use deskrelay_core::config::ExecutionConfig;
use deskrelay_sandbox::normalize::{encode_image_file, is_truthy};
use deskrelay_sandbox::runner::{self, Invocation};
use deskrelay_sandbox::sandbox_dir::SandboxDir;
use serde_json::{Map, Value};

use crate::driver::{AutomationDriver, DriverError, MouseButton, ScreenCapture, ScrollDirection};

pub struct ToolScriptDriver {
    tools_dir: PathBuf,
    exec: ExecutionConfig,
}

impl ToolScriptDriver {
    pub fn new(tools_dir: impl Into<PathBuf>, exec: ExecutionConfig) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            exec,
        }
    }

    /// Run `<tool>.py <args...> --json` and return its result object.
    fn run_tool(&self, tool: &str, args: Vec<String>) -> Result<Map<String, Value>, DriverError> {
        let script = self.tools_dir.join(format!("{}.py", tool));
        if !script.is_file() {
            return Err(DriverError::ToolMissing(script.display().to_string()));
        }
        let mut full = vec!["--json".to_string()];
        full.extend(args);

        let result = runner::execute(
            &Invocation::Script {
                working_dir: self.tools_dir.clone(),
                script,
                args: full,
            },
            &self.exec,
        )?;
        if result.timed_out {
            return Err(DriverError::ToolFailed {
                tool: tool.to_string(),
                message: format!("timed out after {} seconds", self.exec.script_timeout_secs),
            });
        }

        let object = match serde_json::from_str::<Value>(&result.stdout) {
            Ok(Value::Object(object)) => object,
            _ if result.exit_code != 0 => {
                let stderr = result.stderr.trim();
                return Err(DriverError::ToolFailed {
                    tool: tool.to_string(),
                    message: if stderr.is_empty() {
                        format!("exit code {}", result.exit_code)
                    } else {
                        stderr.to_string()
                    },
                });
            }
            _ => {
                return Err(DriverError::InvalidOutput {
                    tool: tool.to_string(),
                    reason: "stdout is not a JSON object".to_string(),
                })
            }
        };

        if !object.get("success").map(is_truthy).unwrap_or(false) {
            let message = ["error", "message"]
                .iter()
                .find_map(|k| object.get(*k).and_then(Value::as_str))
                .unwrap_or("tool reported failure")
                .to_string();
            return Err(DriverError::ToolFailed {
                tool: tool.to_string(),
                message,
            });
        }
        Ok(object)
    }
}

impl AutomationDriver for ToolScriptDriver {
    fn name(&self) -> &str {
        "tool-script"
    }

    fn move_pointer(&self, x: i64, y: i64, duration: f64) -> Result<(), DriverError> {
        tracing::debug!(duration, "mouse-move.py picks its own duration");
        self.run_tool(
            "mouse-move",
            vec!["--x".into(), x.to_string(), "--y".into(), y.to_string()],
        )?;
        Ok(())
    }

    fn click(&self, x: i64, y: i64, button: MouseButton, clicks: u32) -> Result<(), DriverError> {
        let mut args = vec![
            "--x".to_string(),
            x.to_string(),
            "--y".to_string(),
            y.to_string(),
            "--button".to_string(),
            button.as_str().to_string(),
        ];
        if clicks >= 2 {
            args.push("--double".to_string());
        }
        self.run_tool("mouse-click", args)?;
        Ok(())
    }

    fn pointer_position(&self) -> Result<(i64, i64), DriverError> {
        let object = self.run_tool("mouse-position", Vec::new())?;
        let coord = |axis: &str| {
            object
                .get("coordinates")
                .and_then(|c| c.get(axis))
                .and_then(Value::as_i64)
        };
        match (coord("x"), coord("y")) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(DriverError::InvalidOutput {
                tool: "mouse-position".to_string(),
                reason: "missing coordinates".to_string(),
            }),
        }
    }

    fn scroll(
        &self,
        direction: ScrollDirection,
        clicks: u32,
        at: Option<(i64, i64)>,
    ) -> Result<(), DriverError> {
        let mut args = vec![
            direction.as_str().to_string(),
            "--clicks".to_string(),
            clicks.to_string(),
        ];
        if let Some((x, y)) = at {
            args.extend(["--x".to_string(), x.to_string(), "--y".to_string(), y.to_string()]);
        }
        self.run_tool("mouse-scroll", args)?;
        Ok(())
    }

    fn type_text(&self, text: &str, interval: f64) -> Result<(), DriverError> {
        self.run_tool(
            "keyboard-type",
            vec![
                "--interval".to_string(),
                interval.to_string(),
                "--".to_string(),
                text.to_string(),
            ],
        )?;
        Ok(())
    }

    fn press_key(&self, key: &str) -> Result<(), DriverError> {
        self.run_tool("keyboard-press", vec!["--".to_string(), key.to_string()])?;
        Ok(())
    }

    fn capture_screen(&self) -> Result<ScreenCapture, DriverError> {
        let scratch = SandboxDir::create(self.exec.sandbox_root.as_deref())
            .map_err(|e| DriverError::Capture(e.to_string()))?;
        let output = scratch.path().join("screenshot.png");
        self.run_tool(
            "screenshot",
            vec![
                "--output".to_string(),
                output.to_string_lossy().into_owned(),
                "--no-ocr".to_string(),
                "--no-ui".to_string(),
                "--no-mouse".to_string(),
            ],
        )?;
        let encoded = encode_image_file(&output)?;
        scratch.close();
        Ok(ScreenCapture {
            png_base64: encoded.data,
            width: encoded.width,
            height: encoded.height,
        })
    }
}
