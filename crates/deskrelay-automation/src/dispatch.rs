//! Executes parsed primitive commands against an [`AutomationDriver`].

use std::sync::Arc;

use deskrelay_core::config::ExecutionConfig;
use deskrelay_sandbox::normalize::normalize_command_output;
use deskrelay_sandbox::runner::{self, Invocation};
use serde_json::{json, Value};

use crate::command::{Command, CommandError, PrimitiveRequest};
use crate::driver::AutomationDriver;

#[derive(Clone)]
pub struct CommandDispatcher {
    driver: Arc<dyn AutomationDriver>,
    exec: ExecutionConfig,
}

impl CommandDispatcher {
    pub fn new(driver: Arc<dyn AutomationDriver>, exec: ExecutionConfig) -> Self {
        Self { driver, exec }
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Parse and run one `{command, args}` request body.
    pub fn handle_request(&self, body: &Value) -> Result<Value, CommandError> {
        let request = PrimitiveRequest::from_value(body)?;
        tracing::info!(command = %request.command, "Primitive command");
        let command = request.parse()?;
        self.execute(&command)
    }

    pub fn execute(&self, command: &Command) -> Result<Value, CommandError> {
        let driver = self.driver.as_ref();
        tracing::debug!(command = command.name(), driver = driver.name(), "Dispatching command");
        let response = match command {
            Command::MouseMove { x, y, duration } => {
                driver.move_pointer(*x, *y, *duration)?;
                json!({
                    "success": true,
                    "message": format!("Moved mouse to ({}, {})", x, y),
                    "x": x,
                    "y": y,
                })
            }
            Command::MouseClick {
                x,
                y,
                button,
                clicks,
            } => {
                driver.click(*x, *y, *button, *clicks)?;
                json!({
                    "success": true,
                    "message": format!("Clicked {} at ({}, {})", button.as_str(), x, y),
                    "x": x,
                    "y": y,
                })
            }
            Command::MousePosition => {
                let (x, y) = driver.pointer_position()?;
                json!({
                    "success": true,
                    "coordinates": { "x": x, "y": y },
                    "message": format!("Mouse at ({}, {})", x, y),
                })
            }
            Command::MouseScroll {
                direction,
                clicks,
                at,
            } => {
                driver.scroll(*direction, *clicks, *at)?;
                json!({
                    "success": true,
                    "message": format!("Scrolled {} {} clicks", direction.as_str(), clicks),
                })
            }
            Command::KeyboardType { text, interval } => {
                driver.type_text(text, *interval)?;
                let length = text.chars().count();
                json!({
                    "success": true,
                    "message": format!("Typed {} characters", length),
                    "length": length,
                })
            }
            Command::KeyboardPress { key } => {
                driver.press_key(key)?;
                json!({
                    "success": true,
                    "message": format!("Pressed key: {}", key),
                    "key": key,
                })
            }
            Command::Screenshot => {
                let capture = driver.capture_screen()?;
                json!({
                    "success": true,
                    "screenshot": capture.png_base64,
                    "width": capture.width,
                    "height": capture.height,
                    "message": "Screenshot captured",
                })
            }
            Command::Shell { command } => {
                let invocation = Invocation::Inline {
                    command: command.clone(),
                };
                let result = runner::execute(&invocation, &self.exec)?;
                normalize_command_output(&result, self.exec.shell_timeout_secs).into_json()
            }
            Command::Batch(items) => {
                let results: Vec<Value> = items
                    .iter()
                    .map(|item| {
                        let outcome = match item {
                            Ok(cmd) => self.execute(cmd).map_err(|e| e.to_string()),
                            Err(e) => Err(e.0.clone()),
                        };
                        outcome.unwrap_or_else(|error| json!({ "success": false, "error": error }))
                    })
                    .collect();
                json!({
                    "success": true,
                    "count": results.len(),
                    "results": results,
                })
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, MouseButton, ScreenCapture, ScrollDirection, UnavailableDriver};
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDriver {
        calls: Mutex<Vec<String>>,
    }

    impl AutomationDriver for RecordingDriver {
        fn name(&self) -> &str {
            "recording"
        }
        fn move_pointer(&self, x: i64, y: i64, _duration: f64) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(format!("move {} {}", x, y));
            Ok(())
        }
        fn click(&self, x: i64, y: i64, button: MouseButton, clicks: u32) -> Result<(), DriverError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("click {} {} {} {}", x, y, button.as_str(), clicks));
            Ok(())
        }
        fn pointer_position(&self) -> Result<(i64, i64), DriverError> {
            Ok((7, 8))
        }
        fn scroll(
            &self,
            direction: ScrollDirection,
            clicks: u32,
            _at: Option<(i64, i64)>,
        ) -> Result<(), DriverError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("scroll {} {}", direction.as_str(), clicks));
            Ok(())
        }
        fn type_text(&self, text: &str, _interval: f64) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(format!("type {}", text));
            Ok(())
        }
        fn press_key(&self, key: &str) -> Result<(), DriverError> {
            self.calls.lock().unwrap().push(format!("press {}", key));
            Ok(())
        }
        fn capture_screen(&self) -> Result<ScreenCapture, DriverError> {
            Ok(ScreenCapture {
                png_base64: "iVBOR".to_string(),
                width: 1920,
                height: 1080,
            })
        }
    }

    fn exec() -> ExecutionConfig {
        ExecutionConfig {
            interpreter: PathBuf::from("sh"),
            shell: PathBuf::from("sh"),
            shell_args: vec!["-c".to_string()],
            script_timeout_secs: 10,
            shell_timeout_secs: 10,
            sandbox_root: None,
        }
    }

    fn recording() -> (Arc<RecordingDriver>, CommandDispatcher) {
        let driver = Arc::new(RecordingDriver::default());
        let dispatcher = CommandDispatcher::new(driver.clone(), exec());
        (driver, dispatcher)
    }

    #[test]
    fn test_mouse_click_response() {
        let (driver, dispatcher) = recording();
        let resp = dispatcher
            .handle_request(&json!({"command": "mouse_click", "args": {"x": 100, "y": 200}}))
            .unwrap();
        assert_eq!(
            resp,
            json!({"success": true, "message": "Clicked left at (100, 200)", "x": 100, "y": 200})
        );
        assert_eq!(*driver.calls.lock().unwrap(), vec!["click 100 200 left 1"]);
    }

    #[test]
    fn test_other_primitive_responses() {
        let (_driver, dispatcher) = recording();
        assert_eq!(
            dispatcher
                .handle_request(&json!({"command": "mouse_position"}))
                .unwrap(),
            json!({"success": true, "coordinates": {"x": 7, "y": 8}, "message": "Mouse at (7, 8)"})
        );
        assert_eq!(
            dispatcher
                .handle_request(&json!({"command": "keyboard_type", "args": {"text": "héllo"}}))
                .unwrap(),
            json!({"success": true, "message": "Typed 5 characters", "length": 5})
        );
        assert_eq!(
            dispatcher
                .handle_request(&json!({"command": "mouse_scroll", "args": {"direction": "up", "clicks": 2}}))
                .unwrap(),
            json!({"success": true, "message": "Scrolled up 2 clicks"})
        );
        let shot = dispatcher
            .handle_request(&json!({"command": "screenshot"}))
            .unwrap();
        assert_eq!(shot["width"], 1920);
        assert_eq!(shot["message"], "Screenshot captured");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_command() {
        let (_driver, dispatcher) = recording();
        let resp = dispatcher
            .handle_request(&json!({"command": "powershell", "args": {"command": "echo hi"}}))
            .unwrap();
        assert_eq!(resp, json!({"success": true, "output": "hi", "error": null}));
    }

    #[test]
    fn test_batch_collects_per_item_results() {
        let (driver, dispatcher) = recording();
        let resp = dispatcher
            .handle_request(&json!({
                "command": "batch",
                "args": {"commands": [
                    {"command": "mouse_move", "args": {"x": 1, "y": 2}},
                    {"command": "explode"},
                    {"command": "keyboard_press", "args": {"key": "enter"}},
                ]}
            }))
            .unwrap();
        assert_eq!(resp["success"], true);
        assert_eq!(resp["count"], 3);
        assert_eq!(resp["results"][0]["message"], "Moved mouse to (1, 2)");
        assert_eq!(
            resp["results"][1],
            json!({"success": false, "error": "Unknown command: explode"})
        );
        assert_eq!(resp["results"][2]["key"], "enter");
        assert_eq!(
            *driver.calls.lock().unwrap(),
            vec!["move 1 2", "press enter"]
        );
    }

    #[test]
    fn test_unavailable_driver() {
        let dispatcher = CommandDispatcher::new(Arc::new(UnavailableDriver), exec());
        let err = dispatcher
            .handle_request(&json!({"command": "mouse_move", "args": {"x": 1, "y": 2}}))
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Driver(DriverError::Unavailable("mouse_move"))
        ));

        let batch = dispatcher
            .handle_request(&json!({"command": "batch", "args": {"commands": [{"command": "screenshot"}]}}))
            .unwrap();
        assert_eq!(batch["results"][0]["success"], false);
    }

    #[test]
    fn test_unknown_command_is_error() {
        let (_driver, dispatcher) = recording();
        assert!(matches!(
            dispatcher.handle_request(&json!({"command": "format_disk"})),
            Err(CommandError::UnknownCommand(_))
        ));
    }
}
