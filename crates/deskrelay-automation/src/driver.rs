//! AutomationDriver trait: the capability surface behind primitive commands.
//!
//! Implement this trait to back pointer/keyboard/screen commands with a real
//! input stack. `ToolScriptDriver` runs the bundled tool scripts;
//! `UnavailableDriver` is used when no tools are configured.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use deskrelay_sandbox::normalize::EnrichmentError;
use deskrelay_sandbox::runner::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

/// A captured screen, already encoded as base64 PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenCapture {
    pub png_base64: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Automation driver unavailable: {0} is not supported without a tools directory")]
    Unavailable(&'static str),

    #[error("Tool script not found: {0}")]
    ToolMissing(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("{tool} returned unexpected output: {reason}")]
    InvalidOutput { tool: String, reason: String },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Image(#[from] EnrichmentError),

    #[error("Failed to prepare capture directory: {0}")]
    Capture(String),
}

pub trait AutomationDriver: Send + Sync {
    /// Driver name for logging and diagnostics.
    fn name(&self) -> &str;

    fn move_pointer(&self, x: i64, y: i64, duration: f64) -> Result<(), DriverError>;

    fn click(&self, x: i64, y: i64, button: MouseButton, clicks: u32) -> Result<(), DriverError>;

    fn pointer_position(&self) -> Result<(i64, i64), DriverError>;

    /// Scroll by `clicks`, first moving to `at` when given.
    fn scroll(
        &self,
        direction: ScrollDirection,
        clicks: u32,
        at: Option<(i64, i64)>,
    ) -> Result<(), DriverError>;

    fn type_text(&self, text: &str, interval: f64) -> Result<(), DriverError>;

    fn press_key(&self, key: &str) -> Result<(), DriverError>;

    fn capture_screen(&self) -> Result<ScreenCapture, DriverError>;
}

/// Reports every primitive as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDriver;

impl AutomationDriver for UnavailableDriver {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn move_pointer(&self, _x: i64, _y: i64, _duration: f64) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("mouse_move"))
    }

    fn click(&self, _x: i64, _y: i64, _button: MouseButton, _clicks: u32) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("mouse_click"))
    }

    fn pointer_position(&self) -> Result<(i64, i64), DriverError> {
        Err(DriverError::Unavailable("mouse_position"))
    }

    fn scroll(
        &self,
        _direction: ScrollDirection,
        _clicks: u32,
        _at: Option<(i64, i64)>,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("mouse_scroll"))
    }

    fn type_text(&self, _text: &str, _interval: f64) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("keyboard_type"))
    }

    fn press_key(&self, _key: &str) -> Result<(), DriverError> {
        Err(DriverError::Unavailable("keyboard_press"))
    }

    fn capture_screen(&self) -> Result<ScreenCapture, DriverError> {
        Err(DriverError::Unavailable("screenshot"))
    }
}
