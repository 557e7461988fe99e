//! Primitive command protocol: `{"command": "...", "args": {...}}`.
//!
//! Requests parse into a closed [`Command`] enum with typed arguments.
//! `batch` nests further commands; each nested item parses on its own so a
//! bad item is reported in place instead of failing the whole batch.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::driver::{DriverError, MouseButton, ScrollDirection};
use deskrelay_sandbox::runner::RunnerError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Request must be a JSON object with a `command` field")]
    MalformedRequest,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Raw wire request, before the command name is resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimitiveRequest {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

impl PrimitiveRequest {
    pub fn from_value(value: &Value) -> Result<Self, CommandError> {
        Self::deserialize(value).map_err(|_| CommandError::MalformedRequest)
    }

    pub fn parse(&self) -> Result<Command, CommandError> {
        Command::parse(&self.command, &self.args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    MouseMove {
        x: i64,
        y: i64,
        duration: f64,
    },
    MouseClick {
        x: i64,
        y: i64,
        button: MouseButton,
        clicks: u32,
    },
    MousePosition,
    MouseScroll {
        direction: ScrollDirection,
        clicks: u32,
        at: Option<(i64, i64)>,
    },
    KeyboardType {
        text: String,
        interval: f64,
    },
    KeyboardPress {
        key: String,
    },
    Screenshot,
    Shell {
        command: String,
    },
    Batch(Vec<Result<Command, BatchItemError>>),
}

/// Parse failure of one batch item, reported in that item's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemError(pub String);

#[derive(Deserialize)]
struct MoveArgs {
    x: i64,
    y: i64,
    #[serde(default = "default_duration")]
    duration: f64,
}

#[derive(Deserialize)]
struct ClickArgs {
    x: i64,
    y: i64,
    #[serde(default)]
    button: MouseButton,
    #[serde(default = "default_clicks")]
    clicks: u32,
}

#[derive(Deserialize)]
struct ScrollArgs {
    direction: ScrollDirection,
    #[serde(default = "default_scroll_clicks")]
    clicks: u32,
    x: Option<i64>,
    y: Option<i64>,
}

#[derive(Deserialize)]
struct TypeArgs {
    text: String,
    #[serde(default = "default_interval")]
    interval: f64,
}

#[derive(Deserialize)]
struct PressArgs {
    key: String,
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
}

#[derive(Deserialize)]
struct BatchArgs {
    #[serde(default)]
    commands: Vec<Value>,
}

fn default_duration() -> f64 {
    0.5
}

fn default_clicks() -> u32 {
    1
}

fn default_scroll_clicks() -> u32 {
    3
}

fn default_interval() -> f64 {
    0.05
}

impl Command {
    pub fn parse(name: &str, args: &Value) -> Result<Self, CommandError> {
        let args = normalize_args(args);
        let command = match name {
            "mouse_move" => {
                let a: MoveArgs = typed(name, args)?;
                Command::MouseMove {
                    x: a.x,
                    y: a.y,
                    duration: a.duration,
                }
            }
            "mouse_click" => {
                let a: ClickArgs = typed(name, args)?;
                Command::MouseClick {
                    x: a.x,
                    y: a.y,
                    button: a.button,
                    clicks: a.clicks,
                }
            }
            "mouse_position" => Command::MousePosition,
            "mouse_scroll" => {
                let a: ScrollArgs = typed(name, args)?;
                Command::MouseScroll {
                    direction: a.direction,
                    clicks: a.clicks,
                    at: a.x.zip(a.y),
                }
            }
            "keyboard_type" => {
                let a: TypeArgs = typed(name, args)?;
                Command::KeyboardType {
                    text: a.text,
                    interval: a.interval,
                }
            }
            "keyboard_press" => {
                let a: PressArgs = typed(name, args)?;
                Command::KeyboardPress { key: a.key }
            }
            "screenshot" => Command::Screenshot,
            "powershell" => {
                let a: ShellArgs = typed(name, args)?;
                Command::Shell { command: a.command }
            }
            "batch" => {
                let a: BatchArgs = typed(name, args)?;
                Command::Batch(a.commands.iter().map(parse_batch_item).collect())
            }
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::MouseMove { .. } => "mouse_move",
            Command::MouseClick { .. } => "mouse_click",
            Command::MousePosition => "mouse_position",
            Command::MouseScroll { .. } => "mouse_scroll",
            Command::KeyboardType { .. } => "keyboard_type",
            Command::KeyboardPress { .. } => "keyboard_press",
            Command::Screenshot => "screenshot",
            Command::Shell { .. } => "powershell",
            Command::Batch(_) => "batch",
        }
    }
}

fn parse_batch_item(item: &Value) -> Result<Command, BatchItemError> {
    PrimitiveRequest::from_value(item)
        .and_then(|req| req.parse())
        .map_err(|e| BatchItemError(e.to_string()))
}

fn typed<T: DeserializeOwned>(command: &str, args: Map<String, Value>) -> Result<T, CommandError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| CommandError::InvalidArguments {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

/// `args` may be an object, or an array whose first element is the object.
/// Anything else is treated as no arguments.
pub fn normalize_args(args: &Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map.clone(),
        Value::Array(items) => match items.first() {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}
