pub mod command;
pub mod dispatch;
pub mod driver;
pub mod tool_script;

pub use command::{Command, CommandError, PrimitiveRequest};
pub use dispatch::CommandDispatcher;
pub use driver::{AutomationDriver, DriverError, UnavailableDriver};
pub use tool_script::ToolScriptDriver;
