pub mod common;
pub mod crypto;
pub mod log;
pub mod materialize;
pub mod normalize;
pub mod pipeline;
pub mod runner;
pub mod sandbox_dir;

pub use normalize::NormalizedResponse;
pub use pipeline::{run_envelope, PipelineError};
pub use runner::{ExecutionResult, Invocation};
