pub mod calibration;
pub mod checker;
pub mod core;
pub mod error;
pub mod extractor;
pub mod manifest;
pub mod partition;
pub mod pipeline;
pub mod quantize;
pub mod rewriter;
pub mod runtime;
pub mod shape_engine;
pub mod verifier;

pub use error::{PipelineError, Result};
