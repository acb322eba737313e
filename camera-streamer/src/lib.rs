pub mod process;
pub mod stream;
pub mod capture;
pub mod mux;
pub mod server;
pub mod shutdown;
pub mod signal;
pub mod pipeline;
#[cfg(test)]
mod pipeline_test;
pub mod config;
pub mod cli;
pub mod errors;
pub mod serde_helpers;

pub use errors::*;
pub use pipeline::{Pipeline, PipelineState};
