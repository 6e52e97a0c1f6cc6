use std::io;

use kernel_term_core::KernelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Kernel(#[from] KernelError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("terminal runtime error: {0}")]
    Runtime(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
