//! Client view of the remote kernel service.
//!
//! The wire encoding lives with whichever transport implements
//! [`KernelService`]; the core only sees these shapes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_pattern: Option<String>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt_pattern: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_pattern = Some(prompt.into());
        self
    }
}

/// Parameters for CreateSession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub command: String,
    /// Prompt the server should look for. `None` asks the server to detect it.
    pub prompt: Option<String>,
    #[serde(default)]
    pub raw_output: bool,
}

impl SessionConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            prompt: None,
            raw_output: false,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt.filter(|p| !p.is_empty());
        self
    }

    pub fn with_raw_output(mut self, raw_output: bool) -> Self {
        self.raw_output = raw_output;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub data: Bytes,
}

impl OutputChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteChunk {
    pub data: Bytes,
    /// Present only on the terminal chunk of an execution.
    pub exit_code: Option<i32>,
}

impl ExecuteChunk {
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            exit_code: None,
        }
    }

    pub fn exit(data: impl Into<Bytes>, exit_code: i32) -> Self {
        Self {
            data: data.into(),
            exit_code: Some(exit_code),
        }
    }
}

/// Output of one StreamOutput call. Ends only when the session is deleted or
/// the connection drops.
pub type OutputStream = BoxStream<'static, Result<OutputChunk, KernelError>>;

/// Output of one Execute call, finite.
pub type ExecuteStream = BoxStream<'static, Result<ExecuteChunk, KernelError>>;

#[async_trait]
pub trait KernelService: Send + Sync {
    async fn create_session(&self, config: &SessionConfig) -> Result<Session, KernelError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), KernelError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, KernelError>;

    async fn send_input(&self, session_id: &str, data: Bytes) -> Result<(), KernelError>;

    async fn stream_output(&self, session_id: &str) -> Result<OutputStream, KernelError>;

    async fn execute(&self, session_id: &str, command: &str) -> Result<ExecuteStream, KernelError>;
}
