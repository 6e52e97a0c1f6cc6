//! In-process [`KernelService`] for offline use and tests.
//!
//! It behaves like a shell with echo enabled but runs nothing: input is
//! echoed back followed by the session prompt, and Execute streams the
//! command text back with exit code 0.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::KernelError;
use crate::service::{
    ExecuteChunk, ExecuteStream, KernelService, OutputChunk, OutputStream, Session, SessionConfig,
};

const OUTPUT_CAPACITY: usize = 256;
pub const DEFAULT_PROMPT: &str = "$ ";

struct LoopSession {
    session: Session,
    output: broadcast::Sender<Bytes>,
}

#[derive(Default)]
pub struct LoopbackKernel {
    sessions: Mutex<Vec<LoopSession>>,
}

impl LoopbackKernel {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_session<R>(
        &self,
        operation: &'static str,
        session_id: &str,
        f: impl FnOnce(&LoopSession) -> R,
    ) -> Result<R, KernelError> {
        let sessions = self.sessions.lock();
        sessions
            .iter()
            .find(|s| s.session.id == session_id)
            .map(f)
            .ok_or_else(|| KernelError::transport(operation, format!("session '{session_id}' not found")))
    }
}

#[async_trait]
impl KernelService for LoopbackKernel {
    async fn create_session(&self, config: &SessionConfig) -> Result<Session, KernelError> {
        let prompt = config
            .prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
        let session = Session::new(Uuid::new_v4().to_string()).with_prompt(prompt);
        let (output, _) = broadcast::channel(OUTPUT_CAPACITY);
        debug!(target: "kernel_term::loopback", session_id = %session.id, "loopback session created");
        self.sessions.lock().push(LoopSession {
            session: session.clone(),
            output,
        });
        Ok(session)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), KernelError> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        // Dropping the sender ends every open output stream.
        sessions.retain(|s| s.session.id != session_id);
        if sessions.len() == before {
            return Err(KernelError::transport(
                "delete_session",
                format!("session '{session_id}' not found"),
            ));
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, KernelError> {
        Ok(self
            .sessions
            .lock()
            .iter()
            .map(|s| s.session.clone())
            .collect())
    }

    async fn send_input(&self, session_id: &str, data: Bytes) -> Result<(), KernelError> {
        self.with_session("send_input", session_id, |s| {
            let _ = s.output.send(data);
            if let Some(prompt) = &s.session.prompt_pattern {
                let _ = s.output.send(Bytes::copy_from_slice(prompt.as_bytes()));
            }
        })
    }

    async fn stream_output(&self, session_id: &str) -> Result<OutputStream, KernelError> {
        let rx = self.with_session("stream_output", session_id, |s| s.output.subscribe())?;
        let session_id = session_id.to_string();
        Ok(stream::unfold(rx, move |mut rx| {
            let session_id = session_id.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(data) => return Some((Ok(OutputChunk::new(data)), rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "kernel_term::loopback", session_id = %session_id, skipped, "output subscriber lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed())
    }

    async fn execute(&self, session_id: &str, command: &str) -> Result<ExecuteStream, KernelError> {
        self.with_session("execute", session_id, |_| ())?;
        let mut echoed = command.trim_end().to_string();
        echoed.push('\n');
        let chunks = vec![
            Ok(ExecuteChunk::data(echoed)),
            Ok(ExecuteChunk::exit(Bytes::new(), 0)),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}
