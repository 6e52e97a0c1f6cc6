#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use kernel_term_core::service::{
    ExecuteChunk, ExecuteStream, KernelService, OutputChunk, OutputStream, Session, SessionConfig,
};
use kernel_term_core::sink::MemorySink;
use kernel_term_core::KernelError;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

type Feed = mpsc::UnboundedSender<Result<OutputChunk, KernelError>>;

/// Fake kernel whose output streams are driven by the test. Every stream
/// open and release is appended to `log()` as `open:<id>` / `release:<id>`.
#[derive(Default)]
pub struct ScriptedKernel {
    log: Arc<Mutex<Vec<String>>>,
    feeds: Mutex<HashMap<String, Vec<Feed>>>,
    inputs: Mutex<Vec<(String, String)>>,
    next_id: Mutex<u32>,
    pub echo_input: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_open: AtomicBool,
    pub exec_chunks: Mutex<Vec<ExecuteChunk>>,
    pub exec_gate: Option<Arc<Notify>>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exec_gate(gate: Arc<Notify>) -> Self {
        Self {
            exec_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn inputs(&self) -> Vec<(String, String)> {
        self.inputs.lock().clone()
    }

    /// Sends `text` to every open stream of `session_id`. Returns how many
    /// streams were still listening.
    pub fn push(&self, session_id: &str, text: &str) -> usize {
        let mut feeds = self.feeds.lock();
        let Some(list) = feeds.get_mut(session_id) else {
            return 0;
        };
        list.retain(|feed| {
            feed.send(Ok(OutputChunk::new(Bytes::copy_from_slice(text.as_bytes()))))
                .is_ok()
        });
        list.len()
    }

    pub fn fail_stream(&self, session_id: &str, message: &str) {
        if let Some(list) = self.feeds.lock().get_mut(session_id) {
            for feed in list.drain(..) {
                let _ = feed.send(Err(KernelError::transport("stream_output", message)));
            }
        }
    }
}

struct Release {
    log: Arc<Mutex<Vec<String>>>,
    session_id: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.log.lock().push(format!("release:{}", self.session_id));
    }
}

#[async_trait]
impl KernelService for ScriptedKernel {
    async fn create_session(&self, config: &SessionConfig) -> Result<Session, KernelError> {
        let mut next = self.next_id.lock();
        *next += 1;
        let session = Session::new(format!("s{next}"));
        Ok(match &config.prompt {
            Some(prompt) => session.with_prompt(prompt.clone()),
            None => session,
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), KernelError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(KernelError::transport("delete_session", "server unavailable"));
        }
        self.feeds.lock().remove(session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, KernelError> {
        Ok(Vec::new())
    }

    async fn send_input(&self, session_id: &str, data: Bytes) -> Result<(), KernelError> {
        let text = String::from_utf8_lossy(&data).into_owned();
        self.inputs.lock().push((session_id.to_string(), text.clone()));
        if self.echo_input.load(Ordering::SeqCst) {
            self.push(session_id, &text);
        }
        Ok(())
    }

    async fn stream_output(&self, session_id: &str) -> Result<OutputStream, KernelError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(KernelError::transport("stream_output", "refused"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(tx);
        self.log.lock().push(format!("open:{session_id}"));
        let release = Release {
            log: self.log.clone(),
            session_id: session_id.to_string(),
        };
        Ok(stream::unfold((rx, release), |(mut rx, release)| async move {
            rx.recv().await.map(|item| (item, (rx, release)))
        })
        .boxed())
    }

    async fn execute(&self, _session_id: &str, _command: &str) -> Result<ExecuteStream, KernelError> {
        let chunks: Vec<Result<ExecuteChunk, KernelError>> =
            self.exec_chunks.lock().iter().cloned().map(Ok).collect();
        match self.exec_gate.clone() {
            Some(gate) => Ok(stream::once(async move {
                gate.notified().await;
            })
            .filter_map(|_| async { None::<Result<ExecuteChunk, KernelError>> })
            .chain(stream::iter(chunks))
            .boxed()),
            None => Ok(stream::iter(chunks).boxed()),
        }
    }
}

/// Polls the sink until `predicate` holds for its screen.
pub async fn wait_for_screen(sink: &MemorySink, predicate: impl Fn(&str) -> bool) {
    loop {
        if predicate(&sink.screen()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
