//! One-shot command execution sharing the render target with the pump.
//!
//! While a run is in flight the interactive pump keeps draining its
//! subscription but its output is parked in the target's backlog. The run
//! owns the sink until it ends, fails, or is dropped.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{InvalidState, KernelError};
use crate::service::{ExecuteChunk, ExecuteStream, KernelService};
use crate::sink::RenderTarget;

pub struct ExecuteCoordinator {
    service: Arc<dyn KernelService>,
    target: RenderTarget,
    active: watch::Receiver<Option<String>>,
    in_flight: Arc<Mutex<Option<String>>>,
}

impl ExecuteCoordinator {
    pub fn new(
        service: Arc<dyn KernelService>,
        target: RenderTarget,
        active: watch::Receiver<Option<String>>,
    ) -> Self {
        Self {
            service,
            target,
            active,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn in_flight(&self) -> Option<String> {
        self.in_flight.lock().clone()
    }

    /// Starts `command` on `session_id`. Validation happens before any RPC;
    /// a second call while a run is outstanding is rejected, never queued.
    pub async fn execute(&self, session_id: &str, command: &str) -> Result<ExecuteRun, KernelError> {
        if session_id.is_empty() {
            return Err(InvalidState::EmptySessionId.into());
        }
        if command.trim().is_empty() {
            return Err(InvalidState::EmptyCommand.into());
        }
        let active = self.active.borrow().clone();
        match active {
            None => return Err(InvalidState::NoActiveSession.into()),
            Some(active) if active != session_id => {
                return Err(InvalidState::NotActive {
                    session_id: session_id.to_string(),
                    active,
                }
                .into());
            }
            Some(_) => {}
        }

        let guard = self.claim(session_id)?;
        self.target.clear();
        self.target.set_exit_code(None);

        info!(target: "kernel_term::execute", session_id, command, "executing command");
        // An error here drops the guard, which hands the sink back.
        let stream = self.service.execute(session_id, command).await?;

        Ok(ExecuteRun {
            stream,
            exit_code: None,
            guard: Some(guard),
        })
    }

    fn claim(&self, session_id: &str) -> Result<ExecutionGuard, KernelError> {
        let mut slot = self.in_flight.lock();
        if let Some(running) = slot.as_ref() {
            return Err(InvalidState::ExecutionInFlight {
                session_id: running.clone(),
            }
            .into());
        }
        *slot = Some(session_id.to_string());
        drop(slot);

        let suspended = self.target.suspend_interactive();
        Ok(ExecutionGuard {
            session_id: session_id.to_string(),
            target: self.target.clone(),
            in_flight: self.in_flight.clone(),
            suspended,
        })
    }
}

/// A started execution. Chunks are rendered as they are pulled.
pub struct ExecuteRun {
    stream: ExecuteStream,
    exit_code: Option<i32>,
    guard: Option<ExecutionGuard>,
}

impl ExecuteRun {
    pub fn session_id(&self) -> Option<&str> {
        self.guard.as_ref().map(|guard| guard.session_id.as_str())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    /// Pulls the next chunk and renders it. Returns `None` once the stream
    /// has ended; interactive forwarding is resumed at that point.
    pub async fn next(&mut self) -> Option<Result<ExecuteChunk, KernelError>> {
        let guard = self.guard.as_ref()?;
        match self.stream.next().await {
            Some(Ok(chunk)) => {
                if !chunk.data.is_empty() {
                    guard.target.write_exclusive(&chunk.data);
                }
                if let Some(code) = chunk.exit_code {
                    self.exit_code = Some(code);
                    guard.target.set_exit_code(Some(code));
                    debug!(target: "kernel_term::execute", session_id = %guard.session_id, exit_code = code, "command finished");
                }
                Some(Ok(chunk))
            }
            Some(Err(err)) => {
                warn!(target: "kernel_term::execute", session_id = %guard.session_id, error = %err, "execute stream failed");
                self.guard = None;
                Some(Err(err))
            }
            None => {
                self.guard = None;
                None
            }
        }
    }

    /// Drains the run, returning the exit code if the server sent one.
    pub async fn finish(mut self) -> Result<Option<i32>, KernelError> {
        while let Some(chunk) = self.next().await {
            chunk?;
        }
        Ok(self.exit_code)
    }
}

struct ExecutionGuard {
    session_id: String,
    target: RenderTarget,
    in_flight: Arc<Mutex<Option<String>>>,
    suspended: bool,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if self.suspended {
            self.target.resume_interactive();
        }
        *self.in_flight.lock() = None;
    }
}
