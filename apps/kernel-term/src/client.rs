use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::echo::EchoSuppressor;
use crate::error::{InvalidState, KernelError};
use crate::execute::{ExecuteCoordinator, ExecuteRun};
use crate::input::{InputBuffer, KeyEffect};
use crate::pump::SharedEcho;
use crate::registry::SessionRegistry;
use crate::service::{KernelService, Session, SessionConfig};
use crate::sink::RenderTarget;

/// One client instance: keystrokes in, rendered session output out.
pub struct KernelClient {
    service: Arc<dyn KernelService>,
    target: RenderTarget,
    input: InputBuffer,
    echo: SharedEcho,
    registry: SessionRegistry,
    executor: ExecuteCoordinator,
}

impl KernelClient {
    pub fn new(service: Arc<dyn KernelService>, target: RenderTarget) -> Self {
        let echo: SharedEcho = Arc::new(Mutex::new(EchoSuppressor::new()));
        let registry = SessionRegistry::new(service.clone(), target.clone(), echo.clone());
        let executor = ExecuteCoordinator::new(service.clone(), target.clone(), registry.active_watch());
        Self {
            service,
            target,
            input: InputBuffer::new(),
            echo,
            registry,
            executor,
        }
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    pub fn executor(&self) -> &ExecuteCoordinator {
        &self.executor
    }

    pub fn input(&self) -> &InputBuffer {
        &self.input
    }

    pub fn active(&self) -> Option<String> {
        self.registry.active()
    }

    /// Applies one keystroke: local echo goes through the interactive gate,
    /// a committed line is recorded for echo suppression and sent.
    pub async fn handle_key(&mut self, ch: char) -> Result<KeyEffect, KernelError> {
        let effect = self.input.feed(ch);
        self.render_effect(&effect);
        if let KeyEffect::Commit(line) = &effect {
            self.submit(line).await?;
        }
        Ok(effect)
    }

    pub async fn handle_input(&mut self, text: &str) -> Result<Vec<KeyEffect>, KernelError> {
        let mut effects = Vec::with_capacity(text.len());
        for ch in text.chars() {
            let effect = self.handle_key(ch).await?;
            if effect != KeyEffect::Ignored {
                effects.push(effect);
            }
        }
        Ok(effects)
    }

    /// Sends a complete line without touching the edit buffer.
    pub async fn submit(&mut self, line: &str) -> Result<(), KernelError> {
        let session_id = self.registry.active().ok_or(InvalidState::NoActiveSession)?;
        let released = self.echo.lock().record(&session_id, line);
        if let Some(released) = released {
            self.target.forward_interactive(released.as_bytes());
        }
        debug!(target: "kernel_term::client", session_id = %session_id, bytes = line.len(), "sending input");
        let sent = self
            .service
            .send_input(&session_id, Bytes::copy_from_slice(line.as_bytes()))
            .await;
        if let Err(err) = sent {
            warn!(target: "kernel_term::client", session_id = %session_id, error = %err, "send input failed");
            self.echo.lock().clear(&session_id);
            return Err(err);
        }
        Ok(())
    }

    pub async fn create_session(&mut self, config: &SessionConfig) -> Result<Session, KernelError> {
        self.registry.create_session(config).await
    }

    /// Switches the render target to `session_id`. Any half-typed line
    /// belonged to the previous session and is discarded.
    pub async fn activate(&mut self, session_id: &str) -> Result<(), KernelError> {
        self.registry.set_active(session_id).await?;
        self.input.reset();
        Ok(())
    }

    pub async fn delete_session(&mut self, session_id: &str) -> Result<(), KernelError> {
        let was_active = self.registry.active().as_deref() == Some(session_id);
        let result = self.registry.delete_session(session_id).await;
        if was_active {
            self.input.reset();
        }
        result
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, KernelError> {
        self.registry.list_sessions().await
    }

    /// Runs `command` on the active session.
    pub async fn execute(&self, command: &str) -> Result<ExecuteRun, KernelError> {
        let session_id = self.registry.active().ok_or(InvalidState::NoActiveSession)?;
        self.executor.execute(&session_id, command).await
    }

    /// Writes the active session's prompt, when the server reported one.
    pub fn render_prompt(&self) {
        let prompt = self
            .registry
            .active()
            .and_then(|id| self.registry.known_session(&id).cloned())
            .and_then(|session| session.prompt_pattern);
        if let Some(prompt) = prompt {
            self.target.forward_interactive(prompt.as_bytes());
        }
    }

    pub async fn shutdown(&mut self) {
        self.registry.shutdown().await;
    }

    fn render_effect(&self, effect: &KeyEffect) {
        if let Some(bytes) = effect.local_echo() {
            self.target.forward_interactive(&bytes);
        }
    }
}
