//! Client-side session bookkeeping and the single active-session pointer.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{InvalidState, KernelError};
use crate::events::SessionEvent;
use crate::pump::{OutputPump, PumpHandle, SharedEcho, SubscriptionState};
use crate::service::{KernelService, Session, SessionConfig};
use crate::sink::RenderTarget;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryState {
    NoActiveSession,
    ActiveSession(String),
}

pub struct SessionRegistry {
    service: Arc<dyn KernelService>,
    pump: OutputPump,
    known: Vec<Session>,
    active: watch::Sender<Option<String>>,
    current: Option<PumpHandle>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(service: Arc<dyn KernelService>, target: RenderTarget, echo: SharedEcho) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (active, _) = watch::channel(None);
        let pump = OutputPump::new(service.clone(), target, echo, events.clone());
        Self {
            service,
            pump,
            known: Vec::new(),
            active,
            current: None,
            events,
        }
    }

    pub fn state(&self) -> RegistryState {
        match self.active() {
            Some(id) => RegistryState::ActiveSession(id),
            None => RegistryState::NoActiveSession,
        }
    }

    pub fn active(&self) -> Option<String> {
        self.active.borrow().clone()
    }

    /// Read-only view of the active session id.
    pub fn active_watch(&self) -> watch::Receiver<Option<String>> {
        self.active.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn known_sessions(&self) -> &[Session] {
        &self.known
    }

    pub fn known_session(&self, session_id: &str) -> Option<&Session> {
        self.known.iter().find(|session| session.id == session_id)
    }

    /// State of the active session's output pump, if one was started.
    pub fn pump_state(&self) -> Option<SubscriptionState> {
        self.current.as_ref().map(PumpHandle::state)
    }

    /// Waits for the active pump to end or be cancelled.
    pub async fn wait_pump_finished(&mut self) -> Option<SubscriptionState> {
        match self.current.as_mut() {
            Some(handle) => Some(handle.finished().await),
            None => None,
        }
    }

    /// Creates a session on the server and remembers it. Does not activate it.
    pub async fn create_session(&mut self, config: &SessionConfig) -> Result<Session, KernelError> {
        let session = self.service.create_session(config).await?;
        info!(target: "kernel_term::registry", session_id = %session.id, command = %config.command, "session created");
        self.remember(session.clone());
        self.emit(SessionEvent::Created {
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Binds `session_id` to the render target. The previous pump is
    /// cancelled and joined before the new subscription is opened.
    pub async fn set_active(&mut self, session_id: &str) -> Result<(), KernelError> {
        if session_id.is_empty() {
            return Err(InvalidState::EmptySessionId.into());
        }
        let already_streaming = self.active().as_deref() == Some(session_id)
            && self.pump_state().is_some_and(|state| state.is_active());
        if already_streaming {
            return Ok(());
        }

        self.stop_pump().await;
        self.discard_backlog();
        self.pump.echo().lock().clear_all();

        if self.known_session(session_id).is_none() {
            self.remember(Session::new(session_id));
        }

        match self.pump.start(session_id).await {
            Ok(handle) => {
                self.current = Some(handle);
                self.active.send_replace(Some(session_id.to_string()));
                self.emit(SessionEvent::Activated {
                    session_id: session_id.to_string(),
                });
                info!(target: "kernel_term::registry", session_id, "session activated");
                Ok(())
            }
            Err(err) => {
                warn!(target: "kernel_term::registry", session_id, error = %err, "failed to open output stream");
                self.deactivate();
                Err(err)
            }
        }
    }

    /// Cancels the active pump and returns to `NoActiveSession`.
    pub async fn clear_active(&mut self) {
        self.stop_pump().await;
        self.discard_backlog();
        self.deactivate();
    }

    /// Deletes `session_id` on the server. The local entry is removed even
    /// when the call fails so the client never points at a session it
    /// considers gone.
    pub async fn delete_session(&mut self, session_id: &str) -> Result<(), KernelError> {
        if session_id.is_empty() {
            return Err(InvalidState::EmptySessionId.into());
        }
        if self.active().as_deref() == Some(session_id) {
            self.clear_active().await;
        }

        let result = self.service.delete_session(session_id).await;
        self.known.retain(|session| session.id != session_id);
        self.pump.echo().lock().clear(session_id);

        match &result {
            Ok(()) => info!(target: "kernel_term::registry", session_id, "session deleted"),
            Err(err) => warn!(
                target: "kernel_term::registry",
                session_id,
                error = %err,
                "delete failed; dropped local entry anyway"
            ),
        }
        self.emit(SessionEvent::Deleted {
            session_id: session_id.to_string(),
        });
        result
    }

    /// Snapshot from the server. Leaves the active session and pump alone.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, KernelError> {
        self.service.list_sessions().await
    }

    /// Cancels any running pump; called on process teardown.
    pub async fn shutdown(&mut self) {
        self.clear_active().await;
    }

    async fn stop_pump(&mut self) {
        if let Some(mut handle) = self.current.take() {
            let state = handle.cancel().await;
            debug!(
                target: "kernel_term::registry",
                session_id = %handle.session_id(),
                state = ?state,
                "previous output pump released"
            );
        }
    }

    /// Output parked during an execution belongs to the pump just stopped.
    fn discard_backlog(&self) {
        let discarded = self.pump.target().discard_interactive_backlog();
        if discarded > 0 {
            debug!(target: "kernel_term::registry", discarded_bytes = discarded, "dropped parked output of previous session");
        }
    }

    fn deactivate(&mut self) {
        if let Some(previous) = self.active.send_replace(None) {
            self.emit(SessionEvent::Deactivated {
                session_id: previous,
            });
        }
    }

    fn remember(&mut self, session: Session) {
        match self.known.iter_mut().find(|known| known.id == session.id) {
            Some(existing) => *existing = session,
            None => self.known.push(session),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
