use crate::error::KernelError;

/// Lifecycle notifications published by the session registry and its pumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { session_id: String },
    Activated { session_id: String },
    Deactivated { session_id: String },
    Deleted { session_id: String },
    PumpStarted { session_id: String },
    PumpCancelled { session_id: String },
    /// The output stream finished on its own. `error` is `None` for a clean
    /// close; reconnecting is left to whoever receives this.
    PumpEnded {
        session_id: String,
        error: Option<KernelError>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { session_id }
            | SessionEvent::Activated { session_id }
            | SessionEvent::Deactivated { session_id }
            | SessionEvent::Deleted { session_id }
            | SessionEvent::PumpStarted { session_id }
            | SessionEvent::PumpCancelled { session_id }
            | SessionEvent::PumpEnded { session_id, .. } => session_id,
        }
    }
}
