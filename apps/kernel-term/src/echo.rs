//! Drops the remote shell's echo of a line the user just committed.
//!
//! Each session holds at most one pending echo. It is consumed by the first
//! matching output and never suppresses anything twice.

use std::collections::HashMap;

use tracing::trace;

#[derive(Debug, Default)]
struct PendingEcho {
    line: String,
    held: String,
}

#[derive(Debug, Default)]
pub struct EchoSuppressor {
    pending: HashMap<String, PendingEcho>,
}

impl EchoSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the line just committed for `session_id`, replacing any echo
    /// still pending from an earlier commit. Text held for that earlier echo
    /// can no longer complete it and is returned for rendering.
    pub fn record(&mut self, session_id: &str, line: &str) -> Option<String> {
        let previous = if line.is_empty() {
            self.pending.remove(session_id)
        } else {
            self.pending.insert(
                session_id.to_string(),
                PendingEcho {
                    line: line.to_string(),
                    held: String::new(),
                },
            )
        };
        previous.and_then(|pending| non_empty(pending.held))
    }

    pub fn last_committed(&self, session_id: &str) -> Option<&str> {
        self.pending.get(session_id).map(|p| p.line.as_str())
    }

    /// Exact single-chunk check: true only for a chunk equal to the pending
    /// line, and only the first time.
    pub fn should_suppress(&mut self, session_id: &str, chunk: &str) -> bool {
        let matched = self
            .pending
            .get(session_id)
            .is_some_and(|pending| pending.held.is_empty() && pending.line == chunk);
        if matched {
            self.pending.remove(session_id);
        }
        matched
    }

    /// Reassembling filter used by the output pump. Returns the text that
    /// should reach the sink, or `None` when everything was suppressed or is
    /// being held while a split echo arrives.
    pub fn filter(&mut self, session_id: &str, chunk: &str) -> Option<String> {
        let Some(pending) = self.pending.get_mut(session_id) else {
            return non_empty(chunk.to_string());
        };

        let mut candidate = std::mem::take(&mut pending.held);
        candidate.push_str(chunk);

        if candidate == pending.line {
            trace!(target: "kernel_term::echo", session_id, "suppressed echoed line");
            self.pending.remove(session_id);
            return None;
        }
        if pending.line.starts_with(&candidate) {
            pending.held = candidate;
            return None;
        }
        if let Some(rest) = candidate.strip_prefix(pending.line.as_str()) {
            trace!(target: "kernel_term::echo", session_id, "suppressed echoed line prefix");
            let rest = rest.to_string();
            self.pending.remove(session_id);
            return non_empty(rest);
        }
        non_empty(candidate)
    }

    /// Releases text held for a partial match.
    pub fn flush(&mut self, session_id: &str) -> Option<String> {
        let pending = self.pending.get_mut(session_id)?;
        non_empty(std::mem::take(&mut pending.held))
    }

    /// Forgets the pending echo and any held text for `session_id`.
    pub fn clear(&mut self, session_id: &str) {
        self.pending.remove(session_id);
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}
