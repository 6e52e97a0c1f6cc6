//! Forwards one session's output stream to the render target.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::echo::EchoSuppressor;
use crate::error::KernelError;
use crate::events::SessionEvent;
use crate::service::{KernelService, OutputStream};
use crate::sink::{Forwarded, RenderTarget};

pub type SharedEcho = Arc<Mutex<EchoSuppressor>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Cancelled,
    Ended(Option<KernelError>),
}

impl SubscriptionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionState::Active)
    }
}

/// Starts output subscriptions against one render target.
#[derive(Clone)]
pub struct OutputPump {
    service: Arc<dyn KernelService>,
    target: RenderTarget,
    echo: SharedEcho,
    events: broadcast::Sender<SessionEvent>,
}

impl OutputPump {
    pub fn new(
        service: Arc<dyn KernelService>,
        target: RenderTarget,
        echo: SharedEcho,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            service,
            target,
            echo,
            events,
        }
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn echo(&self) -> &SharedEcho {
        &self.echo
    }

    /// Opens StreamOutput for `session_id` and spawns the forwarding loop.
    pub async fn start(&self, session_id: &str) -> Result<PumpHandle, KernelError> {
        let stream = self.service.stream_output(session_id).await?;
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Active);
        let (stop_tx, stop_rx) = oneshot::channel();

        let _ = self.events.send(SessionEvent::PumpStarted {
            session_id: session_id.to_string(),
        });
        debug!(target: "kernel_term::pump", session_id, "output pump started");

        let worker = PumpWorker {
            session_id: session_id.to_string(),
            target: self.target.clone(),
            echo: self.echo.clone(),
            events: self.events.clone(),
            state: state_tx,
            decoder: Utf8Carry::default(),
        };
        let task = tokio::spawn(worker.run(stream, stop_rx));

        Ok(PumpHandle {
            session_id: session_id.to_string(),
            stop: Some(stop_tx),
            task: Some(task),
            state: state_rx,
        })
    }
}

/// Owner's handle on a running pump.
pub struct PumpHandle {
    session_id: String,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<SubscriptionState>,
}

impl PumpHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    /// Stops the pump and waits for its task, which drops the subscription.
    /// Once this returns the pump never touches the sink again. Safe to call
    /// repeatedly and after the stream has already ended.
    pub async fn cancel(&mut self) -> SubscriptionState {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(
                    target: "kernel_term::pump",
                    session_id = %self.session_id,
                    error = %err,
                    "output pump task failed"
                );
            }
        }
        self.state()
    }

    /// Waits until the pump leaves `Active`.
    pub async fn finished(&mut self) -> SubscriptionState {
        let mut rx = self.state.clone();
        match rx.wait_for(|state| !state.is_active()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

struct PumpWorker {
    session_id: String,
    target: RenderTarget,
    echo: SharedEcho,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SubscriptionState>,
    decoder: Utf8Carry,
}

impl PumpWorker {
    async fn run(mut self, mut stream: OutputStream, mut stop: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                // A dropped handle counts as a cancel.
                _ = &mut stop => {
                    drop(stream);
                    self.state.send_replace(SubscriptionState::Cancelled);
                    let _ = self.events.send(SessionEvent::PumpCancelled {
                        session_id: self.session_id.clone(),
                    });
                    debug!(target: "kernel_term::pump", session_id = %self.session_id, "output pump cancelled");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        let text = self.decoder.decode(&chunk.data);
                        if !text.is_empty() {
                            let rendered = self.echo.lock().filter(&self.session_id, &text);
                            if let Some(rendered) = rendered {
                                self.forward(rendered.as_bytes());
                            }
                        }
                    }
                    Some(Err(err)) => {
                        drop(stream);
                        warn!(target: "kernel_term::pump", session_id = %self.session_id, error = %err, "output stream failed");
                        self.finish(Some(err));
                        return;
                    }
                    None => {
                        drop(stream);
                        debug!(target: "kernel_term::pump", session_id = %self.session_id, "output stream ended");
                        self.finish(None);
                        return;
                    }
                }
            }
        }
    }

    fn forward(&self, data: &[u8]) {
        if let Forwarded::Dropped(bytes) = self.target.forward_interactive(data) {
            warn!(
                target: "kernel_term::pump",
                session_id = %self.session_id,
                dropped_bytes = bytes,
                "interactive output dropped while sink was held"
            );
        }
    }

    fn finish(&mut self, error: Option<KernelError>) {
        let mut tail = self.decoder.flush();
        if let Some(held) = self.echo.lock().flush(&self.session_id) {
            tail.insert_str(0, &held);
        }
        if !tail.is_empty() {
            self.forward(tail.as_bytes());
        }
        self.state
            .send_replace(SubscriptionState::Ended(error.clone()));
        let _ = self.events.send(SessionEvent::PumpEnded {
            session_id: self.session_id.clone(),
            error,
        });
    }
}

/// Incremental UTF-8 decoding that keeps a multi-byte character split across
/// chunks intact.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, data: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(data);
        match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.pending = bytes.split_off(valid);
                String::from_utf8_lossy(&bytes).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
