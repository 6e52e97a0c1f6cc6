pub mod client;
pub mod config;
pub mod echo;
pub mod error;
pub mod events;
pub mod execute;
pub mod input;
pub mod loopback;
pub mod pump;
pub mod registry;
pub mod service;
pub mod sink;
pub mod telemetry;

pub use client::KernelClient;
pub use error::{InvalidState, KernelError, KernelResult};
pub use registry::{RegistryState, SessionRegistry};
pub use service::{KernelService, Session, SessionConfig};
pub use sink::{RenderSink, RenderTarget};
