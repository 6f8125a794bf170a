//! editlet: serialized request gateway for generative image editing.
//!
//! The backend serves one generation at a time, so every submission passes
//! through a strict-FIFO admission queue before the backend call. The HTTP
//! transport, the backend client, and fire-and-forget event delivery sit
//! around that core.

mod version;

pub mod backend;
pub mod events;
pub mod queue;
pub mod service;
pub mod transport;

pub use backend::{BackendError, EditRequest, GeminiBackend, GeneratedImage, ImageBackend};
pub use events::{EventLogger, GenerationEvent};
pub use queue::{AdmissionQueue, QueueStatus, TicketId, TurnGuard, TurnTicket};
pub use service::{EditResponse, EditService};
pub use transport::{ServerConfig, serve};
pub use version::EDITLET_VERSION;
