//! The real-time streaming surface: broadcast hub, wire protocol, and the
//! axum router that hosts `/ws` and `/health`.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::Hub;
pub use protocol::{ControlCommand, ControlSink, Envelope, EnvelopeKind, TradeEventPayload};
pub use server::{serve, AppState};
