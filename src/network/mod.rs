// Network layer - session state and the bidirectional relay

pub mod connection;
pub mod relay;

pub use connection::{DisconnectReason, PendingShare, Session, SessionId, SessionState};
pub use relay::SessionRelay;
