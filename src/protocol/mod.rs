// Protocol layer - Stratum V1 line framing and message rewriting

pub mod codec;
pub mod messages;

pub use codec::{Frame, LineDecoder};
pub use messages::MessageId;
