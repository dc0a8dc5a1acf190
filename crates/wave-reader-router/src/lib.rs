//! Message routing between the control surface, the coordinator and the
//! per-tab execution agents.
//!
//! Provides:
//! - Wire protocol (typed envelopes, unknown tags rejected at the boundary)
//! - `Router` - endpoint registry with soft-failing send and best-effort broadcast
//! - `Port` / `Inbox` - the sending and receiving halves a context holds

pub mod protocol;
pub mod router;

pub use protocol::{Delivery, Envelope, ProtocolError, Responder, decode_envelope, decode_message};
pub use router::{Inbox, Port, Router, RouterConfig};
