//! Types shared by the Second Opinion chat relay and its clients.
//!
//! The wire protocol is a JSON envelope `{"event": ..., "data": ...}` carried
//! in WebSocket text frames; see [`protocol`].

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use protocol::{ClientEvent, Message, MessageDraft, SendMessage, ServerEvent};
pub use types::{ConnectionId, Role, RoomId};
