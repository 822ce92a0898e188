//! # opinion-server
//!
//! Real-time chat relay for Second Opinion consultations.
//!
//! - **Room registry** (one actor task per room) holding in-memory history
//! - **WebSocket endpoint** speaking the `join-room` / `send-message` /
//!   `chat-history` / `receive-message` event protocol
//! - **REST API** (axum) for health checks and read-only history inspection

pub mod api;
pub mod config;
pub mod error;
pub mod relay;
pub mod session;

pub use api::{build_router, serve, serve_listener, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
pub use relay::{Connection, RoomRegistry};
