use thiserror::Error;
use tokio_tungstenite::tungstenite;

use opinion_shared::error::ProtocolError;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
