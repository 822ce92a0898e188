use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use opinion_shared::RoomId;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Room unavailable: {0}")]
    RoomUnavailable(RoomId),

    #[error("Relay is shutting down")]
    ShuttingDown,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::RoomUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
