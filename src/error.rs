use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("Failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Failed to build response: {0}")]
    ResponseBuild(#[from] axum::http::Error),
}

impl IntoResponse for ShimError {
    fn into_response(self) -> Response {
        let status = match self {
            ShimError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ShimError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ShimError::ResponseBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!("{self}");

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
