use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    /// The named entity does not exist (or is not visible to the caller)
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not authenticated")]
    Unauthorized,

    #[error("no permission")]
    Forbidden,

    /// Missing or malformed input; the message is shown to the client
    #[error("{0}")]
    Validation(String),

    /// Media store or another backend outside the database failed
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the client sees. Server-side detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::NotFound(_) => "not found".into(),
            Self::Upstream(_) => "upstream service unavailable".into(),
            Self::Internal(_) => "internal server error".into(),
            other => other.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("spawn_blocking join error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("{:#}", self);
        } else {
            debug!("client error: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internals_never_reach_the_client() {
        let err = ApiError::Internal(anyhow::anyhow!("UNIQUE constraint failed: users.email"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal server error");

        assert_eq!(ApiError::NotFound("post").public_message(), "not found");
        assert_eq!(ApiError::Unauthorized.public_message(), "not authenticated");
        assert_eq!(ApiError::Forbidden.public_message(), "no permission");
        assert_eq!(
            ApiError::Validation("message is required".into()).public_message(),
            "message is required"
        );
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ApiError::NotFound("user").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Validation(String::new()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Upstream(String::new()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::Conflict(String::new()).status_code(), StatusCode::CONFLICT);
    }
}
