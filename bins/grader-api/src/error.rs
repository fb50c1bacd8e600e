use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use grader_common::review::ReviewError;
use grader_common::store::StoreError;
use serde::Serialize;

/// Error payload returned by every endpoint on failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code: `VALIDATION_ERROR`, `NOT_FOUND`, `CONFLICT` or
    /// `INTERNAL_ERROR`.
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message,
                },
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message,
                },
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message,
                },
            ),
            ApiError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::SubmissionNotFound(_) | ReviewError::AssessmentNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            ReviewError::NotGraded(_) => ApiError::Conflict(err.to_string()),
            ReviewError::UnknownCriterion(_)
            | ReviewError::CriterionOutOfRange { .. }
            | ReviewError::InvalidAdjustment => ApiError::Validation(err.to_string()),
            ReviewError::Store(e) => e.into(),
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(err: redis::RedisError) -> Self {
        ApiError::Internal(format!("queue error: {}", err))
    }
}
