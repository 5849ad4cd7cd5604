use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::models::EntityClass;

pub type Result<T> = std::result::Result<T, PopularityError>;

#[derive(Debug, Error)]
pub enum PopularityError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage call timed out")]
    Timeout,

    #[error("{class} {id} no longer exists")]
    EntityMissing { class: EntityClass, id: i64 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("A {0} recompute is already running")]
    AlreadyRunning(EntityClass),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PopularityError {
    /// Errors worth retrying at the storage-call level.
    pub fn is_transient(&self) -> bool {
        matches!(self, PopularityError::Unavailable(_) | PopularityError::Timeout)
    }

    pub fn code(&self) -> &'static str {
        match self {
            PopularityError::Database(_) => "DATABASE_ERROR",
            PopularityError::Unavailable(_) => "STORAGE_UNAVAILABLE",
            PopularityError::Timeout => "STORAGE_TIMEOUT",
            PopularityError::EntityMissing { .. } => "ENTITY_MISSING",
            PopularityError::Cache(_) => "CACHE_ERROR",
            PopularityError::Serialization(_) => "SERIALIZATION_ERROR",
            PopularityError::AlreadyRunning(_) => "ALREADY_RUNNING",
            PopularityError::InvalidInput(_) => "BAD_REQUEST",
            PopularityError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<sqlx::Error> for PopularityError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => PopularityError::Unavailable(err.to_string()),
            _ => PopularityError::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for PopularityError {
    fn from(err: redis::RedisError) -> Self {
        PopularityError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for PopularityError {
    fn from(err: serde_json::Error) -> Self {
        PopularityError::Serialization(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorBody<'a>,
}

impl ResponseError for PopularityError {
    fn status_code(&self) -> StatusCode {
        match self {
            PopularityError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PopularityError::AlreadyRunning(_) => StatusCode::CONFLICT,
            PopularityError::Unavailable(_) | PopularityError::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        HttpResponse::build(status).json(ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        })
    }
}
