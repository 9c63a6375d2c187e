use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;

/// Everything a task operation can fail with.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task with name '{name}' already exists.")]
    Conflict { name: String },

    #[error("Task with ID {task_id} not found.")]
    NotFound { task_id: i64 },

    #[error("{0}")]
    Validation(String),

    #[error("Task store did not respond in time.")]
    Timeout,

    #[error("Task store error: {0}")]
    Store(#[source] sqlx::Error),
}

impl TaskError {
    /// Maps a store error, turning a unique-index hit on `name` into a conflict.
    pub fn from_store(err: sqlx::Error, name: &str) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                TaskError::Conflict { name: name.to_string() }
            }
            other => TaskError::from(other),
        }
    }
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => TaskError::Timeout,
            other => TaskError::Store(other),
        }
    }
}

impl ResponseError for TaskError {
    fn status_code(&self) -> StatusCode {
        match self {
            TaskError::Conflict { .. } => StatusCode::BAD_REQUEST,
            TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
            TaskError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TaskError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let detail = match self {
            TaskError::Store(e) => {
                error!("Task store failure: {}", e);
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({ "detail": detail }))
    }
}
