use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver session error: {0}")]
    WebDriverSession(#[from] fantoccini::error::NewSessionError),

    #[error("WebDriver command error: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid CSS selector: {0}")]
    Selector(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("A scrape cycle is already running")]
    CycleInProgress,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::UnknownSource(_) => StatusCode::NOT_FOUND,
            AppError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            AppError::CycleInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
