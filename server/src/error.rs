use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid {column} value in {table}: {value:?}")]
    InvalidRow {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no Evolution API config for tenant {tenant_id}")]
    MissingConfig { tenant_id: String },

    #[error("invalid destination phone {0:?}")]
    InvalidPhone(String),

    #[error("evolution api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("evolution api error {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors surfaced by HTTP handlers as `{ success: false, error }`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Instance not found")]
    InstanceNotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InstanceNotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Provider(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}
