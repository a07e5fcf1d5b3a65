use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::io;
use thiserror::Error;

// --- Pipeline Errors ---

/// The caller-supplied stream could not be read to the end.
#[derive(Error, Debug)]
#[error("Failed to read upload stream after {bytes_read} bytes")]
pub struct StreamReadError {
    pub bytes_read: u64,
    #[source]
    pub source: io::Error,
}

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object upload failed for key '{key}'")]
    UploadFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Object delete failed for key '{key}'")]
    DeleteFailed {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Failure modes of a single stream upload.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    StreamRead(#[from] StreamReadError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Referenced {entity} does not exist (constraint: {constraint})")]
    MissingReference {
        entity: &'static str,
        constraint: String,
    },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Association record not found with ID: {0}")]
    NotFound(i64),

    #[error("Database backend error")]
    BackendError(#[from] anyhow::Error),
}

/// Structurally invalid batch input. Rejected before any item is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("batch must contain at least one item")]
    EmptyBatch,
    #[error("parent entity id must be positive, got {0}")]
    InvalidParentId(i64),
    #[error("uploading user id must be positive, got {0}")]
    InvalidUserId(i64),
    #[error("item {index} has an empty filename")]
    EmptyFilename { index: usize },
}

/// Error recorded against one batch item. Never aborts the rest of the batch.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error(transparent)]
    StreamRead(#[from] StreamReadError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ItemError {
    /// Stable name of the failing stage, used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::StreamRead(_) => "stream_read",
            ItemError::ObjectStore(_) => "object_store",
            ItemError::Persistence(_) => "persistence",
        }
    }
}

impl From<UploadError> for ItemError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::StreamRead(e) => ItemError::StreamRead(e),
            UploadError::ObjectStore(e) => ItemError::ObjectStore(e),
        }
    }
}

// --- Web Layer Error ---

#[derive(Error, Debug)]
pub enum AppError {
    // Input validation / request parsing errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing form field: {0}")]
    MissingFormField(String),
    #[error("Error processing multipart form data: {0}")]
    MultipartError(#[from] axum::extract::multipart::MultipartError),
    #[error("Invalid batch: {0}")]
    Validation(#[from] ValidationError),

    #[error("Association record not found with ID: {0}")]
    RecordNotFound(i64),
    #[error("Could not access association data")]
    PersistenceError(#[source] PersistenceError),
    #[error("Image upload failed at the {} stage", .0.kind())]
    ItemFailed(#[source] ItemError),

    // Configuration / Startup errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(id) => AppError::RecordNotFound(id),
            e => AppError::PersistenceError(e),
        }
    }
}

impl From<ItemError> for AppError {
    fn from(err: ItemError) -> Self {
        AppError::ItemFailed(err)
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::InternalServerError(format!("I/O error: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            // 4xx Client Errors
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::MissingFormField(field) => (StatusCode::BAD_REQUEST, format!("Missing form field: {}", field)),
            AppError::MultipartError(e) => (StatusCode::BAD_REQUEST, format!("Invalid multipart form data: {}", e)),
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::RecordNotFound(id) => (StatusCode::NOT_FOUND, format!("Association record not found with ID: {}", id)),

            // 5xx Server Errors
            AppError::PersistenceError(e) => {
                tracing::error!(error.source = ?e, "Persistence error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database operation failed".to_string())
            }
            AppError::ItemFailed(e) => match e {
                ItemError::StreamRead(_) => (StatusCode::BAD_REQUEST, "Upload stream ended unexpectedly".to_string()),
                ItemError::Persistence(PersistenceError::MissingReference { entity, .. }) => {
                    (StatusCode::NOT_FOUND, format!("Referenced {} does not exist", entity))
                }
                ItemError::ObjectStore(_) => {
                    tracing::error!(error.source = ?e, "Object storage error occurred");
                    (StatusCode::BAD_GATEWAY, "Object storage operation failed".to_string())
                }
                ItemError::Persistence(_) => {
                    tracing::error!(error.source = ?e, "Persistence error occurred");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Database operation failed".to_string())
                }
            },
            AppError::ConfigError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error".to_string())
            }
            AppError::InitError(msg) => {
                tracing::error!("Initialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server initialization error".to_string())
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal server error occurred".to_string())
            }
        };

        tracing::error!(error.message=%error_message, error.detail=%self, "Responding with error");

        let body = Json(serde_json::json!({ "error": error_message }));
        (status, body).into_response()
    }
}
