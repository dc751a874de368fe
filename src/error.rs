// src/error.rs

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// A single field-level validation failure reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub kind: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("Authentication session expired")]
    SessionExpired,

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::SessionExpired => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    /// 401 and 403 both mean the current credentials are not good enough.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ApiError::Http { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Text that is safe to show in a toast. Backend-provided messages pass
    /// through; transport and decoding internals do not.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { message, .. } => message.clone(),
            ApiError::SessionExpired => self.to_string(),
            ApiError::Network(_) => "Unable to reach the server".to_string(),
            ApiError::Decode(_) | ApiError::Stream(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Model is required")]
    MissingModel,

    #[error("You must be logged in to send messages")]
    NotAuthenticated,

    #[error("No conversation is selected")]
    NoConversation,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Unauthorized: Admin access required")]
    Forbidden,

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not determine {0} directory")]
    NoDirectory(&'static str),
}

/// Failures that stop the client from starting or keep the REPL from
/// reading input.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Terminal IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Selected model does not support image uploads")]
    ModelLacksVision,

    #[error("Please select image files only")]
    NoImages,

    #[error("Maximum {max} images allowed per message")]
    TooMany { max: usize },

    #[error("Total image size cannot exceed {max_mb}MB")]
    TooLarge { max_mb: usize },

    #[error("Failed to process {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
