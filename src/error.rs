//! Error classification for the query pipeline.
//!
//! Every failure is one of three kinds, and the kind alone decides what the
//! caller may see:
//!
//! | Kind | Cause | Status | Body |
//! |------|-------|--------|------|
//! | [`PipelineError::User`] | caller input, moderation | 400 | message + optional data |
//! | [`PipelineError::Application`] | failing dependency, config | 500 | generic message |
//! | [`PipelineError::Unexpected`] | anything else | 500 | generic message |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// The only message a caller receives for non-user failures.
pub const GENERIC_ERROR_MESSAGE: &str =
    "A aparut o eroare neasteptata. Va rugam sa incercati din nou.";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}")]
    User {
        message: String,
        data: Option<Value>,
    },

    #[error("{message}")]
    Application {
        message: String,
        data: Option<Value>,
    },

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
            data: None,
        }
    }

    pub fn user_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::User {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            data: None,
        }
    }

    pub fn application_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::Application {
            message: message.into(),
            data: Some(data),
        }
    }

    /// Wraps a dependency failure, keeping its full chain as log-only data.
    pub fn upstream(message: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::application_with_data(message, Value::String(format!("{:#}", err)))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::User { .. } => StatusCode::BAD_REQUEST,
            Self::Application { .. } | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Writes the server-side record of this error.
    pub fn log(&self) {
        match self {
            Self::User { message, data } => {
                tracing::info!(message = %message, data = ?data, "rejected request");
            }
            Self::Application { message, data } => {
                let detail = data
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "null".to_string());
                tracing::error!("{}: {}", message, detail);
            }
            Self::Unexpected(err) => {
                tracing::error!("unexpected error: {:?}", err);
            }
        }
    }

    /// The JSON body the caller receives.
    pub fn to_body(&self) -> ErrorBody {
        match self {
            Self::User { message, data } => ErrorBody {
                error: message.clone(),
                data: data.clone(),
            },
            Self::Application { .. } | Self::Unexpected(_) => ErrorBody {
                error: GENERIC_ERROR_MESSAGE.to_string(),
                data: None,
            },
        }
    }
}

/// `{ "error": "...", "data": ... }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(self.to_body())).into_response()
    }
}
