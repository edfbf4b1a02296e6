use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// `{success, message, data?, error?}`, the shape every webhook answers with.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Envelope {
    pub(crate) fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub(crate) fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }

    pub(crate) fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub(crate) fn respond(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Request problems reported before any pipeline work starts.
#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error("Request body must be a JSON object")]
    NotJson(String),
    #[error("Missing required field: url")]
    MissingUrl,
    #[error("Invalid URL format")]
    InvalidUrl,
    #[error("No pending source configured")]
    NoPendingSource,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotJson(_) | Self::MissingUrl | Self::InvalidUrl => StatusCode::BAD_REQUEST,
            Self::NoPendingSource => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::NotJson(detail) => detail.clone(),
            Self::MissingUrl => "URL is required".to_string(),
            Self::InvalidUrl => "URL must be a valid HTTP/HTTPS URL".to_string(),
            Self::NoPendingSource => "NOTION_API_KEY and NOTION_SOURCE_DB_ID must be set".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Envelope::failed(self.to_string(), self.detail()).respond(self.status())
    }
}
