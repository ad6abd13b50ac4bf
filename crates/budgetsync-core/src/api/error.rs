//! Failures reported by the budget backend.
//!
//! Error responses usually carry the same envelope as successful ones, so the
//! backend's `message` is preferred over the raw body when it can be parsed.

use serde::Deserialize;
use thiserror::Error;

/// Bodies longer than this are cut before they end up in logs or snapshots.
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Backend refused access: {0}")]
    AccessDenied(String),

    #[error("Backend rejected the API token")]
    Unauthorized,

    #[error("Not found on backend: {0}")]
    NotFound(String),

    #[error("Backend is rate limiting requests")]
    RateLimited,

    #[error("Backend failure: {0}")]
    ServerError(String),

    #[error("Could not reach backend: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected backend response: {0}")]
    InvalidResponse(String),

    #[error("Backend answered with {0} instead of JSON")]
    NotJson(String),
}

/// The part of the response envelope that explains an error.
#[derive(Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
}

impl ApiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = Self::describe_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("{}: {}", status, detail)),
        }
    }

    /// Envelope `message` when present, otherwise the (truncated) raw body.
    fn describe_body(body: &str) -> String {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.message)
            .filter(|message| !message.trim().is_empty());
        match message {
            Some(message) => Self::truncate(&message),
            None => Self::truncate(body),
        }
    }

    fn truncate(text: &str) -> String {
        if text.len() <= MAX_ERROR_BODY_LENGTH {
            return text.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes)", &text[..end], text.len())
    }
}
