use std::fmt;

/// The crate-wide error type. Domain-level rejections (`not-leader`,
/// `deadlock-rejected`, and friends) are *not* represented here -- per the
/// external interface contract they are 200 responses with an explanatory
/// status field, not failed `Result`s. This type is reserved for the four
/// remaining kinds: malformed input, unreachable/timed-out peers, and
/// unexpected internal failures.
#[derive(Debug, Clone)]
pub enum Error {
    /// A request body was missing a field or carried an out-of-range value.
    Validation(String),
    /// A peer could not be reached, timed out, or returned a malformed body.
    Transport(String),
    /// Anything else that should not have happened.
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Internal(err.to_string())
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "status": "error", "message": self.to_string() }));
        (status, body).into_response()
    }
}
