//! Error taxonomy for the search aggregation and download orchestration core.
//!
//! Every variant carries a stable `code()` and a human-readable message; the
//! propagation policy in §7 is: adapter-local errors (`Transport`,
//! `HTTPStatus`, `MalformedResponse`, `RateLimited`, `Timeout`) never abort an
//! aggregated search, they populate a per-indexer slot instead. Durable-store
//! failures on the critical path (queue transitions) are surfaced as
//! `Internal`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited")]
    RateLimited,

    #[error("timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    HTTPStatus(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    /// Stable machine-readable code, used by HTTP responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Unauthenticated => "unauthenticated",
            Error::Forbidden => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::RateLimited => "rate_limited",
            Error::Timeout => "timeout",
            Error::Transport(_) => "transport",
            Error::HTTPStatus(_) => "http_status",
            Error::MalformedResponse(_) => "malformed_response",
            Error::IntegrityMismatch(_) => "integrity_mismatch",
            Error::Conflict(_) => "conflict",
            Error::Internal(_) => "internal",
            Error::Config(_) => "internal",
            Error::Http(_) => "transport",
            Error::Xml(_) => "malformed_response",
            Error::Yaml(_) => "internal",
            Error::Json(_) => "malformed_response",
            Error::Io(_) => "internal",
            Error::Url(_) => "invalid_argument",
            Error::Regex(_) => "internal",
            Error::Database(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) | Error::Url(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Transport(_)
            | Error::HTTPStatus(_)
            | Error::MalformedResponse(_)
            | Error::IntegrityMismatch(_)
            | Error::Http(_)
            | Error::Xml(_)
            | Error::Json(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, Error::Internal(_) | Error::Database(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
