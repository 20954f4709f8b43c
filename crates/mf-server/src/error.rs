//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`mf_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on library calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: mf_core::Error,
}

impl AppError {
    pub fn new(inner: mf_core::Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &mf_core::Error {
        &self.inner
    }
}

impl From<mf_core::Error> for AppError {
    fn from(e: mf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.inner, "Server error in API handler");
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request rejected");
        }

        let mut body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "fault": self.inner.kind(),
        });
        let (stdout, stderr) = match &self.inner {
            mf_core::Error::Conversion { stdout, stderr, .. } => {
                (Some(stdout.as_str()), Some(stderr.as_str()))
            }
            mf_core::Error::TaskFailed(failure) => {
                (failure.stdout.as_deref(), failure.stderr.as_deref())
            }
            _ => (None, None),
        };
        if let Some(stdout) = stdout {
            body["stdout"] = stdout.into();
        }
        if let Some(stderr) = stderr {
            body["stderr"] = stderr.into();
        }

        (status, axum::Json(body)).into_response()
    }
}
