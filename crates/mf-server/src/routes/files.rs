//! Streaming a file back as a download.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use mf_core::Error;
use tokio_util::io::ReaderStream;

use crate::error::AppError;

/// Quote-safe value for `Content-Disposition`.
fn disposition(filename: &str) -> String {
    let clean: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{clean}\"")
}

/// Serve `path` in 64KB chunks as an attachment named `filename`.
pub async fn attachment(path: &Path, filename: &str, mimetype: &str) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| Error::not_found("file", path.display()))?;
    let size = file.metadata().await.map_err(Error::from)?.len();

    let stream = ReaderStream::with_capacity(file, 64 * 1024);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), mimetype.to_string()),
            (header::CONTENT_LENGTH.as_str(), size.to_string()),
            (header::CONTENT_DISPOSITION.as_str(), disposition(filename)),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
