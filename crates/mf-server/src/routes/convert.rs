//! `GET|POST /api/convert/{input}/{output}`.
//!
//! GET converts the model at `?uri=`, POST converts the request body.
//! Query parameters:
//!
//! - `as_task=1|true`: return the task JSON immediately (implies `get_hash`)
//! - `get_hash=1|true`: cache the result and answer with its hash
//! - `timeout=<seconds>`: how long to wait before answering with the task
//!   JSON instead; `<= 0` waits forever

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mf_convert::{ConversionRequest, Task, TaskOutput};
use mf_core::Error;
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::files::attachment;

#[derive(Debug, Default, Deserialize)]
pub struct ConvertParams {
    pub uri: Option<String>,
    pub as_task: Option<String>,
    pub get_hash: Option<String>,
    pub timeout: Option<String>,
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true"))
}

impl ConvertParams {
    pub fn as_task(&self) -> bool {
        is_true(self.as_task.as_deref())
    }

    pub fn get_hash(&self) -> bool {
        self.as_task() || is_true(self.get_hash.as_deref())
    }

    pub fn timeout(&self) -> Result<Option<Duration>, Error> {
        let Some(raw) = self.timeout.as_deref() else {
            return Ok(None);
        };
        let invalid = || Error::Validation(format!("Invalid timeout parameter: {raw}"));
        let secs: f64 = raw.trim().parse().map_err(|_| invalid())?;
        if secs.is_nan() {
            return Err(invalid());
        }
        if secs <= 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(secs).map(Some).map_err(|_| invalid())
    }
}

/// GET /api/convert/{input}/{output}?uri=...
pub async fn convert_uri(
    State(ctx): State<AppContext>,
    Path((input, output)): Path<(String, String)>,
    Query(params): Query<ConvertParams>,
) -> Result<Response, AppError> {
    let uri = params
        .uri
        .clone()
        .ok_or_else(|| Error::Validation("no URI specified".into()))?;
    run(ctx, ConversionRequest::from_uri(input, output, uri), &params).await
}

/// POST /api/convert/{input}/{output}
pub async fn convert_data(
    State(ctx): State<AppContext>,
    Path((input, output)): Path<(String, String)>,
    Query(params): Query<ConvertParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(ctx, ConversionRequest::from_bytes(input, output, body), &params).await
}

async fn run(
    ctx: AppContext,
    request: ConversionRequest,
    params: &ConvertParams,
) -> Result<Response, AppError> {
    let timeout = params.timeout()?;
    let task = ctx.service.submit(request.cached(params.get_hash()))?;

    if params.as_task() {
        if task.is_finished() {
            task.touch();
        }
        return Ok(Json(task.snapshot()).into_response());
    }

    match ctx.service.await_and_consume(task.fingerprint(), timeout).await? {
        None => Ok((StatusCode::ACCEPTED, Json(task.snapshot())).into_response()),
        Some(TaskOutput::Cached { .. }) => Ok(Json(task.snapshot()).into_response()),
        Some(TaskOutput::File { path, filename }) => {
            let mimetype = ctx.service.formats().mimetype(&task.request().output_format);
            attachment(&path, &filename, mimetype).await
        }
    }
}
