use axum::extract::{Path, State};
use axum::response::Response;
use mf_core::{ContentHash, Error};

use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::files::attachment;

/// GET /api/hash/{hash}
///
/// Download a cached result under the filename recorded with it.
pub async fn get_by_hash(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    let hash: ContentHash = hash.parse().map_err(|_| Error::not_found("file", &hash))?;
    let stored = ctx.service.fetch_by_hash(&hash)?;
    tracing::debug!(hash = %stored.hash, filename = %stored.filename, "Serving cached file");
    attachment(&stored.path, &stored.filename, &stored.mimetype).await
}
