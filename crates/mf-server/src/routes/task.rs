use axum::extract::{Path, State};
use axum::Json;
use mf_convert::TaskSnapshot;
use mf_core::{Error, Fingerprint};

use crate::context::AppContext;
use crate::error::AppError;

/// GET /api/task/{id}
///
/// A finished task that failed answers with its error instead of the JSON.
pub async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<TaskSnapshot>, AppError> {
    let fingerprint: Fingerprint = id.parse().map_err(|_| Error::not_found("task", &id))?;
    let snapshot = ctx
        .service
        .poll(&fingerprint)
        .ok_or_else(|| Error::not_found("task", &id))?;

    if snapshot.task_finished {
        if let Some(failure) = &snapshot.error {
            return Err(Error::TaskFailed(failure.clone()).into());
        }
    }
    Ok(Json(snapshot))
}
