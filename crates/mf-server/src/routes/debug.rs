use axum::extract::State;
use axum::Json;
use mf_convert::DebugTask;

use crate::context::AppContext;

/// GET /api/debug/tasks
pub async fn list_tasks(State(ctx): State<AppContext>) -> Json<Vec<DebugTask>> {
    Json(ctx.service.debug_tasks())
}
