use axum::extract::State;
use axum::Json;
use mf_convert::{check_tools, ToolInfo};
use mf_core::FormatCatalog;

use crate::context::AppContext;

/// GET /api/formats
pub async fn list_formats(State(ctx): State<AppContext>) -> Json<FormatCatalog> {
    Json(ctx.service.formats().clone())
}

/// GET /api/tools
pub async fn list_tools(State(ctx): State<AppContext>) -> Json<Vec<ToolInfo>> {
    Json(check_tools(&ctx.config.tools))
}
