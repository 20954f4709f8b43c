//! Reconcile storage and sweep expired tasks before every request.
//!
//! Other processes may have added or removed cached files since the last
//! request, and removals queued by destroyed tasks are only carried out
//! here. A failed sync is logged and the request still goes through.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::context::AppContext;

pub async fn sync_point_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let service = Arc::clone(&ctx.service);
    match tokio::task::spawn_blocking(move || service.sync_point()).await {
        Ok(Ok(report)) => {
            tracing::trace!(
                discovered = report.store.discovered,
                evicted = report.store.evicted,
                orphans = report.store.orphans_removed,
                swept = report.swept,
                "Sync point"
            );
        }
        Ok(Err(e)) => tracing::warn!("Sync point failed: {e}"),
        Err(e) => tracing::error!("Sync point task failed: {e}"),
    }
    next.run(request).await
}
