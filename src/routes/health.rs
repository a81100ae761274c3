// src/routes/health.rs
//! Health check endpoint for the compactor service.
//!
//! This module defines the `/health` route used by container orchestrators
//! (e.g., Docker, Kubernetes) to verify that the process is up and that the
//! background scheduler is still ticking. It is a sibling module in the
//! `routes` directory and follows the Explicit Module Boundary Pattern (EMBP):
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::context::AppContext;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    scheduler: &'static str,
    check_interval_secs: u64,
}

/// Handle `GET /health`.
///
/// Returns `200 ok` while the scheduler loop is alive and `503 degraded`
/// once it has stopped. Does not touch the database.
async fn health(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthResponse>) {
    // ---
    let running = ctx.scheduler_running();
    let (code, status, scheduler) = if running {
        (StatusCode::OK, "ok", "running")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "stopped")
    };

    let body = HealthResponse {
        status,
        scheduler,
        check_interval_secs: ctx.config.check_interval.as_secs(),
    };
    (code, Json(body))
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppContext> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Arc;

    use crate::store::MemoryStore;
    use crate::Config;

    #[tokio::test]
    async fn test_health_reports_scheduler_state() {
        // ---
        let ctx = AppContext::new(Arc::new(MemoryStore::new()), Config::default());

        let (code, Json(body)) = health(State(ctx.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.scheduler, "stopped");

        ctx.set_scheduler_running(true);
        let (code, Json(body)) = health(State(ctx)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.check_interval_secs, 60);
    }
}
