use axum::Router;

use crate::context::AppContext;

mod health;

// ---

pub fn router(ctx: AppContext) -> Router {
    // ---
    Router::new().merge(health::router()).with_state(ctx)
}
