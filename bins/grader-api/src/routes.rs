use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(handlers::create_submission))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/submissions/:id/results", get(handlers::get_results))
        .route("/submissions/:id/reviews", post(handlers::create_review))
        .route("/submissions/:id/reevaluate", post(handlers::reevaluate_submission))
        .route("/status", get(handlers::health_check))
}
