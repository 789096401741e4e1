//! Request admission middleware.
//!
//! Installed with `from_fn_with_state` on the whole router so every request,
//! whatever its route, spends one token from the shared bucket before it is
//! dispatched.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

pub async fn admission(State(app): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if !app.try_admit() {
        debug!("rate limit exceeded: {} {}", request.method(), request.uri().path());
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}
