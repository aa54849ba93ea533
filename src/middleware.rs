//! Per-request database sessions.
//!
//! [`db_session_middleware`] runs every request inside a session scope of the
//! shared [`Database`], so handlers (and the repositories they call) find the
//! request's session through the context store. The session is closed when
//! the handler returns, fails, or the request future is dropped.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use sqlscope_db::Database;

use crate::error::AppError;

/// Open a session scope around the rest of the request.
pub async fn db_session_middleware(
    State(db): State<Arc<Database>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    match db.scope(next.run(request)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(%method, %uri, error = %e, "Failed to open database session");
            AppError::from(e).into_response()
        }
    }
}

/// Adds [`db_session_middleware`] to a router.
pub trait SessionLayerExt {
    /// Wrap every route added so far in a per-request session scope.
    fn with_db_session(self, db: Arc<Database>) -> Self;
}

impl<S> SessionLayerExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_db_session(self, db: Arc<Database>) -> Self {
        self.layer(middleware::from_fn_with_state(db, db_session_middleware))
    }
}
