//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - REST API routes over the `TransactionLedger` engine
//! - Authentication middleware deriving the acting user from a bearer token
//! - Error-to-response mapping

pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kopa_core::ledger::{LedgerError, RetryPolicy, TransactionLedger};
use kopa_shared::{AppError, JwtService};

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The ledger engine.
    pub ledger: Arc<TransactionLedger>,
    /// JWT service for token validation.
    pub jwt_service: Arc<JwtService>,
    /// Retry policy for lock contention.
    pub retry: RetryPolicy,
}

impl AppState {
    /// Runs an engine call on the blocking pool, retrying lock timeouts.
    ///
    /// Engine calls may wait on locks up to the configured timeout, so they
    /// never run on the async workers.
    pub async fn run<T, F>(&self, operation: &'static str, mut call: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnMut(&TransactionLedger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let retry = self.retry;
        tokio::task::spawn_blocking(move || retry.run(operation, || call(&ledger)))
            .await
            .map_err(|err| AppError::Internal(format!("{operation} did not complete: {err}")))?
            .map_err(ApiError::from)
    }
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes_with_state(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
