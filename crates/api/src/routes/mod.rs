//! API route definitions.

use axum::{Router, middleware};

use crate::{AppState, middleware::auth_middleware};

pub mod accounts;
pub mod health;
pub mod loans;
pub mod members;
pub mod payments;
pub mod transactions;

/// Creates the API router: public health check plus authenticated routes.
#[allow(clippy::needless_pass_by_value)]
pub fn api_routes_with_state(state: AppState) -> Router<AppState> {
    let protected_routes = Router::new()
        .merge(members::routes())
        .merge(loans::routes())
        .merge(transactions::routes())
        .merge(payments::routes())
        .merge(accounts::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().merge(health::routes()).merge(protected_routes)
}
