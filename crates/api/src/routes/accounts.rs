//! Account lookup and audit routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use tracing::warn;

use crate::{AppState, error::ApiError};
use kopa_shared::types::LedgerAccountId;

/// Creates the account routes (requires auth middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/{account_id}", get(get_account))
        .route("/accounts/{account_id}/verify", get(verify_account))
}

/// GET `/accounts/{account_id}`
async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<LedgerAccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .run("get_account", move |ledger| ledger.account(account_id))
        .await?;
    Ok(Json(account))
}

/// GET `/accounts/{account_id}/verify` - Replays the account's history
/// against its stored balance.
async fn verify_account(
    State(state): State<AppState>,
    Path(account_id): Path<LedgerAccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .run("verify_account", move |ledger| {
            ledger.verify_account(account_id)
        })
        .await?;
    if !report.is_clean() {
        warn!(account_id = %account_id, discrepancy = ?report.discrepancy, "Account replay mismatch");
    }
    Ok(Json(report))
}
