//! Member routes: enrollment, status, accounts, statements and limits.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{AppState, error::ApiError, middleware::AuthUser};
use kopa_core::credit::CreditChannel;
use kopa_core::member::{MemberStatus, NewMember};
use kopa_shared::AppError;
use kopa_shared::types::{MemberId, PageRequest};

/// Creates the member routes (requires auth middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/members", post(enroll_member))
        .route("/members/{member_id}", get(get_member))
        .route("/members/{member_id}/status", put(update_status))
        .route("/members/{member_id}/accounts", get(list_accounts))
        .route("/members/{member_id}/transactions", get(list_transactions))
        .route("/members/{member_id}/loan-limit", get(loan_limit))
        .route("/members/{member_id}/loans", get(list_loans))
}

/// Request body for a status change.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// `pending`, `active` or `blocked`.
    pub status: String,
}

/// Query parameters for the loan limit.
#[derive(Debug, Deserialize)]
pub struct LoanLimitQuery {
    /// Application channel; defaults to self-service.
    #[serde(default)]
    pub channel: CreditChannel,
}

/// POST `/members` - Enroll a member and provision both accounts.
async fn enroll_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<NewMember>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = auth.actor_id();
    let member = state
        .run("enroll_member", move |ledger| {
            ledger.enroll_member(payload.clone(), actor)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// GET `/members/{member_id}`
async fn get_member(
    State(state): State<AppState>,
    Path(member_id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .run("get_member", move |ledger| ledger.member(member_id))
        .await?;
    Ok(Json(member))
}

/// PUT `/members/{member_id}/status` - Apply an external status decision.
async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(member_id): Path<MemberId>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(status) = MemberStatus::parse(&payload.status) else {
        return Err(AppError::Validation(format!(
            "Invalid member status '{}'. Must be one of: pending, active, blocked",
            payload.status
        ))
        .into());
    };
    let actor = auth.actor_id();
    info!(member_id = %member_id, role = auth.role(), status = %status, "Member status update requested");
    let member = state
        .run("set_member_status", move |ledger| {
            ledger.set_member_status(member_id, status, actor)
        })
        .await?;
    Ok(Json(member))
}

/// GET `/members/{member_id}/accounts` - Savings and drawdown balances.
async fn list_accounts(
    State(state): State<AppState>,
    Path(member_id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    let accounts = state
        .run("list_accounts", move |ledger| ledger.accounts(member_id))
        .await?;
    Ok(Json(json!({ "accounts": accounts })))
}

/// GET `/members/{member_id}/transactions?page&per_page` - Statement, newest first.
async fn list_transactions(
    State(state): State<AppState>,
    Path(member_id): Path<MemberId>,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let statement = state
        .run("member_transactions", move |ledger| {
            ledger.member_transactions(member_id, &page)
        })
        .await?;
    Ok(Json(statement))
}

/// GET `/members/{member_id}/loan-limit?channel=self_service|staff`
async fn loan_limit(
    State(state): State<AppState>,
    Path(member_id): Path<MemberId>,
    Query(query): Query<LoanLimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = state
        .run("loan_limit", move |ledger| {
            ledger.loan_limit(member_id, query.channel)
        })
        .await?;
    Ok(Json(limit))
}

/// GET `/members/{member_id}/loans`
async fn list_loans(
    State(state): State<AppState>,
    Path(member_id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    let loans = state
        .run("member_loans", move |ledger| ledger.member_loans(member_id))
        .await?;
    Ok(Json(json!({ "loans": loans })))
}
