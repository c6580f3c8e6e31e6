//! Loan product and loan lifecycle routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{AppState, error::ApiError, middleware::AuthUser};
use kopa_core::credit::CreditChannel;
use kopa_core::ledger::{LoanApplication, PenaltyCharge, SweepReport};
use kopa_core::loan::NewLoanType;
use kopa_shared::types::{LoanId, LoanTypeId, MemberId, Money};

/// Creates the loan routes (requires auth middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/loan-types", get(list_loan_types).post(create_loan_type))
        .route("/loans", post(apply_for_loan))
        .route("/loans/sweep", post(sweep))
        .route("/loans/{loan_id}", get(get_loan))
        .route("/loans/{loan_id}/approve", post(approve_loan))
        .route("/loans/{loan_id}/reject", post(reject_loan))
        .route("/loans/{loan_id}/disburse", post(disburse_loan))
}

/// Request body for a loan application.
#[derive(Debug, Deserialize)]
pub struct ApplyLoanRequest {
    /// Borrower.
    pub member_id: MemberId,
    /// Product.
    pub loan_type_id: LoanTypeId,
    /// Requested principal in the ledger currency.
    pub principal: Decimal,
    /// Defaults to self-service.
    #[serde(default)]
    pub channel: CreditChannel,
}

/// Request body for a rejection.
#[derive(Debug, Deserialize)]
pub struct RejectLoanRequest {
    /// Reason shown to the member.
    pub reason: String,
}

/// Query parameters for the maintenance sweep.
#[derive(Debug, Default, Deserialize)]
pub struct SweepQuery {
    /// Evaluation time; defaults to now.
    pub as_of: Option<DateTime<Utc>>,
}

/// Response of the maintenance sweep.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// Evaluation time used.
    pub as_of: DateTime<Utc>,
    /// Penalties charged in this run.
    pub penalties: Vec<PenaltyCharge>,
    /// Overdue and newly defaulted loans.
    #[serde(flatten)]
    pub report: SweepReport,
}

/// POST `/loan-types`
async fn create_loan_type(
    State(state): State<AppState>,
    Json(payload): Json<NewLoanType>,
) -> Result<impl IntoResponse, ApiError> {
    let loan_type = state
        .run("register_loan_type", move |ledger| {
            ledger.register_loan_type(payload.clone())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(loan_type)))
}

/// GET `/loan-types`
async fn list_loan_types(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let loan_types = state
        .run("loan_types", |ledger| Ok(ledger.loan_types()))
        .await?;
    Ok(Json(json!({ "loan_types": loan_types })))
}

/// POST `/loans` - Apply for a loan. The credit limit is checked here.
async fn apply_for_loan(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ApplyLoanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let application = LoanApplication {
        member_id: payload.member_id,
        loan_type_id: payload.loan_type_id,
        principal: Money::new(payload.principal, state.ledger.currency()),
        channel: payload.channel,
        actor: auth.actor_id(),
    };
    let loan = state
        .run("apply_for_loan", move |ledger| {
            ledger.apply_for_loan(application.clone())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// GET `/loans/{loan_id}`
async fn get_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<LoanId>,
) -> Result<impl IntoResponse, ApiError> {
    let loan = state
        .run("get_loan", move |ledger| ledger.loan(loan_id))
        .await?;
    Ok(Json(loan))
}

/// POST `/loans/{loan_id}/approve`
async fn approve_loan(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(loan_id): Path<LoanId>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = auth.actor_id();
    let loan = state
        .run("approve_loan", move |ledger| ledger.approve_loan(loan_id, actor))
        .await?;
    Ok(Json(loan))
}

/// POST `/loans/{loan_id}/reject`
async fn reject_loan(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(loan_id): Path<LoanId>,
    Json(payload): Json<RejectLoanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = auth.actor_id();
    let loan = state
        .run("reject_loan", move |ledger| {
            ledger.reject_loan(loan_id, actor, &payload.reason)
        })
        .await?;
    Ok(Json(loan))
}

/// POST `/loans/{loan_id}/disburse` - Credits the principal to drawdown.
async fn disburse_loan(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(loan_id): Path<LoanId>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = auth.actor_id();
    let loan = state
        .run("disburse_loan", move |ledger| {
            ledger.disburse_loan(loan_id, actor)
        })
        .await?;
    Ok(Json(loan))
}

/// POST `/loans/sweep?as_of=` - Accrues penalties, then flags overdue and
/// defaulted loans.
async fn sweep(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let penalties = state
        .run("accrue_penalties", move |ledger| ledger.accrue_penalties(as_of))
        .await?;
    let report = state
        .run("sweep_overdue", move |ledger| ledger.sweep_overdue(as_of))
        .await?;
    Ok(Json(SweepResponse {
        as_of,
        penalties,
        report,
    }))
}
