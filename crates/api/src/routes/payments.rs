//! Payment gateway routes: initiation and the settlement callback.

use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{AppState, error::ApiError, middleware::AuthUser};
use kopa_core::gateway::{
    ExternalPaymentRequest, PaymentConfirmation, PaymentPurpose, PaymentStatus,
};
use kopa_core::ledger::LedgerError;
use kopa_shared::types::{MemberId, Money};

/// Creates the payment routes (requires auth middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(initiate_payment))
        .route("/payments/confirm", post(confirm_payment))
}

/// Request body for `POST /payments`.
#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    /// Payer.
    pub member_id: MemberId,
    /// Expected amount.
    pub amount: Decimal,
    /// Gateway reference.
    pub external_reference: String,
    /// Deposit or loan repayment.
    pub purpose: PaymentPurpose,
}

/// Request body for `POST /payments/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    /// Reference given at initiation.
    pub external_reference: String,
    /// Settled amount.
    pub amount: Decimal,
    /// Gateway verdict.
    pub status: PaymentStatus,
}

/// POST `/payments` - Records a pending payment; no balance moves yet.
async fn initiate_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member_id = payload.member_id;
    let request = ExternalPaymentRequest {
        member_id,
        amount: Money::new(payload.amount, state.ledger.currency()),
        external_reference: payload.external_reference,
        purpose: payload.purpose,
        actor: auth.actor_id(),
    };
    match state
        .run("initiate_external_payment", move |ledger| {
            ledger.initiate_external_payment(request.clone())
        })
        .await
    {
        Ok(record) => Ok((StatusCode::ACCEPTED, Json(record))),
        // A repeated initiation answers with the record already on file.
        Err(ApiError::Ledger(LedgerError::DuplicateTransaction {
            reference,
            original: Some(original),
        })) => {
            match state
                .run("transaction", move |ledger| Ok(ledger.transaction(original)))
                .await?
            {
                Some(record) if record.member_id == member_id => {
                    Ok((StatusCode::OK, Json(record)))
                }
                _ => Err(LedgerError::DuplicateTransaction {
                    reference,
                    original: Some(original),
                }
                .into()),
            }
        }
        Err(err) => Err(err),
    }
}

/// POST `/payments/confirm` - Gateway callback. Safe to deliver repeatedly.
async fn confirm_payment(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let confirmation = PaymentConfirmation {
        external_reference: payload.external_reference,
        amount: Money::new(payload.amount, state.ledger.currency()),
        status: payload.status,
    };
    let outcome = state
        .run("confirm_payment", move |ledger| {
            ledger.confirm_payment(confirmation.clone())
        })
        .await?;
    Ok(Json(outcome))
}
