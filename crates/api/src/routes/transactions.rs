//! Ledger transaction routes.
//!
//! Every money movement a member makes goes through `POST /transactions`.
//! Replaying a request with a reference that was already applied is not an
//! error for the client: it gets the original receipt back with
//! `duplicate: true`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppState, error::ApiError, middleware::AuthUser};
use kopa_core::ledger::{AccountKind, LedgerError, LedgerIntent, LedgerRequest, Receipt};
use kopa_shared::AppError;
use kopa_shared::types::{Currency, LoanId, MemberId, Money, TransactionId};

/// Creates the transaction routes (requires auth middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/transactions", post(create_transaction))
        .route("/transactions/{transaction_id}", get(get_transaction))
}

/// Money movement requested over HTTP, with amounts in the ledger currency.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionBody {
    /// Pay into savings.
    Deposit {
        /// Amount.
        amount: Decimal,
    },
    /// Pay out of an account.
    Withdrawal {
        /// Source account.
        account: AccountKind,
        /// Amount.
        amount: Decimal,
    },
    /// Move between the member's accounts.
    Transfer {
        /// Debited account.
        from: AccountKind,
        /// Credited account.
        to: AccountKind,
        /// Amount.
        amount: Decimal,
    },
    /// Repay a disbursed loan.
    Repayment {
        /// Loan.
        loan_id: LoanId,
        /// Source account.
        source: AccountKind,
        /// Amount.
        amount: Decimal,
    },
}

impl TransactionBody {
    fn into_intent(self, currency: Currency) -> LedgerIntent {
        let money = |amount| Money::new(amount, currency);
        match self {
            Self::Deposit { amount } => LedgerIntent::Deposit {
                amount: money(amount),
            },
            Self::Withdrawal { account, amount } => LedgerIntent::Withdrawal {
                account,
                amount: money(amount),
            },
            Self::Transfer { from, to, amount } => LedgerIntent::Transfer {
                from,
                to,
                amount: money(amount),
            },
            Self::Repayment {
                loan_id,
                source,
                amount,
            } => LedgerIntent::Repayment {
                loan_id,
                source,
                amount: money(amount),
            },
        }
    }
}

/// Request body for `POST /transactions`.
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    /// Member whose accounts are touched.
    pub member_id: MemberId,
    /// The movement.
    #[serde(flatten)]
    pub body: TransactionBody,
    /// Idempotency key.
    pub reference: Option<String>,
    /// External receipt code.
    pub external_reference: Option<String>,
}

/// Response of `POST /transactions`.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// True when the reference had already been applied.
    pub duplicate: bool,
    /// Records written (by this request or the original one).
    pub receipt: Receipt,
}

/// POST `/transactions`
async fn create_transaction(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member_id = payload.member_id;
    let request = LedgerRequest {
        member_id,
        intent: payload.body.into_intent(state.ledger.currency()),
        reference: payload.reference,
        external_reference: payload.external_reference,
        actor: auth.actor_id(),
    };

    match state
        .run("record", move |ledger| ledger.record(request.clone()))
        .await
    {
        Ok(receipt) => Ok((
            StatusCode::CREATED,
            Json(TransactionResponse {
                duplicate: false,
                receipt,
            }),
        )),
        Err(ApiError::Ledger(LedgerError::DuplicateTransaction {
            reference,
            original: Some(original),
        })) => {
            let existing = state
                .run("receipt_for_transaction", move |ledger| {
                    Ok(ledger.receipt_for_transaction(original))
                })
                .await?;
            // Another member's receipt is never echoed back.
            let Some(receipt) = existing.filter(|r| r.record.member_id == member_id) else {
                return Err(LedgerError::DuplicateTransaction {
                    reference,
                    original: Some(original),
                }
                .into());
            };
            info!(reference = %reference, "Replayed request answered with original receipt");
            Ok((
                StatusCode::OK,
                Json(TransactionResponse {
                    duplicate: true,
                    receipt,
                }),
            ))
        }
        Err(err) => Err(err),
    }
}

/// GET `/transactions/{transaction_id}`
async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .run("transaction", move |ledger| {
            Ok(ledger.transaction(transaction_id))
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transaction {transaction_id} not found")))?;
    Ok(Json(record))
}
