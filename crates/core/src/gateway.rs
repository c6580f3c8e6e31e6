//! External payment reconciliation (mobile money and similar gateways).
//!
//! A payment starts as a `pending` deposit record with no balance effect.
//! The gateway later confirms or fails it by external reference. The first
//! answer wins; repeated callbacks are reported as already reconciled and
//! change nothing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kopa_shared::OverpaymentPolicy;
use kopa_shared::types::{ActorId, LoanId, MemberId, Money, TransactionId};

use crate::events::DomainEvent;
use crate::ledger::journal::ensure_client_reference;
use crate::ledger::{
    AccountKind, EntryDirection, LedgerError, LockedAccounts, Receipt, RecordContext,
    TransactionLedger, TransactionRecord, TransactionStatus, TransactionType,
};
use crate::loan::{LoanAction, LoanError, LoanLifecycle, LoanStatus};

/// What an incoming payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Credit savings.
    Deposit,
    /// Credit savings, then repay the loan from it.
    Repayment {
        /// Loan to repay.
        loan_id: LoanId,
    },
}

/// A payment announced by the gateway before it settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalPaymentRequest {
    /// Payer.
    pub member_id: MemberId,
    /// Expected amount.
    pub amount: Money,
    /// Gateway reference; also the idempotency key.
    pub external_reference: String,
    /// What the money is for.
    pub purpose: PaymentPurpose,
    /// Who initiated it.
    pub actor: ActorId,
}

/// Gateway verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Money received.
    Confirmed,
    /// Payment did not go through.
    Failed,
}

/// Gateway callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Reference given at initiation.
    pub external_reference: String,
    /// Amount settled.
    pub amount: Money,
    /// Verdict.
    pub status: PaymentStatus,
}

/// Result of a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    /// The payment was applied.
    Applied(Receipt),
    /// The payment was marked failed.
    Failed(TransactionRecord),
    /// The payment was reconciled earlier; nothing changed.
    AlreadyReconciled(TransactionRecord),
}

impl TransactionLedger {
    /// Records a pending payment.
    ///
    /// # Errors
    ///
    /// - `DuplicateTransaction` if the external reference was seen before,
    ///   whether by an earlier initiation or by a recorded transaction
    /// - `Validation` if the reference uses a prefix the engine reserves
    /// - `MemberNotActive` if the member cannot receive it
    /// - `LoanNotFound` / `InvalidLoanState` for a repayment to a loan that
    ///   is not the member's or not disbursed
    pub fn initiate_external_payment(
        &self,
        request: ExternalPaymentRequest,
    ) -> Result<TransactionRecord, LedgerError> {
        self.validate_amount(request.amount)?;
        let reference = request.external_reference.trim().to_string();
        ensure_client_reference(&reference)?;
        let guard = self.journal().reserve(&reference, Some(&reference))?;

        let member_cell = self.member_cell(request.member_id)?;
        let member = self.lock_member(&member_cell, request.member_id)?;
        let loan_id = match request.purpose {
            PaymentPurpose::Deposit => {
                if !member.status.can_deposit() {
                    return Err(LedgerError::MemberNotActive {
                        member_id: member.id,
                        status: member.status,
                    });
                }
                None
            }
            PaymentPurpose::Repayment { loan_id } => {
                Self::ensure_can_transact(&member)?;
                let loan_cell = self.loan_cell(loan_id)?;
                let loan = self.lock_loan(&loan_cell, loan_id)?;
                if loan.member_id != member.id {
                    return Err(LedgerError::LoanNotFound(loan_id));
                }
                if loan.status != LoanStatus::Disbursed {
                    return Err(LoanError::InvalidLoanState {
                        loan_id,
                        status: loan.status,
                        action: LoanAction::Repay,
                    }
                    .into());
                }
                Some(loan_id)
            }
        };

        let savings = self.account(member.savings_account_id)?;
        let at = Utc::now();
        let record = TransactionRecord {
            id: TransactionId::new(),
            sequence: None,
            member_id: member.id,
            account_id: savings.id,
            account_kind: AccountKind::Savings,
            transaction_type: TransactionType::Deposit,
            direction: EntryDirection::Credit,
            amount: request.amount,
            balance_before: savings.balance,
            balance_after: savings.balance,
            loan_id,
            reference: reference.clone(),
            external_reference: Some(reference.clone()),
            status: TransactionStatus::Pending,
            actor: request.actor,
            created_at: at,
            confirmed_at: None,
        };
        let stored = self.journal().append(vec![record]);
        let record = stored
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Internal("pending payment was not stored".into()))?;
        guard.commit(record.id);

        info!(
            member_id = %member.id,
            external_reference = %reference,
            amount = %request.amount,
            repayment = loan_id.is_some(),
            "External payment pending"
        );
        Ok(record)
    }

    /// Applies a gateway callback.
    ///
    /// # Errors
    ///
    /// - `UnknownReference` if no payment was initiated with the reference
    /// - `Validation` if the settled amount differs from the pending amount
    /// - `LockTimeout` under contention (retryable)
    pub fn confirm_payment(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<Reconciliation, LedgerError> {
        let reference = confirmation.external_reference.trim();
        let pending = self
            .journal()
            .by_external_reference(reference)
            .ok_or_else(|| LedgerError::UnknownReference(reference.to_string()))?;
        if pending.status.is_final() {
            info!(external_reference = reference, status = %pending.status, "Payment already reconciled");
            return Ok(Reconciliation::AlreadyReconciled(pending));
        }
        if confirmation.amount != pending.amount {
            return Err(LedgerError::Validation(format!(
                "settled amount {} does not match pending amount {}",
                confirmation.amount, pending.amount
            )));
        }

        let member_cell = self.member_cell(pending.member_id)?;
        let mut member_guard = self.lock_member(&member_cell, pending.member_id)?;
        let loan_cell = pending.loan_id.map(|id| self.loan_cell(id)).transpose()?;
        let mut loan_guard = match (&loan_cell, pending.loan_id) {
            (Some(cell), Some(id)) => Some(self.lock_loan(cell, id)?),
            _ => None,
        };
        let ids: Vec<_> = std::iter::once(member_guard.savings_account_id)
            .chain(member_guard.drawdown_account_id)
            .collect();
        let cells = self.account_cells(&ids)?;
        let mut accounts = LockedAccounts::acquire(&cells, self.config().lock_timeout)?;

        // Another callback may have won the race for the locks.
        let current = self
            .journal()
            .get(pending.id)
            .ok_or_else(|| LedgerError::Internal(format!("record {} vanished", pending.id)))?;
        if current.status.is_final() {
            return Ok(Reconciliation::AlreadyReconciled(current));
        }

        let at = Utc::now();
        let mut savings = accounts.snapshot(member_guard.savings_account_id)?;

        if confirmation.status == PaymentStatus::Failed {
            let record = self.journal().finalize(
                pending.id,
                TransactionStatus::Failed,
                savings.balance,
                savings.balance,
                at,
            )?;
            warn!(external_reference = reference, member_id = %pending.member_id, "External payment failed");
            return Ok(Reconciliation::Failed(record));
        }

        let ctx = RecordContext {
            member_id: pending.member_id,
            reference: &pending.reference,
            external_reference: Some(reference),
            actor: pending.actor,
            at,
        };
        let mut member = member_guard.clone();
        let mut drawdown = member
            .drawdown_account_id
            .map(|id| accounts.snapshot(id))
            .transpose()?;
        let deposit = savings.credit(pending.amount)?;

        let mut records = Vec::new();
        let mut remaining = pending.amount;
        let mut staged_loan = None;
        if let Some(loan_guard) = &loan_guard {
            if loan_guard.status == LoanStatus::Disbursed {
                let mut loan = (**loan_guard).clone();
                let applied = pending.amount.try_min(loan.outstanding_balance)?;
                let outcome =
                    LoanLifecycle::apply_repayment(&mut loan, applied, OverpaymentPolicy::Clamp, at)?;
                let change = savings.debit(outcome.applied)?;
                records.push(ctx.confirmed(
                    &savings,
                    TransactionType::LoanRepayment,
                    EntryDirection::Debit,
                    outcome.applied,
                    change,
                    Some(loan.id),
                ));
                remaining = remaining.checked_sub(outcome.applied)?;
                staged_loan = Some((loan, outcome.completed));
            } else {
                warn!(
                    loan_id = %loan_guard.id,
                    status = %loan_guard.status,
                    "Loan no longer repayable, payment kept in savings"
                );
            }
        }
        if remaining.is_positive() {
            records.extend(self.stage_registration_fee(
                &mut member,
                &mut savings,
                drawdown.as_mut(),
                remaining,
                &ctx,
            )?);
        }

        let record = self.journal().finalize(
            pending.id,
            TransactionStatus::Confirmed,
            deposit.before,
            deposit.after,
            at,
        )?;
        let related = self.journal().append(records);
        accounts.commit(std::iter::once(savings).chain(drawdown));
        *member_guard = member;
        let mut completed = None;
        if let (Some(guard), Some((loan, done))) = (loan_guard.as_mut(), staged_loan) {
            if done {
                completed = Some(loan.id);
            }
            **guard = loan;
        }
        drop(accounts);
        drop(loan_guard);
        drop(member_guard);

        info!(
            external_reference = reference,
            member_id = %record.member_id,
            amount = %record.amount,
            "External payment confirmed"
        );
        self.events().publish(DomainEvent::PaymentConfirmed {
            transaction_id: record.id,
            member_id: record.member_id,
            external_reference: reference.to_string(),
            amount: record.amount,
        });
        if let Some(loan_id) = completed {
            info!(loan_id = %loan_id, "Loan completed");
            self.events().publish(DomainEvent::LoanCompleted {
                loan_id,
                member_id: record.member_id,
            });
        }
        Ok(Reconciliation::Applied(Receipt { record, related }))
    }
}
