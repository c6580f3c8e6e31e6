//! Domain events for downstream collaborators (notifications, analytics).
//!
//! Events are published after the ledger change they describe has
//! committed. Delivery is fire-and-forget: a closed or missing channel is
//! logged and never fails the money movement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use kopa_shared::types::{LoanId, MemberId, Money, TransactionId};

/// Something that happened in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Loan principal credited to the member.
    LoanDisbursed {
        /// The loan.
        loan_id: LoanId,
        /// The borrower.
        member_id: MemberId,
        /// Principal credited.
        amount: Money,
        /// Repayment due date.
        due_date: DateTime<Utc>,
    },
    /// An external payment was confirmed and applied.
    PaymentConfirmed {
        /// The applied record.
        transaction_id: TransactionId,
        /// The payer.
        member_id: MemberId,
        /// Gateway reference.
        external_reference: String,
        /// Amount applied.
        amount: Money,
    },
    /// A disbursed loan is past due date and grace period.
    LoanOverdue {
        /// The loan.
        loan_id: LoanId,
        /// The borrower.
        member_id: MemberId,
        /// Days past the penalty start.
        days_overdue: i64,
        /// Outstanding balance.
        outstanding: Money,
    },
    /// A loan was repaid in full.
    LoanCompleted {
        /// The loan.
        loan_id: LoanId,
        /// The borrower.
        member_id: MemberId,
    },
}

impl DomainEvent {
    /// Stable event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoanDisbursed { .. } => "loan_disbursed",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::LoanOverdue { .. } => "loan_overdue",
            Self::LoanCompleted { .. } => "loan_completed",
        }
    }
}

/// Sender side of the event channel.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    sender: Option<mpsc::UnboundedSender<DomainEvent>>,
}

impl EventPublisher {
    /// Creates a publisher and the receiver a consumer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A publisher that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Publishes an event without waiting for delivery.
    pub fn publish(&self, event: DomainEvent) {
        let Some(sender) = &self.sender else {
            debug!(event = event.name(), "Event publishing disabled, dropping event");
            return;
        };
        let name = event.name();
        if let Err(err) = sender.send(event) {
            warn!(event = name, error = %err, "Failed to publish domain event");
        }
    }
}
