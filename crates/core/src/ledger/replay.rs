//! Audit replay: rebuilds an account balance from its confirmed records.

use serde::{Deserialize, Serialize};

use kopa_shared::types::{LedgerAccountId, Money, TransactionId};

use super::types::{TransactionRecord, TransactionStatus};

/// First problem found while replaying an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayDiscrepancy {
    /// A record's `balance_after` does not follow from its own amount.
    InconsistentRecord {
        /// The offending record.
        record_id: TransactionId,
    },
    /// A record does not start where the previous one ended.
    BrokenChain {
        /// The offending record.
        record_id: TransactionId,
        /// Balance reached by the replay so far.
        expected_before: Money,
        /// `balance_before` stored on the record.
        recorded_before: Money,
    },
    /// The replayed balance differs from the stored balance.
    BalanceMismatch {
        /// Balance rebuilt from the records.
        replayed: Money,
        /// Balance stored on the account.
        stored: Money,
    },
}

/// Outcome of replaying one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// The account.
    pub account_id: LedgerAccountId,
    /// Confirmed records replayed.
    pub records_replayed: usize,
    /// Balance rebuilt from zero.
    pub replayed_balance: Money,
    /// Balance stored on the account.
    pub stored_balance: Money,
    /// First discrepancy, if any.
    pub discrepancy: Option<ReplayDiscrepancy>,
}

impl ReplayReport {
    /// True when the replay reproduced the stored balance without issues.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancy.is_none()
    }
}

/// Replays the confirmed records of `account_id` in sequence order from zero.
///
/// Pending and failed records carry no balance effect and are skipped.
#[must_use]
pub fn replay_account(
    account_id: LedgerAccountId,
    stored_balance: Money,
    records: &[TransactionRecord],
) -> ReplayReport {
    let mut confirmed: Vec<&TransactionRecord> = records
        .iter()
        .filter(|r| r.account_id == account_id && r.status == TransactionStatus::Confirmed)
        .collect();
    confirmed.sort_by_key(|r| r.sequence);

    let mut running = Money::zero(stored_balance.currency);
    let mut discrepancy = None;
    for record in &confirmed {
        if !record.is_consistent() {
            discrepancy = Some(ReplayDiscrepancy::InconsistentRecord {
                record_id: record.id,
            });
            break;
        }
        if record.balance_before != running {
            discrepancy = Some(ReplayDiscrepancy::BrokenChain {
                record_id: record.id,
                expected_before: running,
                recorded_before: record.balance_before,
            });
            break;
        }
        running = record.balance_after;
    }

    if discrepancy.is_none() && running != stored_balance {
        discrepancy = Some(ReplayDiscrepancy::BalanceMismatch {
            replayed: running,
            stored: stored_balance,
        });
    }

    ReplayReport {
        account_id,
        records_replayed: confirmed.len(),
        replayed_balance: running,
        stored_balance,
        discrepancy,
    }
}
