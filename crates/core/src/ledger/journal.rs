//! Append-only transaction journal.
//!
//! Records are never removed. A `pending` record may be finalized exactly
//! once; a `confirmed` or `failed` record never changes again. Confirmed
//! records receive a global sequence number at confirmation, which is the
//! order audit replay uses.
//!
//! The journal also owns the reference index used for idempotency. Request
//! references and external payment references live in separate slots, so a
//! gateway code is applied once no matter which request carries it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use kopa_shared::types::{LedgerAccountId, MemberId, Money, TransactionId};

use super::error::LedgerError;
use super::types::{TransactionRecord, TransactionStatus};

/// Prefixes of the references the engine generates for its own records.
const ENGINE_REFERENCE_PREFIXES: [&str; 3] = ["REG-", "DISB-", "TX-"];

/// Rejects a caller-supplied reference that could collide with one the
/// engine generates.
///
/// # Errors
///
/// `Validation` if the reference starts with an engine prefix.
pub fn ensure_client_reference(reference: &str) -> Result<(), LedgerError> {
    match ENGINE_REFERENCE_PREFIXES
        .iter()
        .find(|prefix| reference.starts_with(*prefix))
    {
        Some(prefix) => Err(LedgerError::Validation(format!(
            "reference prefix {prefix} is reserved"
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ReferenceKey {
    Request(String),
    External(String),
}

/// State of a reserved reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceSlot {
    /// A request holding this reference is running.
    InFlight,
    /// The request completed and produced this record.
    Applied(TransactionId),
}

#[derive(Debug, Default)]
struct JournalInner {
    records: Vec<TransactionRecord>,
    positions: HashMap<TransactionId, usize>,
    external: HashMap<String, TransactionId>,
    next_sequence: u64,
}

/// The append-only log.
#[derive(Debug, Default)]
pub struct Journal {
    inner: RwLock<JournalInner>,
    references: DashMap<ReferenceKey, ReferenceSlot>,
}

/// Reservation of a request reference and, optionally, an external one.
///
/// Dropping the guard without [`ReferenceGuard::commit`] releases every
/// reserved key so a failed request can be retried with the same references.
#[derive(Debug)]
pub struct ReferenceGuard<'a> {
    journal: &'a Journal,
    keys: Vec<ReferenceKey>,
    committed: bool,
}

impl ReferenceGuard<'_> {
    /// Marks the reserved references as used by `record`.
    pub fn commit(mut self, record: TransactionId) {
        for key in self.keys.drain(..) {
            self.journal
                .references
                .insert(key, ReferenceSlot::Applied(record));
        }
        self.committed = true;
    }
}

impl Drop for ReferenceGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            for key in &self.keys {
                self.journal.references.remove(key);
            }
        }
    }
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a request reference together with the external payment
    /// reference it carries, if any. Either one being taken fails the whole
    /// reservation.
    ///
    /// # Errors
    ///
    /// - `Validation` if a reference is blank
    /// - `DuplicateTransaction` if a reference is in flight or already
    ///   applied; `original` is set once the first request has completed
    pub fn reserve(
        &self,
        reference: &str,
        external_reference: Option<&str>,
    ) -> Result<ReferenceGuard<'_>, LedgerError> {
        if reference.trim().is_empty() {
            return Err(LedgerError::Validation("reference cannot be empty".into()));
        }
        if external_reference.is_some_and(|external| external.trim().is_empty()) {
            return Err(LedgerError::Validation(
                "external reference cannot be empty".into(),
            ));
        }

        let mut guard = ReferenceGuard {
            journal: self,
            keys: Vec::with_capacity(2),
            committed: false,
        };
        self.claim(&mut guard, ReferenceKey::Request(reference.to_string()), reference)?;
        if let Some(external) = external_reference {
            self.claim(
                &mut guard,
                ReferenceKey::External(external.to_string()),
                external,
            )?;
        }
        Ok(guard)
    }

    fn claim(
        &self,
        guard: &mut ReferenceGuard<'_>,
        key: ReferenceKey,
        label: &str,
    ) -> Result<(), LedgerError> {
        match self.references.entry(key.clone()) {
            Entry::Occupied(slot) => Err(LedgerError::DuplicateTransaction {
                reference: label.to_string(),
                original: match *slot.get() {
                    ReferenceSlot::Applied(id) => Some(id),
                    ReferenceSlot::InFlight => None,
                },
            }),
            Entry::Vacant(slot) => {
                slot.insert(ReferenceSlot::InFlight);
                guard.keys.push(key);
                Ok(())
            }
        }
    }

    /// Appends the records of one request as a unit.
    ///
    /// Confirmed records get consecutive sequence numbers. Returns the stored
    /// records.
    pub fn append(&self, records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
        let mut inner = self.inner.write();
        let mut stored = Vec::with_capacity(records.len());
        for mut record in records {
            if record.status == TransactionStatus::Confirmed {
                inner.next_sequence += 1;
                record.sequence = Some(inner.next_sequence);
            }
            if let Some(external) = &record.external_reference {
                inner.external.entry(external.clone()).or_insert(record.id);
            }
            let position = inner.records.len();
            inner.positions.insert(record.id, position);
            inner.records.push(record.clone());
            stored.push(record);
        }
        stored
    }

    /// Moves a pending record to its final status.
    ///
    /// Confirmation records the balance change and takes the next sequence
    /// number; failure keeps `balance_after == balance_before`.
    ///
    /// # Errors
    ///
    /// - `Internal` if the record does not exist
    /// - `DuplicateTransaction` if it is already final
    pub fn finalize(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        balance_before: Money,
        balance_after: Money,
        at: DateTime<Utc>,
    ) -> Result<TransactionRecord, LedgerError> {
        let mut inner = self.inner.write();
        let position = *inner
            .positions
            .get(&id)
            .ok_or_else(|| LedgerError::Internal(format!("record {id} is not in the journal")))?;
        let current = &inner.records[position];
        if current.status.is_final() {
            return Err(LedgerError::DuplicateTransaction {
                reference: current.reference.clone(),
                original: Some(id),
            });
        }

        let sequence = if status == TransactionStatus::Confirmed {
            inner.next_sequence += 1;
            Some(inner.next_sequence)
        } else {
            None
        };
        let record = &mut inner.records[position];
        record.status = status;
        record.sequence = sequence;
        record.balance_before = balance_before;
        record.balance_after = balance_after;
        record.confirmed_at = Some(at);
        Ok(record.clone())
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, id: TransactionId) -> Option<TransactionRecord> {
        let inner = self.inner.read();
        inner
            .positions
            .get(&id)
            .map(|&position| inner.records[position].clone())
    }

    /// Looks up the record written with an external reference.
    #[must_use]
    pub fn by_external_reference(&self, external_reference: &str) -> Option<TransactionRecord> {
        let inner = self.inner.read();
        inner
            .external
            .get(external_reference)
            .and_then(|id| inner.positions.get(id))
            .map(|&position| inner.records[position].clone())
    }

    /// All records sharing a request reference, in append order.
    #[must_use]
    pub fn by_reference(&self, reference: &str) -> Vec<TransactionRecord> {
        self.filtered(|r| r.reference == reference)
    }

    /// All records of an account, in append order.
    #[must_use]
    pub fn for_account(&self, account_id: LedgerAccountId) -> Vec<TransactionRecord> {
        self.filtered(|r| r.account_id == account_id)
    }

    /// All records of a member, in append order.
    #[must_use]
    pub fn for_member(&self, member_id: MemberId) -> Vec<TransactionRecord> {
        self.filtered(|r| r.member_id == member_id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the journal is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&TransactionRecord) -> bool) -> Vec<TransactionRecord> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}
