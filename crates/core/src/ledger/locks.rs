//! Bounded lock acquisition.
//!
//! Lock order across the engine: member, then loan, then accounts in
//! ascending id order, then the journal. Every wait is bounded and surfaces
//! as [`LedgerError::LockTimeout`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use kopa_shared::types::LedgerAccountId;

use super::account::LedgerAccount;
use super::error::LedgerError;

/// Locks `mutex`, waiting at most `timeout`.
pub(crate) fn acquire<'a, T>(
    mutex: &'a Mutex<T>,
    timeout: Duration,
    resource: impl Display,
) -> Result<MutexGuard<'a, T>, LedgerError> {
    if let Some(guard) = mutex.try_lock_for(timeout) {
        debug!(%resource, "Lock acquired");
        Ok(guard)
    } else {
        warn!(%resource, timeout_ms = timeout.as_millis(), "Lock wait timed out");
        Err(LedgerError::LockTimeout {
            resource: resource.to_string(),
        })
    }
}

/// Sorts and dedups account cells so they can be locked in global order.
pub(crate) fn ordered(
    mut pairs: Vec<(LedgerAccountId, Arc<Mutex<LedgerAccount>>)>,
) -> Vec<(LedgerAccountId, Arc<Mutex<LedgerAccount>>)> {
    pairs.sort_by_key(|(id, _)| *id);
    pairs.dedup_by_key(|(id, _)| *id);
    pairs
}

/// A set of account locks held together.
///
/// Mutations are staged on clones taken with [`LockedAccounts::snapshot`]
/// and written back with [`LockedAccounts::commit`] once every fallible step
/// has succeeded.
pub(crate) struct LockedAccounts<'a> {
    guards: Vec<MutexGuard<'a, LedgerAccount>>,
}

impl<'a> LockedAccounts<'a> {
    /// Locks every cell in the order given (callers pass [`ordered`] output).
    pub(crate) fn acquire(
        cells: &'a [(LedgerAccountId, Arc<Mutex<LedgerAccount>>)],
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let guards = cells
            .iter()
            .map(|(id, cell)| acquire(cell, timeout, format!("account {id}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { guards })
    }

    fn find(&self, id: LedgerAccountId) -> Result<&LedgerAccount, LedgerError> {
        self.guards
            .iter()
            .map(|guard| &**guard)
            .find(|account| account.id == id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// A copy of the locked account to stage changes on.
    pub(crate) fn snapshot(&self, id: LedgerAccountId) -> Result<LedgerAccount, LedgerError> {
        self.find(id).cloned()
    }

    /// Writes staged accounts back. Infallible by construction: only ids
    /// locked by this set are accepted, others are ignored.
    pub(crate) fn commit(&mut self, staged: impl IntoIterator<Item = LedgerAccount>) {
        for account in staged {
            if let Some(guard) = self.guards.iter_mut().find(|g| g.id == account.id) {
                **guard = account;
            }
        }
    }
}
