//! The ledger engine.
//!
//! `TransactionLedger` owns members, accounts, loans and the journal. Every
//! mutation follows the same shape:
//!
//! 1. reserve the request and external references (idempotency)
//! 2. take the locks it needs in global order (member, loan, accounts)
//! 3. stage all changes on copies, running every fallible check
//! 4. append the records and write the copies back
//! 5. release the locks and publish domain events
//!
//! A failure in step 2 or 3 leaves no trace.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kopa_shared::types::{
    ActorId, CENT_SCALE, Currency, LedgerAccountId, LoanId, LoanTypeId, MemberId, Money,
    PageRequest, PageResponse, TransactionId,
};

use super::account::LedgerAccount;
use super::config::LedgerConfig;
use super::error::LedgerError;
use super::journal::{Journal, ensure_client_reference};
use super::locks::{self, LockedAccounts};
use super::replay::{ReplayReport, replay_account};
use super::types::{
    AccountKind, BalanceChange, EntryDirection, TransactionRecord, TransactionStatus,
    TransactionType,
};
use crate::credit::{CreditChannel, CreditLimitPolicy, LoanLimit};
use crate::events::{DomainEvent, EventPublisher};
use crate::loan::{Loan, LoanError, LoanLifecycle, LoanStatus, LoanType, NewLoanType};
use crate::member::{Member, MemberStatus, NewMember};

/// What a ledger request asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerIntent {
    /// Pay money into savings. Clears any registration fee still owed.
    Deposit {
        /// Amount deposited.
        amount: Money,
    },
    /// Pay money out of an account.
    Withdrawal {
        /// Account to withdraw from.
        account: AccountKind,
        /// Amount withdrawn.
        amount: Money,
    },
    /// Move money between the member's two accounts.
    Transfer {
        /// Debited account.
        from: AccountKind,
        /// Credited account.
        to: AccountKind,
        /// Amount moved.
        amount: Money,
    },
    /// Repay a disbursed loan from one of the member's accounts.
    Repayment {
        /// The loan.
        loan_id: LoanId,
        /// Account the money comes from.
        source: AccountKind,
        /// Amount offered.
        amount: Money,
    },
}

/// A mutation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRequest {
    /// Member whose accounts are touched.
    pub member_id: MemberId,
    /// What to do.
    pub intent: LedgerIntent,
    /// Idempotency key. Defaults to the external reference, then to a
    /// generated value.
    pub reference: Option<String>,
    /// External reference (e.g., mobile-money receipt code).
    pub external_reference: Option<String>,
    /// Who asked.
    pub actor: ActorId,
}

/// Records written by one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// The primary record (the deposit, withdrawal, debit leg, ...).
    pub record: TransactionRecord,
    /// Other records written by the same request.
    pub related: Vec<TransactionRecord>,
}

impl Receipt {
    fn from_records(records: Vec<TransactionRecord>) -> Option<Self> {
        let mut records = records.into_iter();
        let record = records.next()?;
        Some(Self {
            record,
            related: records.collect(),
        })
    }
}

/// A loan application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanApplication {
    /// Borrower.
    pub member_id: MemberId,
    /// Product.
    pub loan_type_id: LoanTypeId,
    /// Requested principal.
    pub principal: Money,
    /// Channel the application came through.
    pub channel: CreditChannel,
    /// Who applied.
    pub actor: ActorId,
}

/// Penalty added to one loan by [`TransactionLedger::accrue_penalties`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyCharge {
    /// The loan.
    pub loan_id: LoanId,
    /// Penalty added.
    pub amount: Money,
    /// Outstanding balance after the penalty.
    pub outstanding: Money,
}

/// Result of [`TransactionLedger::sweep_overdue`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Loans overdue but not yet defaulted.
    pub overdue: Vec<LoanId>,
    /// Loans marked defaulted by this sweep.
    pub defaulted: Vec<LoanId>,
}

/// Shared fields of the records one request writes.
pub(crate) struct RecordContext<'a> {
    pub(crate) member_id: MemberId,
    pub(crate) reference: &'a str,
    pub(crate) external_reference: Option<&'a str>,
    pub(crate) actor: ActorId,
    pub(crate) at: DateTime<Utc>,
}

impl RecordContext<'_> {
    pub(crate) fn confirmed(
        &self,
        account: &LedgerAccount,
        transaction_type: TransactionType,
        direction: EntryDirection,
        amount: Money,
        change: BalanceChange,
        loan_id: Option<LoanId>,
    ) -> TransactionRecord {
        TransactionRecord {
            id: TransactionId::new(),
            sequence: None,
            member_id: self.member_id,
            account_id: account.id,
            account_kind: account.kind,
            transaction_type,
            direction,
            amount,
            balance_before: change.before,
            balance_after: change.after,
            loan_id,
            reference: self.reference.to_string(),
            external_reference: self.external_reference.map(str::to_string),
            status: TransactionStatus::Confirmed,
            actor: self.actor,
            created_at: self.at,
            confirmed_at: Some(self.at),
        }
    }
}

type Cell<T> = Arc<Mutex<T>>;

/// The loan lifecycle and dual-ledger accounting engine.
pub struct TransactionLedger {
    config: LedgerConfig,
    credit: CreditLimitPolicy,
    members: DashMap<MemberId, Cell<Member>>,
    identities: DashMap<String, MemberId>,
    accounts: DashMap<LedgerAccountId, Cell<LedgerAccount>>,
    loans: DashMap<LoanId, Cell<Loan>>,
    member_loans: DashMap<MemberId, Vec<LoanId>>,
    loan_types: DashMap<LoanTypeId, LoanType>,
    journal: Journal,
    events: EventPublisher,
    account_seq: AtomicU64,
    loan_seq: AtomicU64,
}

impl TransactionLedger {
    /// Creates an empty engine.
    #[must_use]
    pub fn new(config: LedgerConfig, credit: CreditLimitPolicy, events: EventPublisher) -> Self {
        Self {
            config,
            credit,
            members: DashMap::new(),
            identities: DashMap::new(),
            accounts: DashMap::new(),
            loans: DashMap::new(),
            member_loans: DashMap::new(),
            loan_types: DashMap::new(),
            journal: Journal::new(),
            events,
            account_seq: AtomicU64::new(0),
            loan_seq: AtomicU64::new(0),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Ledger currency.
    #[must_use]
    pub fn currency(&self) -> Currency {
        self.config.currency
    }

    pub(crate) fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn events(&self) -> &EventPublisher {
        &self.events
    }

    // ========== Members ==========

    /// Enrolls a member and provisions both accounts.
    ///
    /// The member starts `pending`. The registration fee is charged to the
    /// drawdown account as a `registration_fee` debit and later cleared from
    /// deposits.
    pub fn enroll_member(&self, input: NewMember, actor: ActorId) -> Result<Member, LedgerError> {
        let identity_ref = input.identity_ref.trim().to_string();
        let full_name = input.full_name.trim().to_string();
        if identity_ref.is_empty() || full_name.is_empty() {
            return Err(LedgerError::Validation(
                "identity reference and full name are required".into(),
            ));
        }

        let slot = match self.identities.entry(identity_ref.clone()) {
            Entry::Occupied(_) => {
                return Err(LedgerError::Validation(format!(
                    "identity {identity_ref} is already enrolled"
                )));
            }
            Entry::Vacant(slot) => slot,
        };

        let at = Utc::now();
        let member_id = MemberId::new();
        let currency = self.config.currency;
        let savings = LedgerAccount::open(
            member_id,
            self.next_account_number(AccountKind::Savings),
            AccountKind::Savings,
            currency,
            at,
        );
        let mut drawdown = LedgerAccount::open(
            member_id,
            self.next_account_number(AccountKind::Drawdown),
            AccountKind::Drawdown,
            currency,
            at,
        );

        let fee = self.config.registration_fee;
        if fee.is_positive() {
            let reference = format!("REG-{member_id}");
            let guard = self.journal.reserve(&reference, None)?;
            let ctx = RecordContext {
                member_id,
                reference: &reference,
                external_reference: None,
                actor,
                at,
            };
            let change = drawdown.debit(fee)?;
            let record = ctx.confirmed(
                &drawdown,
                TransactionType::RegistrationFee,
                EntryDirection::Debit,
                fee,
                change,
                None,
            );
            let stored = self.journal.append(vec![record]);
            if let Some(record) = stored.first() {
                guard.commit(record.id);
            }
        }

        let member = Member {
            id: member_id,
            identity_ref,
            full_name,
            status: MemberStatus::Pending,
            savings_account_id: savings.id,
            drawdown_account_id: Some(drawdown.id),
            registration_fee_due: fee,
            enrolled_at: at,
            activated_at: None,
        };

        self.accounts.insert(savings.id, Arc::new(Mutex::new(savings)));
        self.accounts
            .insert(drawdown.id, Arc::new(Mutex::new(drawdown)));
        self.members
            .insert(member_id, Arc::new(Mutex::new(member.clone())));
        slot.insert(member_id);

        info!(
            member_id = %member_id,
            identity_ref = %member.identity_ref,
            registration_fee = %fee,
            actor = %actor,
            "Member enrolled"
        );
        Ok(member)
    }

    /// Sets a member's status (driven by the external approval workflow).
    pub fn set_member_status(
        &self,
        member_id: MemberId,
        status: MemberStatus,
        actor: ActorId,
    ) -> Result<Member, LedgerError> {
        let cell = self.member_cell(member_id)?;
        let mut member = self.lock_member(&cell, member_id)?;
        let previous = member.status;
        if status == MemberStatus::Active {
            member.activate(Utc::now());
        } else {
            member.status = status;
        }
        info!(
            member_id = %member_id,
            from = %previous,
            to = %status,
            actor = %actor,
            "Member status changed"
        );
        Ok(member.clone())
    }

    /// Looks up a member.
    pub fn member(&self, member_id: MemberId) -> Result<Member, LedgerError> {
        let cell = self.member_cell(member_id)?;
        let member = self.lock_member(&cell, member_id)?;
        Ok(member.clone())
    }

    /// The member's accounts (savings first).
    pub fn accounts(&self, member_id: MemberId) -> Result<Vec<LedgerAccount>, LedgerError> {
        let member = self.member(member_id)?;
        std::iter::once(member.savings_account_id)
            .chain(member.drawdown_account_id)
            .map(|id| self.account(id))
            .collect()
    }

    /// Looks up an account.
    pub fn account(&self, account_id: LedgerAccountId) -> Result<LedgerAccount, LedgerError> {
        let cell = self.account_cell(account_id)?;
        let account = locks::acquire(
            &cell,
            self.config.lock_timeout,
            format!("account {account_id}"),
        )?;
        Ok(account.clone())
    }

    /// The member's records, newest first.
    pub fn member_transactions(
        &self,
        member_id: MemberId,
        page: &PageRequest,
    ) -> Result<PageResponse<TransactionRecord>, LedgerError> {
        if !self.members.contains_key(&member_id) {
            return Err(LedgerError::MemberNotFound(member_id));
        }
        let mut records = self.journal.for_member(member_id);
        records.reverse();
        Ok(page.paginate(records))
    }

    /// Looks up a record.
    #[must_use]
    pub fn transaction(&self, id: TransactionId) -> Option<TransactionRecord> {
        self.journal.get(id)
    }

    /// The records a request reference produced, if it was applied.
    #[must_use]
    pub fn receipt_for_reference(&self, reference: &str) -> Option<Receipt> {
        Receipt::from_records(self.journal.by_reference(reference))
    }

    /// The receipt of the request that wrote a record.
    #[must_use]
    pub fn receipt_for_transaction(&self, id: TransactionId) -> Option<Receipt> {
        let record = self.journal.get(id)?;
        self.receipt_for_reference(&record.reference)
    }

    // ========== Money movement ==========

    /// Applies a deposit, withdrawal, transfer or repayment.
    ///
    /// # Errors
    ///
    /// - `DuplicateTransaction` if the reference or the external reference
    ///   was already used (a no-op; see [`LedgerError::is_noop`] and
    ///   [`Self::receipt_for_transaction`])
    /// - `Validation` if the reference uses a prefix the engine reserves
    /// - `LockTimeout` under contention (retryable)
    /// - any validation, funds or loan-state error of the intent
    pub fn record(&self, request: LedgerRequest) -> Result<Receipt, LedgerError> {
        let reference = match request
            .reference
            .clone()
            .or_else(|| request.external_reference.clone())
        {
            Some(reference) => {
                ensure_client_reference(&reference)?;
                reference
            }
            None => format!("TX-{}", TransactionId::new()),
        };
        let guard = self
            .journal
            .reserve(&reference, request.external_reference.as_deref())?;
        let ctx = RecordContext {
            member_id: request.member_id,
            reference: &reference,
            external_reference: request.external_reference.as_deref(),
            actor: request.actor,
            at: Utc::now(),
        };

        let (receipt, events) = match request.intent {
            LedgerIntent::Deposit { amount } => (self.deposit(&ctx, amount)?, Vec::new()),
            LedgerIntent::Withdrawal { account, amount } => {
                (self.withdraw(&ctx, account, amount)?, Vec::new())
            }
            LedgerIntent::Transfer { from, to, amount } => {
                (self.transfer(&ctx, from, to, amount)?, Vec::new())
            }
            LedgerIntent::Repayment {
                loan_id,
                source,
                amount,
            } => self.repay(&ctx, loan_id, source, amount)?,
        };

        guard.commit(receipt.record.id);
        for event in events {
            self.events.publish(event);
        }
        Ok(receipt)
    }

    fn deposit(&self, ctx: &RecordContext<'_>, amount: Money) -> Result<Receipt, LedgerError> {
        self.validate_amount(amount)?;
        let member_cell = self.member_cell(ctx.member_id)?;
        let mut member_guard = self.lock_member(&member_cell, ctx.member_id)?;
        if !member_guard.status.can_deposit() {
            return Err(LedgerError::MemberNotActive {
                member_id: ctx.member_id,
                status: member_guard.status,
            });
        }

        let ids: Vec<_> = std::iter::once(member_guard.savings_account_id)
            .chain(member_guard.drawdown_account_id)
            .collect();
        let cells = self.account_cells(&ids)?;
        let mut accounts = LockedAccounts::acquire(&cells, self.config.lock_timeout)?;

        let mut member = member_guard.clone();
        let mut savings = accounts.snapshot(member.savings_account_id)?;
        let mut drawdown = member
            .drawdown_account_id
            .map(|id| accounts.snapshot(id))
            .transpose()?;

        let change = savings.credit(amount)?;
        let deposit = ctx.confirmed(
            &savings,
            TransactionType::Deposit,
            EntryDirection::Credit,
            amount,
            change,
            None,
        );
        let fees = self.stage_registration_fee(
            &mut member,
            &mut savings,
            drawdown.as_mut(),
            amount,
            ctx,
        )?;

        let stored = self
            .journal
            .append(std::iter::once(deposit).chain(fees).collect());
        accounts.commit(std::iter::once(savings).chain(drawdown));
        let activated = member_guard.status != member.status;
        *member_guard = member;

        info!(
            member_id = %ctx.member_id,
            amount = %amount,
            reference = ctx.reference,
            activated,
            "Deposit recorded"
        );
        Receipt::from_records(stored)
            .ok_or_else(|| LedgerError::Internal("deposit produced no records".into()))
    }

    /// Moves outstanding registration fee from `savings` to `drawdown`,
    /// bounded by the deposit `amount` and the drawdown debt, and activates
    /// a pending member once nothing is owed.
    pub(crate) fn stage_registration_fee(
        &self,
        member: &mut Member,
        savings: &mut LedgerAccount,
        drawdown: Option<&mut LedgerAccount>,
        amount: Money,
        ctx: &RecordContext<'_>,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        let mut records = Vec::new();
        match drawdown {
            Some(drawdown) if member.registration_fee_due.is_positive() => {
                let debt = (-drawdown.balance).floor_zero();
                let due = member.registration_fee_due.try_min(debt)?;
                let clear = due.try_min(amount)?;
                if clear.is_positive() {
                    let out = savings.debit(clear)?;
                    let into = drawdown.credit(clear)?;
                    records.push(ctx.confirmed(
                        savings,
                        TransactionType::RegistrationFee,
                        EntryDirection::Debit,
                        clear,
                        out,
                        None,
                    ));
                    records.push(ctx.confirmed(
                        drawdown,
                        TransactionType::RegistrationFee,
                        EntryDirection::Credit,
                        clear,
                        into,
                        None,
                    ));
                }
                member.registration_fee_due = due.checked_sub(clear)?;
            }
            Some(_) => {}
            None => member.registration_fee_due = Money::zero(self.config.currency),
        }

        if member.status == MemberStatus::Pending && !member.registration_fee_due.is_positive() {
            member.activate(ctx.at);
        }
        Ok(records)
    }

    fn withdraw(
        &self,
        ctx: &RecordContext<'_>,
        kind: AccountKind,
        amount: Money,
    ) -> Result<Receipt, LedgerError> {
        self.validate_amount(amount)?;
        let member_cell = self.member_cell(ctx.member_id)?;
        let member = self.lock_member(&member_cell, ctx.member_id)?;
        Self::ensure_can_transact(&member)?;

        let account_id = Self::account_id_for(&member, kind)?;
        let cells = self.account_cells(&[account_id])?;
        let mut accounts = LockedAccounts::acquire(&cells, self.config.lock_timeout)?;
        let mut account = accounts.snapshot(account_id)?;
        let change = self.debit_within_policy(&mut account, amount)?;
        let record = ctx.confirmed(
            &account,
            TransactionType::Withdrawal,
            EntryDirection::Debit,
            amount,
            change,
            None,
        );

        let stored = self.journal.append(vec![record]);
        accounts.commit([account]);

        info!(
            member_id = %ctx.member_id,
            account_id = %account_id,
            amount = %amount,
            reference = ctx.reference,
            "Withdrawal recorded"
        );
        Receipt::from_records(stored)
            .ok_or_else(|| LedgerError::Internal("withdrawal produced no records".into()))
    }

    fn transfer(
        &self,
        ctx: &RecordContext<'_>,
        from: AccountKind,
        to: AccountKind,
        amount: Money,
    ) -> Result<Receipt, LedgerError> {
        if from == to {
            return Err(LedgerError::Validation(
                "transfer needs two different accounts".into(),
            ));
        }
        self.validate_amount(amount)?;
        let member_cell = self.member_cell(ctx.member_id)?;
        let member = self.lock_member(&member_cell, ctx.member_id)?;
        Self::ensure_can_transact(&member)?;

        let from_id = Self::account_id_for(&member, from)?;
        let to_id = Self::account_id_for(&member, to)?;
        let cells = self.account_cells(&[from_id, to_id])?;
        let mut accounts = LockedAccounts::acquire(&cells, self.config.lock_timeout)?;

        let mut source = accounts.snapshot(from_id)?;
        let mut target = accounts.snapshot(to_id)?;
        let out = self.debit_within_policy(&mut source, amount)?;
        let into = Self::credit_transfer_leg(&mut target, amount)?;
        let records = vec![
            ctx.confirmed(
                &source,
                TransactionType::Transfer,
                EntryDirection::Debit,
                amount,
                out,
                None,
            ),
            ctx.confirmed(
                &target,
                TransactionType::Transfer,
                EntryDirection::Credit,
                amount,
                into,
                None,
            ),
        ];

        let stored = self.journal.append(records);
        accounts.commit([source, target]);

        info!(
            member_id = %ctx.member_id,
            from = %from,
            to = %to,
            amount = %amount,
            reference = ctx.reference,
            "Transfer recorded"
        );
        Receipt::from_records(stored)
            .ok_or_else(|| LedgerError::Internal("transfer produced no records".into()))
    }

    /// Credit leg of a transfer. A drawdown account may be paid down to
    /// zero but not above it.
    fn credit_transfer_leg(
        account: &mut LedgerAccount,
        amount: Money,
    ) -> Result<BalanceChange, LedgerError> {
        let change = account.credit(amount)?;
        if account.kind == AccountKind::Drawdown && change.after.is_positive() {
            return Err(LedgerError::Validation(format!(
                "transfer would take drawdown account {} above zero",
                account.account_number
            )));
        }
        Ok(change)
    }

    fn repay(
        &self,
        ctx: &RecordContext<'_>,
        loan_id: LoanId,
        source: AccountKind,
        amount: Money,
    ) -> Result<(Receipt, Vec<DomainEvent>), LedgerError> {
        self.validate_amount(amount)?;
        let member_cell = self.member_cell(ctx.member_id)?;
        let member = self.lock_member(&member_cell, ctx.member_id)?;
        Self::ensure_can_transact(&member)?;

        let loan_cell = self.loan_cell(loan_id)?;
        let mut loan_guard = self.lock_loan(&loan_cell, loan_id)?;
        if loan_guard.member_id != ctx.member_id {
            return Err(LedgerError::LoanNotFound(loan_id));
        }

        let account_id = Self::account_id_for(&member, source)?;
        let cells = self.account_cells(&[account_id])?;
        let mut accounts = LockedAccounts::acquire(&cells, self.config.lock_timeout)?;

        let mut loan = loan_guard.clone();
        let outcome =
            LoanLifecycle::apply_repayment(&mut loan, amount, self.config.overpayment, ctx.at)?;
        let mut account = accounts.snapshot(account_id)?;
        let change = self.debit_within_policy(&mut account, outcome.applied)?;
        let record = ctx.confirmed(
            &account,
            TransactionType::LoanRepayment,
            EntryDirection::Debit,
            outcome.applied,
            change,
            Some(loan_id),
        );

        let stored = self.journal.append(vec![record]);
        accounts.commit([account]);
        *loan_guard = loan;

        info!(
            member_id = %ctx.member_id,
            loan_id = %loan_id,
            applied = %outcome.applied,
            excess = %outcome.excess,
            outstanding = %outcome.outstanding,
            reference = ctx.reference,
            "Repayment recorded"
        );
        let mut events = Vec::new();
        if outcome.completed {
            info!(loan_id = %loan_id, "Loan completed");
            events.push(DomainEvent::LoanCompleted {
                loan_id,
                member_id: ctx.member_id,
            });
        }
        let receipt = Receipt::from_records(stored)
            .ok_or_else(|| LedgerError::Internal("repayment produced no records".into()))?;
        Ok((receipt, events))
    }

    /// Debits an account; a drawdown account may not go below the
    /// configured debt ceiling.
    pub(crate) fn debit_within_policy(
        &self,
        account: &mut LedgerAccount,
        amount: Money,
    ) -> Result<BalanceChange, LedgerError> {
        if account.kind == AccountKind::Drawdown {
            let floor = -self.config.drawdown_debt_ceiling;
            let after = account.balance.checked_sub(amount)?;
            if after.try_cmp(&floor)?.is_lt() {
                return Err(LedgerError::InsufficientFunds {
                    account_id: account.id,
                    balance: account.balance.amount,
                    requested: amount.amount,
                });
            }
        }
        account.debit(amount)
    }

    // ========== Loan products ==========

    /// Registers a loan product in the ledger currency.
    pub fn register_loan_type(&self, input: NewLoanType) -> Result<LoanType, LedgerError> {
        let currency = self.config.currency;
        let loan_type = LoanType {
            id: LoanTypeId::new(),
            name: input.name.trim().to_string(),
            interest_rate: input.interest_rate,
            interest_model: input.interest_model,
            charge_fee_percentage: input.charge_fee_percentage,
            min_amount: Money::new(input.min_amount, currency),
            max_amount: Money::new(input.max_amount, currency),
            duration_months: input.duration_months,
            grace_period_days: input.grace_period_days,
            penalty_rate: input.penalty_rate,
            created_at: Utc::now(),
        };
        loan_type.validate()?;
        self.loan_types.insert(loan_type.id, loan_type.clone());
        info!(
            loan_type_id = %loan_type.id,
            name = %loan_type.name,
            model = %loan_type.interest_model,
            "Loan type registered"
        );
        Ok(loan_type)
    }

    /// Looks up a loan product.
    pub fn loan_type(&self, id: LoanTypeId) -> Result<LoanType, LedgerError> {
        self.loan_types
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::LoanTypeNotFound(id))
    }

    /// All loan products, oldest first.
    #[must_use]
    pub fn loan_types(&self) -> Vec<LoanType> {
        let mut types: Vec<_> = self
            .loan_types
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        types.sort_by_key(|t| (t.created_at, t.id));
        types
    }

    // ========== Loans ==========

    /// Creates and submits a loan application.
    ///
    /// The member lock is held while the limit is computed and the loan is
    /// registered, so concurrent applications of one member cannot both
    /// spend the same available credit.
    pub fn apply_for_loan(&self, application: LoanApplication) -> Result<Loan, LedgerError> {
        let loan_type = self.loan_type(application.loan_type_id)?;
        self.validate_amount(application.principal)?;
        let member_cell = self.member_cell(application.member_id)?;
        let member = self.lock_member(&member_cell, application.member_id)?;

        let limit = self.limit_for(&member, application.channel)?;
        let at = Utc::now();
        let mut loan = LoanLifecycle::create_draft(
            LoanId::new(),
            self.next_loan_number(),
            member.id,
            &loan_type,
            application.principal,
            application.actor,
            at,
        )?;
        if let Err(err) = LoanLifecycle::submit(&mut loan, limit.available_to_borrow, at) {
            if matches!(err, LoanError::CreditLimitExceeded { .. }) {
                warn!(
                    member_id = %member.id,
                    requested = %application.principal,
                    available = %limit.available_to_borrow,
                    "Loan application exceeds credit limit"
                );
            }
            return Err(err.into());
        }

        self.loans.insert(loan.id, Arc::new(Mutex::new(loan.clone())));
        self.member_loans.entry(member.id).or_default().push(loan.id);

        info!(
            loan_id = %loan.id,
            loan_number = %loan.loan_number,
            member_id = %member.id,
            principal = %loan.principal,
            total_payable = %loan.total_payable,
            "Loan application submitted"
        );
        Ok(loan)
    }

    /// Approves a pending loan.
    pub fn approve_loan(&self, loan_id: LoanId, actor: ActorId) -> Result<Loan, LedgerError> {
        let cell = self.loan_cell(loan_id)?;
        let mut guard = self.lock_loan(&cell, loan_id)?;
        let mut loan = guard.clone();
        LoanLifecycle::approve(&mut loan, actor, Utc::now())?;
        *guard = loan.clone();
        info!(loan_id = %loan_id, actor = %actor, "Loan approved");
        Ok(loan)
    }

    /// Rejects a pending loan.
    pub fn reject_loan(
        &self,
        loan_id: LoanId,
        actor: ActorId,
        reason: &str,
    ) -> Result<Loan, LedgerError> {
        let cell = self.loan_cell(loan_id)?;
        let mut guard = self.lock_loan(&cell, loan_id)?;
        let mut loan = guard.clone();
        LoanLifecycle::reject(&mut loan, actor, reason, Utc::now())?;
        *guard = loan.clone();
        info!(loan_id = %loan_id, actor = %actor, reason, "Loan rejected");
        Ok(loan)
    }

    /// Disburses an approved loan: credits the principal to the member's
    /// drawdown account and starts the repayment clock.
    pub fn disburse_loan(&self, loan_id: LoanId, actor: ActorId) -> Result<Loan, LedgerError> {
        let loan_cell = self.loan_cell(loan_id)?;
        let member_id = self.lock_loan(&loan_cell, loan_id)?.member_id;

        let reference = format!("DISB-{loan_id}");
        let guard = self.journal.reserve(&reference, None)?;
        let member_cell = self.member_cell(member_id)?;
        let member = self.lock_member(&member_cell, member_id)?;
        Self::ensure_can_transact(&member)?;
        let mut loan_guard = self.lock_loan(&loan_cell, loan_id)?;

        let drawdown_id = Self::account_id_for(&member, AccountKind::Drawdown)?;
        let cells = self.account_cells(&[drawdown_id])?;
        let mut accounts = LockedAccounts::acquire(&cells, self.config.lock_timeout)?;

        let at = Utc::now();
        let mut loan = loan_guard.clone();
        LoanLifecycle::disburse(&mut loan, actor, at)?;
        let mut drawdown = accounts.snapshot(drawdown_id)?;
        let change = drawdown.credit(loan.principal)?;
        let ctx = RecordContext {
            member_id,
            reference: &reference,
            external_reference: None,
            actor,
            at,
        };
        let record = ctx.confirmed(
            &drawdown,
            TransactionType::LoanDisbursement,
            EntryDirection::Credit,
            loan.principal,
            change,
            Some(loan_id),
        );

        let stored = self.journal.append(vec![record]);
        accounts.commit([drawdown]);
        *loan_guard = loan.clone();
        drop(accounts);
        drop(loan_guard);
        drop(member);
        if let Some(record) = stored.first() {
            guard.commit(record.id);
        }

        info!(
            loan_id = %loan_id,
            member_id = %member_id,
            principal = %loan.principal,
            outstanding = %loan.outstanding_balance,
            actor = %actor,
            "Loan disbursed"
        );
        if let Some(due_date) = loan.due_date {
            self.events.publish(DomainEvent::LoanDisbursed {
                loan_id,
                member_id,
                amount: loan.principal,
                due_date,
            });
        }
        Ok(loan)
    }

    /// Looks up a loan.
    pub fn loan(&self, loan_id: LoanId) -> Result<Loan, LedgerError> {
        let cell = self.loan_cell(loan_id)?;
        let loan = self.lock_loan(&cell, loan_id)?;
        Ok(loan.clone())
    }

    /// The member's loans, oldest first.
    pub fn member_loans(&self, member_id: MemberId) -> Result<Vec<Loan>, LedgerError> {
        if !self.members.contains_key(&member_id) {
            return Err(LedgerError::MemberNotFound(member_id));
        }
        self.loan_ids_of(member_id)
            .into_iter()
            .map(|id| self.loan(id))
            .collect()
    }

    /// Borrowing capacity of a member.
    pub fn loan_limit(
        &self,
        member_id: MemberId,
        channel: CreditChannel,
    ) -> Result<LoanLimit, LedgerError> {
        let cell = self.member_cell(member_id)?;
        let member = self.lock_member(&cell, member_id)?;
        self.limit_for(&member, channel)
    }

    /// Computes the limit; the caller holds the member lock.
    fn limit_for(&self, member: &Member, channel: CreditChannel) -> Result<LoanLimit, LedgerError> {
        let mut outstanding = Money::zero(self.config.currency);
        let mut loan_ids = self.loan_ids_of(member.id);
        loan_ids.sort();
        for loan_id in loan_ids {
            let cell = self.loan_cell(loan_id)?;
            let loan = self.lock_loan(&cell, loan_id)?;
            outstanding = outstanding.checked_add(loan.exposure())?;
        }
        let savings = self.account(member.savings_account_id)?;
        Ok(self
            .credit
            .evaluate(member.status, savings.balance, outstanding, channel)?)
    }

    /// Adds penalties to disbursed loans past due date and grace period.
    pub fn accrue_penalties(&self, as_of: DateTime<Utc>) -> Result<Vec<PenaltyCharge>, LedgerError> {
        let mut charges = Vec::new();
        for (loan_id, cell) in self.loan_cells() {
            let mut guard = self.lock_loan(&cell, loan_id)?;
            if guard.status != LoanStatus::Disbursed {
                continue;
            }
            let mut loan = guard.clone();
            let charged = LoanLifecycle::accrue_penalty(&mut loan, as_of)?;
            if charged.is_positive() {
                *guard = loan;
                info!(
                    loan_id = %loan_id,
                    penalty = %charged,
                    outstanding = %guard.outstanding_balance,
                    "Penalty accrued"
                );
                charges.push(PenaltyCharge {
                    loan_id,
                    amount: charged,
                    outstanding: guard.outstanding_balance,
                });
            }
        }
        Ok(charges)
    }

    /// Reports overdue loans and defaults those overdue longer than the
    /// configured threshold.
    pub fn sweep_overdue(&self, as_of: DateTime<Utc>) -> Result<SweepReport, LedgerError> {
        let mut report = SweepReport::default();
        let mut events = Vec::new();
        for (loan_id, cell) in self.loan_cells() {
            let mut guard = self.lock_loan(&cell, loan_id)?;
            if !LoanLifecycle::is_overdue(&guard, as_of) {
                continue;
            }
            let days_overdue = LoanLifecycle::days_overdue(&guard, as_of);
            if days_overdue > i64::from(self.config.default_after_days) {
                let mut loan = guard.clone();
                LoanLifecycle::mark_defaulted(&mut loan, as_of)?;
                *guard = loan;
                warn!(loan_id = %loan_id, days_overdue, "Loan marked defaulted");
                report.defaulted.push(loan_id);
            } else {
                report.overdue.push(loan_id);
                events.push(DomainEvent::LoanOverdue {
                    loan_id,
                    member_id: guard.member_id,
                    days_overdue,
                    outstanding: guard.outstanding_balance,
                });
            }
        }
        for event in events {
            self.events.publish(event);
        }
        Ok(report)
    }

    // ========== Audit ==========

    /// Replays one account's confirmed records and compares with its balance.
    pub fn verify_account(&self, account_id: LedgerAccountId) -> Result<ReplayReport, LedgerError> {
        let cell = self.account_cell(account_id)?;
        let account = locks::acquire(
            &cell,
            self.config.lock_timeout,
            format!("account {account_id}"),
        )?;
        let records = self.journal.for_account(account_id);
        let report = replay_account(account_id, account.balance, &records);
        if let Some(discrepancy) = &report.discrepancy {
            warn!(account_id = %account_id, ?discrepancy, "Replay discrepancy");
        } else {
            tracing::debug!(
                account_id = %account_id,
                records = report.records_replayed,
                "Replay clean"
            );
        }
        Ok(report)
    }

    /// Replays every account.
    pub fn verify_all(&self) -> Result<Vec<ReplayReport>, LedgerError> {
        let mut ids: Vec<_> = self.accounts.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids.into_iter().map(|id| self.verify_account(id)).collect()
    }

    // ========== Internals ==========

    pub(crate) fn validate_amount(&self, amount: Money) -> Result<(), LedgerError> {
        if amount.currency != self.config.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.config.currency,
                actual: amount.currency,
            });
        }
        if !amount.is_positive() {
            return Err(LedgerError::Validation("amount must be positive".into()));
        }
        if amount.amount.normalize().scale() > CENT_SCALE {
            return Err(LedgerError::Validation(
                "amount cannot have fractions of a cent".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn ensure_can_transact(member: &Member) -> Result<(), LedgerError> {
        if member.status.can_transact() {
            Ok(())
        } else {
            Err(LedgerError::MemberNotActive {
                member_id: member.id,
                status: member.status,
            })
        }
    }

    pub(crate) fn account_id_for(
        member: &Member,
        kind: AccountKind,
    ) -> Result<LedgerAccountId, LedgerError> {
        match kind {
            AccountKind::Savings => Ok(member.savings_account_id),
            AccountKind::Drawdown => {
                member
                    .drawdown_account_id
                    .ok_or(LedgerError::AccountNotProvisioned {
                        member_id: member.id,
                        kind,
                    })
            }
        }
    }

    pub(crate) fn member_cell(&self, id: MemberId) -> Result<Cell<Member>, LedgerError> {
        self.members
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::MemberNotFound(id))
    }

    pub(crate) fn lock_member<'a>(
        &self,
        cell: &'a Mutex<Member>,
        id: MemberId,
    ) -> Result<parking_lot::MutexGuard<'a, Member>, LedgerError> {
        locks::acquire(cell, self.config.lock_timeout, format!("member {id}"))
    }

    pub(crate) fn loan_cell(&self, id: LoanId) -> Result<Cell<Loan>, LedgerError> {
        self.loans
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::LoanNotFound(id))
    }

    pub(crate) fn lock_loan<'a>(
        &self,
        cell: &'a Mutex<Loan>,
        id: LoanId,
    ) -> Result<parking_lot::MutexGuard<'a, Loan>, LedgerError> {
        locks::acquire(cell, self.config.lock_timeout, format!("loan {id}"))
    }

    fn account_cell(&self, id: LedgerAccountId) -> Result<Cell<LedgerAccount>, LedgerError> {
        self.accounts
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Cells for `ids`, sorted for locking.
    pub(crate) fn account_cells(
        &self,
        ids: &[LedgerAccountId],
    ) -> Result<Vec<(LedgerAccountId, Cell<LedgerAccount>)>, LedgerError> {
        let pairs = ids
            .iter()
            .map(|&id| self.account_cell(id).map(|cell| (id, cell)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(locks::ordered(pairs))
    }

    fn loan_ids_of(&self, member_id: MemberId) -> Vec<LoanId> {
        self.member_loans
            .get(&member_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of every loan cell, in id order.
    fn loan_cells(&self) -> Vec<(LoanId, Cell<Loan>)> {
        let mut cells: Vec<_> = self
            .loans
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        cells.sort_by_key(|(id, _)| *id);
        cells
    }

    fn next_account_number(&self, kind: AccountKind) -> String {
        let seq = self.account_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{seq:06}", kind.number_prefix())
    }

    fn next_loan_number(&self) -> String {
        let seq = self.loan_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("LN-{seq:06}")
    }
}
