//! Account store: balances and the transaction log behind them.
//!
//! Every balance change goes through `apply_locked`, which builds the next
//! account value, persists it, and only then swaps it into memory. A failed
//! save therefore leaves both disk and memory on the previous value, and
//! every committed balance change carries exactly one transaction.
//!
//! Each account sits behind its own mutex, so operations on one user are
//! serialised while different users proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::clock::Clock;
use crate::storage::{self, keys, PersistenceProvider};
use crate::types::{
    is_valid_user_id, Account, Amount, Color, GameError, PayoutDetails, RoundId, Transaction,
    TransactionKind, TransactionStatus, TransactionSummary, UserId,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Wallet rules applied to deposits, withdrawals and new accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletLimits {
    /// Balance granted to a newly opened account.
    pub initial_balance: Amount,
    pub min_deposit: Amount,
    pub min_withdrawal: Amount,
    /// Largest single deposit or withdrawal.
    pub max_transaction: Amount,
}

impl Default for WalletLimits {
    fn default() -> Self {
        Self {
            initial_balance: 1000,
            min_deposit: 100,
            min_withdrawal: 200,
            max_transaction: 1_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger entry
// ---------------------------------------------------------------------------

/// A balance change waiting to be applied.
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: TransactionKind,
    /// Signed change to the balance.
    pub amount: Amount,
    pub round_id: Option<RoundId>,
    pub color: Option<Color>,
    pub bet_id: Option<Uuid>,
    pub payout: Option<PayoutDetails>,
    pub status: TransactionStatus,
}

impl Entry {
    pub fn debit(kind: TransactionKind, amount: Amount) -> Self {
        Self::new(kind, -amount)
    }

    pub fn credit(kind: TransactionKind, amount: Amount) -> Self {
        Self::new(kind, amount)
    }

    fn new(kind: TransactionKind, amount: Amount) -> Self {
        Self {
            kind,
            amount,
            round_id: None,
            color: None,
            bet_id: None,
            payout: None,
            status: TransactionStatus::Completed,
        }
    }

    pub fn round(mut self, round_id: Option<RoundId>) -> Self {
        self.round_id = round_id;
        self
    }

    pub fn for_bet(mut self, round_id: RoundId, bet_id: Uuid, color: Color) -> Self {
        self.round_id = Some(round_id);
        self.bet_id = Some(bet_id);
        self.color = Some(color);
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn payout(mut self, details: PayoutDetails) -> Self {
        self.payout = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// Account store
// ---------------------------------------------------------------------------

type AccountCell = Arc<Mutex<Account>>;

fn lock(cell: &AccountCell) -> MutexGuard<'_, Account> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct AccountStore {
    store: Arc<dyn PersistenceProvider>,
    clock: Arc<dyn Clock>,
    limits: WalletLimits,
    accounts: RwLock<HashMap<UserId, AccountCell>>,
}

impl AccountStore {
    pub fn new(store: Arc<dyn PersistenceProvider>, clock: Arc<dyn Clock>, limits: WalletLimits) -> Self {
        Self {
            store,
            clock,
            limits,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &WalletLimits {
        &self.limits
    }

    /// Restore every indexed account from storage. Returns how many loaded.
    pub fn load_all(&self) -> Result<usize, GameError> {
        let index: Vec<UserId> =
            storage::load_json(&*self.store, keys::ACCOUNT_INDEX)?.unwrap_or_default();
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);

        for user_id in index {
            match storage::load_json::<Account>(&*self.store, &keys::account(&user_id))? {
                Some(account) => {
                    if !account.is_consistent() {
                        warn!(
                            user_id = %user_id,
                            balance = account.balance,
                            replayed = account.replayed_balance(),
                            "Account log does not fold to its balance"
                        );
                    }
                    accounts.insert(user_id, Arc::new(Mutex::new(account)));
                }
                None => warn!(user_id = %user_id, "Indexed account has no record, skipping"),
            }
        }

        info!(accounts = accounts.len(), "Accounts loaded");
        Ok(accounts.len())
    }

    /// Open an account with the configured starting balance.
    pub fn open_account(&self, user_id: &str) -> Result<Account, GameError> {
        self.open_account_with(user_id, self.limits.initial_balance)
    }

    /// Open an account with an explicit starting balance.
    ///
    /// The id must pass `is_valid_user_id`; anything else could name a
    /// storage record other than the account's own.
    pub fn open_account_with(&self, user_id: &str, initial_balance: Amount) -> Result<Account, GameError> {
        if !is_valid_user_id(user_id) {
            return Err(GameError::InvalidUserId(user_id.to_string()));
        }
        if initial_balance < 0 {
            return Err(GameError::InvalidAmount {
                amount: initial_balance,
                minimum: 0,
            });
        }

        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        if accounts.contains_key(user_id) {
            return Err(GameError::AccountExists(user_id.to_string()));
        }

        let account = Account::new(user_id, initial_balance, self.clock.now());
        let key = keys::account(&account.user_id);
        storage::save_json(&*self.store, &key, &account)?;

        let mut index: Vec<&UserId> = accounts.keys().collect();
        index.push(&account.user_id);
        index.sort();
        if let Err(e) = storage::save_json(&*self.store, keys::ACCOUNT_INDEX, &index) {
            if let Err(cleanup) = self.store.delete(&key) {
                warn!(user_id, error = %cleanup, "Could not remove orphaned account record");
            }
            return Err(e.into());
        }

        info!(user_id, initial_balance, "Account opened");
        accounts.insert(account.user_id.clone(), Arc::new(Mutex::new(account.clone())));
        Ok(account)
    }

    fn cell(&self, user_id: &str) -> Result<AccountCell, GameError> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
            .ok_or_else(|| GameError::UnknownUser(user_id.to_string()))
    }

    /// Apply `entry` to a locked account.
    ///
    /// The new account value is saved first, then `commit` runs. If
    /// `commit` fails the previous record is saved back and memory is left
    /// untouched, so the caller's write and this one land together or not
    /// at all.
    fn apply_locked<F>(&self, account: &mut Account, entry: Entry, commit: F) -> Result<Transaction, GameError>
    where
        F: FnOnce(&Transaction) -> Result<(), GameError>,
    {
        let next_balance = account
            .balance
            .checked_add(entry.amount)
            .ok_or_else(|| GameError::AmountTooLarge {
                amount: entry.amount,
                maximum: Amount::MAX - account.balance,
            })?;
        if next_balance < 0 {
            return Err(GameError::InsufficientBalance {
                needed: -entry.amount,
                available: account.balance,
            });
        }

        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: account.user_id.clone(),
            kind: entry.kind,
            amount: entry.amount,
            round_id: entry.round_id,
            color: entry.color,
            bet_id: entry.bet_id,
            payout: entry.payout,
            status: entry.status,
            timestamp: self.clock.now(),
        };

        let mut next = account.clone();
        next.balance = next_balance;
        next.transactions.push(tx.clone());

        let key = keys::account(&account.user_id);
        storage::save_json(&*self.store, &key, &next)?;

        if let Err(e) = commit(&tx) {
            if let Err(rollback) = storage::save_json(&*self.store, &key, account) {
                error!(
                    user_id = %account.user_id,
                    tx_id = %tx.id,
                    error = %rollback,
                    "Rollback of account record failed"
                );
            }
            return Err(e);
        }

        *account = next;
        debug!(
            user_id = %account.user_id,
            kind = %tx.kind,
            amount = tx.amount,
            balance = account.balance,
            "Balance updated"
        );
        Ok(tx)
    }

    fn apply<F>(&self, user_id: &str, entry: Entry, commit: F) -> Result<Transaction, GameError>
    where
        F: FnOnce(&Transaction) -> Result<(), GameError>,
    {
        let cell = self.cell(user_id)?;
        let mut account = lock(&cell);
        self.apply_locked(&mut account, entry, commit)
    }

    fn require_positive(amount: Amount) -> Result<(), GameError> {
        if amount <= 0 {
            return Err(GameError::InvalidAmount { amount, minimum: 1 });
        }
        Ok(())
    }

    /// Take `amount` out of the account. Fails with `InsufficientBalance`
    /// before anything changes if the balance would go negative.
    pub fn debit(
        &self,
        user_id: &str,
        amount: Amount,
        kind: TransactionKind,
        round_id: Option<RoundId>,
    ) -> Result<Transaction, GameError> {
        Self::require_positive(amount)?;
        self.apply(user_id, Entry::debit(kind, amount).round(round_id), |_| Ok(()))
    }

    /// Debit whose durable write is followed by the caller's `commit`.
    pub fn debit_then<F>(&self, user_id: &str, amount: Amount, entry: Entry, commit: F) -> Result<Transaction, GameError>
    where
        F: FnOnce(&Transaction) -> Result<(), GameError>,
    {
        Self::require_positive(amount)?;
        let entry = Entry {
            amount: -amount,
            ..entry
        };
        self.apply(user_id, entry, commit)
    }

    /// Add `amount` to the account.
    pub fn credit(
        &self,
        user_id: &str,
        amount: Amount,
        kind: TransactionKind,
        round_id: Option<RoundId>,
    ) -> Result<Transaction, GameError> {
        Self::require_positive(amount)?;
        self.apply(user_id, Entry::credit(kind, amount).round(round_id), |_| Ok(()))
    }

    /// Pay out a winning bet. Idempotent per bet: if a WIN for `bet_id`
    /// is already on the log, that record is returned and nothing changes.
    pub fn credit_winnings(
        &self,
        user_id: &str,
        payout: Amount,
        round_id: RoundId,
        bet_id: Uuid,
        color: Color,
    ) -> Result<Transaction, GameError> {
        Self::require_positive(payout)?;
        let cell = self.cell(user_id)?;
        let mut account = lock(&cell);

        if let Some(existing) = account
            .transactions
            .iter()
            .find(|t| t.kind == TransactionKind::Win && t.bet_id == Some(bet_id))
        {
            debug!(user_id, bet_id = %bet_id, "Winnings already credited");
            return Ok(existing.clone());
        }

        let entry = Entry::credit(TransactionKind::Win, payout).for_bet(round_id, bet_id, color);
        self.apply_locked(&mut account, entry, |_| Ok(()))
    }

    fn check_range(&self, amount: Amount, minimum: Amount) -> Result<(), GameError> {
        if amount < minimum {
            return Err(GameError::InvalidAmount { amount, minimum });
        }
        if amount > self.limits.max_transaction {
            return Err(GameError::AmountTooLarge {
                amount,
                maximum: self.limits.max_transaction,
            });
        }
        Ok(())
    }

    /// Add cash to the wallet.
    pub fn deposit(&self, user_id: &str, amount: Amount) -> Result<Transaction, GameError> {
        self.check_range(amount, self.limits.min_deposit)?;
        let tx = self.credit(user_id, amount, TransactionKind::Deposit, None)?;
        info!(user_id, amount, "Deposit completed");
        Ok(tx)
    }

    /// Request a withdrawal to `payout`. Funds leave the balance now; the
    /// record stays PENDING, carrying the payout details, until
    /// `resolve_withdrawal`.
    pub fn withdraw(
        &self,
        user_id: &str,
        amount: Amount,
        payout: &PayoutDetails,
    ) -> Result<Transaction, GameError> {
        self.check_range(amount, self.limits.min_withdrawal)?;
        let payout = payout.validated()?;
        let entry = Entry::debit(TransactionKind::Withdrawal, amount)
            .status(TransactionStatus::Pending)
            .payout(payout);
        let tx = self.apply(user_id, entry, |_| Ok(()))?;
        info!(user_id, amount, tx_id = %tx.id, "Withdrawal requested");
        Ok(tx)
    }

    /// Settle a pending withdrawal.
    ///
    /// `completed = true` marks it COMPLETED. Otherwise it is marked FAILED
    /// and a compensating WITHDRAWAL credit returns the funds; that refund
    /// is what gets returned.
    pub fn resolve_withdrawal(&self, user_id: &str, tx_id: Uuid, completed: bool) -> Result<Transaction, GameError> {
        let cell = self.cell(user_id)?;
        let mut account = lock(&cell);

        let position = account
            .transactions
            .iter()
            .position(|t| {
                t.id == tx_id
                    && t.kind == TransactionKind::Withdrawal
                    && t.status == TransactionStatus::Pending
            })
            .ok_or_else(|| GameError::UnknownTransaction {
                user_id: user_id.to_string(),
                tx_id,
            })?;

        let mut next = account.clone();
        next.transactions[position].status = if completed {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        };

        if completed {
            storage::save_json(&*self.store, &keys::account(&account.user_id), &next)?;
            *account = next;
            info!(user_id, tx_id = %tx_id, "Withdrawal completed");
            return Ok(account.transactions[position].clone());
        }

        // The status flip rides along with the refund in a single write.
        let refund = Entry::credit(TransactionKind::Withdrawal, -account.transactions[position].amount);
        let mut staged = next;
        let tx = self.apply_locked(&mut staged, refund, |_| Ok(()))?;
        *account = staged;
        warn!(user_id, tx_id = %tx_id, refund = tx.amount, "Withdrawal failed, funds returned");
        Ok(tx)
    }

    // -- Queries --

    pub fn exists(&self, user_id: &str) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user_id)
    }

    pub fn balance(&self, user_id: &str) -> Result<Amount, GameError> {
        let cell = self.cell(user_id)?;
        let balance = lock(&cell).balance;
        Ok(balance)
    }

    /// Snapshot of the full account.
    pub fn account(&self, user_id: &str) -> Result<Account, GameError> {
        let cell = self.cell(user_id)?;
        let account = lock(&cell).clone();
        Ok(account)
    }

    /// Transactions, most recent first.
    pub fn history(&self, user_id: &str) -> Result<Vec<Transaction>, GameError> {
        self.history_of_kind(user_id, None)
    }

    /// Transactions of one kind (all kinds for `None`), most recent first.
    pub fn history_of_kind(
        &self,
        user_id: &str,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, GameError> {
        let cell = self.cell(user_id)?;
        let history = lock(&cell)
            .transactions
            .iter()
            .rev()
            .filter(|t| kind.map_or(true, |k| t.kind == k))
            .cloned()
            .collect();
        Ok(history)
    }

    pub fn summary(&self, user_id: &str) -> Result<TransactionSummary, GameError> {
        let cell = self.cell(user_id)?;
        let summary = lock(&cell).summary();
        Ok(summary)
    }

    /// Whether the balance still equals the initial balance plus the log.
    pub fn is_consistent(&self, user_id: &str) -> Result<bool, GameError> {
        let cell = self.cell(user_id)?;
        let consistent = lock(&cell).is_consistent();
        Ok(consistent)
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
