//! Game facade: the operations the outside world calls.
//!
//! `Game` wires the account store, bet ledger, settlement engine and round
//! scheduler around one set of injected collaborators. Construction
//! restores persisted state and runs a first tick, so by the time a `Game`
//! exists any round that closed while the process was down is resolved.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::{GameConfig, WalletConfig};
use crate::engine::accounts::AccountStore;
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::ledger::BetLedger;
use crate::engine::random::{RandomSource, ThreadRandom};
use crate::engine::scheduler::{RoundScheduler, TickReport};
use crate::engine::settlement::SettlementEngine;
use crate::notify::{Notifier, NotifierSet};
use crate::storage::{MemoryStore, PersistenceProvider};
use crate::types::{
    Account, Amount, Bet, Color, GameError, PayoutDetails, Round, RoundResult, Transaction,
    TransactionKind, TransactionSummary,
};

/// Everything the engine reaches out to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PersistenceProvider>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    /// Real clock and randomness over the given store, no notifier.
    pub fn system(store: Arc<dyn PersistenceProvider>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
            notifier: Arc::new(NotifierSet::new()),
        }
    }

    /// Ephemeral in-memory storage with the given clock and randomness.
    pub fn in_memory(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock,
            random,
            notifier: Arc::new(NotifierSet::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// The current round plus the countdowns a client needs to render it.
#[derive(Debug, Clone, Serialize)]
pub struct RoundStatus {
    pub round: Round,
    pub seconds_remaining: i64,
    pub betting_seconds_remaining: i64,
    pub accepts_bets: bool,
}

pub struct Game {
    accounts: Arc<AccountStore>,
    ledger: Arc<BetLedger>,
    scheduler: RoundScheduler,
    clock: Arc<dyn Clock>,
}

impl Game {
    /// Load accounts, restore the round and run the first tick.
    pub fn start(
        game: &GameConfig,
        wallet: &WalletConfig,
        deps: Collaborators,
    ) -> Result<(Self, TickReport), GameError> {
        let accounts = Arc::new(AccountStore::new(
            deps.store.clone(),
            deps.clock.clone(),
            wallet.limits(),
        ));
        let restored = accounts.load_all()?;

        let ledger = Arc::new(BetLedger::new(
            deps.store.clone(),
            accounts.clone(),
            deps.clock.clone(),
            deps.notifier.clone(),
            game.min_stake,
        ));
        let settlement = Arc::new(SettlementEngine::new(
            deps.store.clone(),
            accounts.clone(),
            deps.random.clone(),
            deps.clock.clone(),
        ));
        let (scheduler, report) = RoundScheduler::start(
            game.timing(),
            game.history_len,
            deps.store.clone(),
            ledger.clone(),
            settlement,
            deps.notifier.clone(),
            deps.clock.now(),
        )?;

        info!(
            accounts = restored,
            round = %scheduler.current_round(),
            "Game ready"
        );
        let game = Self {
            accounts,
            ledger,
            scheduler,
            clock: deps.clock,
        };
        Ok((game, report))
    }

    // -- Betting --

    pub fn place_bet(&self, user_id: &str, color: Color, amount: Amount) -> Result<Bet, GameError> {
        self.ledger.place_bet(user_id, color, amount)
    }

    /// The user's bets in the active round.
    pub fn bets_for_user(&self, user_id: &str) -> Vec<Bet> {
        self.ledger.bets_for_user(user_id)
    }

    pub fn min_stake(&self) -> Amount {
        self.ledger.min_stake()
    }

    // -- Rounds --

    pub fn current_round(&self) -> Round {
        self.scheduler.current_round()
    }

    pub fn round_status(&self) -> RoundStatus {
        let now = self.clock.now();
        let round = self.scheduler.current_round();
        RoundStatus {
            seconds_remaining: round.time_remaining(now).num_seconds(),
            betting_seconds_remaining: round.betting_time_remaining(now).num_seconds(),
            accepts_bets: round.accepts_bets(now),
            round,
        }
    }

    pub fn recent_results(&self) -> Vec<RoundResult> {
        self.scheduler.recent_results()
    }

    /// Advance the round state machine to the clock's current time.
    pub fn tick(&self) -> Result<TickReport, GameError> {
        self.tick_at(self.clock.now())
    }

    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, GameError> {
        self.scheduler.tick(now)
    }

    // -- Wallet --

    pub fn open_account(&self, user_id: &str) -> Result<Account, GameError> {
        self.accounts.open_account(user_id)
    }

    pub fn balance(&self, user_id: &str) -> Result<Amount, GameError> {
        self.accounts.balance(user_id)
    }

    /// Most recent first.
    pub fn transaction_history(&self, user_id: &str) -> Result<Vec<Transaction>, GameError> {
        self.accounts.history(user_id)
    }

    /// Most recent first, limited to `kind` when given.
    pub fn transaction_history_of_kind(
        &self,
        user_id: &str,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<Transaction>, GameError> {
        self.accounts.history_of_kind(user_id, kind)
    }

    pub fn transaction_summary(&self, user_id: &str) -> Result<TransactionSummary, GameError> {
        self.accounts.summary(user_id)
    }

    pub fn deposit(&self, user_id: &str, amount: Amount) -> Result<Transaction, GameError> {
        self.accounts.deposit(user_id, amount)
    }

    pub fn withdraw(
        &self,
        user_id: &str,
        amount: Amount,
        payout: &PayoutDetails,
    ) -> Result<Transaction, GameError> {
        self.accounts.withdraw(user_id, amount, payout)
    }

    pub fn resolve_withdrawal(
        &self,
        user_id: &str,
        tx_id: Uuid,
        completed: bool,
    ) -> Result<Transaction, GameError> {
        self.accounts.resolve_withdrawal(user_id, tx_id, completed)
    }

    pub fn is_consistent(&self, user_id: &str) -> Result<bool, GameError> {
        self.accounts.is_consistent(user_id)
    }
}
