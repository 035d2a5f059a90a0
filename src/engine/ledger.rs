//! Bet ledger: pending wagers for the active round.
//!
//! The ledger owns the betting gate (which round is taking bets and until
//! when) and the bet list of that round, both behind one mutex. Placing a
//! bet holds that mutex across the balance debit and the bet-set write, so
//! closing the gate waits for any in-flight bet and the settlement engine
//! always reads a frozen set.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::accounts::{AccountStore, Entry};
use crate::engine::clock::Clock;
use crate::notify::{GameEvent, Notifier, RejectionReason};
use crate::storage::{self, keys, PersistenceProvider};
use crate::types::{Amount, Bet, Color, GameError, Round, RoundId, TransactionKind};

#[derive(Debug, Clone, Copy)]
struct Gate {
    round_id: RoundId,
    betting_cutoff_at: DateTime<Utc>,
    accepting: bool,
}

#[derive(Debug, Default)]
struct Book {
    gate: Option<Gate>,
    bets: Vec<Bet>,
}

pub struct BetLedger {
    store: Arc<dyn PersistenceProvider>,
    accounts: Arc<AccountStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    min_stake: Amount,
    book: Mutex<Book>,
}

impl BetLedger {
    pub fn new(
        store: Arc<dyn PersistenceProvider>,
        accounts: Arc<AccountStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        min_stake: Amount,
    ) -> Self {
        Self {
            store,
            accounts,
            clock,
            notifier,
            min_stake,
            book: Mutex::new(Book::default()),
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn min_stake(&self) -> Amount {
        self.min_stake
    }

    // -- Caller-facing --

    /// Place a wager on the open round.
    ///
    /// Checks run in order: stake size, round still open, then the balance
    /// (inside the debit). The debit and the bet-set write either both
    /// land or neither does.
    pub fn place_bet(&self, user_id: &str, color: Color, amount: Amount) -> Result<Bet, GameError> {
        let result = self.try_place(user_id, color, amount);
        match &result {
            Ok(bet) => {
                info!(
                    round_id = bet.round_id,
                    user_id,
                    color = %color,
                    amount,
                    "Bet placed"
                );
                self.notifier.notify(&GameEvent::BetAccepted {
                    round_id: bet.round_id,
                    bet_id: bet.id,
                    user_id: user_id.to_string(),
                    color,
                    amount,
                });
            }
            Err(e) => {
                debug!(user_id, color = %color, amount, error = %e, "Bet rejected");
                self.notifier.notify(&GameEvent::BetRejected {
                    user_id: user_id.to_string(),
                    color,
                    amount,
                    reason: RejectionReason::from_error(e),
                });
            }
        }
        result
    }

    fn try_place(&self, user_id: &str, color: Color, amount: Amount) -> Result<Bet, GameError> {
        let mut book = self.book();

        if amount < self.min_stake {
            return Err(GameError::InvalidAmount {
                amount,
                minimum: self.min_stake,
            });
        }

        let now = self.clock.now();
        let gate = match book.gate {
            Some(gate) if gate.accepting && now < gate.betting_cutoff_at => gate,
            Some(gate) => return Err(GameError::RoundClosed { round_id: gate.round_id }),
            None => return Err(GameError::RoundClosed { round_id: 0 }),
        };

        let bet = Bet {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            round_id: gate.round_id,
            color,
            amount,
            placed_at: now,
        };

        book.bets.push(bet.clone());
        let key = keys::bets(gate.round_id);
        let bets = &book.bets;
        let entry = Entry::debit(TransactionKind::Bet, amount).for_bet(gate.round_id, bet.id, color);
        let debited = self.accounts.debit_then(user_id, amount, entry, |_| {
            storage::save_json(&*self.store, &key, bets).map_err(GameError::from)
        });

        if let Err(e) = debited {
            book.bets.pop();
            return Err(e);
        }
        Ok(bet)
    }

    // -- Scheduler-facing --

    /// Start taking bets for a freshly opened round.
    pub fn open_round(&self, round: &Round) {
        let mut book = self.book();
        *book = Book {
            gate: Some(Gate {
                round_id: round.id,
                betting_cutoff_at: round.betting_cutoff_at,
                accepting: true,
            }),
            bets: Vec::new(),
        };
    }

    /// Reattach to an unresolved round after a restart, reloading its bets.
    /// Returns how many bets were restored.
    pub fn restore(&self, round: &Round, now: DateTime<Utc>) -> Result<usize, GameError> {
        let bets: Vec<Bet> =
            storage::load_json(&*self.store, &keys::bets(round.id))?.unwrap_or_default();
        let count = bets.len();
        let mut book = self.book();
        *book = Book {
            gate: Some(Gate {
                round_id: round.id,
                betting_cutoff_at: round.betting_cutoff_at,
                accepting: round.accepts_bets(now),
            }),
            bets,
        };
        info!(round_id = round.id, bets = count, accepting = book.gate.map_or(false, |g| g.accepting), "Ledger restored");
        Ok(count)
    }

    /// Stop accepting bets for `round_id`. Returns the number of bets held.
    pub fn close_betting(&self, round_id: RoundId) -> usize {
        let mut book = self.book();
        match book.gate.as_mut() {
            Some(gate) if gate.round_id == round_id => gate.accepting = false,
            _ => warn!(round_id, "Close requested for a round the ledger is not tracking"),
        }
        book.bets.len()
    }

    /// Whether bets are currently being taken.
    pub fn is_accepting(&self) -> bool {
        self.book().gate.map_or(false, |g| g.accepting)
    }

    /// Snapshot of every bet held for `round_id`.
    pub fn bets(&self, round_id: RoundId) -> Vec<Bet> {
        self.book()
            .bets
            .iter()
            .filter(|b| b.round_id == round_id)
            .cloned()
            .collect()
    }

    /// Bets a user holds in the active round.
    pub fn bets_for_user(&self, user_id: &str) -> Vec<Bet> {
        self.book()
            .bets
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Drop every bet of a settled round, on disk and in memory, as one
    /// key deletion. Returns how many were dropped.
    pub fn clear(&self, round_id: RoundId) -> Result<usize, GameError> {
        let mut book = self.book();
        self.store.delete(&keys::bets(round_id))?;
        let before = book.bets.len();
        book.bets.retain(|b| b.round_id != round_id);
        let cleared = before - book.bets.len();
        debug!(round_id, cleared, "Ledger cleared");
        Ok(cleared)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
