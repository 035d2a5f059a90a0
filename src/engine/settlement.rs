//! Settlement engine: draws a round's outcome and pays the winners.
//!
//! Settlement is exactly-once per round. The drawn outcome is journalled
//! under `settlement/{round_id}` before any money moves, every payout is
//! idempotent per bet, and the journal is finalised with the payouts once
//! all credits have landed. A settlement interrupted half-way therefore
//! resumes with the same outcome and never pays a bet twice; a finished
//! one replays as a no-op.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::accounts::AccountStore;
use crate::engine::clock::Clock;
use crate::engine::random::{clamp_unit, RandomSource};
use crate::storage::{self, keys, PersistenceProvider};
use crate::types::{Amount, Bet, Color, GameError, Round, RoundId, RoundState, UserId};

// ---------------------------------------------------------------------------
// Payout math
// ---------------------------------------------------------------------------

/// Winnings for a stake on `color`: `amount × multiplier`, rounded down
/// to a whole unit (only VIOLET's 4.5× can produce a fraction).
pub fn payout(amount: Amount, color: Color) -> Amount {
    (Decimal::from(amount) * color.multiplier())
        .floor()
        .to_i64()
        .unwrap_or(Amount::MAX)
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// What a settlement did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub round_id: RoundId,
    pub outcome: Color,
    /// Total winnings per user; users with no winning bet are absent.
    pub payouts: BTreeMap<UserId, Amount>,
    pub bets_settled: usize,
    pub winning_bets: usize,
    pub total_staked: Amount,
    pub total_paid: Amount,
    /// True when this round had already been settled and nothing moved.
    #[serde(default)]
    pub replayed: bool,
}

/// Journal record. `payouts` is `None` while credits are in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Journal {
    round_id: RoundId,
    outcome: Color,
    drawn_at: DateTime<Utc>,
    #[serde(default)]
    result: Option<Settlement>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    store: Arc<dyn PersistenceProvider>,
    accounts: Arc<AccountStore>,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn PersistenceProvider>,
        accounts: Arc<AccountStore>,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            accounts,
            random,
            clock,
        }
    }

    /// Draw an outcome from the weighted 45 / 45 / 10 bands.
    pub fn draw(&self) -> Color {
        Color::from_roll(clamp_unit(self.random.next_uniform()) * 100.0)
    }

    /// Settle `round` against its frozen bet set.
    ///
    /// Calling this again for a round that already finished settling is a
    /// no-op that returns the original result with `replayed` set.
    pub fn settle(&self, round: &Round, bets: &[Bet]) -> Result<Settlement, GameError> {
        match self.try_settle(round, bets) {
            Err(GameError::DuplicateSettlement(round_id)) => {
                debug!(round_id, "Settlement already done, replaying");
                self.replay(round)
            }
            other => other,
        }
    }

    fn load_journal(&self, round_id: RoundId) -> Result<Option<Journal>, GameError> {
        Ok(storage::load_json(&*self.store, &keys::settlement(round_id))?)
    }

    fn try_settle(&self, round: &Round, bets: &[Bet]) -> Result<Settlement, GameError> {
        let key = keys::settlement(round.id);

        let journal = match self.load_journal(round.id)? {
            Some(journal) if journal.result.is_some() => {
                return Err(GameError::DuplicateSettlement(round.id))
            }
            Some(journal) => {
                info!(
                    round_id = round.id,
                    outcome = %journal.outcome,
                    "Resuming interrupted settlement"
                );
                journal
            }
            None if round.state == RoundState::Resolved => {
                return Err(GameError::DuplicateSettlement(round.id))
            }
            None => {
                let journal = Journal {
                    round_id: round.id,
                    outcome: self.draw(),
                    drawn_at: self.clock.now(),
                    result: None,
                };
                storage::save_json(&*self.store, &key, &journal)?;
                info!(round_id = round.id, outcome = %journal.outcome, "Outcome drawn");
                journal
            }
        };

        let outcome = journal.outcome;
        let mut settlement = Settlement {
            round_id: round.id,
            outcome,
            payouts: BTreeMap::new(),
            bets_settled: 0,
            winning_bets: 0,
            total_staked: 0,
            total_paid: 0,
            replayed: false,
        };

        for bet in bets.iter().filter(|b| b.round_id == round.id) {
            settlement.bets_settled += 1;
            settlement.total_staked = settlement.total_staked.saturating_add(bet.amount);
            if bet.color != outcome {
                continue;
            }

            let win = payout(bet.amount, outcome);
            self.accounts
                .credit_winnings(&bet.user_id, win, round.id, bet.id, outcome)?;
            let owed = settlement.payouts.entry(bet.user_id.clone()).or_insert(0);
            *owed = owed.saturating_add(win);
            settlement.winning_bets += 1;
            settlement.total_paid = settlement.total_paid.saturating_add(win);
        }

        let finished = Journal {
            result: Some(settlement.clone()),
            ..journal
        };
        storage::save_json(&*self.store, &key, &finished)?;

        info!(
            round_id = round.id,
            outcome = %outcome,
            bets = settlement.bets_settled,
            winners = settlement.winning_bets,
            staked = settlement.total_staked,
            paid = settlement.total_paid,
            "Round settled"
        );
        Ok(settlement)
    }

    fn replay(&self, round: &Round) -> Result<Settlement, GameError> {
        if let Some(Journal {
            result: Some(mut settlement),
            ..
        }) = self.load_journal(round.id)?
        {
            settlement.replayed = true;
            return Ok(settlement);
        }

        // A resolved round whose journal is gone: report the outcome only.
        match round.outcome {
            Some(outcome) => Ok(Settlement {
                round_id: round.id,
                outcome,
                payouts: BTreeMap::new(),
                bets_settled: 0,
                winning_bets: 0,
                total_staked: 0,
                total_paid: 0,
                replayed: true,
            }),
            None => {
                warn!(round_id = round.id, "Resolved round without outcome or journal");
                Err(GameError::DuplicateSettlement(round.id))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
