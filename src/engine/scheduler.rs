//! Round scheduler: the OPEN → LOCKED → RESOLVING → RESOLVED state machine.
//!
//! The scheduler is the only writer of round state. It is advanced by
//! discrete `tick(now)` calls from one driving loop; a tick that arrives
//! while another is still running returns immediately without touching
//! anything. Every transition is persisted under `round/current` before it
//! becomes visible in memory, so a failed write leaves the round in its
//! last committed state and the next tick picks up from there.
//!
//! Bet sets of resolved rounds are deleted after resolution. A delete that
//! fails is retried at the start of every later tick, and start-up sweeps
//! any `bets/*` record that does not belong to the active round.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::engine::ledger::BetLedger;
use crate::engine::settlement::SettlementEngine;
use crate::notify::{GameEvent, Notifier};
use crate::storage::{self, keys, PersistenceProvider};
use crate::types::{Amount, Color, GameError, Round, RoundId, RoundResult, RoundState, RoundTiming};

// ---------------------------------------------------------------------------
// Tick reporting
// ---------------------------------------------------------------------------

/// One state change made by a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Opened(RoundId),
    Locked { round_id: RoundId, bets: usize },
    Resolving(RoundId),
    Resolved { round_id: RoundId, outcome: Color, paid: Amount },
}

/// What a tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub transitions: Vec<Transition>,
    /// Another tick was in progress; this one did nothing.
    pub skipped: bool,
}

impl TickReport {
    pub fn busy() -> Self {
        Self {
            transitions: Vec::new(),
            skipped: true,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Rounds resolved by this tick, with their outcomes.
    pub fn resolved(&self) -> Vec<(RoundId, Color)> {
        self.transitions
            .iter()
            .filter_map(|t| match t {
                Transition::Resolved { round_id, outcome, .. } => Some((*round_id, *outcome)),
                _ => None,
            })
            .collect()
    }
}

/// Clears the re-entrancy flag when the tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct RoundScheduler {
    timing: RoundTiming,
    history_len: usize,
    store: Arc<dyn PersistenceProvider>,
    ledger: Arc<BetLedger>,
    settlement: Arc<SettlementEngine>,
    notifier: Arc<dyn Notifier>,
    current: RwLock<Round>,
    history: RwLock<VecDeque<RoundResult>>,
    /// Resolved rounds whose bet set is still on disk.
    unswept: Mutex<BTreeSet<RoundId>>,
    ticking: AtomicBool,
}

impl RoundScheduler {
    /// Restore the persisted round (or open round #1) and run a first tick
    /// at `now`, so an overdue round is resolved before anything else.
    pub fn start(
        timing: RoundTiming,
        history_len: usize,
        store: Arc<dyn PersistenceProvider>,
        ledger: Arc<BetLedger>,
        settlement: Arc<SettlementEngine>,
        notifier: Arc<dyn Notifier>,
        now: DateTime<Utc>,
    ) -> Result<(Self, TickReport), GameError> {
        let mut opened = None;
        let current = match storage::load_json::<Round>(&*store, keys::CURRENT_ROUND)? {
            Some(round) if round.state.is_active() => {
                let bets = ledger.restore(&round, now)?;
                info!(round = %round, bets, "Restored active round");
                round
            }
            Some(round) => {
                // Resolved before shutdown. A bet set left behind is swept below.
                info!(round = %round, "Last round already resolved");
                round
            }
            None => {
                let round = Round::open(1, now, &timing);
                storage::save_json(&*store, keys::CURRENT_ROUND, &round)?;
                ledger.open_round(&round);
                opened = Some(round.clone());
                info!(round_id = round.id, "First round opened");
                round
            }
        };

        let mut history: VecDeque<RoundResult> =
            storage::load_json(&*store, keys::ROUND_HISTORY)?.unwrap_or_default();
        history.truncate(history_len);

        // Sweeps run at the start of every tick, the first one included.
        let active = current.state.is_active().then_some(current.id);
        let unswept: BTreeSet<RoundId> = store
            .list(keys::BETS_PREFIX)?
            .iter()
            .filter_map(|key| keys::bets_round(key))
            .filter(|id| Some(*id) != active)
            .collect();

        let scheduler = Self {
            timing,
            history_len,
            store,
            ledger,
            settlement,
            notifier,
            current: RwLock::new(current),
            history: RwLock::new(history),
            unswept: Mutex::new(unswept),
            ticking: AtomicBool::new(false),
        };

        let mut report = TickReport::default();
        if let Some(round) = opened {
            scheduler.announce_open(&round);
            report.transitions.push(Transition::Opened(round.id));
        }
        let first = scheduler.tick(now)?;
        report.transitions.extend(first.transitions);
        Ok((scheduler, report))
    }

    pub fn timing(&self) -> &RoundTiming {
        &self.timing
    }

    /// Snapshot of the active (or just-resolved) round.
    pub fn current_round(&self) -> Round {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last resolved rounds, newest first.
    pub fn recent_results(&self) -> Vec<RoundResult> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Advance the state machine as far as `now` allows.
    ///
    /// An overdue round goes through every remaining state in one call and
    /// is resolved exactly once; the next round then opens at `now`. At most
    /// one round is opened per tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, GameError> {
        let Some(_guard) = TickGuard::acquire(&self.ticking) else {
            debug!("Tick already in progress, skipping");
            return Ok(TickReport::busy());
        };

        self.sweep_bets();

        let mut report = TickReport::default();
        loop {
            let round = self.current_round();
            let transition = match round.state {
                RoundState::Open if now >= round.betting_cutoff_at => self.lock(round)?,
                RoundState::Locked if now >= round.closes_at => self.begin_resolution(round)?,
                RoundState::Resolving => self.resolve(round, now)?,
                RoundState::Resolved => {
                    let next = self.open_next(round.id + 1, now)?;
                    report.transitions.push(next);
                    break;
                }
                RoundState::Open | RoundState::Locked => break,
            };
            report.transitions.push(transition);
        }
        Ok(report)
    }

    // -- Transitions --

    fn commit(&self, round: Round) -> Result<(), GameError> {
        storage::save_json(&*self.store, keys::CURRENT_ROUND, &round)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = round;
        Ok(())
    }

    fn lock(&self, mut round: Round) -> Result<Transition, GameError> {
        // Close the gate first: once LOCKED is visible no bet may slip in.
        let bets = self.ledger.close_betting(round.id);
        round.state = RoundState::Locked;
        self.commit(round.clone())?;

        info!(round_id = round.id, bets, "Betting closed");
        self.notifier.notify(&GameEvent::BettingClosed {
            round_id: round.id,
            bets,
        });
        Ok(Transition::Locked {
            round_id: round.id,
            bets,
        })
    }

    fn begin_resolution(&self, mut round: Round) -> Result<Transition, GameError> {
        round.state = RoundState::Resolving;
        self.commit(round.clone())?;
        debug!(round_id = round.id, "Resolving");
        Ok(Transition::Resolving(round.id))
    }

    fn resolve(&self, mut round: Round, now: DateTime<Utc>) -> Result<Transition, GameError> {
        let bets = self.ledger.bets(round.id);
        let settlement = self.settlement.settle(&round, &bets)?;

        round.state = RoundState::Resolved;
        round.outcome = Some(settlement.outcome);
        self.commit(round.clone())?;

        if let Err(e) = self.ledger.clear(round.id) {
            warn!(round_id = round.id, error = %e, "Failed to clear settled bets, will retry");
            self.unswept
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(round.id);
        }
        self.record_result(RoundResult {
            round_id: round.id,
            outcome: settlement.outcome,
            resolved_at: now,
        });

        info!(
            round_id = round.id,
            outcome = %settlement.outcome,
            winners = settlement.payouts.len(),
            paid = settlement.total_paid,
            "Round resolved"
        );
        self.notifier.notify(&GameEvent::RoundResolved {
            round_id: round.id,
            outcome: settlement.outcome,
            payouts: settlement.payouts.clone(),
        });
        Ok(Transition::Resolved {
            round_id: round.id,
            outcome: settlement.outcome,
            paid: settlement.total_paid,
        })
    }

    fn open_next(&self, id: RoundId, now: DateTime<Utc>) -> Result<Transition, GameError> {
        let round = Round::open(id, now, &self.timing);
        self.commit(round.clone())?;
        self.ledger.open_round(&round);
        self.announce_open(&round);
        Ok(Transition::Opened(id))
    }

    fn announce_open(&self, round: &Round) {
        info!(
            round_id = round.id,
            cutoff = %round.betting_cutoff_at,
            closes = %round.closes_at,
            "Round opened"
        );
        self.notifier.notify(&GameEvent::RoundOpened {
            round_id: round.id,
            betting_cutoff_at: round.betting_cutoff_at,
            closes_at: round.closes_at,
        });
    }

    /// Delete leftover bet sets of resolved rounds. Failures stay queued.
    fn sweep_bets(&self) {
        let mut unswept = self.unswept.lock().unwrap_or_else(PoisonError::into_inner);
        unswept.retain(|&round_id| match self.store.delete(&keys::bets(round_id)) {
            Ok(()) => {
                info!(round_id, "Stale bet set removed");
                false
            }
            Err(e) => {
                warn!(round_id, error = %e, "Stale bet set still on disk");
                true
            }
        });
    }

    /// Rounds whose bet set is waiting to be deleted.
    pub fn unswept_rounds(&self) -> Vec<RoundId> {
        self.unswept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn record_result(&self, result: RoundResult) {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        if history.front().map(|r| r.round_id) == Some(result.round_id) {
            return;
        }
        history.push_front(result);
        history.truncate(self.history_len);
        if let Err(e) = storage::save_json(&*self.store, keys::ROUND_HISTORY, &*history) {
            warn!(error = %e, "Failed to persist round history");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
