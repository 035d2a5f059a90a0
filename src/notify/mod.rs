//! Outbound lifecycle events.
//!
//! Defines the `Notifier` trait and the events the engine emits. Delivery
//! is best-effort: a notifier never returns an error and never blocks the
//! operation that raised the event.

pub mod broadcast;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Amount, Color, GameError, RoundId, UserId};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a bet was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    InvalidAmount,
    RoundClosed,
    InsufficientBalance,
    UnknownUser,
    PersistenceFailure,
}

impl RejectionReason {
    pub fn from_error(err: &GameError) -> Self {
        match err {
            GameError::InvalidAmount { .. } | GameError::AmountTooLarge { .. } => {
                RejectionReason::InvalidAmount
            }
            GameError::RoundClosed { .. } => RejectionReason::RoundClosed,
            GameError::InsufficientBalance { .. } => RejectionReason::InsufficientBalance,
            GameError::UnknownUser(_) | GameError::InvalidUserId(_) => RejectionReason::UnknownUser,
            _ => RejectionReason::PersistenceFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    RoundOpened {
        round_id: RoundId,
        betting_cutoff_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    },
    BettingClosed {
        round_id: RoundId,
        bets: usize,
    },
    BetAccepted {
        round_id: RoundId,
        bet_id: Uuid,
        user_id: UserId,
        color: Color,
        amount: Amount,
    },
    BetRejected {
        user_id: UserId,
        color: Color,
        amount: Amount,
        reason: RejectionReason,
    },
    RoundResolved {
        round_id: RoundId,
        outcome: Color,
        payouts: BTreeMap<UserId, Amount>,
    },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::RoundOpened { .. } => "round_opened",
            GameEvent::BettingClosed { .. } => "betting_closed",
            GameEvent::BetAccepted { .. } => "bet_accepted",
            GameEvent::BetRejected { .. } => "bet_rejected",
            GameEvent::RoundResolved { .. } => "round_resolved",
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier trait
// ---------------------------------------------------------------------------

/// Receives lifecycle events for display or delivery elsewhere.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &GameEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &GameEvent) {
        match event {
            GameEvent::RoundResolved { round_id, outcome, payouts } => info!(
                round_id,
                outcome = %outcome,
                winners = payouts.len(),
                paid = payouts.values().sum::<Amount>(),
                "Round resolved"
            ),
            GameEvent::BetRejected { user_id, reason, .. } => {
                debug!(user_id = %user_id, reason = ?reason, "Bet rejected")
            }
            other => debug!(event = other.name(), payload = ?other, "Game event"),
        }
    }
}

/// Fan-out to several sinks.
#[derive(Default, Clone)]
pub struct NotifierSet {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for NotifierSet {
    fn notify(&self, event: &GameEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> GameEvent {
        GameEvent::RoundResolved {
            round_id: 9,
            outcome: Color::Green,
            payouts: BTreeMap::from([("alice".to_string(), 200)]),
        }
    }

    #[test]
    fn test_rejection_reason_from_error() {
        assert_eq!(
            RejectionReason::from_error(&GameError::RoundClosed { round_id: 1 }),
            RejectionReason::RoundClosed
        );
        assert_eq!(
            RejectionReason::from_error(&GameError::UnknownUser("x".into())),
            RejectionReason::UnknownUser
        );
        assert_eq!(
            RejectionReason::from_error(&GameError::Persistence(
                crate::storage::StorageError::Unavailable("down".into())
            )),
            RejectionReason::PersistenceFailure
        );
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(resolved()).unwrap();
        assert_eq!(json["event"], "round_resolved");
        assert_eq!(json["outcome"], "GREEN");
        assert_eq!(json["payouts"]["alice"], 200);
    }

    #[test]
    fn test_notifier_set_fans_out() {
        let mut a = MockNotifier::new();
        a.expect_notify().times(1).return_const(());
        let mut b = MockNotifier::new();
        b.expect_notify()
            .withf(|e| e.name() == "round_resolved")
            .times(1)
            .return_const(());

        let set = NotifierSet::new().with(Arc::new(a)).with(Arc::new(b));
        assert_eq!(set.len(), 2);
        set.notify(&resolved());
    }

    #[test]
    fn test_empty_set_is_noop() {
        let set = NotifierSet::new();
        assert!(set.is_empty());
        set.notify(&resolved());
        TracingNotifier.notify(&resolved());
    }
}
