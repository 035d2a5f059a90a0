//! Full-game scenarios driven through the `Game` facade with a manual clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};

use tiranga::config::{GameConfig, WalletConfig};
use tiranga::engine::{payout, Clock, ManualClock, RandomSource, SeededRandom, SequenceRandom};
use tiranga::game::{Collaborators, Game};
use tiranga::notify::broadcast::BroadcastNotifier;
use tiranga::notify::{GameEvent, NotifierSet, RejectionReason};
use tiranga::storage::{FileStore, PersistenceProvider};
use tiranga::types::*;

use crate::flaky_store::FlakyStore;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Table {
    game: Arc<Game>,
    clock: Arc<ManualClock>,
    store: Arc<FlakyStore>,
}

fn table(rolls: Vec<f64>) -> Table {
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let game = start(store.clone(), clock.clone(), Arc::new(SequenceRandom::new(rolls)));
    game.open_account("alice").unwrap();
    Table { game, clock, store }
}

fn start(
    store: Arc<dyn PersistenceProvider>,
    clock: Arc<ManualClock>,
    random: Arc<dyn RandomSource>,
) -> Arc<Game> {
    let deps = Collaborators {
        store,
        clock,
        random,
        notifier: Arc::new(NotifierSet::new()),
    };
    let (game, _) = Game::start(&GameConfig::default(), &WalletConfig::default(), deps).unwrap();
    Arc::new(game)
}

/// Move past the current round's close and tick.
fn finish_round(t: &Table) -> Vec<(RoundId, Color)> {
    t.clock.set(t.game.current_round().closes_at + Duration::seconds(1));
    t.game.tick().unwrap().resolved()
}

// ---------------------------------------------------------------------------
// Worked scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_scenario_a_losing_red_bet() {
    let t = table(vec![0.5]); // GREEN
    t.game.place_bet("alice", Color::Red, 100).unwrap();

    assert_eq!(finish_round(&t), vec![(1, Color::Green)]);
    assert_eq!(t.game.balance("alice").unwrap(), 900);

    let history = t.game.transaction_history("alice").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Bet);
    assert_eq!(history[0].amount, -100);
    assert_eq!(history[0].round_id, Some(1));
    assert_eq!(history[0].status, TransactionStatus::Completed);
}

#[test]
fn test_scenario_b_winning_violet_bet() {
    let t = table(vec![0.93]); // VIOLET
    t.game.place_bet("alice", Color::Violet, 50).unwrap();

    assert_eq!(finish_round(&t), vec![(1, Color::Violet)]);
    assert_eq!(t.game.balance("alice").unwrap(), 1175);

    let history = t.game.transaction_history("alice").unwrap();
    let amounts: Vec<Amount> = history.iter().map(|tx| tx.amount).collect();
    assert_eq!(amounts, vec![225, -50]);
    assert_eq!(history[0].kind, TransactionKind::Win);
    assert_eq!(history[0].round_id, Some(1));
}

#[test]
fn test_scenario_c_concurrent_full_balance_bets() {
    let t = table(vec![0.1]);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [Color::Red, Color::Green]
        .into_iter()
        .map(|color| {
            let game = t.game.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                game.place_bet("alice", color, 1000)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(GameError::InsufficientBalance { needed: 1000, available: 0 }))));
    assert_eq!(t.game.balance("alice").unwrap(), 0);
    assert_eq!(t.game.bets_for_user("alice").len(), 1);
    assert_eq!(t.game.transaction_history("alice").unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn test_round_closed_from_cutoff_on() {
    let t = table(vec![0.1]);
    let cutoff = t.game.current_round().betting_cutoff_at;

    t.clock.set(cutoff - Duration::milliseconds(1));
    assert!(t.game.place_bet("alice", Color::Red, 10).is_ok());

    t.clock.set(cutoff);
    assert!(matches!(
        t.game.place_bet("alice", Color::Red, 10),
        Err(GameError::RoundClosed { round_id: 1 })
    ));

    // Still closed once the scheduler has locked the round.
    t.clock.set(cutoff + Duration::seconds(5));
    t.game.tick().unwrap();
    assert_eq!(t.game.current_round().state, RoundState::Locked);
    assert!(matches!(
        t.game.place_bet("alice", Color::Red, 10),
        Err(GameError::RoundClosed { .. })
    ));
    assert_eq!(t.game.balance("alice").unwrap(), 990);
}

#[test]
fn test_conservation_over_many_rounds() {
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let game = start(store.clone(), clock.clone(), Arc::new(SeededRandom::new(2026)));
    let t = Table { game, clock, store };

    let users = ["alice", "bob", "chandra", "dev"];
    for user in users {
        t.game.open_account(user).unwrap();
    }

    let mut rng = StdRng::seed_from_u64(11);
    let mut staked: HashMap<UserId, Amount> = HashMap::new();
    let mut paid: HashMap<UserId, Amount> = HashMap::new();

    for _ in 0..40 {
        let mut round_bets = Vec::new();
        for _ in 0..rng.gen_range(0..8) {
            let user = users[rng.gen_range(0..users.len())];
            let color = Color::ALL[rng.gen_range(0..3)];
            let amount = rng.gen_range(10..=300);
            match t.game.place_bet(user, color, amount) {
                Ok(bet) => {
                    *staked.entry(user.to_string()).or_default() += amount;
                    round_bets.push(bet);
                }
                Err(GameError::InsufficientBalance { .. }) => {}
                Err(e) => panic!("unexpected rejection: {e}"),
            }
        }

        let resolved = finish_round(&t);
        assert_eq!(resolved.len(), 1);
        let outcome = resolved[0].1;
        for bet in round_bets.iter().filter(|b| b.color == outcome) {
            *paid.entry(bet.user_id.clone()).or_default() += payout(bet.amount, outcome);
        }
    }

    for user in users {
        let balance = t.game.balance(user).unwrap();
        let expected = 1000 - staked.get(user).copied().unwrap_or(0) + paid.get(user).copied().unwrap_or(0);
        assert_eq!(balance, expected, "balance mismatch for {user}");
        assert!(balance >= 0);
        assert!(t.game.is_consistent(user).unwrap());

        let logged: Amount = t.game.transaction_history(user).unwrap().iter().map(|tx| tx.amount).sum();
        assert_eq!(balance, 1000 + logged);
    }
    assert_eq!(t.game.current_round().id, 41);
}

#[test]
fn test_settled_round_never_pays_twice() {
    let t = table(vec![0.2]);
    t.game.place_bet("alice", Color::Red, 100).unwrap();
    finish_round(&t);
    assert_eq!(t.game.balance("alice").unwrap(), 1100);

    // Repeated ticks and a restart over the same store change nothing.
    assert!(t.game.tick().unwrap().is_idle());
    let restarted = start(t.store.clone(), t.clock.clone(), Arc::new(SequenceRandom::constant(0.2)));
    assert_eq!(restarted.balance("alice").unwrap(), 1100);
    assert_eq!(restarted.transaction_history("alice").unwrap().len(), 2);
    assert_eq!(restarted.current_round().id, 2);
    assert_eq!(restarted.recent_results().len(), 1);
}

#[test]
fn test_late_tick_resolves_once_and_opens_next_now() {
    let t = table(vec![0.95, 0.1]);
    t.game.place_bet("alice", Color::Violet, 20).unwrap();

    let late = t0() + Duration::hours(3);
    t.clock.set(late);
    let report = t.game.tick().unwrap();

    assert_eq!(report.resolved(), vec![(1, Color::Violet)]);
    let round = t.game.current_round();
    assert_eq!(round.id, 2);
    assert_eq!(round.opened_at, late);
    assert_eq!(round.state, RoundState::Open);
    assert_eq!(t.game.balance("alice").unwrap(), 1000 - 20 + 90);
    assert!(t.game.tick().unwrap().is_idle());
}

// ---------------------------------------------------------------------------
// Failure and recovery
// ---------------------------------------------------------------------------

#[test]
fn test_round_write_failure_retried_next_tick() {
    let t = table(vec![0.1]);
    t.game.place_bet("alice", Color::Red, 100).unwrap();
    t.clock.set(t.game.current_round().betting_cutoff_at);
    t.game.tick().unwrap();

    t.clock.set(t.game.current_round().closes_at);
    t.store.fail_writes_to("round/");
    assert!(matches!(t.game.tick(), Err(GameError::Persistence(_))));
    assert_eq!(t.game.current_round().state, RoundState::Locked);
    assert!(t.game.current_round().outcome.is_none());

    t.store.heal();
    t.clock.advance(Duration::seconds(1));
    let report = t.game.tick().unwrap();
    assert_eq!(report.resolved(), vec![(1, Color::Red)]);
    assert_eq!(t.game.balance("alice").unwrap(), 1100);
}

#[test]
fn test_credit_failure_resumes_with_same_outcome() {
    let random = Arc::new(SequenceRandom::new(vec![0.1, 0.5])); // RED, then GREEN if redrawn
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let game = start(store.clone(), clock.clone(), random.clone());
    game.open_account("alice").unwrap();
    game.open_account("bob").unwrap();
    let t = Table { game, clock, store };

    t.game.place_bet("alice", Color::Red, 100).unwrap();
    t.game.place_bet("bob", Color::Green, 100).unwrap();

    t.clock.set(t.game.current_round().closes_at);
    t.store.fail_writes_to("account/");
    assert!(t.game.tick().is_err());
    assert_eq!(t.game.current_round().state, RoundState::Resolving);

    t.store.heal();
    let report = t.game.tick().unwrap();
    assert_eq!(report.resolved(), vec![(1, Color::Red)]);
    assert_eq!(random.draws(), 1);
    assert_eq!(t.game.balance("alice").unwrap(), 1100);
    assert_eq!(t.game.balance("bob").unwrap(), 900);
    assert_eq!(t.game.transaction_history("alice").unwrap().len(), 2);
}

#[test]
fn test_failed_bet_write_leaves_no_trace() {
    let t = table(vec![0.1]);
    t.store.fail_writes_to("bets/");

    assert!(matches!(
        t.game.place_bet("alice", Color::Red, 100),
        Err(GameError::Persistence(_))
    ));
    assert_eq!(t.game.balance("alice").unwrap(), 1000);
    assert!(t.game.transaction_history("alice").unwrap().is_empty());
    assert!(t.game.bets_for_user("alice").is_empty());
    assert!(t.game.is_consistent("alice").unwrap());
}

#[test]
fn test_restart_resolves_overdue_round_from_disk() {
    let root = std::env::temp_dir().join(format!("tiranga_it_{}", uuid::Uuid::new_v4()));
    let clock = Arc::new(ManualClock::new(t0()));

    {
        let store = Arc::new(FileStore::open(&root).unwrap());
        let game = start(store, clock.clone(), Arc::new(SequenceRandom::constant(0.6)));
        game.open_account("alice").unwrap();
        game.place_bet("alice", Color::Green, 100).unwrap();
        game.place_bet("alice", Color::Red, 50).unwrap();
    }

    // Process comes back ten minutes later.
    clock.set(t0() + Duration::minutes(10));
    let store = Arc::new(FileStore::open(&root).unwrap());
    let deps = Collaborators {
        store,
        clock: clock.clone(),
        random: Arc::new(SequenceRandom::constant(0.6)),
        notifier: Arc::new(NotifierSet::new()),
    };
    let (game, report) = Game::start(&GameConfig::default(), &WalletConfig::default(), deps).unwrap();

    assert_eq!(report.resolved(), vec![(1, Color::Green)]);
    assert_eq!(game.balance("alice").unwrap(), 1000 - 150 + 200);
    assert_eq!(game.current_round().id, 2);
    assert_eq!(game.current_round().opened_at, clock.now());
    assert!(!root.join("bets").join("1.json").exists());
    assert!(game.place_bet("alice", Color::Violet, 10).is_ok());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_path_like_user_id_cannot_clobber_account_on_disk() {
    let root = std::env::temp_dir().join(format!("tiranga_it_{}", uuid::Uuid::new_v4()));
    let clock = Arc::new(ManualClock::new(t0()));

    {
        let store = Arc::new(FileStore::open(&root).unwrap());
        let game = start(store, clock.clone(), Arc::new(SequenceRandom::constant(0.6)));
        game.open_account("alice").unwrap();
        game.deposit("alice", 5000).unwrap();

        for alias in ["../alice", "alice/", "./alice"] {
            assert!(matches!(game.open_account(alias), Err(GameError::InvalidUserId(_))));
        }
    }

    let store = Arc::new(FileStore::open(&root).unwrap());
    let game = start(store, clock, Arc::new(SequenceRandom::constant(0.6)));
    assert_eq!(game.balance("alice").unwrap(), 6000);
    assert_eq!(game.transaction_history("alice").unwrap().len(), 1);
    assert!(game.is_consistent("alice").unwrap());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_leftover_bet_set_swept_after_restart() {
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(ManualClock::new(t0()));

    {
        let game = start(store.clone(), clock.clone(), Arc::new(SequenceRandom::constant(0.1)));
        game.open_account("alice").unwrap();
        game.place_bet("alice", Color::Red, 100).unwrap();

        store.fail_writes_to("bets/");
        clock.advance(Duration::seconds(180));
        let report = game.tick().unwrap();
        assert_eq!(report.resolved(), vec![(1, Color::Red)]);
        assert!(store.contains("bets/1"));
    }

    store.heal();
    let game = start(store.clone(), clock, Arc::new(SequenceRandom::constant(0.1)));
    assert!(!store.contains("bets/1"));
    assert_eq!(game.balance("alice").unwrap(), 1100);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn test_lifecycle_events_in_order() {
    let broadcast = Arc::new(BroadcastNotifier::new(64));
    let mut rx = broadcast.subscribe();

    let clock = Arc::new(ManualClock::new(t0()));
    let deps = Collaborators::in_memory(clock.clone(), Arc::new(SequenceRandom::constant(0.95)))
        .with_notifier(Arc::new(NotifierSet::new().with(broadcast.clone())));
    let (game, _) = Game::start(&GameConfig::default(), &WalletConfig::default(), deps).unwrap();
    game.open_account("alice").unwrap();

    game.place_bet("alice", Color::Violet, 100).unwrap();
    game.place_bet("alice", Color::Red, 5).unwrap_err();
    clock.advance(Duration::seconds(180));
    game.tick().unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec![
            "round_opened",
            "bet_accepted",
            "bet_rejected",
            "betting_closed",
            "round_resolved",
            "round_opened",
        ]
    );

    assert!(matches!(
        &events[2],
        GameEvent::BetRejected { reason: RejectionReason::InvalidAmount, .. }
    ));
    match &events[4] {
        GameEvent::RoundResolved { round_id, outcome, payouts } => {
            assert_eq!(*round_id, 1);
            assert_eq!(*outcome, Color::Violet);
            assert_eq!(payouts.get("alice"), Some(&450));
        }
        other => panic!("expected round_resolved, got {other:?}"),
    }
}
