//! Core engine: accounts, bet ledger, settlement and the round scheduler.
//!
//! Clock and randomness are injected so round timing and outcome draws
//! are reproducible under test.

pub mod accounts;
pub mod clock;
pub mod ledger;
pub mod random;
pub mod scheduler;
pub mod settlement;

pub use accounts::{AccountStore, WalletLimits};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::BetLedger;
pub use random::{RandomSource, SeededRandom, SequenceRandom, ThreadRandom};
pub use scheduler::{RoundScheduler, TickReport, Transition};
pub use settlement::{payout, Settlement, SettlementEngine};
