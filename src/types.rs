//! Shared types for the TIRANGA round engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that storage, engine, notify
//! and api modules can depend on them without circular references.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::storage::StorageError;

/// Opaque user identifier.
pub type UserId = String;

/// Longest user id an account may be opened under.
pub const MAX_USER_ID_LEN: usize = 64;

/// User ids are 1 to 64 ASCII letters, digits, `_` or `-`. They become
/// storage key segments, so nothing else is let through.
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Round identifier. Strictly increasing, starting at 1.
pub type RoundId = u64;

/// Money in whole currency units. Signed so transactions can carry direction.
pub type Amount = i64;

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// Upper bound (exclusive) of the RED band on the 0–100 roll.
pub const RED_UPPER: f64 = 45.0;
/// Upper bound (exclusive) of the GREEN band on the 0–100 roll.
pub const GREEN_UPPER: f64 = 90.0;

/// The three outcomes a round can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl Color {
    /// Declaration order; also the tie-break order at band boundaries.
    pub const ALL: [Color; 3] = [Color::Red, Color::Green, Color::Violet];

    /// Map a roll in `[0, 100)` onto the weighted bands 45 / 45 / 10.
    ///
    /// Bands are half-open and checked in declaration order, so a roll of
    /// exactly 45.0 is GREEN and exactly 90.0 is VIOLET.
    pub fn from_roll(roll: f64) -> Self {
        if roll < RED_UPPER {
            Color::Red
        } else if roll < GREEN_UPPER {
            Color::Green
        } else {
            Color::Violet
        }
    }

    /// Payout multiplier applied to a winning stake.
    pub fn multiplier(&self) -> Decimal {
        match self {
            Color::Red | Color::Green => dec!(2),
            Color::Violet => dec!(4.5),
        }
    }

    /// Draw weight out of 100.
    pub fn weight(&self) -> u32 {
        match self {
            Color::Red | Color::Green => 45,
            Color::Violet => 10,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Red => write!(f, "RED"),
            Color::Green => write!(f, "GREEN"),
            Color::Violet => write!(f, "VIOLET"),
        }
    }
}

impl std::str::FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" | "r" => Ok(Color::Red),
            "green" | "g" => Ok(Color::Green),
            "violet" | "v" | "purple" => Ok(Color::Violet),
            _ => Err(format!("Unknown color: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Lifecycle of a round. Only the scheduler moves a round between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    Open,
    Locked,
    Resolving,
    Resolved,
}

impl RoundState {
    /// Whether the round still has unsettled bets attached to it.
    pub fn is_active(&self) -> bool {
        !matches!(self, RoundState::Resolved)
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Open => write!(f, "OPEN"),
            RoundState::Locked => write!(f, "LOCKED"),
            RoundState::Resolving => write!(f, "RESOLVING"),
            RoundState::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// Fixed round geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// Full length of a round, open to close.
    pub duration: Duration,
    /// How long before close betting stops.
    pub cutoff_margin: Duration,
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            duration: Duration::seconds(180),
            cutoff_margin: Duration::seconds(30),
        }
    }
}

/// One betting cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub state: RoundState,
    pub opened_at: DateTime<Utc>,
    pub betting_cutoff_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    /// Set exactly once, when the round becomes RESOLVED.
    pub outcome: Option<Color>,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Round #{} [{}]", self.id, self.state)?;
        if let Some(outcome) = self.outcome {
            write!(f, " → {outcome}")?;
        }
        Ok(())
    }
}

impl Round {
    /// A freshly opened round starting at `now`.
    pub fn open(id: RoundId, now: DateTime<Utc>, timing: &RoundTiming) -> Self {
        let closes_at = now + timing.duration;
        Self {
            id,
            state: RoundState::Open,
            opened_at: now,
            betting_cutoff_at: closes_at - timing.cutoff_margin,
            closes_at,
            outcome: None,
        }
    }

    /// Bets are accepted only while OPEN and strictly before the cutoff.
    pub fn accepts_bets(&self, now: DateTime<Utc>) -> bool {
        self.state == RoundState::Open && now < self.betting_cutoff_at
    }

    /// Time left until the round closes, floored at zero.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.closes_at - now).max(Duration::zero())
    }

    /// Time left to place bets, floored at zero.
    pub fn betting_time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.betting_cutoff_at - now).max(Duration::zero())
    }
}

/// A resolved round as shown in the recent-results strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_id: RoundId,
    pub outcome: Color,
    pub resolved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A single wager. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: UserId,
    pub round_id: RoundId,
    pub color: Color,
    pub amount: Amount,
    pub placed_at: DateTime<Utc>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "₹{} on {} by {} (round #{})",
            self.amount, self.color, self.user_id, self.round_id
        )
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Bet,
    Win,
    Deposit,
    Withdrawal,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Bet => write!(f, "BET"),
            TransactionKind::Win => write!(f, "WIN"),
            TransactionKind::Deposit => write!(f, "DEPOSIT"),
            TransactionKind::Withdrawal => write!(f, "WITHDRAWAL"),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bet" => Ok(TransactionKind::Bet),
            "win" => Ok(TransactionKind::Win),
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(format!("Unknown transaction kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Completed => write!(f, "COMPLETED"),
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Where a withdrawal is to be paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDetails {
    /// UPI virtual payment address, `handle@provider`.
    pub upi_id: String,
    pub account_holder: String,
}

impl PayoutDetails {
    pub fn new(upi_id: impl Into<String>, account_holder: impl Into<String>) -> Self {
        Self {
            upi_id: upi_id.into(),
            account_holder: account_holder.into(),
        }
    }

    /// Trimmed copy, or an error naming the first missing or malformed field.
    pub fn validated(&self) -> Result<Self, GameError> {
        let upi_id = self.upi_id.trim();
        let account_holder = self.account_holder.trim();
        if upi_id.is_empty() {
            return Err(GameError::InvalidPayoutDetails("UPI id is required".into()));
        }
        match upi_id.split_once('@') {
            Some((handle, provider))
                if !handle.is_empty() && !provider.is_empty() && !provider.contains('@') => {}
            _ => {
                return Err(GameError::InvalidPayoutDetails(format!(
                    "UPI id '{upi_id}' is not of the form handle@provider"
                )))
            }
        }
        if account_holder.is_empty() {
            return Err(GameError::InvalidPayoutDetails("account holder name is required".into()));
        }
        Ok(Self::new(upi_id, account_holder))
    }
}

/// Append-only audit record. Every balance change has exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Signed: debits are negative, credits positive.
    pub amount: Amount,
    pub round_id: Option<RoundId>,
    /// Color wagered (BET) or drawn (WIN).
    #[serde(default)]
    pub color: Option<Color>,
    /// The bet this record belongs to, for BET and WIN.
    #[serde(default)]
    pub bet_id: Option<Uuid>,
    /// Payout destination of a requested withdrawal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout: Option<PayoutDetails>,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount > 0 { "+" } else { "" };
        write!(f, "{} {sign}₹{} [{}]", self.kind, self.amount, self.status)?;
        if let Some(round_id) = self.round_id {
            write!(f, " round #{round_id}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A user's wallet: spendable balance plus its full transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub initial_balance: Amount,
    pub balance: Amount,
    /// Oldest first.
    pub transactions: Vec<Transaction>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: impl Into<UserId>, initial_balance: Amount, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            initial_balance,
            balance: initial_balance,
            transactions: Vec::new(),
            created_at: now,
        }
    }

    /// Balance reconstructed by folding the log over the initial balance.
    pub fn replayed_balance(&self) -> Amount {
        self.transactions
            .iter()
            .fold(self.initial_balance, |acc, t| acc.saturating_add(t.amount))
    }

    /// The conservation invariant holds and the balance is non-negative.
    pub fn is_consistent(&self) -> bool {
        self.balance >= 0 && self.balance == self.replayed_balance()
    }

    /// Aggregate totals per transaction kind.
    pub fn summary(&self) -> TransactionSummary {
        let mut summary = TransactionSummary::default();
        for tx in &self.transactions {
            match tx.kind {
                TransactionKind::Deposit => {
                    summary.total_deposits = summary.total_deposits.saturating_add(tx.amount)
                }
                TransactionKind::Withdrawal => {
                    summary.total_withdrawals = summary.total_withdrawals.saturating_sub(tx.amount)
                }
                TransactionKind::Bet => summary.total_bets = summary.total_bets.saturating_sub(tx.amount),
                TransactionKind::Win => summary.total_wins = summary.total_wins.saturating_add(tx.amount),
            }
            summary.net = summary.net.saturating_add(tx.amount);
        }
        summary.gaming_net = summary.total_wins.saturating_sub(summary.total_bets);
        summary.win_rate = win_rate(summary.total_wins, summary.total_bets);
        summary.transaction_count = self.transactions.len();
        summary
    }
}

/// Winnings as a whole percentage of stakes, rounded half up. Zero when
/// nothing has been staked.
fn win_rate(wins: Amount, bets: Amount) -> u64 {
    if bets <= 0 || wins <= 0 {
        return 0;
    }
    let (wins, bets) = (wins as u128, bets as u128);
    let percent = (wins * 100 + bets / 2) / bets;
    u64::try_from(percent).unwrap_or(u64::MAX)
}

/// Totals shown in the wallet's summary panel. All totals are magnitudes;
/// `net` is the signed sum of every transaction and `gaming_net` is wins
/// minus bets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub total_deposits: Amount,
    pub total_withdrawals: Amount,
    pub total_bets: Amount,
    pub total_wins: Amount,
    pub net: Amount,
    /// Profit (positive) or loss from betting alone.
    pub gaming_net: Amount,
    /// `total_wins` as a percentage of `total_bets`.
    pub win_rate: u64,
    pub transaction_count: usize,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for TIRANGA.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Invalid amount: ₹{amount} (minimum ₹{minimum})")]
    InvalidAmount { amount: Amount, minimum: Amount },

    #[error("Amount too large: ₹{amount} (maximum ₹{maximum})")]
    AmountTooLarge { amount: Amount, maximum: Amount },

    #[error("Invalid user id '{0}': use 1-64 letters, digits, '_' or '-'")]
    InvalidUserId(UserId),

    #[error("Invalid payout details: {0}")]
    InvalidPayoutDetails(String),

    #[error("Round #{round_id} is closed for betting")]
    RoundClosed { round_id: RoundId },

    #[error("Insufficient balance: need ₹{needed}, have ₹{available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Account already exists: {0}")]
    AccountExists(UserId),

    #[error("No pending transaction {tx_id} for user {user_id}")]
    UnknownTransaction { user_id: UserId, tx_id: Uuid },

    #[error("Round #{0} has already been settled")]
    DuplicateSettlement(RoundId),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GameError {
    /// Validation errors are returned to the caller and never change state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GameError::InvalidAmount { .. }
                | GameError::AmountTooLarge { .. }
                | GameError::InvalidUserId(_)
                | GameError::InvalidPayoutDetails(_)
                | GameError::RoundClosed { .. }
                | GameError::InsufficientBalance { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
