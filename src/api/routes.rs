//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<Game>`. Engine
//! errors map onto HTTP statuses in `ApiError`.
//!
//! Handlers that write to storage run on the blocking pool: the store does
//! synchronous file I/O and bet placement holds the ledger lock across it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::game::{Game, RoundStatus};
use crate::types::{
    Account, Amount, Bet, Color, GameError, PayoutDetails, RoundResult, Transaction,
    TransactionKind, TransactionSummary, UserId,
};

pub type AppState = Arc<Game>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub enum ApiError {
    Game(GameError),
    BadRequest(String),
    /// The worker running the request panicked or was cancelled.
    Internal(String),
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        ApiError::Game(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
            ApiError::Internal(message) => {
                error!(error = %message, "Request worker failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
            }
            ApiError::Game(err) => {
                let (status, code) = match &err {
                    GameError::InvalidAmount { .. } => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                    GameError::AmountTooLarge { .. } => (StatusCode::BAD_REQUEST, "AMOUNT_TOO_LARGE"),
                    GameError::InvalidUserId(_) => (StatusCode::BAD_REQUEST, "INVALID_USER_ID"),
                    GameError::InvalidPayoutDetails(_) => {
                        (StatusCode::BAD_REQUEST, "INVALID_PAYOUT_DETAILS")
                    }
                    GameError::RoundClosed { .. } => (StatusCode::CONFLICT, "ROUND_CLOSED"),
                    GameError::AccountExists(_) => (StatusCode::CONFLICT, "ACCOUNT_EXISTS"),
                    GameError::InsufficientBalance { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
                    }
                    GameError::UnknownUser(_) => (StatusCode::NOT_FOUND, "UNKNOWN_USER"),
                    GameError::UnknownTransaction { .. } => {
                        (StatusCode::NOT_FOUND, "UNKNOWN_TRANSACTION")
                    }
                    GameError::DuplicateSettlement(_)
                    | GameError::Persistence(_)
                    | GameError::Config(_) => {
                        error!(error = %err, "Request failed");
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
                    }
                };
                (status, code, err.to_string())
            }
        };
        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run `op` against the game on the blocking pool.
async fn blocking<T, F>(game: AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(&Game) -> Result<T, GameError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&*game))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: UserId,
    /// Case-insensitive colour name.
    pub color: String,
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: Amount,
    pub upi_id: String,
    pub account_holder: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveWithdrawalRequest {
    pub completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    /// Case-insensitive transaction kind, e.g. `bet`.
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: Amount,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub round_id: u64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(game): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        round_id: game.current_round().id,
    })
}

/// GET /api/round
pub async fn get_round(State(game): State<AppState>) -> Json<RoundStatus> {
    Json(game.round_status())
}

/// GET /api/results
pub async fn get_results(State(game): State<AppState>) -> Json<Vec<RoundResult>> {
    Json(game.recent_results())
}

/// POST /api/bets
pub async fn place_bet(
    State(game): State<AppState>,
    Json(req): Json<PlaceBetRequest>,
) -> ApiResult<(StatusCode, Json<Bet>)> {
    let color: Color = req.color.parse().map_err(ApiError::BadRequest)?;
    let bet = blocking(game, move |g| g.place_bet(&req.user_id, color, req.amount)).await?;
    Ok((StatusCode::CREATED, Json(bet)))
}

/// POST /api/accounts
pub async fn open_account(
    State(game): State<AppState>,
    Json(req): Json<OpenAccountRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let account = blocking(game, move |g| g.open_account(&req.user_id)).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /api/accounts/:user_id/balance
pub async fn get_balance(
    State(game): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = game.balance(&user_id)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// GET /api/accounts/:user_id/transactions?kind=bet&limit=N
pub async fn get_transactions(
    State(game): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<TransactionKind>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let mut history = game.transaction_history_of_kind(&user_id, kind)?;
    if let Some(limit) = query.limit {
        history.truncate(limit);
    }
    Ok(Json(history))
}

/// GET /api/accounts/:user_id/summary
pub async fn get_summary(
    State(game): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<TransactionSummary>> {
    Ok(Json(game.transaction_summary(&user_id)?))
}

/// GET /api/accounts/:user_id/bets
pub async fn get_user_bets(
    State(game): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Vec<Bet>>> {
    // Surface UnknownUser rather than an empty list.
    game.balance(&user_id)?;
    Ok(Json(game.bets_for_user(&user_id)))
}

/// POST /api/accounts/:user_id/deposits
pub async fn deposit(
    State(game): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let tx = blocking(game, move |g| g.deposit(&user_id, req.amount)).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// POST /api/accounts/:user_id/withdrawals
pub async fn withdraw(
    State(game): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(req): Json<WithdrawalRequest>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let payout = PayoutDetails::new(req.upi_id, req.account_holder);
    let tx = blocking(game, move |g| g.withdraw(&user_id, req.amount, &payout)).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// POST /api/accounts/:user_id/withdrawals/:tx_id
pub async fn resolve_withdrawal(
    State(game): State<AppState>,
    Path((user_id, tx_id)): Path<(UserId, Uuid)>,
    Json(req): Json<ResolveWithdrawalRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = blocking(game, move |g| g.resolve_withdrawal(&user_id, tx_id, req.completed)).await?;
    Ok(Json(tx))
}
