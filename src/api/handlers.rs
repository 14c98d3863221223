//! Request Handlers
//!
//! Thin adapters from HTTP onto the engine services. Every engine error goes
//! through [`ApiError::engine`] so status codes stay consistent.

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::{
    config::GameConfig,
    errors::EngineError,
    fairness,
    scheduler::CrashOutcome,
    services::ServiceContainer,
    settlement::PayoutSummary,
    tickets::{PurchaseRequest, TicketView},
    types::{Bet, BetId, CashoutReceipt, ClaimVoucher, PendingClaim, PrizePoolSnapshot, Round, RoundId, Ticket, WalletAddress},
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub services: Arc<ServiceContainer>,
    pub version: String,
    pub operator_key: Option<String>,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn engine_err(request_id: &RequestId) -> impl Fn(EngineError) -> ApiError + '_ {
    move |e| ApiError::engine(request_id.0.clone(), e)
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
    })
}

/// GET /status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let services = &state.services;
    Json(StatusResponse {
        version: state.version.clone(),
        server_time: chrono::Utc::now(),
        uptime_secs: services.metrics.uptime_secs(),
        game: services.scheduler.get_status(),
        prize_pool: services.reconciler.prize_pool(),
        claim_signer: services.reconciler.signer_hex(),
    })
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.services.metrics.export_prometheus(),
    )
}

// ----------------------------------------------------------------------
// Rounds
// ----------------------------------------------------------------------

/// POST /rounds/start
pub async fn start_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartRoundRequest>>,
) -> ApiResult<Round> {
    let scheduler = &state.services.scheduler;
    let round = match body.and_then(|Json(b)| b.server_seed) {
        Some(seed) => scheduler.start_round_with_seed(&seed),
        None => scheduler.start_round(),
    }
    .map_err(engine_err(&request_id))?;
    Ok(Json(round))
}

/// POST /rounds/:id/countdown
pub async fn countdown_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> ApiResult<Round> {
    let round = state
        .services
        .scheduler
        .start_countdown(round_id)
        .map_err(engine_err(&request_id))?;
    Ok(Json(round))
}

/// POST /rounds/:id/fly
pub async fn fly_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> ApiResult<Round> {
    let round = state
        .services
        .scheduler
        .start_flying(round_id)
        .map_err(engine_err(&request_id))?;
    Ok(Json(round))
}

/// POST /rounds/:id/crash
pub async fn crash_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> ApiResult<CrashOutcome> {
    let outcome = state
        .services
        .scheduler
        .crash(round_id)
        .map_err(engine_err(&request_id))?;
    Ok(Json(outcome))
}

/// POST /rounds/:id/payouts
pub async fn payouts_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> ApiResult<PayoutSummary> {
    let summary = state
        .services
        .scheduler
        .process_payouts(round_id)
        .map_err(engine_err(&request_id))?;
    Ok(Json(summary))
}

/// GET /rounds?limit={n}
pub async fn rounds_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoundsQuery>,
) -> Json<Vec<Round>> {
    Json(state.services.scheduler.recent_rounds(query.limit.min(100)))
}

/// GET /rounds/:id
pub async fn round_detail_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> ApiResult<Round> {
    state
        .services
        .scheduler
        .round(&round_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(request_id.0.clone(), format!("round {} not found", round_id)))
}

/// GET /rounds/:id/bets
pub async fn round_bets_handler(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> Json<Vec<Bet>> {
    Json(state.services.bets.bets_for_round(&round_id))
}

// ----------------------------------------------------------------------
// Bets and tickets
// ----------------------------------------------------------------------

/// POST /bets
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlaceBetRequest>,
) -> ApiResult<Bet> {
    let bet = state
        .services
        .bets
        .place_bet(body.round_id, &body.wallet, body.ticket_id, body.auto_cashout_at)
        .map_err(engine_err(&request_id))?;
    Ok(Json(bet))
}

/// POST /bets/:id/cashout
pub async fn cashout_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(bet_id): Path<BetId>,
    Json(body): Json<CashoutRequest>,
) -> ApiResult<CashoutReceipt> {
    let receipt = state
        .services
        .bets
        .cash_out(bet_id, &body.wallet, body.multiplier)
        .map_err(engine_err(&request_id))?;
    Ok(Json(receipt))
}

/// POST /tickets/purchase
pub async fn purchase_ticket_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PurchaseRequest>,
) -> ApiResult<Ticket> {
    let ticket = state
        .services
        .recovery
        .submit(body)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(ticket))
}

/// GET /wallets/:wallet/tickets
pub async fn wallet_tickets_handler(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Json<Vec<TicketView>> {
    Json(state.services.tickets.tickets_for_wallet(&WalletAddress::new(wallet)))
}

/// GET /wallets/:wallet/bets
pub async fn wallet_bets_handler(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Json<Vec<Bet>> {
    Json(state.services.bets.bets_for_wallet(&WalletAddress::new(wallet)))
}

// ----------------------------------------------------------------------
// Claims and verification
// ----------------------------------------------------------------------

/// GET /wallets/:wallet/claims
pub async fn wallet_claims_handler(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Json<Vec<PendingClaim>> {
    let wallet = WalletAddress::new(wallet);
    Json(state.services.reconciler.pending_claims(Some(&wallet)))
}

/// POST /claims/voucher
pub async fn voucher_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<VoucherRequest>,
) -> ApiResult<ClaimVoucher> {
    let voucher = state
        .services
        .reconciler
        .issue_voucher(&body.wallet, body.round_id)
        .map_err(engine_err(&request_id))?;
    Ok(Json(voucher))
}

/// POST /claims/confirm
pub async fn confirm_claim_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConfirmClaimRequest>,
) -> ApiResult<Bet> {
    let bet = state
        .services
        .reconciler
        .confirm_claim(body.bet_id)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(bet))
}

/// POST /verify
pub async fn verify_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyRequest>,
) -> ApiResult<VerifyResponse> {
    if body.server_seed.is_empty() {
        return Err(ApiError::bad_request(request_id.0.clone(), "server_seed is required"));
    }
    let game = state.services.scheduler.game_config();
    let params = fairness::DerivationParams {
        house_edge: state.services.config().fairness.house_edge,
        max_multiplier: body.max_multiplier.unwrap_or(game.max_multiplier),
        instant_crash_probability: body
            .instant_crash_probability
            .unwrap_or(game.instant_crash_probability),
    };
    let recomputed = fairness::derive_crash_point(&body.server_seed, body.round_number, &params);
    let hash_matches = fairness::hash_seed(&body.server_seed).eq_ignore_ascii_case(&body.seed_hash);
    Ok(Json(VerifyResponse {
        valid: fairness::verify(
            &body.server_seed,
            &body.seed_hash,
            body.round_number,
            body.crash_point,
            &params,
        ),
        hash_matches,
        recomputed_crash_point: recomputed,
    }))
}

// ----------------------------------------------------------------------
// Operator
// ----------------------------------------------------------------------

/// POST /admin/pause
pub async fn pause_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PauseRequest>,
) -> Json<crate::scheduler::GameStatus> {
    state.services.scheduler.pause(body.reason);
    Json(state.services.scheduler.get_status())
}

/// POST /admin/resume
pub async fn resume_handler(State(state): State<Arc<AppState>>) -> Json<crate::scheduler::GameStatus> {
    state.services.scheduler.resume();
    Json(state.services.scheduler.get_status())
}

/// GET /admin/config
pub async fn get_config_handler(State(state): State<Arc<AppState>>) -> Json<GameConfig> {
    Json(state.services.scheduler.game_config())
}

/// PUT /admin/config
pub async fn update_config_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<GameConfig>,
) -> ApiResult<GameConfig> {
    let applied = state
        .services
        .scheduler
        .update_game_config(body)
        .map_err(engine_err(&request_id))?;
    Ok(Json(applied))
}

/// GET /pool
pub async fn pool_handler(State(state): State<Arc<AppState>>) -> Json<PrizePoolSnapshot> {
    Json(state.services.reconciler.prize_pool())
}

/// POST /admin/pool/refill
pub async fn refill_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PoolAmountRequest>,
) -> ApiResult<PrizePoolSnapshot> {
    let snapshot = state
        .services
        .reconciler
        .refill(body.amount)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(snapshot))
}

/// POST /admin/pool/withdraw
pub async fn withdraw_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<PoolAmountRequest>,
) -> ApiResult<PrizePoolSnapshot> {
    let snapshot = state
        .services
        .reconciler
        .emergency_withdraw(body.amount)
        .await
        .map_err(engine_err(&request_id))?;
    Ok(Json(snapshot))
}
