//! Route Definitions
//!
//! Player routes are open; operator routes sit behind the operator key.

use super::{
    handlers::*,
    middleware::operator_auth_middleware,
    websocket::websocket_handler,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let operator = Router::new()
        .route("/rounds/start", post(start_round_handler))
        .route("/rounds/:id/countdown", post(countdown_handler))
        .route("/rounds/:id/fly", post(fly_handler))
        .route("/rounds/:id/crash", post(crash_handler))
        .route("/rounds/:id/payouts", post(payouts_handler))
        .route("/admin/pause", post(pause_handler))
        .route("/admin/resume", post(resume_handler))
        .route("/admin/config", get(get_config_handler).put(update_config_handler))
        .route("/admin/pool/refill", post(refill_handler))
        .route("/admin/pool/withdraw", post(withdraw_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), operator_auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        // Rounds
        .route("/rounds", get(rounds_handler))
        .route("/rounds/:id", get(round_detail_handler))
        .route("/rounds/:id/bets", get(round_bets_handler))
        // Bets and tickets
        .route("/bets", post(place_bet_handler))
        .route("/bets/:id/cashout", post(cashout_handler))
        .route("/tickets/purchase", post(purchase_ticket_handler))
        .route("/wallets/:wallet/tickets", get(wallet_tickets_handler))
        .route("/wallets/:wallet/bets", get(wallet_bets_handler))
        .route("/wallets/:wallet/claims", get(wallet_claims_handler))
        // Claims and verification
        .route("/claims/voucher", post(voucher_handler))
        .route("/claims/confirm", post(confirm_claim_handler))
        .route("/verify", post(verify_handler))
        .route("/pool", get(pool_handler))
        // Real-time round events
        .route("/ws", get(websocket_handler))
        .merge(operator)
        .with_state(state)
}
