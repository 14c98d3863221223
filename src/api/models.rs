//! API request and response models.

use crate::{
    scheduler::GameStatus,
    types::{Amount, BetId, Multiplier, PrizePoolSnapshot, RoundId, TicketId, WalletAddress},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub server_time: DateTime<Utc>,
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub game: GameStatus,
    pub prize_pool: PrizePoolSnapshot,
    /// Hex ed25519 key that signs claim vouchers.
    pub claim_signer: Option<String>,
}

/// `POST /rounds/start`; a seed is only accepted for reproducible manual rounds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRoundRequest {
    #[serde(default)]
    pub server_seed: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoundsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    pub round_id: RoundId,
    pub wallet: WalletAddress,
    pub ticket_id: TicketId,
    #[serde(default)]
    pub auto_cashout_at: Option<Multiplier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutRequest {
    /// Must match the wallet that placed the bet.
    pub wallet: WalletAddress,
    /// Multiplier the client saw when the player pressed cash out.
    pub multiplier: Multiplier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherRequest {
    pub wallet: WalletAddress,
    pub round_id: RoundId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmClaimRequest {
    pub bet_id: BetId,
}

/// `POST /verify`: recompute a crash point from a revealed seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub server_seed: String,
    pub seed_hash: String,
    pub round_number: u64,
    pub crash_point: Multiplier,
    /// Defaults to the current game config.
    #[serde(default)]
    pub max_multiplier: Option<Multiplier>,
    #[serde(default)]
    pub instant_crash_probability: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub hash_matches: bool,
    pub recomputed_crash_point: Multiplier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolAmountRequest {
    pub amount: Amount,
}
