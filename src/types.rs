//! Core data model for crash rounds, bets, tickets and claims.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Base units per whole token (9 decimals).
pub const UNITS_PER_TOKEN: u64 = 1_000_000_000;

/// Token amount in base units.
pub type Amount = u64;

pub type RoundId = Uuid;
pub type BetId = Uuid;
pub type TicketId = Uuid;

/// Fixed-point multiplier in hundredths (`100` == 1.00x).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(100);

    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self(hundredths)
    }

    pub const fn hundredths(self) -> u64 {
        self.0
    }

    /// Truncates to two decimals; non-finite or negative input maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self(0);
        }
        Self((value * 100.0 + 1e-9).floor() as u64)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// `amount * self`, rounded down to a base unit.
    pub fn apply(self, amount: Amount) -> Amount {
        let scaled = (amount as u128 * self.0 as u128) / 100;
        scaled.min(u64::MAX as u128) as u64
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

/// Wallet address, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WalletAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for WalletAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

/// Round life cycle. `Idle` is the scheduler state when no round exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Betting,
    Countdown,
    Flying,
    Crashed,
    Payout,
}

impl RoundStatus {
    /// The only status a transition into `self` may start from.
    pub fn predecessor(self) -> Option<RoundStatus> {
        match self {
            RoundStatus::Betting => None,
            RoundStatus::Countdown => Some(RoundStatus::Betting),
            RoundStatus::Flying => Some(RoundStatus::Countdown),
            RoundStatus::Crashed => Some(RoundStatus::Flying),
            RoundStatus::Payout => Some(RoundStatus::Crashed),
        }
    }

    /// Every status but `Payout` counts as open.
    pub fn is_open(self) -> bool {
        !matches!(self, RoundStatus::Payout)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStatus::Betting => "betting",
            RoundStatus::Countdown => "countdown",
            RoundStatus::Flying => "flying",
            RoundStatus::Crashed => "crashed",
            RoundStatus::Payout => "payout",
        };
        f.write_str(name)
    }
}

/// Per-round snapshot of the operator config, taken at `start_round`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundParams {
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub betting_duration_secs: u64,
    pub max_multiplier: Multiplier,
    pub instant_crash_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub round_number: u64,
    pub status: RoundStatus,
    pub server_seed_hash: String,
    pub server_seed: Option<String>,
    pub crash_point: Option<Multiplier>,
    pub total_wagered: Amount,
    pub total_payout: Amount,
    pub params: RoundParams,
    /// Unix millis.
    pub start_time: u64,
    pub flying_started_at: Option<u64>,
    pub end_time: Option<u64>,
}

impl Round {
    pub fn is_revealed(&self) -> bool {
        self.server_seed.is_some() && self.crash_point.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Active,
    Won,
    Lost,
    Claiming,
    Claimed,
}

impl BetStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, BetStatus::Active)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BetStatus::Active => "active",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Claiming => "claiming",
            BetStatus::Claimed => "claimed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CashoutTrigger {
    Manual,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub round_id: RoundId,
    pub wallet: WalletAddress,
    pub ticket_id: TicketId,
    pub bet_amount: Amount,
    pub auto_cashout_at: Option<Multiplier>,
    pub status: BetStatus,
    pub cashed_out_at: Option<Multiplier>,
    pub cashout_trigger: Option<CashoutTrigger>,
    pub winnings: Amount,
    pub placed_at: u64,
    pub settled_at: Option<u64>,
}

/// Outcome of a cash-out that won the race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashoutReceipt {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub multiplier: Multiplier,
    pub winnings: Amount,
    pub trigger: CashoutTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub owner: WalletAddress,
    pub ticket_value: Amount,
    pub payment_currency: String,
    pub payment_amount: Amount,
    pub payment_ref: String,
    pub purchased_at: u64,
    pub expires_at: u64,
    pub consumed_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    Available,
    Consumed,
    Expired,
}

impl Ticket {
    pub fn state(&self, now_ms: u64) -> TicketState {
        if self.consumed_at.is_some() {
            TicketState::Consumed
        } else if self.expires_at <= now_ms {
            TicketState::Expired
        } else {
            TicketState::Available
        }
    }
}

/// A won or claiming bet plus the amount owed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub round_number: u64,
    pub wallet: WalletAddress,
    pub amount: Amount,
    pub status: BetStatus,
}

/// Chain-authoritative prize pool balance mirrored into the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrizePoolSnapshot {
    pub prize_pool: Amount,
    pub total_deposited: Amount,
    pub total_claimed: Amount,
    pub synced_at: Option<u64>,
}

/// Signed authorization to withdraw winnings from the prize pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVoucher {
    pub wallet: WalletAddress,
    pub round_id: RoundId,
    pub bet_id: BetId,
    pub amount: Amount,
    /// Round-scoped nonce; the contract accepts each (wallet, nonce) once.
    pub nonce: u64,
    /// Hex-encoded ed25519 signature over [`ClaimVoucher::message`].
    pub signature: String,
    /// Hex-encoded verifying key of the signer.
    pub signer: String,
    pub issued_at: u64,
}

impl ClaimVoucher {
    pub fn message(wallet: &WalletAddress, round_id: &RoundId, amount: Amount, nonce: u64) -> Vec<u8> {
        format!("crash-claim:{}:{}:{}:{}", wallet, round_id, amount, nonce).into_bytes()
    }
}

/// A ticket payment that was initiated but not yet observed as confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPurchase {
    pub payment_ref: String,
    pub wallet: WalletAddress,
    pub ticket_value: Amount,
    pub payment_currency: String,
    pub payment_amount: Amount,
    pub created_at: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Set once the recovery TTL elapsed; kept so the wallet can be told.
    pub abandoned_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_display_and_parse() {
        assert_eq!(Multiplier::from_f64(3.4).to_string(), "3.40x");
        assert_eq!(Multiplier::from_f64(1.0), Multiplier::ONE);
        assert_eq!(Multiplier::from_f64(4.129), Multiplier::from_hundredths(412));
        assert_eq!(Multiplier::from_f64(f64::NAN).hundredths(), 0);
    }

    #[test]
    fn test_multiplier_apply() {
        let bet = 5 * UNITS_PER_TOKEN;
        assert_eq!(Multiplier::from_hundredths(200).apply(bet), 10 * UNITS_PER_TOKEN);
        assert_eq!(Multiplier::from_hundredths(390).apply(bet), 19_500_000_000);
    }

    #[test]
    fn test_round_status_order() {
        assert_eq!(RoundStatus::Flying.predecessor(), Some(RoundStatus::Countdown));
        assert!(RoundStatus::Crashed.is_open());
        assert!(!RoundStatus::Payout.is_open());
    }

    #[test]
    fn test_ticket_state() {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            owner: WalletAddress::new("0xABC"),
            ticket_value: UNITS_PER_TOKEN,
            payment_currency: "WOVER".to_string(),
            payment_amount: UNITS_PER_TOKEN,
            payment_ref: "0x01".to_string(),
            purchased_at: 0,
            expires_at: 1_000,
            consumed_at: None,
        };
        assert_eq!(ticket.owner.as_str(), "0xabc");
        assert_eq!(ticket.state(999), TicketState::Available);
        assert_eq!(ticket.state(1_000), TicketState::Expired);
    }

    #[test]
    fn test_wallet_normalised_when_deserialized() {
        let wallet: WalletAddress = serde_json::from_str("\" 0xAbC \"").unwrap();
        assert_eq!(wallet, WalletAddress::new("0xabc"));
        assert_eq!(serde_json::to_string(&wallet).unwrap(), "\"0xabc\"");
    }
}
