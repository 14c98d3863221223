//! Round settlement and prize-pool reconciliation.
//!
//! Off-chain the ledger owns who won what. On-chain the prize-pool contract
//! owns the money: winners withdraw with an ed25519-signed claim voucher and
//! the pool balance is read back into the ledger periodically.

use crate::{
    clock::Clock,
    errors::{ConfigurationError, ConflictError, EngineError, EngineResult, ValidationError},
    fairness,
    metrics::EngineMetrics,
    shutdown::StopToken,
    store::Ledger,
    types::{
        Amount, Bet, BetId, BetStatus, ClaimVoucher, Multiplier, PendingClaim, PrizePoolSnapshot, RoundId,
        RoundStatus, WalletAddress,
    },
};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Round totals written onto the round at payout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub round_id: RoundId,
    pub total_wagered: Amount,
    pub total_payouts: Amount,
    pub winning_bets: usize,
}

/// Round as the contract sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRound {
    pub round_number: u64,
    pub seed_hash: String,
    pub server_seed: Option<String>,
    pub crash_point: Option<Multiplier>,
    pub total_wagered: Amount,
    pub total_payout: Amount,
    pub status: RoundStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub prize_pool: Amount,
    pub total_deposited: Amount,
    pub total_claimed: Amount,
}

/// On-chain prize pool surface.
#[async_trait]
pub trait PrizePoolContract: Send + Sync {
    async fn start_round(&self, round_number: u64, seed_hash: &str) -> EngineResult<()>;
    async fn start_flying(&self) -> EngineResult<()>;
    async fn crash_round(&self, server_seed: &str, crash_point: Multiplier) -> EngineResult<()>;
    async fn current_round(&self) -> EngineResult<Option<ContractRound>>;
    async fn claim(&self, voucher: &ClaimVoucher) -> EngineResult<()>;
    async fn refill_prize_pool(&self, amount: Amount) -> EngineResult<()>;
    async fn emergency_withdraw(&self, amount: Amount) -> EngineResult<()>;
    async fn stats(&self) -> EngineResult<PoolStats>;
}

/// Holds the claim-signing key.
pub struct ClaimSigner {
    key: SigningKey,
}

impl ClaimSigner {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Parse a hex-encoded 32-byte secret key
    pub fn from_hex(secret: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidValue {
            field: "settlement.claim_signing_key".to_string(),
            value: "<redacted>".to_string(),
            reason: reason.to_string(),
        };
        let bytes = hex::decode(secret.trim().trim_start_matches("0x")).map_err(|_| invalid("not hex"))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| invalid("expected 32 bytes"))?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn signer_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Hex secret, in the form `from_hex` reads back.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn sign(&self, wallet: &WalletAddress, round_id: &RoundId, amount: Amount, nonce: u64) -> String {
        let message = ClaimVoucher::message(wallet, round_id, amount, nonce);
        hex::encode(self.key.sign(&message).to_bytes())
    }
}

/// Check a voucher's signature against the expected signer.
pub fn verify_voucher(voucher: &ClaimVoucher, signer: &VerifyingKey) -> bool {
    let Ok(bytes) = hex::decode(&voucher.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    let message = ClaimVoucher::message(&voucher.wallet, &voucher.round_id, voucher.amount, voucher.nonce);
    signer.verify(&message, &signature).is_ok()
}

pub struct SettlementReconciler {
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    signer: Option<ClaimSigner>,
    contract: Option<Arc<dyn PrizePoolContract>>,
}

impl SettlementReconciler {
    pub fn new(
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        signer: Option<ClaimSigner>,
        contract: Option<Arc<dyn PrizePoolContract>>,
    ) -> Self {
        Self {
            ledger,
            clock,
            metrics,
            signer,
            contract,
        }
    }

    pub fn contract(&self) -> Option<Arc<dyn PrizePoolContract>> {
        self.contract.clone()
    }

    pub fn signer_hex(&self) -> Option<String> {
        self.signer.as_ref().map(|s| s.signer_hex())
    }

    /// Sum stakes and winnings for a round. Only won-side statuses pay out.
    pub fn aggregate(&self, round_id: RoundId) -> PayoutSummary {
        let mut summary = PayoutSummary {
            round_id,
            ..Default::default()
        };
        for bet in self.ledger.bets_for_round(&round_id) {
            summary.total_wagered = summary.total_wagered.saturating_add(bet.bet_amount);
            if matches!(bet.status, BetStatus::Won | BetStatus::Claiming | BetStatus::Claimed) {
                summary.total_payouts = summary.total_payouts.saturating_add(bet.winnings);
                summary.winning_bets += 1;
            }
        }
        summary
    }

    /// Won or claiming bets on paid-out rounds, newest first.
    pub fn pending_claims(&self, wallet: Option<&WalletAddress>) -> Vec<PendingClaim> {
        let mut claims: Vec<PendingClaim> = self
            .ledger
            .bets_with_status(&[BetStatus::Won, BetStatus::Claiming])
            .into_iter()
            .filter(|bet| wallet.map_or(true, |w| &bet.wallet == w))
            .filter_map(|bet| {
                let round = self.ledger.round(&bet.round_id)?;
                (round.status == RoundStatus::Payout).then(|| PendingClaim {
                    bet_id: bet.id,
                    round_id: bet.round_id,
                    round_number: round.round_number,
                    wallet: bet.wallet,
                    amount: bet.winnings,
                    status: bet.status,
                })
            })
            .collect();
        claims.sort_by(|a, b| b.round_number.cmp(&a.round_number));
        claims
    }

    /// Sign a voucher for the wallet's winnings in a round and move the bet to
    /// `Claiming`. Asking again while claiming returns the same voucher.
    pub fn issue_voucher(&self, wallet: &WalletAddress, round_id: RoundId) -> EngineResult<ClaimVoucher> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ConfigurationError::ValidationFailed("claim signing key is not configured".to_string())
        })?;
        let round = self
            .ledger
            .round(&round_id)
            .ok_or_else(|| EngineError::round_not_found(round_id))?;
        if round.status != RoundStatus::Payout {
            return Err(ValidationError::WrongRoundPhase {
                round_id,
                expected: RoundStatus::Payout,
                actual: round.status,
            }
            .into());
        }
        let bet = self
            .ledger
            .bet_for_wallet(round_id, wallet)
            .ok_or(ValidationError::NothingToClaim(round_id))?;

        match bet.status {
            BetStatus::Won => {}
            BetStatus::Claiming => {
                if let Some(existing) = self.ledger.voucher(&bet.id) {
                    return Ok(existing);
                }
            }
            BetStatus::Claimed => return Err(ConflictError::VoucherAlreadyIssued(round_id).into()),
            BetStatus::Active | BetStatus::Lost => {
                return Err(ValidationError::NothingToClaim(round_id).into())
            }
        }

        // A voucher recorded by an earlier attempt whose Won -> Claiming step
        // never landed is reused, never re-signed.
        let voucher = match self.ledger.voucher(&bet.id) {
            Some(existing) => existing,
            None => self.ledger.insert_voucher_once(ClaimVoucher {
                wallet: bet.wallet.clone(),
                round_id,
                bet_id: bet.id,
                amount: bet.winnings,
                nonce: round.round_number,
                signature: signer.sign(&bet.wallet, &round_id, bet.winnings, round.round_number),
                signer: signer.signer_hex(),
                issued_at: self.clock.now_ms(),
            })?,
        };
        let claiming = self.ledger.update_bet_if(bet.id, &[BetStatus::Won], |b| {
            b.status = BetStatus::Claiming;
            Ok(())
        });
        match claiming {
            Ok(_) => {}
            // A concurrent request moved the bet first; both hold the same voucher
            Err(EngineError::Conflict(_))
                if self.ledger.bet(&bet.id).map(|b| b.status) == Some(BetStatus::Claiming) =>
            {
                return Ok(voucher);
            }
            Err(e) => return Err(e),
        }

        EngineMetrics::incr(&self.metrics.vouchers_issued);
        info!(
            round_id = %round_id,
            bet_id = %bet.id,
            wallet = %bet.wallet,
            amount = voucher.amount,
            "Claim voucher issued"
        );
        Ok(voucher)
    }

    /// Finish a claim. With a contract attached the voucher is submitted
    /// first; a replay rejection there means it was already paid.
    pub async fn confirm_claim(&self, bet_id: BetId) -> EngineResult<Bet> {
        let bet = self
            .ledger
            .bet(&bet_id)
            .ok_or_else(|| EngineError::bet_not_found(bet_id))?;
        if bet.status != BetStatus::Claiming {
            return Err(ConflictError::BetAlreadySettled {
                bet_id,
                status: bet.status,
            }
            .into());
        }

        if let Some(contract) = &self.contract {
            let voucher = self
                .ledger
                .voucher(&bet_id)
                .ok_or(ValidationError::NothingToClaim(bet.round_id))?;
            match contract.claim(&voucher).await {
                Ok(()) | Err(EngineError::Conflict(ConflictError::VoucherAlreadyIssued(_))) => {}
                Err(e) => {
                    EngineMetrics::incr(&self.metrics.mirror_failures);
                    return Err(e);
                }
            }
        }

        let claimed = self.ledger.update_bet_if(bet_id, &[BetStatus::Claiming], |b| {
            b.status = BetStatus::Claimed;
            Ok(())
        })?;
        EngineMetrics::incr(&self.metrics.claims_confirmed);
        info!(bet_id = %bet_id, wallet = %claimed.wallet, amount = claimed.winnings, "Claim confirmed");
        Ok(claimed)
    }

    fn require_contract(&self) -> EngineResult<&Arc<dyn PrizePoolContract>> {
        self.contract
            .as_ref()
            .ok_or_else(|| EngineError::ExternalDependency("no prize-pool contract attached".to_string()))
    }

    pub async fn refill(&self, amount: Amount) -> EngineResult<PrizePoolSnapshot> {
        if amount == 0 {
            return Err(ValidationError::InvalidPayment("refill amount must be positive".into()).into());
        }
        self.require_contract()?.refill_prize_pool(amount).await?;
        info!(amount, "Prize pool refilled");
        self.sync_pool_balance().await
    }

    pub async fn emergency_withdraw(&self, amount: Amount) -> EngineResult<PrizePoolSnapshot> {
        self.require_contract()?.emergency_withdraw(amount).await?;
        warn!(amount, "Emergency withdrawal from prize pool");
        self.sync_pool_balance().await
    }

    /// Chain to ledger: overwrite the local pool snapshot with contract stats.
    pub async fn sync_pool_balance(&self) -> EngineResult<PrizePoolSnapshot> {
        let stats = self.require_contract()?.stats().await?;
        let snapshot = PrizePoolSnapshot {
            prize_pool: stats.prize_pool,
            total_deposited: stats.total_deposited,
            total_claimed: stats.total_claimed,
            synced_at: Some(self.clock.now_ms()),
        };
        self.ledger.set_prize_pool(snapshot.clone())?;
        Ok(snapshot)
    }

    pub fn prize_pool(&self) -> PrizePoolSnapshot {
        self.ledger.prize_pool()
    }

    /// Periodic chain-to-ledger sync. A zero interval disables it.
    pub async fn run_balance_sync(self: Arc<Self>, interval: Duration, mut stop: StopToken) {
        if self.contract.is_none() || interval.is_zero() {
            return;
        }
        loop {
            if let Err(e) = self.sync_pool_balance().await {
                warn!(error = %e, "Prize pool balance sync failed");
            }
            if !stop.sleep(interval).await {
                break;
            }
        }
        info!("Prize pool balance sync stopped");
    }
}

/// Round transitions replayed to the contract, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorCommand {
    StartRound { round_number: u64, seed_hash: String },
    StartFlying { round_number: u64 },
    CrashRound {
        round_number: u64,
        server_seed: String,
        crash_point: Multiplier,
    },
}

/// Sequential forwarder of round transitions to the contract. Failures are
/// logged and counted; they never feed back into the off-chain round.
#[derive(Clone)]
pub struct ChainMirror {
    sender: mpsc::UnboundedSender<MirrorCommand>,
}

impl ChainMirror {
    pub fn spawn(
        contract: Arc<dyn PrizePoolContract>,
        metrics: Arc<EngineMetrics>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<MirrorCommand>();
        let handle = tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                let result = match &command {
                    MirrorCommand::StartRound {
                        round_number,
                        seed_hash,
                    } => contract.start_round(*round_number, seed_hash).await,
                    MirrorCommand::StartFlying { .. } => contract.start_flying().await,
                    MirrorCommand::CrashRound {
                        server_seed,
                        crash_point,
                        ..
                    } => contract.crash_round(server_seed, *crash_point).await,
                };
                if let Err(e) = result {
                    EngineMetrics::incr(&metrics.mirror_failures);
                    warn!(command = ?command, error = %e, "Round mirror to contract failed");
                }
            }
        });
        (Self { sender }, handle)
    }

    pub fn send(&self, command: MirrorCommand) {
        if self.sender.send(command).is_err() {
            error!("Round mirror worker is gone");
        }
    }
}

#[derive(Default)]
struct PoolState {
    round: Option<ContractRound>,
    stats: PoolStats,
    claimed: HashSet<(WalletAddress, u64)>,
}

/// Contract double that enforces the same rules as the deployed pool:
/// signer check, per-(wallet, nonce) replay protection, seed/hash check at
/// crash and a non-negative balance.
pub struct InMemoryPrizePool {
    signer: VerifyingKey,
    state: Mutex<PoolState>,
}

impl InMemoryPrizePool {
    pub fn new(signer: VerifyingKey) -> Self {
        Self {
            signer,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn state(&self) -> EngineResult<std::sync::MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::ExternalDependency("prize pool state poisoned".to_string()))
    }
}

#[async_trait]
impl PrizePoolContract for InMemoryPrizePool {
    async fn start_round(&self, round_number: u64, seed_hash: &str) -> EngineResult<()> {
        let mut state = self.state()?;
        if let Some(round) = &state.round {
            if round.status != RoundStatus::Crashed {
                return Err(EngineError::ExternalDependency(format!(
                    "contract round {} still {}",
                    round.round_number, round.status
                )));
            }
        }
        state.round = Some(ContractRound {
            round_number,
            seed_hash: seed_hash.to_string(),
            server_seed: None,
            crash_point: None,
            total_wagered: 0,
            total_payout: 0,
            status: RoundStatus::Betting,
        });
        Ok(())
    }

    async fn start_flying(&self) -> EngineResult<()> {
        let mut state = self.state()?;
        match state.round.as_mut() {
            Some(round) if round.status == RoundStatus::Betting => {
                round.status = RoundStatus::Flying;
                Ok(())
            }
            _ => Err(EngineError::ExternalDependency("contract has no round in betting".into())),
        }
    }

    async fn crash_round(&self, server_seed: &str, crash_point: Multiplier) -> EngineResult<()> {
        let mut state = self.state()?;
        match state.round.as_mut() {
            Some(round) if round.status == RoundStatus::Flying => {
                if fairness::hash_seed(server_seed) != round.seed_hash {
                    return Err(EngineError::ExternalDependency("seed does not match committed hash".into()));
                }
                round.server_seed = Some(server_seed.to_string());
                round.crash_point = Some(crash_point);
                round.status = RoundStatus::Crashed;
                Ok(())
            }
            _ => Err(EngineError::ExternalDependency("contract has no round in flight".into())),
        }
    }

    async fn current_round(&self) -> EngineResult<Option<ContractRound>> {
        Ok(self.state()?.round.clone())
    }

    async fn claim(&self, voucher: &ClaimVoucher) -> EngineResult<()> {
        if !verify_voucher(voucher, &self.signer) {
            return Err(ValidationError::InvalidPayment("voucher signature rejected".into()).into());
        }
        let mut state = self.state()?;
        let key = (voucher.wallet.clone(), voucher.nonce);
        if state.claimed.contains(&key) {
            return Err(ConflictError::VoucherAlreadyIssued(voucher.round_id).into());
        }
        if state.stats.prize_pool < voucher.amount {
            return Err(EngineError::ExternalDependency("prize pool balance too low".into()));
        }
        state.stats.prize_pool -= voucher.amount;
        state.stats.total_claimed += voucher.amount;
        state.claimed.insert(key);
        Ok(())
    }

    async fn refill_prize_pool(&self, amount: Amount) -> EngineResult<()> {
        let mut state = self.state()?;
        state.stats.prize_pool = state.stats.prize_pool.saturating_add(amount);
        state.stats.total_deposited = state.stats.total_deposited.saturating_add(amount);
        Ok(())
    }

    async fn emergency_withdraw(&self, amount: Amount) -> EngineResult<()> {
        let mut state = self.state()?;
        if amount > state.stats.prize_pool {
            return Err(ValidationError::InvalidPayment("withdrawal exceeds prize pool".into()).into());
        }
        state.stats.prize_pool -= amount;
        Ok(())
    }

    async fn stats(&self) -> EngineResult<PoolStats> {
        Ok(self.state()?.stats.clone())
    }
}
