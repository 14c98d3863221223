//! Round state machine.
//!
//! `idle -> betting -> countdown -> flying -> crashed -> payout -> (next)`.
//! Each transition is a compare-and-swap on the round row, so a transition
//! requested from the wrong phase is rejected as a conflict and never
//! coerced. The automatic loop and an operator calling the same methods by
//! hand go through identical code.

use crate::{
    bets::BetLedger,
    clock::Clock,
    config::{GameConfig, GameControl, SchedulerConfig},
    errors::{
        ConfigurationError, ConflictError, EngineError, EngineResult, FairnessError, ValidationError,
    },
    events::{EventBus, RoundEvent},
    fairness::{self, FairnessEngine, SeedCommitment},
    metrics::EngineMetrics,
    settlement::{ChainMirror, MirrorCommand, PayoutSummary, SettlementReconciler},
    shutdown::StopToken,
    store::{Ledger, SealedSeed},
    types::{Multiplier, Round, RoundId, RoundStatus},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Returned by [`RoundScheduler::crash`]: the reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashOutcome {
    pub round_id: RoundId,
    pub round_number: u64,
    pub crash_point: Multiplier,
    pub server_seed: String,
    pub auto_cashouts: usize,
    pub bets_lost: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStatus {
    pub game_active: bool,
    pub game_paused_reason: Option<String>,
    pub current_round: Option<Round>,
    /// Only while flying; capped below the crash point.
    pub current_multiplier: Option<Multiplier>,
}

pub struct RoundScheduler {
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    control: Arc<GameControl>,
    fairness: FairnessEngine,
    bets: Arc<BetLedger>,
    reconciler: Arc<SettlementReconciler>,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
    config: SchedulerConfig,
    mirror: Option<ChainMirror>,
}

impl RoundScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        control: Arc<GameControl>,
        fairness: FairnessEngine,
        bets: Arc<BetLedger>,
        reconciler: Arc<SettlementReconciler>,
        events: EventBus,
        metrics: Arc<EngineMetrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            ledger,
            clock,
            control,
            fairness,
            bets,
            reconciler,
            events,
            metrics,
            config,
            mirror: None,
        }
    }

    /// Forward round transitions to the prize-pool contract.
    pub fn with_mirror(mut self, mirror: ChainMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    fn mirror(&self, command: MirrorCommand) {
        if let Some(mirror) = &self.mirror {
            mirror.send(command);
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Open a new betting round with a fresh committed seed.
    pub fn start_round(&self) -> EngineResult<Round> {
        self.control.ensure_enabled()?;
        self.open_round(self.fairness.commit())
    }

    /// Open a round on an operator-chosen seed. The seed is committed and the
    /// crash point derived exactly as for a generated one.
    pub fn start_round_with_seed(&self, server_seed: &str) -> EngineResult<Round> {
        self.control.ensure_enabled()?;
        if server_seed.trim().is_empty() {
            return Err(ValidationError::InvalidSeed("seed must not be empty".into()).into());
        }
        self.open_round(FairnessEngine::commit_with_seed(server_seed.to_string()))
    }

    fn open_round(&self, commitment: SeedCommitment) -> EngineResult<Round> {
        let params = self.control.snapshot().round_params();
        let now = self.clock.now_ms();

        let round = self.ledger.create_round(|round_number| {
            let crash_point = self
                .fairness
                .derive(&commitment.server_seed, round_number, &params);
            let round = Round {
                id: Uuid::new_v4(),
                round_number,
                status: RoundStatus::Betting,
                server_seed_hash: commitment.seed_hash.clone(),
                server_seed: None,
                crash_point: None,
                total_wagered: 0,
                total_payout: 0,
                params: params.clone(),
                start_time: now,
                flying_started_at: None,
                end_time: None,
            };
            let sealed = SealedSeed {
                server_seed: commitment.server_seed.clone(),
                crash_point,
            };
            (round, sealed)
        })?;

        EngineMetrics::incr(&self.metrics.rounds_started);
        info!(
            round_id = %round.id,
            round_number = round.round_number,
            seed_hash = %round.server_seed_hash,
            "Round started"
        );
        self.events.publish(RoundEvent::RoundStarted {
            round_id: round.id,
            round_number: round.round_number,
            server_seed_hash: round.server_seed_hash.clone(),
            betting_ends_at: now + round.params.betting_duration_secs * 1000,
        });
        self.mirror(MirrorCommand::StartRound {
            round_number: round.round_number,
            seed_hash: round.server_seed_hash.clone(),
        });
        Ok(round)
    }

    /// Close admissions.
    pub fn start_countdown(&self, round_id: RoundId) -> EngineResult<Round> {
        let round = self
            .ledger
            .transition_round(round_id, RoundStatus::Countdown, |_| Ok(()))?;
        info!(round_id = %round_id, round_number = round.round_number, "Countdown started");
        self.events.publish(RoundEvent::CountdownStarted {
            round_id,
            flying_at: self.clock.now_ms() + self.config.countdown_secs * 1000,
        });
        Ok(round)
    }

    /// Lift off; the multiplier clock starts now.
    pub fn start_flying(&self, round_id: RoundId) -> EngineResult<Round> {
        let now = self.clock.now_ms();
        let round = self.ledger.transition_round(round_id, RoundStatus::Flying, |r| {
            r.flying_started_at = Some(now);
            Ok(())
        })?;
        info!(round_id = %round_id, round_number = round.round_number, "Round flying");
        self.events.publish(RoundEvent::Flying {
            round_id,
            started_at: now,
        });
        self.mirror(MirrorCommand::StartFlying {
            round_number: round.round_number,
        });
        Ok(round)
    }

    /// Close the flight, settle every bet still active, then reveal seed and
    /// crash point. Nothing about the outcome is public until the sweep is done.
    pub fn crash(&self, round_id: RoundId) -> EngineResult<CrashOutcome> {
        let sealed = self
            .ledger
            .sealed_seed(&round_id)
            .ok_or(FairnessError::MissingSeed(round_id))?;
        let now = self.clock.now_ms();

        self.ledger.transition_round(round_id, RoundStatus::Crashed, |r| {
            r.end_time = Some(now);
            Ok(())
        })?;

        let settlement = self.bets.settle_crash(round_id, sealed.crash_point);
        let round = self.reveal(round_id, &sealed)?;

        EngineMetrics::incr(&self.metrics.rounds_crashed);
        info!(
            round_id = %round_id,
            round_number = round.round_number,
            crash_point = %sealed.crash_point,
            auto_cashouts = settlement.auto_cashouts.len(),
            bets_lost = settlement.bets_lost,
            "Round crashed"
        );
        self.events.publish(RoundEvent::Crashed {
            round_id,
            crash_point: sealed.crash_point,
            server_seed: sealed.server_seed.clone(),
            bets_lost: settlement.bets_lost,
        });
        self.mirror(MirrorCommand::CrashRound {
            round_number: round.round_number,
            server_seed: sealed.server_seed.clone(),
            crash_point: sealed.crash_point,
        });

        Ok(CrashOutcome {
            round_id,
            round_number: round.round_number,
            crash_point: sealed.crash_point,
            server_seed: sealed.server_seed,
            auto_cashouts: settlement.auto_cashouts.len(),
            bets_lost: settlement.bets_lost,
        })
    }

    fn reveal(&self, round_id: RoundId, sealed: &SealedSeed) -> EngineResult<Round> {
        self.ledger.update_round(round_id, |r| {
            r.server_seed = Some(sealed.server_seed.clone());
            r.crash_point = Some(sealed.crash_point);
            Ok(())
        })
    }

    /// Re-check the reveal against the commitment. A mismatch pauses the game
    /// and leaves the round crashed with payouts halted.
    fn verify_reveal(&self, round: &Round) -> Result<(), FairnessError> {
        let (Some(seed), Some(crash_point)) = (round.server_seed.as_deref(), round.crash_point) else {
            return Err(FairnessError::MissingSeed(round.id));
        };
        if fairness::hash_seed(seed) != round.server_seed_hash {
            return Err(FairnessError::SeedHashMismatch { round_id: round.id });
        }
        let recomputed = self.fairness.derive(seed, round.round_number, &round.params);
        if recomputed != crash_point {
            return Err(FairnessError::CrashPointMismatch {
                round_id: round.id,
                recorded: crash_point,
                recomputed,
            });
        }
        Ok(())
    }

    /// Verify the reveal, aggregate totals onto the round and close it.
    pub fn process_payouts(&self, round_id: RoundId) -> EngineResult<PayoutSummary> {
        let round = self
            .ledger
            .round(&round_id)
            .ok_or_else(|| EngineError::round_not_found(round_id))?;
        if round.status != RoundStatus::Crashed {
            return Err(ConflictError::InvalidTransition {
                round_id,
                requested: RoundStatus::Payout,
                actual: round.status,
            }
            .into());
        }

        if let Err(violation) = self.verify_reveal(&round) {
            EngineMetrics::incr(&self.metrics.fairness_violations);
            error!(
                round_id = %round_id,
                round_number = round.round_number,
                error = %violation,
                "Fairness violation; payouts halted"
            );
            let reason = format!("fairness violation in round {}", round.round_number);
            self.control.pause(reason.clone());
            self.events.publish(RoundEvent::PayoutsHalted { round_id, reason: reason.clone() });
            self.events.publish(RoundEvent::GamePaused { reason });
            return Err(violation.into());
        }

        let summary = self.reconciler.aggregate(round_id);
        let max_payout = round.params.max_multiplier.apply(summary.total_wagered);
        if summary.total_payouts > max_payout {
            // Unreachable while winnings are capped by the crash point.
            error!(round_id = %round_id, total = summary.total_payouts, max_payout, "Payout exceeds round cap");
            return Err(ConfigurationError::ValidationFailed("round payout exceeds cap".into()).into());
        }

        let round = self.ledger.transition_round(round_id, RoundStatus::Payout, |r| {
            r.total_wagered = summary.total_wagered;
            r.total_payout = summary.total_payouts;
            Ok(())
        })?;

        EngineMetrics::incr(&self.metrics.rounds_paid);
        info!(
            round_id = %round_id,
            round_number = round.round_number,
            total_wagered = summary.total_wagered,
            total_payouts = summary.total_payouts,
            winning_bets = summary.winning_bets,
            "Payouts processed"
        );
        self.events.publish(RoundEvent::PayoutProcessed {
            round_id,
            total_payouts: summary.total_payouts,
            winning_bets: summary.winning_bets,
        });
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Operator controls and queries
    // ------------------------------------------------------------------

    pub fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "Game paused");
        self.control.pause(reason.clone());
        self.events.publish(RoundEvent::GamePaused { reason });
    }

    pub fn resume(&self) {
        info!("Game resumed");
        self.control.resume();
        self.events.publish(RoundEvent::GameResumed);
    }

    /// Takes effect from the next `start_round`.
    pub fn update_game_config(&self, next: GameConfig) -> EngineResult<GameConfig> {
        let applied = self.control.update(next)?;
        info!(
            enabled = applied.game_enabled,
            betting_secs = applied.betting_duration_secs,
            max_multiplier = %applied.max_multiplier,
            "Game config updated"
        );
        Ok(applied)
    }

    pub fn game_config(&self) -> GameConfig {
        self.control.snapshot()
    }

    pub fn get_status(&self) -> GameStatus {
        let current_round = self.ledger.open_round();
        let current_multiplier = current_round
            .as_ref()
            .filter(|r| r.status == RoundStatus::Flying)
            .and_then(|r| self.current_multiplier(r.id).ok());
        GameStatus {
            game_active: self.control.is_enabled(),
            game_paused_reason: self.control.paused_reason(),
            current_round,
            current_multiplier,
        }
    }

    /// Server-side multiplier for a round. While flying it never reaches the
    /// crash point, so polling it cannot reveal the crash early.
    pub fn current_multiplier(&self, round_id: RoundId) -> EngineResult<Multiplier> {
        let round = self
            .ledger
            .round(&round_id)
            .ok_or_else(|| EngineError::round_not_found(round_id))?;
        match round.status {
            RoundStatus::Betting | RoundStatus::Countdown => Ok(Multiplier::ONE),
            RoundStatus::Flying => {
                let current = self.bets.server_multiplier(&round).unwrap_or(Multiplier::ONE);
                let ceiling = self
                    .ledger
                    .sealed_seed(&round_id)
                    .map(|s| Multiplier::from_hundredths(s.crash_point.hundredths().saturating_sub(1)))
                    .unwrap_or(current);
                Ok(current.min(ceiling).max(Multiplier::ONE))
            }
            RoundStatus::Crashed | RoundStatus::Payout => {
                Ok(round.crash_point.unwrap_or(Multiplier::ONE))
            }
        }
    }

    pub fn round(&self, round_id: &RoundId) -> Option<Round> {
        self.ledger.round(round_id)
    }

    pub fn recent_rounds(&self, limit: usize) -> Vec<Round> {
        self.ledger.recent_rounds(limit)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------
    // Driving rounds
    // ------------------------------------------------------------------

    /// Bring the persisted open round back to a consistent phase after a
    /// restart. Flying rounds already past their crash point are crashed and
    /// crashed rounds are paid, so settlement is never skipped.
    pub fn recover(&self) -> EngineResult<Option<Round>> {
        let Some(round) = self.ledger.open_round() else {
            return Ok(None);
        };
        info!(
            round_id = %round.id,
            round_number = round.round_number,
            status = %round.status,
            "Recovering open round"
        );

        if round.status == RoundStatus::Flying {
            let crash_point = self
                .ledger
                .sealed_seed(&round.id)
                .map(|s| s.crash_point)
                .ok_or(FairnessError::MissingSeed(round.id))?;
            let reached = self.bets.server_multiplier(&round).unwrap_or(Multiplier::ONE);
            if reached < crash_point {
                return Ok(Some(round));
            }
            self.crash(round.id)?;
        }

        let round = self
            .ledger
            .round(&round.id)
            .ok_or_else(|| EngineError::round_not_found(round.id))?;
        if round.status == RoundStatus::Crashed {
            if !round.is_revealed() {
                // Stopped between the crash sweep and the reveal
                let sealed = self
                    .ledger
                    .sealed_seed(&round.id)
                    .ok_or(FairnessError::MissingSeed(round.id))?;
                self.bets.settle_crash(round.id, sealed.crash_point);
                self.reveal(round.id, &sealed)?;
            }
            self.process_payouts(round.id)?;
            return Ok(None);
        }
        Ok(Some(round))
    }

    /// Tick through the flight, cashing out auto targets as they are passed,
    /// then crash. Not interruptible: the crash is the terminal action of the
    /// flying phase.
    pub async fn run_flight(&self, round_id: RoundId) -> EngineResult<CrashOutcome> {
        let crash_point = self
            .ledger
            .sealed_seed(&round_id)
            .map(|s| s.crash_point)
            .ok_or(FairnessError::MissingSeed(round_id))?;
        let curve = self.fairness.curve();
        let tick = self.config.tick_interval();

        loop {
            let round = self
                .ledger
                .round(&round_id)
                .ok_or_else(|| EngineError::round_not_found(round_id))?;
            if round.status != RoundStatus::Flying {
                return Err(ConflictError::InvalidTransition {
                    round_id,
                    requested: RoundStatus::Crashed,
                    actual: round.status,
                }
                .into());
            }
            let started = round.flying_started_at.unwrap_or_else(|| self.clock.now_ms());
            let elapsed = Duration::from_millis(self.clock.now_ms().saturating_sub(started));
            let current = curve.multiplier_at(elapsed);
            if current >= crash_point {
                break;
            }

            self.bets.evaluate_auto_cashouts(round_id, current, crash_point);
            self.events.publish(RoundEvent::Tick {
                round_id,
                multiplier: current,
                elapsed_ms: elapsed.as_millis() as u64,
            });

            let remaining = curve.time_to_reach(crash_point).saturating_sub(elapsed);
            tokio::time::sleep(tick.min(remaining).max(Duration::from_millis(1))).await;
        }

        self.crash(round_id)
    }

    /// Advance one round from whatever phase it is in to payout. Returns
    /// `Ok(false)` if a stop arrived while waiting at a phase boundary; the
    /// round is then left in that phase for the next run to pick up.
    pub async fn drive_round(&self, round_id: RoundId, stop: &mut StopToken) -> EngineResult<bool> {
        loop {
            let round = self
                .ledger
                .round(&round_id)
                .ok_or_else(|| EngineError::round_not_found(round_id))?;

            match round.status {
                RoundStatus::Betting => {
                    let closes_at = round.start_time + round.params.betting_duration_secs * 1000;
                    let wait = closes_at.saturating_sub(self.clock.now_ms());
                    if !stop.sleep(Duration::from_millis(wait)).await {
                        return Ok(false);
                    }
                    self.start_countdown(round_id)?;
                }
                RoundStatus::Countdown => {
                    if !stop.sleep(self.config.countdown()).await {
                        return Ok(false);
                    }
                    self.start_flying(round_id)?;
                }
                RoundStatus::Flying => {
                    self.run_flight(round_id).await?;
                }
                RoundStatus::Crashed => {
                    self.process_payouts(round_id)?;
                }
                RoundStatus::Payout => return Ok(true),
            }
        }
    }

    /// Automatic mode: cycle rounds until stopped. While the game is paused
    /// the loop parks without opening rounds.
    pub async fn run(self: Arc<Self>, mut stop: StopToken) {
        let delay = self.config.inter_round_delay();
        info!(?delay, "Round scheduler started");

        let mut pending = match self.recover() {
            Ok(round) => round.map(|r| r.id),
            Err(e) => {
                error!(error = %e, "Round recovery failed");
                None
            }
        };

        while !stop.is_stopped() {
            let round_id = match pending.take() {
                Some(id) => id,
                None => match self.start_round() {
                    Ok(round) => round.id,
                    Err(EngineError::OperationalPause { reason }) => {
                        debug!(%reason, "Scheduler parked while paused");
                        if !stop.sleep(delay.max(Duration::from_millis(100))).await {
                            break;
                        }
                        continue;
                    }
                    Err(EngineError::Conflict(ConflictError::RoundAlreadyOpen(open))) => open,
                    Err(e) => {
                        error!(error = %e, "Failed to start round");
                        if !stop.sleep(delay).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            match self.drive_round(round_id, &mut stop).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(round_id = %round_id, error = %e, "Round halted");
                    // The round stays open and is retried once the game is
                    // enabled again.
                    pending = Some(round_id);
                    let park = delay.max(Duration::from_millis(100));
                    if !stop.sleep(park).await {
                        break;
                    }
                    while !self.control.is_enabled() {
                        if !stop.sleep(park).await {
                            break;
                        }
                    }
                    continue;
                }
            }

            if !stop.sleep(delay).await {
                break;
            }
        }
        info!("Round scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{EngineConfig, FairnessConfig, TicketConfig};
    use crate::fairness::MultiplierCurve;
    use crate::tickets::{PurchaseRequest, TicketAdmission};
    use crate::types::{BetStatus, WalletAddress, UNITS_PER_TOKEN};

    struct Harness {
        ledger: Arc<Ledger>,
        clock: ManualClock,
        tickets: TicketAdmission,
        bets: Arc<BetLedger>,
        scheduler: RoundScheduler,
    }

    fn harness() -> Harness {
        let config = EngineConfig::default();
        let ledger = Arc::new(Ledger::in_memory());
        let clock = ManualClock::new(1_000_000);
        let metrics = Arc::new(EngineMetrics::new());
        let control = Arc::new(GameControl::new(config.game.clone()));
        let events = EventBus::new(128);
        let tickets = TicketAdmission::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            metrics.clone(),
            TicketConfig::default(),
        );
        let bets = Arc::new(BetLedger::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            control.clone(),
            events.clone(),
            metrics.clone(),
            MultiplierCurve::new(config.fairness.growth_rate),
            config.scheduler.cashout_tolerance,
        ));
        let reconciler = Arc::new(SettlementReconciler::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            metrics.clone(),
            None,
            None,
        ));
        let scheduler = RoundScheduler::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            control,
            FairnessEngine::new(&FairnessConfig::default()),
            bets.clone(),
            reconciler,
            events,
            metrics,
            config.scheduler,
        );
        Harness {
            ledger,
            clock,
            tickets,
            bets,
            scheduler,
        }
    }

    #[test]
    fn test_transitions_follow_the_cycle() {
        let h = harness();
        let round = h.scheduler.start_round().unwrap();
        assert_eq!(round.round_number, 1);
        assert!(round.server_seed.is_none());

        let second = h.scheduler.start_round();
        assert!(matches!(second, Err(EngineError::Conflict(ConflictError::RoundAlreadyOpen(_)))));

        let skip = h.scheduler.start_flying(round.id);
        assert!(matches!(skip, Err(EngineError::Conflict(ConflictError::InvalidTransition { .. }))));
        assert!(matches!(h.scheduler.crash(round.id), Err(EngineError::Conflict(_))));
        assert!(matches!(h.scheduler.process_payouts(round.id), Err(EngineError::Conflict(_))));

        h.scheduler.start_countdown(round.id).unwrap();
        h.scheduler.start_flying(round.id).unwrap();
        let crash = h.scheduler.crash(round.id).unwrap();
        assert!(fairness::verify(
            &crash.server_seed,
            &round.server_seed_hash,
            round.round_number,
            crash.crash_point,
            &h.scheduler.fairness.derivation_params(&round.params),
        ));
        let summary = h.scheduler.process_payouts(round.id).unwrap();
        assert_eq!(summary.total_payouts, 0);
        assert_eq!(h.scheduler.round(&round.id).unwrap().status, RoundStatus::Payout);
        assert_eq!(h.scheduler.start_round().unwrap().round_number, 2);
    }

    #[test]
    fn test_pause_blocks_new_rounds_not_current() {
        let h = harness();
        let round = h.scheduler.start_round().unwrap();
        h.scheduler.pause("maintenance");

        let status = h.scheduler.get_status();
        assert!(!status.game_active);
        assert_eq!(status.game_paused_reason.as_deref(), Some("maintenance"));

        h.scheduler.start_countdown(round.id).unwrap();
        h.scheduler.start_flying(round.id).unwrap();
        h.scheduler.crash(round.id).unwrap();
        h.scheduler.process_payouts(round.id).unwrap();
        assert!(matches!(h.scheduler.start_round(), Err(EngineError::OperationalPause { .. })));

        h.scheduler.resume();
        assert!(h.scheduler.start_round().is_ok());
    }

    #[test]
    fn test_config_change_applies_next_round() {
        let h = harness();
        let first = h.scheduler.start_round().unwrap();
        let mut next = h.scheduler.game_config();
        next.betting_duration_secs = 30;
        h.scheduler.update_game_config(next).unwrap();
        assert_eq!(h.scheduler.round(&first.id).unwrap().params.betting_duration_secs, 15);

        h.scheduler.start_countdown(first.id).unwrap();
        h.scheduler.start_flying(first.id).unwrap();
        h.scheduler.crash(first.id).unwrap();
        h.scheduler.process_payouts(first.id).unwrap();
        let second = h.scheduler.start_round().unwrap();
        assert_eq!(second.params.betting_duration_secs, 30);

        let mut invalid = h.scheduler.game_config();
        invalid.min_bet = 0;
        assert!(h.scheduler.update_game_config(invalid).is_err());
    }

    #[test]
    fn test_fairness_violation_halts_payouts() {
        let h = harness();
        let round = h.scheduler.start_round().unwrap();
        h.scheduler.start_countdown(round.id).unwrap();
        h.scheduler.start_flying(round.id).unwrap();
        let crash = h.scheduler.crash(round.id).unwrap();

        h.ledger
            .update_round(round.id, |r| {
                r.crash_point = Some(Multiplier::from_hundredths(crash.crash_point.hundredths() + 1));
                Ok(())
            })
            .unwrap();

        let err = h.scheduler.process_payouts(round.id).unwrap_err();
        assert!(matches!(err, EngineError::FairnessViolation(FairnessError::CrashPointMismatch { .. })));
        assert_eq!(h.scheduler.round(&round.id).unwrap().status, RoundStatus::Crashed);
        assert!(h.scheduler.get_status().game_paused_reason.unwrap().contains("fairness"));
    }

    #[test]
    fn test_current_multiplier_never_reveals_crash() {
        let h = harness();
        let round = h.scheduler.start_round_with_seed("fixed-seed").unwrap();
        let crash_point = h.ledger.sealed_seed(&round.id).unwrap().crash_point;
        h.scheduler.start_countdown(round.id).unwrap();
        h.scheduler.start_flying(round.id).unwrap();

        h.clock.advance(Duration::from_secs(3_600));
        let shown = h.scheduler.current_multiplier(round.id).unwrap();
        assert!(shown < crash_point || crash_point == Multiplier::ONE);

        h.scheduler.crash(round.id).unwrap();
        assert_eq!(h.scheduler.current_multiplier(round.id).unwrap(), crash_point);
    }

    #[test]
    fn test_recover_crashes_overdue_flight() {
        let h = harness();
        let wallet = WalletAddress::new("0xa1");
        let round = h.scheduler.start_round().unwrap();
        let ticket = h
            .tickets
            .purchase(&PurchaseRequest {
                wallet: wallet.clone(),
                ticket_value: UNITS_PER_TOKEN,
                payment_currency: "WOVER".into(),
                payment_amount: UNITS_PER_TOKEN,
                payment_ref: "r1".into(),
            })
            .unwrap();
        let bet = h.bets.place_bet(round.id, &wallet, ticket.id, None).unwrap();
        h.scheduler.start_countdown(round.id).unwrap();
        h.scheduler.start_flying(round.id).unwrap();

        // Far past any crash point the curve can reach below the cap
        h.clock.advance(Duration::from_secs(24 * 3_600));
        assert!(h.scheduler.recover().unwrap().is_none());
        assert_eq!(h.scheduler.round(&round.id).unwrap().status, RoundStatus::Payout);
        assert_eq!(h.bets.bet(&bet.id).unwrap().status, BetStatus::Lost);
    }
}
