//! Bet placement, cash-out and crash settlement.
//!
//! Every bet leaves `Active` exactly once, through [`Ledger::update_bet_if`].
//! Manual cash-out, auto cash-out and the crash batch all race on that same
//! compare-and-swap, so whichever lands first is the only outcome recorded.
//! Who wins a cash-out is decided by comparing multipliers, never by which
//! request arrived first.

use crate::{
    clock::Clock,
    config::GameControl,
    errors::{ConflictError, EngineError, EngineResult, FairnessError, ValidationError},
    events::{EventBus, RoundEvent},
    fairness::MultiplierCurve,
    metrics::EngineMetrics,
    store::Ledger,
    tickets::TicketAdmission,
    types::{
        Bet, BetId, BetStatus, CashoutReceipt, CashoutTrigger, Multiplier, Round, RoundId, RoundStatus,
        TicketId, WalletAddress,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of settling a round at its crash point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrashSettlement {
    pub auto_cashouts: Vec<CashoutReceipt>,
    pub bets_lost: usize,
}

pub struct BetLedger {
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    control: Arc<GameControl>,
    events: EventBus,
    metrics: Arc<EngineMetrics>,
    curve: MultiplierCurve,
    cashout_tolerance: Multiplier,
}

impl BetLedger {
    pub fn new(
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        control: Arc<GameControl>,
        events: EventBus,
        metrics: Arc<EngineMetrics>,
        curve: MultiplierCurve,
        cashout_tolerance: Multiplier,
    ) -> Self {
        Self {
            ledger,
            clock,
            control,
            events,
            metrics,
            curve,
            cashout_tolerance,
        }
    }

    /// Place one bet per wallet per round, consuming the ticket in the same
    /// step. The stake is the ticket's face value.
    pub fn place_bet(
        &self,
        round_id: RoundId,
        wallet: &WalletAddress,
        ticket_id: TicketId,
        auto_cashout_at: Option<Multiplier>,
    ) -> EngineResult<Bet> {
        self.control.ensure_enabled()?;
        if wallet.is_empty() {
            return Err(ValidationError::InvalidWallet.into());
        }

        let now = self.clock.now_ms();
        let bet = self.ledger.place_bet_atomic(
            round_id,
            wallet,
            ticket_id,
            now,
            |round| {
                if round.status != RoundStatus::Betting {
                    return Err(ValidationError::WrongRoundPhase {
                        round_id,
                        expected: RoundStatus::Betting,
                        actual: round.status,
                    }
                    .into());
                }
                if let Some(target) = auto_cashout_at {
                    if target <= Multiplier::ONE || target > round.params.max_multiplier {
                        return Err(ValidationError::InvalidAutoCashout(target).into());
                    }
                }
                Ok(())
            },
            |round, ticket| {
                TicketAdmission::check_consumable(ticket, wallet, now)?;
                let (min, max) = (round.params.min_bet, round.params.max_bet);
                if ticket.ticket_value < min || ticket.ticket_value > max {
                    return Err(ValidationError::BetAmountOutOfRange {
                        amount: ticket.ticket_value,
                        min,
                        max,
                    }
                    .into());
                }
                Ok(())
            },
            |round, ticket| Bet {
                id: Uuid::new_v4(),
                round_id: round.id,
                wallet: wallet.clone(),
                ticket_id: ticket.id,
                bet_amount: ticket.ticket_value,
                auto_cashout_at,
                status: BetStatus::Active,
                cashed_out_at: None,
                cashout_trigger: None,
                winnings: 0,
                placed_at: now,
                settled_at: None,
            },
        )?;

        EngineMetrics::incr(&self.metrics.bets_placed);
        EngineMetrics::incr(&self.metrics.tickets_consumed);
        info!(
            round_id = %round_id,
            bet_id = %bet.id,
            wallet = %bet.wallet,
            amount = bet.bet_amount,
            auto_cashout = ?bet.auto_cashout_at.map(|m| m.to_string()),
            "Bet placed"
        );
        self.events.publish(RoundEvent::BetPlaced {
            round_id,
            bet_id: bet.id,
            wallet: bet.wallet.clone(),
            bet_amount: bet.bet_amount,
        });
        Ok(bet)
    }

    /// Multiplier implied by the time elapsed since the round started flying.
    /// Unbounded; callers that show it to players must cap it.
    pub fn server_multiplier(&self, round: &Round) -> Option<Multiplier> {
        let started = round.flying_started_at?;
        let elapsed = Duration::from_millis(self.clock.now_ms().saturating_sub(started));
        Some(self.curve.multiplier_at(elapsed))
    }

    /// Cash out at the multiplier the client observed.
    ///
    /// Only the bet's own wallet may cash it out, and only while the round
    /// is flying. Wins iff `observed` is below the crash point; otherwise the
    /// bet is recorded lost and the call reports "too late".
    pub fn cash_out(
        &self,
        bet_id: BetId,
        wallet: &WalletAddress,
        observed: Multiplier,
    ) -> EngineResult<CashoutReceipt> {
        let bet = self
            .ledger
            .bet(&bet_id)
            .ok_or_else(|| EngineError::bet_not_found(bet_id))?;
        if &bet.wallet != wallet {
            return Err(ValidationError::BetNotOwned(bet_id).into());
        }
        let round = self
            .ledger
            .round(&bet.round_id)
            .ok_or_else(|| EngineError::round_not_found(bet.round_id))?;

        if round.status != RoundStatus::Flying {
            if bet.status.is_settled() {
                return Err(ConflictError::BetAlreadySettled {
                    bet_id,
                    status: bet.status,
                }
                .into());
            }
            if round.status == RoundStatus::Crashed {
                // The crash sweep owns every bet still active
                return Err(ConflictError::TooLate { requested: observed }.into());
            }
            return Err(ValidationError::WrongRoundPhase {
                round_id: round.id,
                expected: RoundStatus::Flying,
                actual: round.status,
            }
            .into());
        }
        if observed < Multiplier::ONE {
            return Err(ValidationError::InvalidMultiplier(observed).into());
        }

        let current = self.server_multiplier(&round).unwrap_or(Multiplier::ONE);
        let ceiling = Multiplier::from_hundredths(
            current
                .hundredths()
                .saturating_add(self.cashout_tolerance.hundredths()),
        );
        if observed > ceiling {
            return Err(ValidationError::MultiplierNotReached {
                requested: observed,
                current,
            }
            .into());
        }

        let crash_point = self
            .ledger
            .sealed_seed(&round.id)
            .map(|s| s.crash_point)
            .ok_or(FairnessError::MissingSeed(round.id))?;

        self.settle_one(&bet, observed, crash_point, CashoutTrigger::Manual)
    }

    /// The single compare-and-swap every cash-out goes through.
    fn settle_one(
        &self,
        bet: &Bet,
        at: Multiplier,
        crash_point: Multiplier,
        trigger: CashoutTrigger,
    ) -> EngineResult<CashoutReceipt> {
        let now = self.clock.now_ms();
        let wins = at < crash_point;

        let settled = self
            .ledger
            .update_bet_if(bet.id, &[BetStatus::Active], |b| {
                b.settled_at = Some(now);
                if wins {
                    b.status = BetStatus::Won;
                    b.cashed_out_at = Some(at);
                    b.cashout_trigger = Some(trigger);
                    b.winnings = at.apply(b.bet_amount);
                } else {
                    b.status = BetStatus::Lost;
                    b.winnings = 0;
                }
                Ok(())
            })
            .map_err(|e| {
                if matches!(e, EngineError::Conflict(_)) {
                    EngineMetrics::incr(&self.metrics.cas_conflicts);
                    debug!(bet_id = %bet.id, requested = %at, "Cash-out lost the race");
                }
                e
            })?;

        if !wins {
            EngineMetrics::incr(&self.metrics.bets_lost);
            debug!(bet_id = %bet.id, requested = %at, crash_point = %crash_point, "Cash-out too late");
            return Err(ConflictError::TooLate { requested: at }.into());
        }

        EngineMetrics::incr(&self.metrics.cashouts_won);
        if trigger == CashoutTrigger::Auto {
            EngineMetrics::incr(&self.metrics.auto_cashouts);
        }
        info!(
            round_id = %settled.round_id,
            bet_id = %settled.id,
            wallet = %settled.wallet,
            multiplier = %at,
            winnings = settled.winnings,
            trigger = ?trigger,
            "Cashed out"
        );
        self.events.publish(RoundEvent::CashedOut {
            round_id: settled.round_id,
            bet_id: settled.id,
            wallet: settled.wallet.clone(),
            multiplier: at,
            winnings: settled.winnings,
            trigger,
        });

        Ok(CashoutReceipt {
            bet_id: settled.id,
            round_id: settled.round_id,
            multiplier: at,
            winnings: settled.winnings,
            trigger,
        })
    }

    /// Cash out every active bet whose auto target has been reached by
    /// `current` and lies below the crash point.
    pub fn evaluate_auto_cashouts(
        &self,
        round_id: RoundId,
        current: Multiplier,
        crash_point: Multiplier,
    ) -> Vec<CashoutReceipt> {
        let mut receipts = Vec::new();
        for bet in self.ledger.bets_for_round(&round_id) {
            let Some(target) = bet.auto_cashout_at else {
                continue;
            };
            if bet.status != BetStatus::Active || target > current || target >= crash_point {
                continue;
            }
            match self.settle_one(&bet, target, crash_point, CashoutTrigger::Auto) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => debug!(bet_id = %bet.id, error = %e, "Auto cash-out skipped"),
            }
        }
        receipts
    }

    /// Crash-time sweep: a final auto cash-out pass at the crash point, then
    /// every bet still active is marked lost.
    pub fn settle_crash(&self, round_id: RoundId, crash_point: Multiplier) -> CrashSettlement {
        let auto_cashouts = self.evaluate_auto_cashouts(round_id, crash_point, crash_point);
        let now = self.clock.now_ms();

        let mut bets_lost = 0;
        for bet_id in self.ledger.bet_ids_for_round(&round_id) {
            let swept = self.ledger.update_bet_if(bet_id, &[BetStatus::Active], |b| {
                b.status = BetStatus::Lost;
                b.winnings = 0;
                b.settled_at = Some(now);
                Ok(())
            });
            match swept {
                Ok(_) => bets_lost += 1,
                // Already won or lost through a cash-out
                Err(EngineError::Conflict(_)) => {}
                Err(e) => tracing::warn!(bet_id = %bet_id, error = %e, "Crash sweep failed for bet"),
            }
        }

        EngineMetrics::add(&self.metrics.bets_lost, bets_lost as u64);
        CrashSettlement {
            auto_cashouts,
            bets_lost,
        }
    }

    pub fn bet(&self, bet_id: &BetId) -> Option<Bet> {
        self.ledger.bet(bet_id)
    }

    pub fn bets_for_round(&self, round_id: &RoundId) -> Vec<Bet> {
        self.ledger.bets_for_round(round_id)
    }

    pub fn bets_for_wallet(&self, wallet: &WalletAddress) -> Vec<Bet> {
        self.ledger.bets_for_wallet(wallet)
    }
}
