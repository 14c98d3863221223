//! Round event stream.
//!
//! The scheduler and bet ledger publish here; the WebSocket layer and any
//! other consumer subscribe. Publishing never blocks and never fails when no
//! one is listening.

use crate::types::{Amount, BetId, CashoutTrigger, Multiplier, RoundId, WalletAddress};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    RoundStarted {
        round_id: RoundId,
        round_number: u64,
        server_seed_hash: String,
        betting_ends_at: u64,
    },
    BetPlaced {
        round_id: RoundId,
        bet_id: BetId,
        wallet: WalletAddress,
        bet_amount: Amount,
    },
    CountdownStarted {
        round_id: RoundId,
        flying_at: u64,
    },
    Flying {
        round_id: RoundId,
        started_at: u64,
    },
    Tick {
        round_id: RoundId,
        multiplier: Multiplier,
        elapsed_ms: u64,
    },
    CashedOut {
        round_id: RoundId,
        bet_id: BetId,
        wallet: WalletAddress,
        multiplier: Multiplier,
        winnings: Amount,
        trigger: CashoutTrigger,
    },
    Crashed {
        round_id: RoundId,
        crash_point: Multiplier,
        server_seed: String,
        bets_lost: usize,
    },
    PayoutProcessed {
        round_id: RoundId,
        total_payouts: Amount,
        winning_bets: usize,
    },
    PayoutsHalted {
        round_id: RoundId,
        reason: String,
    },
    GamePaused {
        reason: String,
    },
    GameResumed,
}

impl RoundEvent {
    pub fn round_id(&self) -> Option<RoundId> {
        match self {
            RoundEvent::RoundStarted { round_id, .. }
            | RoundEvent::BetPlaced { round_id, .. }
            | RoundEvent::CountdownStarted { round_id, .. }
            | RoundEvent::Flying { round_id, .. }
            | RoundEvent::Tick { round_id, .. }
            | RoundEvent::CashedOut { round_id, .. }
            | RoundEvent::Crashed { round_id, .. }
            | RoundEvent::PayoutProcessed { round_id, .. }
            | RoundEvent::PayoutsHalted { round_id, .. } => Some(*round_id),
            RoundEvent::GamePaused { .. } | RoundEvent::GameResumed => None,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoundEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self { sender }
    }

    pub fn publish(&self, event: RoundEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.sender.subscribe()
    }

    /// Events for one round plus game-wide notices; every event when
    /// `round_id` is `None`.
    pub fn subscribe_round(&self, round_id: Option<RoundId>) -> RoundSubscription {
        RoundSubscription {
            round_id,
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct RoundSubscription {
    round_id: Option<RoundId>,
    receiver: broadcast::Receiver<RoundEvent>,
}

impl RoundSubscription {
    fn wants(&self, event: &RoundEvent) -> bool {
        match (self.round_id, event.round_id()) {
            (Some(wanted), Some(id)) => wanted == id,
            _ => true,
        }
    }

    /// Next matching event; `None` once the bus is gone. Lagged events are
    /// skipped.
    pub async fn recv(&mut self) -> Option<RoundEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(round_id = ?self.round_id, skipped, "Round subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_round_subscription_filters() {
        let bus = EventBus::new(64);
        let ours = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let mut sub = bus.subscribe_round(Some(ours));
        let mut all = bus.subscribe_round(None);

        bus.publish(RoundEvent::Flying { round_id: theirs, started_at: 1 });
        bus.publish(RoundEvent::GamePaused { reason: "maintenance".into() });
        bus.publish(RoundEvent::Flying { round_id: ours, started_at: 2 });

        assert_eq!(sub.recv().await, Some(RoundEvent::GamePaused { reason: "maintenance".into() }));
        assert_eq!(sub.recv().await, Some(RoundEvent::Flying { round_id: ours, started_at: 2 }));
        assert_eq!(all.recv().await, Some(RoundEvent::Flying { round_id: theirs, started_at: 1 }));
    }

    #[test]
    fn test_event_json_tag() {
        let json = serde_json::to_value(RoundEvent::GameResumed).unwrap();
        assert_eq!(json["type"], "game_resumed");
    }
}
