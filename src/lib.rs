//! Crash - multiplayer crash game round engine
//!
//! Runs the round life cycle (betting, countdown, flying, crash, payout),
//! derives provably fair crash points by commit/reveal, admits bets against
//! prepaid tickets and reconciles winnings with an on-chain prize pool.

pub mod api;
pub mod bets;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod fairness;
pub mod metrics;
pub mod scheduler;
pub mod services;
pub mod settlement;
pub mod shutdown;
pub mod storage;
pub mod store;
pub mod tickets;
pub mod types;

pub use bets::BetLedger;
pub use config::{EngineConfig, GameConfig};
pub use errors::{EngineError, EngineResult};
pub use fairness::FairnessEngine;
pub use scheduler::RoundScheduler;
pub use services::{ServiceBuilder, ServiceContainer};
pub use settlement::SettlementReconciler;
pub use tickets::TicketAdmission;
pub use types::{Bet, BetStatus, Multiplier, Round, RoundStatus, Ticket, WalletAddress};
