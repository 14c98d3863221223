//! Error types for the crash round engine
//!
//! Errors are grouped by how they surface to a caller: validation and
//! concurrency errors are immediate, dependency errors are pending, fairness
//! violations and pauses are blocking states.

use crate::types::{BetId, BetStatus, Multiplier, RoundId, RoundStatus, TicketId};

/// Root error type for all engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("External dependency error: {0}")]
    ExternalDependency(String),

    #[error("Fairness violation: {0}")]
    FairnessViolation(#[from] FairnessError),

    #[error("Game paused: {reason}")]
    OperationalPause { reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Rejected synchronously, never retried
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Bet amount {amount} outside allowed range [{min}, {max}]")]
    BetAmountOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("Ticket {0} already consumed")]
    TicketAlreadyConsumed(TicketId),

    #[error("Ticket {0} expired")]
    TicketExpired(TicketId),

    #[error("Ticket {0} is not owned by this wallet")]
    TicketNotOwned(TicketId),

    #[error("Round {round_id} is {actual}, expected {expected}")]
    WrongRoundPhase {
        round_id: RoundId,
        expected: RoundStatus,
        actual: RoundStatus,
    },

    #[error("Bet {0} belongs to another wallet")]
    BetNotOwned(BetId),

    #[error("Wallet already has a bet in round {0}")]
    DuplicateBet(RoundId),

    #[error("Invalid auto cash-out {0}; must be above 1.00x and within the round maximum")]
    InvalidAutoCashout(Multiplier),

    #[error("Multiplier {requested} has not been reached (server at {current})")]
    MultiplierNotReached {
        requested: Multiplier,
        current: Multiplier,
    },

    #[error("Invalid multiplier {0}")]
    InvalidMultiplier(Multiplier),

    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    #[error("Invalid wallet address")]
    InvalidWallet,

    #[error("Invalid server seed: {0}")]
    InvalidSeed(String),

    #[error("Nothing to claim for this wallet in round {0}")]
    NothingToClaim(RoundId),
}

/// Lost a compare-and-swap; reported as "too late", never retried
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConflictError {
    #[error("A round is already open: {0}")]
    RoundAlreadyOpen(RoundId),

    #[error("Round {round_id} transition to {requested} rejected; round is {actual}")]
    InvalidTransition {
        round_id: RoundId,
        requested: RoundStatus,
        actual: RoundStatus,
    },

    #[error("Too late: bet {bet_id} already {status}")]
    BetAlreadySettled { bet_id: BetId, status: BetStatus },

    #[error("Too late: cash-out at {requested} is not below the crash point")]
    TooLate { requested: Multiplier },

    #[error("Claim voucher already issued for round {0}")]
    VoucherAlreadyIssued(RoundId),
}

/// Commit/reveal mismatch; halts the round's payouts
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FairnessError {
    #[error("Revealed seed for round {round_id} does not match committed hash")]
    SeedHashMismatch { round_id: RoundId },

    #[error("Recomputed crash point {recomputed} differs from recorded {recorded} for round {round_id}")]
    CrashPointMismatch {
        round_id: RoundId,
        recorded: Multiplier,
        recomputed: Multiplier,
    },

    #[error("Sealed seed missing for round {0}")]
    MissingSeed(RoundId),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// How an error is surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Immediate rejection with a specific reason
    Validation,
    /// Immediate "too late"
    Conflict,
    /// Resolved in the background
    Pending,
    /// Banner state: paused or fairness alarm
    Blocking,
    Internal,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_) | EngineError::NotFound(_) => ErrorClass::Validation,
            EngineError::Conflict(_) => ErrorClass::Conflict,
            EngineError::ExternalDependency(_) => ErrorClass::Pending,
            EngineError::FairnessViolation(_) | EngineError::OperationalPause { .. } => {
                ErrorClass::Blocking
            }
            EngineError::Storage(_) | EngineError::Configuration(_) => ErrorClass::Internal,
        }
    }

    pub fn paused(reason: impl Into<String>) -> Self {
        EngineError::OperationalPause {
            reason: reason.into(),
        }
    }

    pub fn round_not_found(round_id: RoundId) -> Self {
        EngineError::NotFound(format!("round {}", round_id))
    }

    pub fn bet_not_found(bet_id: BetId) -> Self {
        EngineError::NotFound(format!("bet {}", bet_id))
    }

    pub fn ticket_not_found(ticket_id: TicketId) -> Self {
        EngineError::NotFound(format!("ticket {}", ticket_id))
    }
}

// External error conversions
impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use uuid::Uuid;

    #[test]
    fn test_error_display() {
        let error: EngineError = ValidationError::DuplicateBet(Uuid::nil()).into();
        assert!(error.to_string().contains("Validation error"));
        assert!(error.to_string().contains("already has a bet"));
    }

    #[test]
    fn test_error_classes() {
        let conflict: EngineError = ConflictError::TooLate {
            requested: Multiplier::from_hundredths(410),
        }
        .into();
        assert_eq!(conflict.class(), ErrorClass::Conflict);
        assert!(conflict.to_string().contains("4.10x"));

        let fairness: EngineError = FairnessError::MissingSeed(Uuid::nil()).into();
        assert_eq!(fairness.class(), ErrorClass::Blocking);
        assert_eq!(EngineError::paused("maintenance").class(), ErrorClass::Blocking);
        assert_eq!(
            EngineError::ExternalDependency("rpc".into()).class(),
            ErrorClass::Pending
        );
    }

    #[test]
    fn test_error_source() {
        let error: EngineError = StorageError::ReadFailed("disk".into()).into();
        assert!(error.source().is_some());
    }
}
