//! Service wiring
//!
//! Builds every engine component from an `EngineConfig` and hands out shared
//! handles. Tests swap in a manual clock, a scripted payment verifier or a
//! specific prize-pool contract through the builder.

use crate::{
    bets::BetLedger,
    clock::{Clock, SystemClock},
    config::{EngineConfig, GameControl},
    errors::{EngineError, EngineResult, StorageError},
    events::EventBus,
    fairness::FairnessEngine,
    metrics::EngineMetrics,
    scheduler::RoundScheduler,
    settlement::{ChainMirror, ClaimSigner, InMemoryPrizePool, PrizePoolContract, SettlementReconciler},
    storage::OptimizedStorage,
    store::Ledger,
    tickets::{PaymentStatus, PaymentVerifier, PurchaseRecovery, StaticPaymentVerifier, TicketAdmission},
};
use std::sync::Arc;
use tracing::{info, warn};

/// Every engine component, shared
pub struct ServiceContainer {
    config: EngineConfig,
    pub ledger: Arc<Ledger>,
    pub clock: Arc<dyn Clock>,
    pub control: Arc<GameControl>,
    pub events: EventBus,
    pub metrics: Arc<EngineMetrics>,
    pub tickets: Arc<TicketAdmission>,
    pub recovery: Arc<PurchaseRecovery>,
    pub bets: Arc<BetLedger>,
    pub reconciler: Arc<SettlementReconciler>,
    pub scheduler: Arc<RoundScheduler>,
}

impl ServiceContainer {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Builder for a configured service container
pub struct ServiceBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    storage: Option<Arc<OptimizedStorage>>,
    verifier: Option<Arc<dyn PaymentVerifier>>,
    contract: Option<Arc<dyn PrizePoolContract>>,
    signer: Option<ClaimSigner>,
}

impl ServiceBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            storage: None,
            verifier: None,
            contract: None,
            signer: None,
        }
    }

    /// Override the time source (useful for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an already-open database instead of `storage.data_directory`
    pub fn with_storage(mut self, storage: Arc<OptimizedStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_payment_verifier(mut self, verifier: Arc<dyn PaymentVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_contract(mut self, contract: Arc<dyn PrizePoolContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn with_signer(mut self, signer: ClaimSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    fn open_ledger(&self) -> EngineResult<Ledger> {
        if let Some(storage) = &self.storage {
            return Ledger::open(storage.clone());
        }
        if self.config.storage.in_memory {
            return Ok(Ledger::in_memory());
        }
        let storage = OptimizedStorage::new_with_config(&self.config.storage).map_err(|e| {
            EngineError::Storage(StorageError::DatabaseOpenFailed(format!(
                "{}: {}",
                self.config.storage.data_directory, e
            )))
        })?;
        info!(path = %self.config.storage.data_directory, "Storage opened");
        Ledger::open(Arc::new(storage))
    }

    /// Build the container. Chain mirroring spawns a task, so a Tokio runtime
    /// must be running when `settlement.mirror_rounds` is set.
    pub fn build(self) -> EngineResult<ServiceContainer> {
        self.config.validate()?;

        let ledger = Arc::new(self.open_ledger()?);
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = Arc::new(EngineMetrics::new());
        let control = Arc::new(GameControl::new(config.game.clone()));
        let events = EventBus::new(config.scheduler.event_buffer);
        let fairness = FairnessEngine::new(&config.fairness);

        let signer = match (self.signer, &config.settlement.claim_signing_key) {
            (Some(signer), _) => signer,
            (None, Some(secret)) => ClaimSigner::from_hex(secret)?,
            (None, None) => {
                warn!("No claim signing key configured; using an ephemeral key");
                ClaimSigner::generate()
            }
        };
        let contract: Arc<dyn PrizePoolContract> = match self.contract {
            Some(contract) => contract,
            None => {
                info!(signer = %signer.signer_hex(), "Using in-process prize pool");
                Arc::new(InMemoryPrizePool::new(signer.verifying_key()))
            }
        };

        let tickets = Arc::new(TicketAdmission::new(
            ledger.clone(),
            clock.clone(),
            metrics.clone(),
            config.tickets.clone(),
        ));
        let verifier = self.verifier.unwrap_or_else(|| {
            warn!("No payment verifier attached; purchases stay pending until one confirms them");
            Arc::new(StaticPaymentVerifier::new(PaymentStatus::Pending))
        });
        let recovery = Arc::new(PurchaseRecovery::new(
            tickets.clone(),
            verifier,
            ledger.clone(),
            &config.tickets,
        ));

        let bets = Arc::new(BetLedger::new(
            ledger.clone(),
            clock.clone(),
            control.clone(),
            events.clone(),
            metrics.clone(),
            fairness.curve(),
            config.scheduler.cashout_tolerance,
        ));
        let reconciler = Arc::new(SettlementReconciler::new(
            ledger.clone(),
            clock.clone(),
            metrics.clone(),
            Some(signer),
            Some(contract.clone()),
        ));

        let mut scheduler = RoundScheduler::new(
            ledger.clone(),
            clock.clone(),
            control.clone(),
            fairness,
            bets.clone(),
            reconciler.clone(),
            events.clone(),
            metrics.clone(),
            config.scheduler.clone(),
        );
        if config.settlement.mirror_rounds {
            let (mirror, _task) = ChainMirror::spawn(contract, metrics.clone());
            scheduler = scheduler.with_mirror(mirror);
        }

        Ok(ServiceContainer {
            config,
            ledger,
            clock,
            control,
            events,
            metrics,
            tickets,
            recovery,
            bets,
            reconciler,
            scheduler: Arc::new(scheduler),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_in_memory() {
        let services = ServiceBuilder::new(EngineConfig::testing()).build().unwrap();
        assert!(services.scheduler.get_status().game_active);
        assert!(services.reconciler.signer_hex().is_some());
        assert!(services.config().storage.in_memory);
    }

    #[tokio::test]
    async fn test_unverified_payment_is_not_issued() {
        let services = ServiceBuilder::new(EngineConfig::testing()).build().unwrap();
        let request = crate::tickets::PurchaseRequest {
            wallet: crate::types::WalletAddress::new("0xa1"),
            ticket_value: crate::types::UNITS_PER_TOKEN,
            payment_currency: "WOVER".into(),
            payment_amount: crate::types::UNITS_PER_TOKEN,
            payment_ref: "never-paid".into(),
        };
        let err = services.recovery.submit(request).await.unwrap_err();
        assert_eq!(err.class(), crate::errors::ErrorClass::Pending);
        assert!(services.ledger.ticket_for_payment("never-paid").is_none());
    }

    #[test]
    fn test_build_rejects_bad_signing_key() {
        let mut config = EngineConfig::testing();
        config.settlement.claim_signing_key = Some("not-a-key".to_string());
        assert!(ServiceBuilder::new(config).build().is_err());
    }
}
