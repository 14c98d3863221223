//! Prepaid admission tickets.
//!
//! A ticket is issued once per confirmed payment reference and consumed by
//! exactly one bet. Payments that were not observed as confirmed at purchase
//! time are parked as pending and retried by [`PurchaseRecovery`].

use crate::{
    clock::Clock,
    config::TicketConfig,
    errors::{EngineError, EngineResult, ValidationError},
    metrics::EngineMetrics,
    shutdown::StopToken,
    store::Ledger,
    types::{Amount, PendingPurchase, Ticket, TicketId, TicketState, WalletAddress},
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub wallet: WalletAddress,
    pub ticket_value: Amount,
    pub payment_currency: String,
    pub payment_amount: Amount,
    /// Transaction reference proving payment; the idempotency key.
    pub payment_ref: String,
}

/// Ticket plus its state at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub state: TicketState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentStatus {
    Confirmed,
    Pending,
    Failed { reason: String },
}

/// Looks up whether a payment reference has confirmed on chain.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn confirm(&self, payment_ref: &str) -> EngineResult<PaymentStatus>;
}

/// Verifier answering from a table, with a fallback for unknown references.
pub struct StaticPaymentVerifier {
    statuses: DashMap<String, PaymentStatus>,
    fallback: PaymentStatus,
}

impl StaticPaymentVerifier {
    pub fn new(fallback: PaymentStatus) -> Self {
        Self {
            statuses: DashMap::new(),
            fallback,
        }
    }

    pub fn set(&self, payment_ref: &str, status: PaymentStatus) {
        self.statuses.insert(payment_ref.to_string(), status);
    }
}

#[async_trait]
impl PaymentVerifier for StaticPaymentVerifier {
    async fn confirm(&self, payment_ref: &str) -> EngineResult<PaymentStatus> {
        Ok(self
            .statuses
            .get(payment_ref)
            .map(|s| s.clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

pub struct TicketAdmission {
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    metrics: Arc<EngineMetrics>,
    config: TicketConfig,
}

impl TicketAdmission {
    pub fn new(
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        metrics: Arc<EngineMetrics>,
        config: TicketConfig,
    ) -> Self {
        Self {
            ledger,
            clock,
            metrics,
            config,
        }
    }

    fn validate_request(&self, request: &PurchaseRequest) -> Result<(), ValidationError> {
        if request.wallet.is_empty() {
            return Err(ValidationError::InvalidWallet);
        }
        if request.payment_ref.trim().is_empty() {
            return Err(ValidationError::InvalidPayment("missing payment reference".into()));
        }
        if request.payment_amount == 0 {
            return Err(ValidationError::InvalidPayment("payment amount must be positive".into()));
        }
        if request.ticket_value == 0
            || (!self.config.denominations.is_empty()
                && !self.config.denominations.contains(&request.ticket_value))
        {
            return Err(ValidationError::InvalidPayment(format!(
                "unsupported ticket value {}",
                request.ticket_value
            )));
        }
        Ok(())
    }

    /// Issue the ticket for a confirmed payment. Replaying the same
    /// `payment_ref` returns the ticket issued the first time.
    pub fn purchase(&self, request: &PurchaseRequest) -> EngineResult<Ticket> {
        self.validate_request(request)?;

        let now = self.clock.now_ms();
        let ttl_ms = self.config.ttl_secs.saturating_mul(1000);
        let (ticket, created) = self.ledger.insert_ticket_once(&request.payment_ref, || {
            Ok(Ticket {
                id: Uuid::new_v4(),
                owner: request.wallet.clone(),
                ticket_value: request.ticket_value,
                payment_currency: request.payment_currency.clone(),
                payment_amount: request.payment_amount,
                payment_ref: request.payment_ref.clone(),
                purchased_at: now,
                expires_at: now.saturating_add(ttl_ms),
                consumed_at: None,
            })
        })?;

        if ticket.owner != request.wallet {
            return Err(ValidationError::InvalidPayment(
                "payment reference already redeemed by another wallet".into(),
            )
            .into());
        }

        if created {
            EngineMetrics::incr(&self.metrics.tickets_purchased);
            info!(
                ticket_id = %ticket.id,
                wallet = %ticket.owner,
                value = ticket.ticket_value,
                payment_ref = %ticket.payment_ref,
                "Ticket issued"
            );
        } else {
            debug!(ticket_id = %ticket.id, payment_ref = %ticket.payment_ref, "Purchase replayed");
        }
        Ok(ticket)
    }

    /// The consumability rule shared by [`consume`](Self::consume) and bet
    /// placement.
    pub fn check_consumable(ticket: &Ticket, wallet: &WalletAddress, now_ms: u64) -> Result<(), ValidationError> {
        if &ticket.owner != wallet {
            return Err(ValidationError::TicketNotOwned(ticket.id));
        }
        match ticket.state(now_ms) {
            TicketState::Available => Ok(()),
            TicketState::Consumed => Err(ValidationError::TicketAlreadyConsumed(ticket.id)),
            TicketState::Expired => Err(ValidationError::TicketExpired(ticket.id)),
        }
    }

    /// Atomically mark a ticket consumed. Of any number of concurrent calls
    /// for the same ticket, at most one succeeds.
    pub fn consume(&self, ticket_id: TicketId, wallet: &WalletAddress) -> EngineResult<Ticket> {
        let now = self.clock.now_ms();
        let ticket = self.ledger.update_ticket(ticket_id, |ticket| {
            Self::check_consumable(ticket, wallet, now)?;
            ticket.consumed_at = Some(now);
            Ok(())
        })?;
        EngineMetrics::incr(&self.metrics.tickets_consumed);
        Ok(ticket)
    }

    pub fn ticket(&self, ticket_id: &TicketId) -> Option<TicketView> {
        let now = self.clock.now_ms();
        self.ledger.ticket(ticket_id).map(|ticket| TicketView {
            state: ticket.state(now),
            ticket,
        })
    }

    pub fn tickets_for_wallet(&self, wallet: &WalletAddress) -> Vec<TicketView> {
        let now = self.clock.now_ms();
        self.ledger
            .tickets_for_wallet(wallet)
            .into_iter()
            .map(|ticket| TicketView {
                state: ticket.state(now),
                ticket,
            })
            .collect()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// Where a purchase stands from the wallet's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseState {
    Issued { ticket: Ticket },
    Pending { pending: PendingPurchase },
    Abandoned { pending: PendingPurchase },
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub issued: usize,
    pub still_pending: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Background reconciliation of purchases whose payment was not yet
/// confirmed when first submitted.
pub struct PurchaseRecovery {
    admission: Arc<TicketAdmission>,
    verifier: Arc<dyn PaymentVerifier>,
    ledger: Arc<Ledger>,
    poll_interval: Duration,
    ttl_ms: u64,
}

impl PurchaseRecovery {
    pub fn new(
        admission: Arc<TicketAdmission>,
        verifier: Arc<dyn PaymentVerifier>,
        ledger: Arc<Ledger>,
        config: &TicketConfig,
    ) -> Self {
        Self {
            admission,
            verifier,
            ledger,
            poll_interval: Duration::from_secs(config.recovery_poll_interval_secs.max(1)),
            ttl_ms: config.recovery_ttl_secs.saturating_mul(1000),
        }
    }

    /// Entry point for a purchase: issue immediately when the payment is
    /// confirmed, otherwise park it and report a pending dependency.
    pub async fn submit(&self, request: PurchaseRequest) -> EngineResult<Ticket> {
        if let Some(existing) = self.ledger.ticket_for_payment(&request.payment_ref) {
            if existing.owner == request.wallet {
                return Ok(existing);
            }
        }
        self.admission.validate_request(&request)?;

        match self.verifier.confirm(&request.payment_ref).await {
            Ok(PaymentStatus::Confirmed) => self.admission.purchase(&request),
            Ok(PaymentStatus::Failed { reason }) => Err(ValidationError::InvalidPayment(reason).into()),
            Ok(PaymentStatus::Pending) => {
                self.park(&request, None)?;
                Err(EngineError::ExternalDependency(format!(
                    "payment {} not yet confirmed",
                    request.payment_ref
                )))
            }
            Err(e) => {
                self.park(&request, Some(e.to_string()))?;
                Err(EngineError::ExternalDependency(e.to_string()))
            }
        }
    }

    fn park(&self, request: &PurchaseRequest, error: Option<String>) -> EngineResult<()> {
        if self.ledger.pending_purchases().iter().any(|p| p.payment_ref == request.payment_ref) {
            return Ok(());
        }
        info!(payment_ref = %request.payment_ref, wallet = %request.wallet, "Purchase parked for recovery");
        self.ledger.upsert_pending_purchase(PendingPurchase {
            payment_ref: request.payment_ref.clone(),
            wallet: request.wallet.clone(),
            ticket_value: request.ticket_value,
            payment_currency: request.payment_currency.clone(),
            payment_amount: request.payment_amount,
            created_at: self.admission.now_ms(),
            attempts: 0,
            last_error: error,
            abandoned_at: None,
        })
    }

    pub fn state(&self, payment_ref: &str) -> PurchaseState {
        if let Some(ticket) = self.ledger.ticket_for_payment(payment_ref) {
            return PurchaseState::Issued { ticket };
        }
        match self
            .ledger
            .pending_purchases()
            .into_iter()
            .find(|p| p.payment_ref == payment_ref)
        {
            Some(pending) if pending.abandoned_at.is_some() => PurchaseState::Abandoned { pending },
            Some(pending) => PurchaseState::Pending { pending },
            None => PurchaseState::Unknown,
        }
    }

    /// One pass over every live pending purchase.
    pub async fn poll_once(&self) -> EngineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = self.admission.now_ms();

        for mut pending in self.ledger.pending_purchases() {
            if pending.abandoned_at.is_some() {
                continue;
            }
            if self.ledger.ticket_for_payment(&pending.payment_ref).is_some() {
                self.ledger.remove_pending_purchase(&pending.payment_ref)?;
                continue;
            }
            if now.saturating_sub(pending.created_at) > self.ttl_ms {
                warn!(
                    payment_ref = %pending.payment_ref,
                    wallet = %pending.wallet,
                    attempts = pending.attempts,
                    "Pending purchase abandoned after TTL"
                );
                pending.abandoned_at = Some(now);
                self.ledger.upsert_pending_purchase(pending)?;
                EngineMetrics::incr(&self.admission.metrics.purchases_abandoned);
                report.abandoned += 1;
                continue;
            }

            let request = PurchaseRequest {
                wallet: pending.wallet.clone(),
                ticket_value: pending.ticket_value,
                payment_currency: pending.payment_currency.clone(),
                payment_amount: pending.payment_amount,
                payment_ref: pending.payment_ref.clone(),
            };

            match self.verifier.confirm(&pending.payment_ref).await {
                Ok(PaymentStatus::Confirmed) => match self.admission.purchase(&request) {
                    Ok(_) => {
                        self.ledger.remove_pending_purchase(&pending.payment_ref)?;
                        report.issued += 1;
                    }
                    Err(e) => {
                        warn!(payment_ref = %pending.payment_ref, error = %e, "Confirmed purchase could not be issued");
                        pending.attempts += 1;
                        pending.last_error = Some(e.to_string());
                        if matches!(e, EngineError::Validation(_)) {
                            pending.abandoned_at = Some(now);
                        }
                        self.ledger.upsert_pending_purchase(pending)?;
                        report.failed += 1;
                    }
                },
                Ok(PaymentStatus::Failed { reason }) => {
                    warn!(payment_ref = %pending.payment_ref, %reason, "Pending purchase failed");
                    pending.last_error = Some(reason);
                    pending.abandoned_at = Some(now);
                    self.ledger.upsert_pending_purchase(pending)?;
                    report.failed += 1;
                }
                Ok(PaymentStatus::Pending) => {
                    pending.attempts += 1;
                    self.ledger.upsert_pending_purchase(pending)?;
                    report.still_pending += 1;
                }
                Err(e) => {
                    debug!(payment_ref = %pending.payment_ref, error = %e, "Payment lookup failed");
                    pending.attempts += 1;
                    pending.last_error = Some(e.to_string());
                    self.ledger.upsert_pending_purchase(pending)?;
                    report.still_pending += 1;
                }
            }
        }
        Ok(report)
    }

    /// Poll until stopped. A stop is only observed between passes.
    pub async fn run(self: Arc<Self>, mut stop: StopToken) {
        info!(interval = ?self.poll_interval, "Purchase recovery started");
        loop {
            match self.poll_once().await {
                Ok(report) if report != RecoveryReport::default() => {
                    info!(
                        issued = report.issued,
                        pending = report.still_pending,
                        failed = report.failed,
                        abandoned = report.abandoned,
                        "Purchase recovery pass"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Purchase recovery pass failed"),
            }
            if !stop.sleep(self.poll_interval).await {
                break;
            }
        }
        info!("Purchase recovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::UNITS_PER_TOKEN;

    fn setup() -> (Arc<Ledger>, ManualClock, Arc<TicketAdmission>) {
        let ledger = Arc::new(Ledger::in_memory());
        let clock = ManualClock::new(1_000);
        let admission = Arc::new(TicketAdmission::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            Arc::new(EngineMetrics::new()),
            TicketConfig::default(),
        ));
        (ledger, clock, admission)
    }

    fn request(wallet: &str, payment_ref: &str) -> PurchaseRequest {
        PurchaseRequest {
            wallet: WalletAddress::new(wallet),
            ticket_value: 5 * UNITS_PER_TOKEN,
            payment_currency: "WOVER".to_string(),
            payment_amount: 5 * UNITS_PER_TOKEN,
            payment_ref: payment_ref.to_string(),
        }
    }

    #[test]
    fn test_purchase_is_idempotent() {
        let (_, _, admission) = setup();
        let first = admission.purchase(&request("0xA1", "0xpay1")).unwrap();
        let again = admission.purchase(&request("0xa1", "0xpay1")).unwrap();
        assert_eq!(first, again);
        assert_eq!(admission.tickets_for_wallet(&WalletAddress::new("0xa1")).len(), 1);

        let stolen = admission.purchase(&request("0xb2", "0xpay1"));
        assert!(matches!(stolen, Err(EngineError::Validation(ValidationError::InvalidPayment(_)))));
    }

    #[test]
    fn test_purchase_rejects_unknown_denomination() {
        let (_, _, admission) = setup();
        let mut odd = request("0xa1", "0xpay2");
        odd.ticket_value = 7;
        assert!(admission.purchase(&odd).is_err());
    }

    #[test]
    fn test_consume_typed_errors() {
        let (_, clock, admission) = setup();
        let owner = WalletAddress::new("0xa1");
        let ticket = admission.purchase(&request("0xa1", "0xpay3")).unwrap();

        let not_owner = admission.consume(ticket.id, &WalletAddress::new("0xb2")).unwrap_err();
        assert!(matches!(not_owner, EngineError::Validation(ValidationError::TicketNotOwned(_))));

        admission.consume(ticket.id, &owner).unwrap();
        let again = admission.consume(ticket.id, &owner).unwrap_err();
        assert!(matches!(again, EngineError::Validation(ValidationError::TicketAlreadyConsumed(_))));

        let expiring = admission.purchase(&request("0xa1", "0xpay4")).unwrap();
        clock.set(expiring.expires_at);
        let expired = admission.consume(expiring.id, &owner).unwrap_err();
        assert!(matches!(expired, EngineError::Validation(ValidationError::TicketExpired(_))));
        assert_eq!(admission.ticket(&expiring.id).unwrap().state, TicketState::Expired);
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        let (_, _, admission) = setup();
        let owner = WalletAddress::new("0xa1");
        let ticket = admission.purchase(&request("0xa1", "0xpay5")).unwrap();

        let successes = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| admission.consume(ticket.id, &owner).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(successes, 1);
        assert!(admission.ticket(&ticket.id).unwrap().ticket.consumed_at.is_some());
    }

    #[tokio::test]
    async fn test_recovery_issues_after_confirmation() {
        let (ledger, _, admission) = setup();
        let verifier = Arc::new(StaticPaymentVerifier::new(PaymentStatus::Pending));
        let recovery = PurchaseRecovery::new(admission, verifier.clone(), ledger, &TicketConfig::default());

        let pending = recovery.submit(request("0xa1", "0xslow")).await.unwrap_err();
        assert_eq!(pending.class(), crate::errors::ErrorClass::Pending);
        assert!(matches!(recovery.state("0xslow"), PurchaseState::Pending { .. }));

        let report = recovery.poll_once().await.unwrap();
        assert_eq!(report.still_pending, 1);

        verifier.set("0xslow", PaymentStatus::Confirmed);
        let report = recovery.poll_once().await.unwrap();
        assert_eq!(report.issued, 1);
        let PurchaseState::Issued { ticket } = recovery.state("0xslow") else {
            panic!("expected an issued ticket");
        };

        // A late client retry must not mint a second ticket.
        let retried = recovery.submit(request("0xa1", "0xslow")).await.unwrap();
        assert_eq!(retried.id, ticket.id);
    }

    #[tokio::test]
    async fn test_recovery_failure_does_not_block_other_purchases() {
        let ledger = Arc::new(Ledger::in_memory());
        let clock = ManualClock::new(1_000);
        let mut config = TicketConfig::default();
        config.denominations = vec![5 * UNITS_PER_TOKEN, 10 * UNITS_PER_TOKEN];
        let parked_under = Arc::new(TicketAdmission::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            Arc::new(EngineMetrics::new()),
            config.clone(),
        ));
        let verifier = Arc::new(StaticPaymentVerifier::new(PaymentStatus::Pending));
        let parking = PurchaseRecovery::new(parked_under, verifier.clone(), ledger.clone(), &config);

        let mut retired = request("0xa1", "0xretired");
        retired.ticket_value = 10 * UNITS_PER_TOKEN;
        retired.payment_amount = 10 * UNITS_PER_TOKEN;
        let _ = parking.submit(retired).await;
        let _ = parking.submit(request("0xb2", "0xfine")).await;

        // The 10-token denomination is withdrawn while both are parked
        config.denominations = vec![5 * UNITS_PER_TOKEN];
        let admission = Arc::new(TicketAdmission::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            Arc::new(EngineMetrics::new()),
            config.clone(),
        ));
        let recovery = PurchaseRecovery::new(admission, verifier.clone(), ledger, &config);
        verifier.set("0xretired", PaymentStatus::Confirmed);
        verifier.set("0xfine", PaymentStatus::Confirmed);

        let report = recovery.poll_once().await.unwrap();
        assert_eq!(report.issued, 1);
        assert_eq!(report.failed, 1);
        assert!(matches!(recovery.state("0xfine"), PurchaseState::Issued { .. }));
        let PurchaseState::Abandoned { pending } = recovery.state("0xretired") else {
            panic!("expected the retired denomination to be abandoned");
        };
        assert!(pending.last_error.is_some());
    }

    #[tokio::test]
    async fn test_recovery_abandons_after_ttl() {
        let (ledger, clock, admission) = setup();
        let verifier = Arc::new(StaticPaymentVerifier::new(PaymentStatus::Pending));
        let config = TicketConfig::default();
        let recovery = PurchaseRecovery::new(admission, verifier, ledger, &config);

        let _ = recovery.submit(request("0xa1", "0xlost")).await;
        clock.advance(Duration::from_secs(config.recovery_ttl_secs + 1));

        let report = recovery.poll_once().await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(matches!(recovery.state("0xlost"), PurchaseState::Abandoned { .. }));
        assert_eq!(recovery.poll_once().await.unwrap(), RecoveryReport::default());
    }
}
