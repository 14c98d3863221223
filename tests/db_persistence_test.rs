//! Engine state survives a restart on the same RocksDB directory, and the
//! open round is brought to a consistent phase on recovery.

use crash_engine::{
    clock::ManualClock,
    config::EngineConfig,
    services::ServiceBuilder,
    storage::OptimizedStorage,
    tickets::PurchaseRequest,
    types::{BetStatus, Multiplier, RoundStatus, WalletAddress, UNITS_PER_TOKEN},
};
use std::sync::Arc;
use std::time::Duration;

fn config() -> EngineConfig {
    let mut config = EngineConfig::testing();
    config.fairness.growth_rate = 1.0;
    config.storage.in_memory = false;
    config
}

#[test]
fn test_restart_recovers_flying_round() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(5_000_000);
    let wallet = WalletAddress::new("0xfeed");

    // === PHASE 1: open a round, bet, take off and "crash" the process ===
    let (round_id, bet_id, ticket_id, seed_hash) = {
        let storage = Arc::new(OptimizedStorage::new(dir.path()).unwrap());
        let services = ServiceBuilder::new(config())
            .with_storage(storage)
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        let round = services.scheduler.start_round().unwrap();
        let ticket = services
            .tickets
            .purchase(&PurchaseRequest {
                wallet: wallet.clone(),
                ticket_value: 10 * UNITS_PER_TOKEN,
                payment_currency: "WOVER".into(),
                payment_amount: 10 * UNITS_PER_TOKEN,
                payment_ref: "0xrestart".into(),
            })
            .unwrap();
        let bet = services.bets.place_bet(round.id, &wallet, ticket.id, None).unwrap();
        services.scheduler.start_countdown(round.id).unwrap();
        services.scheduler.start_flying(round.id).unwrap();
        (round.id, bet.id, ticket.id, round.server_seed_hash)
    };

    // Long enough for any crash point up to the 1000x cap at r = 1.0
    clock.advance(Duration::from_secs(10));

    // === PHASE 2: reopen and recover ===
    let storage = Arc::new(OptimizedStorage::new(dir.path()).unwrap());
    let services = ServiceBuilder::new(config())
        .with_storage(storage)
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    let ticket = services.tickets.ticket(&ticket_id).unwrap();
    assert!(ticket.ticket.consumed_at.is_some());
    assert_eq!(services.ledger.last_round_number(), 1);

    assert!(services.scheduler.recover().unwrap().is_none());
    let round = services.scheduler.round(&round_id).unwrap();
    assert_eq!(round.status, RoundStatus::Payout);
    assert_eq!(round.server_seed_hash, seed_hash);
    assert!(round.crash_point.unwrap() >= Multiplier::ONE);
    assert_eq!(round.total_wagered, 10 * UNITS_PER_TOKEN);

    let bet = services.bets.bet(&bet_id).unwrap();
    assert_eq!(bet.status, BetStatus::Lost);

    // Round numbers keep counting after the restart
    let next = services.scheduler.start_round().unwrap();
    assert_eq!(next.round_number, 2);
}

#[test]
fn test_restart_keeps_purchase_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let request = PurchaseRequest {
        wallet: WalletAddress::new("0xbeef"),
        ticket_value: UNITS_PER_TOKEN,
        payment_currency: "WOVER".into(),
        payment_amount: UNITS_PER_TOKEN,
        payment_ref: "0xsame-payment".into(),
    };

    let first = {
        let storage = Arc::new(OptimizedStorage::new(dir.path()).unwrap());
        let services = ServiceBuilder::new(config()).with_storage(storage).build().unwrap();
        services.tickets.purchase(&request).unwrap()
    };

    let storage = Arc::new(OptimizedStorage::new(dir.path()).unwrap());
    let services = ServiceBuilder::new(config()).with_storage(storage).build().unwrap();
    let second = services.tickets.purchase(&request).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(services.tickets.tickets_for_wallet(&request.wallet).len(), 1);
}
