//! Authoritative round, bet and ticket state.
//!
//! Rows live in DashMap shards; every mutation is a single-row conditional
//! update performed under that row's shard lock. When a RocksDB handle is
//! attached the new row is written through before it becomes visible, so a
//! failed write leaves the in-memory row untouched.
//!
//! Lock order when more than one map is held: rounds, round_wallets, tickets,
//! bets. No other path takes two of these at once.

use crate::{
    errors::{ConflictError, EngineError, EngineResult, StorageError, ValidationError},
    storage::OptimizedStorage,
    types::{
        Bet, BetId, BetStatus, ClaimVoucher, PendingPurchase, PrizePoolSnapshot, Round, RoundId,
        RoundStatus, Ticket, TicketId, WalletAddress,
    },
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, RwLock,
};

const ROUND_PREFIX: &str = "round:";
const BET_PREFIX: &str = "bet:";
const TICKET_PREFIX: &str = "ticket:";
const SEED_PREFIX: &str = "seed:";
const VOUCHER_PREFIX: &str = "voucher:";
const PENDING_PURCHASE_PREFIX: &str = "purchase:pending:";
const POOL_KEY: &[u8] = b"pool:snapshot";

/// Server seed and crash point kept out of the public round row until reveal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SealedSeed {
    pub server_seed: String,
    pub crash_point: crate::types::Multiplier,
}

fn round_key(id: &RoundId) -> Vec<u8> {
    format!("{}{}", ROUND_PREFIX, id).into_bytes()
}

fn bet_key(id: &BetId) -> Vec<u8> {
    format!("{}{}", BET_PREFIX, id).into_bytes()
}

fn ticket_key(id: &TicketId) -> Vec<u8> {
    format!("{}{}", TICKET_PREFIX, id).into_bytes()
}

fn seed_key(id: &RoundId) -> Vec<u8> {
    format!("{}{}", SEED_PREFIX, id).into_bytes()
}

fn voucher_key(bet_id: &BetId) -> Vec<u8> {
    format!("{}{}", VOUCHER_PREFIX, bet_id).into_bytes()
}

fn pending_purchase_key(payment_ref: &str) -> Vec<u8> {
    format!("{}{}", PENDING_PURCHASE_PREFIX, payment_ref).into_bytes()
}

fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| EngineError::Storage(StorageError::WriteFailed(e.to_string())))
}

fn decode_all<T: DeserializeOwned>(storage: &OptimizedStorage, prefix: &str) -> EngineResult<Vec<T>> {
    storage
        .scan_prefix(prefix.as_bytes())
        .into_iter()
        .map(|(key, value)| {
            serde_json::from_slice(&value).map_err(|e| {
                EngineError::Storage(StorageError::CorruptedData(format!(
                    "Failed to decode {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                )))
            })
        })
        .collect()
}

pub struct Ledger {
    rounds: DashMap<RoundId, Round>,
    bets: DashMap<BetId, Bet>,
    tickets: DashMap<TicketId, Ticket>,
    payment_refs: DashMap<String, TicketId>,
    round_wallets: DashMap<(RoundId, WalletAddress), BetId>,
    round_bets: DashMap<RoundId, Vec<BetId>>,
    sealed: DashMap<RoundId, SealedSeed>,
    vouchers: DashMap<BetId, ClaimVoucher>,
    pending_purchases: DashMap<String, PendingPurchase>,
    /// Pointer to the single open round; creation is serialized through it.
    open_round: Mutex<Option<RoundId>>,
    last_round_number: AtomicU64,
    pool: RwLock<PrizePoolSnapshot>,
    storage: Option<Arc<OptimizedStorage>>,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Self {
            rounds: DashMap::new(),
            bets: DashMap::new(),
            tickets: DashMap::new(),
            payment_refs: DashMap::new(),
            round_wallets: DashMap::new(),
            round_bets: DashMap::new(),
            sealed: DashMap::new(),
            vouchers: DashMap::new(),
            pending_purchases: DashMap::new(),
            open_round: Mutex::new(None),
            last_round_number: AtomicU64::new(0),
            pool: RwLock::new(PrizePoolSnapshot::default()),
            storage: None,
        }
    }

    /// Reload every persisted row and rebuild the indexes.
    pub fn open(storage: Arc<OptimizedStorage>) -> EngineResult<Self> {
        let mut ledger = Self::in_memory();

        let rounds: Vec<Round> = decode_all(&storage, ROUND_PREFIX)?;
        let mut open: Option<&Round> = None;
        for round in &rounds {
            ledger
                .last_round_number
                .fetch_max(round.round_number, Ordering::SeqCst);
            if round.status.is_open() && open.map_or(true, |o| o.round_number < round.round_number) {
                open = Some(round);
            }
        }
        ledger.open_round = Mutex::new(open.map(|r| r.id));
        for round in rounds {
            ledger.rounds.insert(round.id, round);
        }

        for bet in decode_all::<Bet>(&storage, BET_PREFIX)? {
            ledger.round_wallets.insert((bet.round_id, bet.wallet.clone()), bet.id);
            ledger.round_bets.entry(bet.round_id).or_default().push(bet.id);
            ledger.bets.insert(bet.id, bet);
        }
        for ticket in decode_all::<Ticket>(&storage, TICKET_PREFIX)? {
            ledger.payment_refs.insert(ticket.payment_ref.clone(), ticket.id);
            ledger.tickets.insert(ticket.id, ticket);
        }
        for (key, value) in storage.scan_prefix(SEED_PREFIX.as_bytes()) {
            let id = String::from_utf8_lossy(&key[SEED_PREFIX.len()..]).to_string();
            let round_id = id.parse::<RoundId>().map_err(|e| {
                EngineError::Storage(StorageError::CorruptedData(format!("seed key {}: {}", id, e)))
            })?;
            ledger.sealed.insert(round_id, serde_json::from_slice(&value)?);
        }
        for voucher in decode_all::<ClaimVoucher>(&storage, VOUCHER_PREFIX)? {
            ledger.vouchers.insert(voucher.bet_id, voucher);
        }
        for pending in decode_all::<PendingPurchase>(&storage, PENDING_PURCHASE_PREFIX)? {
            ledger.pending_purchases.insert(pending.payment_ref.clone(), pending);
        }
        if let Some(bytes) = storage.get(POOL_KEY) {
            ledger.pool = RwLock::new(serde_json::from_slice(&bytes)?);
        }

        tracing::info!(
            rounds = ledger.rounds.len(),
            bets = ledger.bets.len(),
            tickets = ledger.tickets.len(),
            "Ledger reloaded from storage"
        );
        ledger.storage = Some(storage);
        Ok(ledger)
    }

    fn write(&self, items: &[(Vec<u8>, Vec<u8>)]) -> EngineResult<()> {
        if let Some(storage) = &self.storage {
            storage
                .batch_write(items)
                .map_err(|e| EngineError::Storage(StorageError::WriteFailed(e.to_string())))?;
        }
        Ok(())
    }

    fn write_one<T: Serialize>(&self, key: Vec<u8>, value: &T) -> EngineResult<()> {
        if self.storage.is_none() {
            return Ok(());
        }
        let bytes = encode(value)?;
        self.write(&[(key, bytes)])
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    /// Create a round unless one is already open. `build` receives the next
    /// round number; the seal is written in the same batch as the round.
    pub fn create_round<F>(&self, build: F) -> EngineResult<Round>
    where
        F: FnOnce(u64) -> (Round, SealedSeed),
    {
        let mut open = self
            .open_round
            .lock()
            .map_err(|_| EngineError::Storage(StorageError::ReadFailed("open round lock poisoned".into())))?;

        if let Some(open_id) = *open {
            return Err(ConflictError::RoundAlreadyOpen(open_id).into());
        }

        let round_number = self.last_round_number.load(Ordering::SeqCst) + 1;
        let (round, sealed) = build(round_number);

        if self.storage.is_some() {
            self.write(&[
                (seed_key(&round.id), encode(&sealed)?),
                (round_key(&round.id), encode(&round)?),
            ])?;
        }

        self.sealed.insert(round.id, sealed);
        self.rounds.insert(round.id, round.clone());
        self.last_round_number.store(round_number, Ordering::SeqCst);
        *open = Some(round.id);
        Ok(round)
    }

    /// Move a round to `to` only if it is still in `to`'s predecessor state.
    pub fn transition_round<F>(&self, round_id: RoundId, to: RoundStatus, apply: F) -> EngineResult<Round>
    where
        F: FnOnce(&mut Round) -> EngineResult<()>,
    {
        let expected = to.predecessor();
        let updated = {
            let mut row = self
                .rounds
                .get_mut(&round_id)
                .ok_or_else(|| EngineError::round_not_found(round_id))?;

            if Some(row.status) != expected {
                return Err(ConflictError::InvalidTransition {
                    round_id,
                    requested: to,
                    actual: row.status,
                }
                .into());
            }

            let mut next = row.clone();
            next.status = to;
            apply(&mut next)?;
            self.write_one(round_key(&round_id), &next)?;
            *row = next.clone();
            next
        };

        if !to.is_open() {
            if let Ok(mut open) = self.open_round.lock() {
                if *open == Some(round_id) {
                    *open = None;
                }
            }
        }
        Ok(updated)
    }

    /// Mutate a round without changing its status.
    pub fn update_round<F>(&self, round_id: RoundId, apply: F) -> EngineResult<Round>
    where
        F: FnOnce(&mut Round) -> EngineResult<()>,
    {
        let mut row = self
            .rounds
            .get_mut(&round_id)
            .ok_or_else(|| EngineError::round_not_found(round_id))?;
        let mut next = row.clone();
        apply(&mut next)?;
        next.status = row.status;
        self.write_one(round_key(&round_id), &next)?;
        *row = next.clone();
        Ok(next)
    }

    pub fn round(&self, round_id: &RoundId) -> Option<Round> {
        self.rounds.get(round_id).map(|r| r.clone())
    }

    pub fn open_round(&self) -> Option<Round> {
        let id = self.open_round.lock().ok().and_then(|open| *open)?;
        self.round(&id)
    }

    pub fn last_round_number(&self) -> u64 {
        self.last_round_number.load(Ordering::SeqCst)
    }

    /// Newest first.
    pub fn recent_rounds(&self, limit: usize) -> Vec<Round> {
        let mut rounds: Vec<Round> = self.rounds.iter().map(|r| r.value().clone()).collect();
        rounds.sort_by(|a, b| b.round_number.cmp(&a.round_number));
        rounds.truncate(limit);
        rounds
    }

    pub fn sealed_seed(&self, round_id: &RoundId) -> Option<SealedSeed> {
        self.sealed.get(round_id).map(|s| s.clone())
    }

    // ------------------------------------------------------------------
    // Bets
    // ------------------------------------------------------------------

    /// Consume a ticket and record a bet as one unit.
    ///
    /// The round row is read-locked for the duration so a concurrent phase
    /// change cannot slip between the phase check and the insert. Both rows
    /// are written in one batch; nothing is visible if any check or the write
    /// fails.
    pub fn place_bet_atomic<R, T, B>(
        &self,
        round_id: RoundId,
        wallet: &WalletAddress,
        ticket_id: TicketId,
        consumed_at: u64,
        check_round: R,
        check_ticket: T,
        build: B,
    ) -> EngineResult<Bet>
    where
        R: FnOnce(&Round) -> EngineResult<()>,
        T: FnOnce(&Round, &Ticket) -> EngineResult<()>,
        B: FnOnce(&Round, &Ticket) -> Bet,
    {
        let round = self
            .rounds
            .get(&round_id)
            .ok_or_else(|| EngineError::round_not_found(round_id))?;
        check_round(&*round)?;

        let slot = match self.round_wallets.entry((round_id, wallet.clone())) {
            Entry::Occupied(_) => return Err(ValidationError::DuplicateBet(round_id).into()),
            Entry::Vacant(slot) => slot,
        };

        let mut ticket = self
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| EngineError::ticket_not_found(ticket_id))?;
        check_ticket(&*round, &*ticket)?;

        let mut consumed = ticket.clone();
        consumed.consumed_at = Some(consumed_at);
        let bet = build(&*round, &consumed);

        if self.storage.is_some() {
            self.write(&[
                (ticket_key(&ticket_id), encode(&consumed)?),
                (bet_key(&bet.id), encode(&bet)?),
            ])?;
        }

        *ticket = consumed;
        self.bets.insert(bet.id, bet.clone());
        self.round_bets.entry(round_id).or_default().push(bet.id);
        slot.insert(bet.id);
        Ok(bet)
    }

    /// Compare-and-swap on a single bet: `apply` runs only if the bet's
    /// status is one of `expected`.
    pub fn update_bet_if<F>(&self, bet_id: BetId, expected: &[BetStatus], apply: F) -> EngineResult<Bet>
    where
        F: FnOnce(&mut Bet) -> EngineResult<()>,
    {
        let mut row = self
            .bets
            .get_mut(&bet_id)
            .ok_or_else(|| EngineError::bet_not_found(bet_id))?;

        if !expected.contains(&row.status) {
            return Err(ConflictError::BetAlreadySettled {
                bet_id,
                status: row.status,
            }
            .into());
        }

        let mut next = row.clone();
        apply(&mut next)?;
        self.write_one(bet_key(&bet_id), &next)?;
        *row = next.clone();
        Ok(next)
    }

    pub fn bet(&self, bet_id: &BetId) -> Option<Bet> {
        self.bets.get(bet_id).map(|b| b.clone())
    }

    pub fn bet_for_wallet(&self, round_id: RoundId, wallet: &WalletAddress) -> Option<Bet> {
        let bet_id = *self.round_wallets.get(&(round_id, wallet.clone()))?;
        self.bet(&bet_id)
    }

    pub fn bet_ids_for_round(&self, round_id: &RoundId) -> Vec<BetId> {
        self.round_bets
            .get(round_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn bets_for_round(&self, round_id: &RoundId) -> Vec<Bet> {
        self.bet_ids_for_round(round_id)
            .iter()
            .filter_map(|id| self.bet(id))
            .collect()
    }

    pub fn bets_for_wallet(&self, wallet: &WalletAddress) -> Vec<Bet> {
        let mut bets: Vec<Bet> = self
            .bets
            .iter()
            .filter(|b| &b.wallet == wallet)
            .map(|b| b.value().clone())
            .collect();
        bets.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        bets
    }

    pub fn bets_with_status(&self, statuses: &[BetStatus]) -> Vec<Bet> {
        self.bets
            .iter()
            .filter(|b| statuses.contains(&b.status))
            .map(|b| b.value().clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// Insert a ticket unless one already exists for its payment reference.
    /// Returns the stored ticket and whether it was created by this call.
    pub fn insert_ticket_once<F>(&self, payment_ref: &str, build: F) -> EngineResult<(Ticket, bool)>
    where
        F: FnOnce() -> EngineResult<Ticket>,
    {
        match self.payment_refs.entry(payment_ref.to_string()) {
            Entry::Occupied(existing) => {
                let ticket = self
                    .ticket(existing.get())
                    .ok_or_else(|| EngineError::ticket_not_found(*existing.get()))?;
                Ok((ticket, false))
            }
            Entry::Vacant(slot) => {
                let ticket = build()?;
                self.write_one(ticket_key(&ticket.id), &ticket)?;
                self.tickets.insert(ticket.id, ticket.clone());
                slot.insert(ticket.id);
                Ok((ticket, true))
            }
        }
    }

    /// Conditional update on a single ticket; `apply` decides and mutates.
    pub fn update_ticket<F>(&self, ticket_id: TicketId, apply: F) -> EngineResult<Ticket>
    where
        F: FnOnce(&mut Ticket) -> EngineResult<()>,
    {
        let mut row = self
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| EngineError::ticket_not_found(ticket_id))?;
        let mut next = row.clone();
        apply(&mut next)?;
        self.write_one(ticket_key(&ticket_id), &next)?;
        *row = next.clone();
        Ok(next)
    }

    pub fn ticket(&self, ticket_id: &TicketId) -> Option<Ticket> {
        self.tickets.get(ticket_id).map(|t| t.clone())
    }

    pub fn ticket_for_payment(&self, payment_ref: &str) -> Option<Ticket> {
        let id = *self.payment_refs.get(payment_ref)?;
        self.ticket(&id)
    }

    pub fn tickets_for_wallet(&self, wallet: &WalletAddress) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .iter()
            .filter(|t| &t.owner == wallet)
            .map(|t| t.value().clone())
            .collect();
        tickets.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
        tickets
    }

    // ------------------------------------------------------------------
    // Pending purchases
    // ------------------------------------------------------------------

    pub fn upsert_pending_purchase(&self, pending: PendingPurchase) -> EngineResult<()> {
        self.write_one(pending_purchase_key(&pending.payment_ref), &pending)?;
        self.pending_purchases.insert(pending.payment_ref.clone(), pending);
        Ok(())
    }

    pub fn remove_pending_purchase(&self, payment_ref: &str) -> EngineResult<Option<PendingPurchase>> {
        if let Some(storage) = &self.storage {
            storage.delete(&pending_purchase_key(payment_ref))?;
        }
        Ok(self.pending_purchases.remove(payment_ref).map(|(_, p)| p))
    }

    pub fn pending_purchases(&self) -> Vec<PendingPurchase> {
        self.pending_purchases.iter().map(|p| p.value().clone()).collect()
    }

    // ------------------------------------------------------------------
    // Vouchers and prize pool
    // ------------------------------------------------------------------

    /// Record a voucher unless one was already issued for the bet, in which
    /// case the recorded one is returned.
    pub fn insert_voucher_once(&self, voucher: ClaimVoucher) -> EngineResult<ClaimVoucher> {
        match self.vouchers.entry(voucher.bet_id) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                self.write_one(voucher_key(&voucher.bet_id), &voucher)?;
                slot.insert(voucher.clone());
                Ok(voucher)
            }
        }
    }

    pub fn voucher(&self, bet_id: &BetId) -> Option<ClaimVoucher> {
        self.vouchers.get(bet_id).map(|v| v.clone())
    }

    pub fn prize_pool(&self) -> PrizePoolSnapshot {
        self.pool.read().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn set_prize_pool(&self, snapshot: PrizePoolSnapshot) -> EngineResult<()> {
        self.write_one(POOL_KEY.to_vec(), &snapshot)?;
        if let Ok(mut pool) = self.pool.write() {
            *pool = snapshot;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Multiplier, RoundParams, UNITS_PER_TOKEN};
    use uuid::Uuid;

    fn sealed() -> SealedSeed {
        SealedSeed {
            server_seed: "seed".to_string(),
            crash_point: Multiplier::from_hundredths(250),
        }
    }

    fn build_round(round_number: u64) -> (Round, SealedSeed) {
        let round = Round {
            id: Uuid::new_v4(),
            round_number,
            status: RoundStatus::Betting,
            server_seed_hash: "hash".to_string(),
            server_seed: None,
            crash_point: None,
            total_wagered: 0,
            total_payout: 0,
            params: RoundParams {
                min_bet: 1,
                max_bet: 100 * UNITS_PER_TOKEN,
                betting_duration_secs: 15,
                max_multiplier: Multiplier::from_hundredths(100_000),
                instant_crash_probability: 0.0,
            },
            start_time: 0,
            flying_started_at: None,
            end_time: None,
        };
        (round, sealed())
    }

    fn ticket(owner: &str, payment_ref: &str) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            owner: WalletAddress::new(owner),
            ticket_value: UNITS_PER_TOKEN,
            payment_currency: "WOVER".to_string(),
            payment_amount: UNITS_PER_TOKEN,
            payment_ref: payment_ref.to_string(),
            purchased_at: 0,
            expires_at: 1_000_000,
            consumed_at: None,
        }
    }

    fn bet_from(round: &Round, ticket: &Ticket) -> Bet {
        Bet {
            id: Uuid::new_v4(),
            round_id: round.id,
            wallet: ticket.owner.clone(),
            ticket_id: ticket.id,
            bet_amount: ticket.ticket_value,
            auto_cashout_at: None,
            status: BetStatus::Active,
            cashed_out_at: None,
            cashout_trigger: None,
            winnings: 0,
            placed_at: 1,
            settled_at: None,
        }
    }

    #[test]
    fn test_single_open_round() {
        let ledger = Ledger::in_memory();
        let first = ledger.create_round(build_round).unwrap();
        assert_eq!(first.round_number, 1);

        let err = ledger.create_round(build_round).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ConflictError::RoundAlreadyOpen(id)) if id == first.id));
    }

    #[test]
    fn test_transition_requires_predecessor() {
        let ledger = Ledger::in_memory();
        let round = ledger.create_round(build_round).unwrap();

        let err = ledger
            .transition_round(round.id, RoundStatus::Flying, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(ConflictError::InvalidTransition { .. })));

        for status in [RoundStatus::Countdown, RoundStatus::Flying, RoundStatus::Crashed, RoundStatus::Payout] {
            ledger.transition_round(round.id, status, |_| Ok(())).unwrap();
        }
        assert!(ledger.open_round().is_none());
        assert_eq!(ledger.create_round(build_round).unwrap().round_number, 2);
    }

    #[test]
    fn test_place_bet_is_all_or_nothing() {
        let ledger = Ledger::in_memory();
        let round = ledger.create_round(build_round).unwrap();
        let t = ticket("0xaa", "ref-1");
        let (t, created) = ledger.insert_ticket_once("ref-1", || Ok(t.clone())).unwrap();
        assert!(created);

        let wallet = WalletAddress::new("0xaa");
        let rejected = ledger.place_bet_atomic(
            round.id,
            &wallet,
            t.id,
            5,
            |_| Ok(()),
            |_, _| Err(ValidationError::InvalidWallet.into()),
            bet_from,
        );
        assert!(rejected.is_err());
        assert!(ledger.ticket(&t.id).unwrap().consumed_at.is_none());
        assert!(ledger.bet_for_wallet(round.id, &wallet).is_none());

        let bet = ledger
            .place_bet_atomic(round.id, &wallet, t.id, 5, |_| Ok(()), |_, _| Ok(()), bet_from)
            .unwrap();
        assert_eq!(ledger.ticket(&t.id).unwrap().consumed_at, Some(5));
        assert_eq!(ledger.bets_for_round(&round.id), vec![bet]);
    }

    #[test]
    fn test_bet_cas_single_winner() {
        let ledger = Ledger::in_memory();
        let round = ledger.create_round(build_round).unwrap();
        let t = ticket("0xbb", "ref-2");
        ledger.insert_ticket_once("ref-2", || Ok(t.clone())).unwrap();
        let bet = ledger
            .place_bet_atomic(round.id, &t.owner, t.id, 1, |_| Ok(()), |_, _| Ok(()), bet_from)
            .unwrap();

        ledger
            .update_bet_if(bet.id, &[BetStatus::Active], |b| {
                b.status = BetStatus::Won;
                Ok(())
            })
            .unwrap();
        let err = ledger
            .update_bet_if(bet.id, &[BetStatus::Active], |b| {
                b.status = BetStatus::Lost;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict(ConflictError::BetAlreadySettled { status: BetStatus::Won, .. })
        ));
    }

    #[test]
    fn test_payment_ref_idempotent() {
        let ledger = Ledger::in_memory();
        let (first, created) = ledger.insert_ticket_once("tx-9", || Ok(ticket("0xcc", "tx-9"))).unwrap();
        let (second, created_again) = ledger.insert_ticket_once("tx-9", || Ok(ticket("0xcc", "tx-9"))).unwrap();
        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.tickets_for_wallet(&WalletAddress::new("0xcc")).len(), 1);
    }

    #[test]
    fn test_reload_from_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(OptimizedStorage::new(dir.path()).unwrap());

        let (round_id, ticket_id) = {
            let ledger = Ledger::open(storage.clone()).unwrap();
            let round = ledger.create_round(build_round).unwrap();
            ledger.transition_round(round.id, RoundStatus::Countdown, |_| Ok(())).unwrap();
            let (t, _) = ledger.insert_ticket_once("ref-3", || Ok(ticket("0xdd", "ref-3"))).unwrap();
            (round.id, t.id)
        };

        let reloaded = Ledger::open(storage).unwrap();
        let open = reloaded.open_round().unwrap();
        assert_eq!(open.id, round_id);
        assert_eq!(open.status, RoundStatus::Countdown);
        assert_eq!(reloaded.sealed_seed(&round_id), Some(sealed()));
        assert_eq!(reloaded.ticket_for_payment("ref-3").unwrap().id, ticket_id);
        assert_eq!(reloaded.last_round_number(), 1);
    }
}
