//! Engine counters with Prometheus text export

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct EngineMetrics {
    start_time: Instant,
    pub rounds_started: AtomicU64,
    pub rounds_crashed: AtomicU64,
    pub rounds_paid: AtomicU64,
    pub bets_placed: AtomicU64,
    pub cashouts_won: AtomicU64,
    pub auto_cashouts: AtomicU64,
    pub bets_lost: AtomicU64,
    pub cas_conflicts: AtomicU64,
    pub tickets_purchased: AtomicU64,
    pub tickets_consumed: AtomicU64,
    pub purchases_abandoned: AtomicU64,
    pub vouchers_issued: AtomicU64,
    pub claims_confirmed: AtomicU64,
    pub fairness_violations: AtomicU64,
    pub mirror_failures: AtomicU64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_started: AtomicU64::new(0),
            rounds_crashed: AtomicU64::new(0),
            rounds_paid: AtomicU64::new(0),
            bets_placed: AtomicU64::new(0),
            cashouts_won: AtomicU64::new(0),
            auto_cashouts: AtomicU64::new(0),
            bets_lost: AtomicU64::new(0),
            cas_conflicts: AtomicU64::new(0),
            tickets_purchased: AtomicU64::new(0),
            tickets_consumed: AtomicU64::new(0),
            purchases_abandoned: AtomicU64::new(0),
            vouchers_issued: AtomicU64::new(0),
            claims_confirmed: AtomicU64::new(0),
            fairness_violations: AtomicU64::new(0),
            mirror_failures: AtomicU64::new(0),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render every counter in Prometheus exposition format
    pub fn export_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 15] = [
            ("rounds_started_total", "Rounds opened for betting", &self.rounds_started),
            ("rounds_crashed_total", "Rounds that reached their crash point", &self.rounds_crashed),
            ("rounds_paid_total", "Rounds moved to payout", &self.rounds_paid),
            ("bets_placed_total", "Bets accepted", &self.bets_placed),
            ("cashouts_won_total", "Cash-outs recorded as won", &self.cashouts_won),
            ("auto_cashouts_total", "Won cash-outs triggered by auto cash-out", &self.auto_cashouts),
            ("bets_lost_total", "Bets settled as lost", &self.bets_lost),
            ("cas_conflicts_total", "Conditional updates that lost a race", &self.cas_conflicts),
            ("tickets_purchased_total", "Tickets issued", &self.tickets_purchased),
            ("tickets_consumed_total", "Tickets consumed by bets", &self.tickets_consumed),
            ("purchases_abandoned_total", "Pending purchases dropped after TTL", &self.purchases_abandoned),
            ("vouchers_issued_total", "Claim vouchers signed", &self.vouchers_issued),
            ("claims_confirmed_total", "Claims confirmed on chain", &self.claims_confirmed),
            ("fairness_violations_total", "Commit/reveal mismatches detected", &self.fairness_violations),
            ("mirror_failures_total", "Failed prize-pool contract calls", &self.mirror_failures),
        ];

        let mut output = String::new();
        for (name, help, counter) in counters {
            output.push_str(&format!(
                "# HELP crash_{name} {help}\n# TYPE crash_{name} counter\ncrash_{name} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "# HELP crash_uptime_seconds Process uptime\n# TYPE crash_uptime_seconds gauge\ncrash_uptime_seconds {}\n",
            self.uptime_secs()
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export() {
        let metrics = EngineMetrics::new();
        EngineMetrics::incr(&metrics.bets_placed);
        EngineMetrics::add(&metrics.bets_lost, 3);

        let text = metrics.export_prometheus();
        assert!(text.contains("# TYPE crash_bets_placed_total counter"));
        assert!(text.contains("crash_bets_placed_total 1\n"));
        assert!(text.contains("crash_bets_lost_total 3\n"));
    }
}
