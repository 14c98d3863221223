//! Provably fair crash points via commit/reveal.
//!
//! Before betting opens the engine commits to `SHA-256(server_seed)`. After the
//! crash the seed is revealed and anyone can recompute the crash point from
//! `(server_seed, round_number)` with [`verify`].

use crate::config::FairnessConfig;
use crate::types::{Multiplier, RoundParams};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SEED_BYTES: usize = 32;
/// 52 bits of the HMAC output feed the uniform draw (f64 mantissa width).
const UNIFORM_BITS: u32 = 52;

/// Everything needed to recompute a crash point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivationParams {
    pub house_edge: f64,
    pub max_multiplier: Multiplier,
    pub instant_crash_probability: f64,
}

/// A freshly generated seed and its published hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedCommitment {
    pub server_seed: String,
    pub seed_hash: String,
}

/// Multiplier growth over flying time: `m(t) = e^(r t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierCurve {
    growth_rate: f64,
}

impl MultiplierCurve {
    pub fn new(growth_rate: f64) -> Self {
        Self { growth_rate }
    }

    pub fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    pub fn multiplier_at(&self, elapsed: Duration) -> Multiplier {
        let value = (self.growth_rate * elapsed.as_secs_f64()).exp();
        if !value.is_finite() {
            return Multiplier::from_hundredths(u64::MAX);
        }
        Multiplier::from_f64(value).max(Multiplier::ONE)
    }

    /// `t* = ln(m) / r`, rounded up to the next millisecond.
    pub fn time_to_reach(&self, multiplier: Multiplier) -> Duration {
        let m = multiplier.as_f64();
        if m <= 1.0 {
            return Duration::ZERO;
        }
        let secs = m.ln() / self.growth_rate;
        Duration::from_millis((secs * 1000.0).ceil() as u64)
    }
}

pub struct FairnessEngine {
    house_edge: f64,
    curve: MultiplierCurve,
}

impl FairnessEngine {
    pub fn new(config: &FairnessConfig) -> Self {
        Self {
            house_edge: config.house_edge,
            curve: MultiplierCurve::new(config.growth_rate),
        }
    }

    pub fn curve(&self) -> MultiplierCurve {
        self.curve
    }

    pub fn derivation_params(&self, round: &RoundParams) -> DerivationParams {
        DerivationParams {
            house_edge: self.house_edge,
            max_multiplier: round.max_multiplier,
            instant_crash_probability: round.instant_crash_probability,
        }
    }

    /// Generate a high-entropy seed and its commitment hash
    pub fn commit(&self) -> SeedCommitment {
        let mut bytes = [0u8; SEED_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self::commit_with_seed(hex::encode(bytes))
    }

    /// Commit to an operator-supplied seed (manual mode)
    pub fn commit_with_seed(server_seed: String) -> SeedCommitment {
        let seed_hash = hash_seed(&server_seed);
        SeedCommitment {
            server_seed,
            seed_hash,
        }
    }

    pub fn derive(&self, server_seed: &str, round_number: u64, round: &RoundParams) -> Multiplier {
        derive_crash_point(server_seed, round_number, &self.derivation_params(round))
    }
}

/// Hex-encoded SHA-256 of the seed string
pub fn hash_seed(server_seed: &str) -> String {
    hex::encode(Sha256::digest(server_seed.as_bytes()))
}

/// Uniform draw in `[0, 1)` from `HMAC-SHA256(server_seed, round_number)`
pub fn uniform_draw(server_seed: &str, round_number: u64) -> f64 {
    // Hmac<Sha256> takes keys of any length, so the error arm never fires
    let digest = match HmacSha256::new_from_slice(server_seed.as_bytes()) {
        Ok(mut mac) => {
            mac.update(round_number.to_string().as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => return 0.0,
    };

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(head) >> (64 - UNIFORM_BITS);
    n as f64 / (1u64 << UNIFORM_BITS) as f64
}

/// Deterministic crash point for a revealed seed
pub fn derive_crash_point(server_seed: &str, round_number: u64, params: &DerivationParams) -> Multiplier {
    let u = uniform_draw(server_seed, round_number);
    if u < params.instant_crash_probability {
        return Multiplier::ONE;
    }

    let raw = ((1.0 / (1.0 - u)) * (1.0 - params.house_edge) * 100.0).floor();
    let max = params.max_multiplier.hundredths() as f64;
    let hundredths = raw.clamp(Multiplier::ONE.hundredths() as f64, max) as u64;
    Multiplier::from_hundredths(hundredths)
}

/// Recompute hash and crash point; true only if both match exactly.
pub fn verify(
    server_seed: &str,
    seed_hash: &str,
    round_number: u64,
    claimed_crash_point: Multiplier,
    params: &DerivationParams,
) -> bool {
    if !hash_seed(server_seed).eq_ignore_ascii_case(seed_hash) {
        return false;
    }
    derive_crash_point(server_seed, round_number, params) == claimed_crash_point
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DerivationParams {
        DerivationParams {
            house_edge: 0.01,
            max_multiplier: Multiplier::from_hundredths(100_000),
            instant_crash_probability: 0.03,
        }
    }

    #[test]
    fn test_commit_hash_matches_seed() {
        let engine = FairnessEngine::new(&FairnessConfig::default());
        let commitment = engine.commit();
        assert_eq!(commitment.server_seed.len(), SEED_BYTES * 2);
        assert_eq!(hash_seed(&commitment.server_seed), commitment.seed_hash);
        assert_ne!(engine.commit().server_seed, commitment.server_seed);
    }

    #[test]
    fn test_derivation_is_deterministic_and_verifiable() {
        let commitment = FairnessEngine::commit_with_seed("round-seed".to_string());
        for round_number in 1..200 {
            let a = derive_crash_point(&commitment.server_seed, round_number, &params());
            let b = derive_crash_point(&commitment.server_seed, round_number, &params());
            assert_eq!(a, b);
            assert!(a >= Multiplier::ONE && a <= params().max_multiplier);
            assert!(verify(&commitment.server_seed, &commitment.seed_hash, round_number, a, &params()));
        }
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let commitment = FairnessEngine::commit_with_seed("abc".to_string());
        let crash = derive_crash_point("abc", 7, &params());

        let bumped = Multiplier::from_hundredths(crash.hundredths() + 1);
        assert!(!verify("abc", &commitment.seed_hash, 7, bumped, &params()));
        assert!(!verify("abd", &commitment.seed_hash, 7, crash, &params()));
        assert!(!verify("abc", &hash_seed("other"), 7, crash, &params()));
    }

    #[test]
    fn test_instant_bust_probability_bounds() {
        let mut always = params();
        always.instant_crash_probability = 1.0;
        let mut never = params();
        never.instant_crash_probability = 0.0;
        never.house_edge = 0.0;

        let mut busts = 0;
        for round_number in 0..500 {
            assert_eq!(derive_crash_point("seed", round_number, &always), Multiplier::ONE);
            if derive_crash_point("seed", round_number, &never) == Multiplier::ONE {
                busts += 1;
            }
        }
        // Without an edge or forced bust, 1.00x needs u < 0.01.
        assert!(busts < 50);
    }

    #[test]
    fn test_max_multiplier_clamp() {
        let mut capped = params();
        capped.max_multiplier = Multiplier::from_hundredths(150);
        capped.instant_crash_probability = 0.0;
        for round_number in 0..300 {
            assert!(derive_crash_point("cap", round_number, &capped) <= capped.max_multiplier);
        }
    }

    #[test]
    fn test_curve_round_trip() {
        let curve = MultiplierCurve::new(0.06);
        assert_eq!(curve.multiplier_at(Duration::ZERO), Multiplier::ONE);

        let target = Multiplier::from_hundredths(340);
        let t = curve.time_to_reach(target);
        assert!(curve.multiplier_at(t) >= target);
        assert!(curve.multiplier_at(t.saturating_sub(Duration::from_millis(200))) < target);
        assert_eq!(curve.time_to_reach(Multiplier::ONE), Duration::ZERO);
    }
}
