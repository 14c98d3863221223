//! Recompute a crash round from its revealed seed.
//!
//! Usage: verify_round --seed <hex> --hash <hex> --round <n> --crash-point 2.47

use clap::Parser;
use crash_engine::{
    fairness::{self, DerivationParams},
    types::Multiplier,
};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "verify_round")]
#[command(about = "Check a crash point against its revealed server seed")]
struct Args {
    /// Revealed server seed
    #[arg(long)]
    seed: String,

    /// Seed hash published before betting opened
    #[arg(long)]
    hash: String,

    /// Round number
    #[arg(long)]
    round: u64,

    /// Crash point the round reported, e.g. 2.47
    #[arg(long)]
    crash_point: f64,

    #[arg(long, default_value_t = 0.01)]
    house_edge: f64,

    #[arg(long, default_value_t = 1000.0)]
    max_multiplier: f64,

    #[arg(long, default_value_t = 0.03)]
    instant_crash_probability: f64,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let params = DerivationParams {
        house_edge: args.house_edge,
        max_multiplier: Multiplier::from_f64(args.max_multiplier),
        instant_crash_probability: args.instant_crash_probability,
    };
    let claimed = Multiplier::from_f64(args.crash_point);

    let hash = fairness::hash_seed(&args.seed);
    let recomputed = fairness::derive_crash_point(&args.seed, args.round, &params);
    println!("round:        {}", args.round);
    println!("seed hash:    {} ({})", hash, if hash.eq_ignore_ascii_case(&args.hash) { "match" } else { "MISMATCH" });
    println!("crash point:  {} recomputed, {} claimed", recomputed, claimed);

    if fairness::verify(&args.seed, &args.hash, args.round, claimed, &params) {
        println!("VERIFIED");
        ExitCode::SUCCESS
    } else {
        println!("NOT VERIFIED");
        ExitCode::FAILURE
    }
}
