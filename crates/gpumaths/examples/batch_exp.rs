//! Batch exponentiation example
//!
//! Raises a batch of random bases to random 256-bit exponents modulo the
//! 2048-bit MODP prime, then checks every result against the reference.
//!
//! Run with `RUST_LOG=debug cargo run -p gpumaths --example batch_exp`.

use std::time::Instant;

use num_bigint::{BigUint, RandBigInt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use gpumaths::prelude::*;

const MODP_2048: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const BATCH: usize = 256;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gpumaths=info".parse().unwrap()))
        .init();

    let p = BigUint::parse_bytes(MODP_2048.as_bytes(), 16).unwrap();
    let exponent_bound = BigUint::from(1u8) << 256usize;
    let mut rng = StdRng::seed_from_u64(2020);
    let bases: Vec<BigUint> = (0..BATCH).map(|_| rng.gen_biguint_below(&p)).collect();
    let exponents: Vec<BigUint> = (0..BATCH)
        .map(|_| rng.gen_biguint_below(&exponent_bound))
        .collect();

    let mut config = CudaConfig::default();
    if let Ok(path) = std::env::var("GPUMATHS_PTX") {
        config = CudaConfig::builder().with_ptx_file(path)?.build();
    }

    let maths = GpuMaths::builder()
        .backend(Backend::Auto)
        .cpu_fallback(true)
        .cuda_config(config)
        .for_modulus(&p)
        .pipelined(true)
        .build()?;
    println!("Device: {}", maths.device().name());

    let mut results = vec![BigUint::default(); BATCH];
    let start = Instant::now();
    maths.exp_chunk(&p, &bases, &exponents, &mut results)?;
    let elapsed = start.elapsed();

    let wrong = (0..BATCH)
        .filter(|&i| results[i] != reference::exp(&p, &bases[i], &exponents[i]))
        .count();
    println!(
        "{} exponentiations in {:?} ({:.0}/s), {} wrong",
        BATCH,
        elapsed,
        BATCH as f64 / elapsed.as_secs_f64(),
        wrong
    );

    if let Some(stats) = maths.stats() {
        println!("{}", stats);
    }
    maths.destroy()
}
