//! End-to-end batches on the CPU device, checked against the reference
//! arithmetic.

use std::sync::Arc;

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::rngs::StdRng;
use rand::SeedableRng;

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

const MODP_4096: &str = concat!(
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
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A92108011A723C12A787E6D7",
    "88719A10BDBA5B2699C327186AF4E23C1A946834B6150BDA",
    "2583E9CA2AD44CE8DBBBC2DB04DE8EF92E8EFC141FBECAA6",
    "287C59474E6BC05D99B2964FA090C3A2233BA186515BE7ED",
    "1F612970CEE2D7AFB81BDD762170481CD0069127D5B05AA9",
    "93B4EA988D8FDDC186FFB7DC90A6C08F4DF435C934063199",
    "FFFFFFFFFFFFFFFF",
);

fn prime(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).unwrap()
}

fn below(rng: &mut StdRng, bound: &BigUint, n: usize) -> Vec<BigUint> {
    (0..n).map(|_| rng.gen_biguint_below(bound)).collect()
}

/// Odd keys below `p`: coprime with `p - 1` for a safe prime.
fn odd_keys(rng: &mut StdRng, p: &BigUint, n: usize) -> Vec<BigUint> {
    (0..n)
        .map(|_| (rng.gen_biguint_below(p) | BigUint::one()) % p)
        .collect()
}

fn cpu_maths(p: &BigUint) -> GpuMaths {
    GpuMaths::builder()
        .backend(Backend::Cpu)
        .for_modulus(p)
        .build()
        .expect("Failed to create CPU handle")
}

#[test]
fn test_exp_4096_matches_reference() {
    let p = prime(MODP_4096);
    let mut rng = StdRng::seed_from_u64(42);
    let bound = BigUint::one() << 256usize;

    let bases = below(&mut rng, &p, 128);
    let exponents = below(&mut rng, &bound, 128);
    let mut results = vec![BigUint::default(); 128];

    let maths = cpu_maths(&p);
    assert_eq!(maths.dispatcher().width(), BnWidth::Bits4096);
    maths
        .exp_chunk(&p, &bases, &exponents, &mut results)
        .expect("exp failed");

    for i in 0..128 {
        assert_eq!(results[i], reference::exp(&p, &bases[i], &exponents[i]), "slot {}", i);
    }

    // 42 slots fit a default stream, so 128 pairs take four launches
    let stats = maths.stats().unwrap();
    assert_eq!(stats.total_launches, 4);
    assert_eq!(stats.total_takes, 1);
    maths.destroy().unwrap();
}

#[test]
fn test_elgamal_matches_reference() {
    let p = prime(MODP_4096);
    let g = BigUint::from(2u32);
    let mut rng = StdRng::seed_from_u64(7);
    let small = BigUint::one() << 256usize;

    let public_key = rng.gen_biguint_below(&p);
    let private_keys = below(&mut rng, &small, 12);
    let keys = below(&mut rng, &p, 12);
    let ecr_before = below(&mut rng, &p, 12);
    let cypher_before = below(&mut rng, &p, 12);

    let mut ecr_keys = ecr_before.clone();
    let mut cyphers = cypher_before.clone();
    let maths = cpu_maths(&p);
    maths
        .elgamal_chunk(
            &g,
            &p,
            &public_key,
            &private_keys,
            &keys,
            &mut ecr_keys,
            &mut cyphers,
        )
        .expect("elgamal failed");

    for i in 0..12 {
        let (ecr, cypher) = reference::elgamal(
            &g,
            &p,
            &public_key,
            &private_keys[i],
            &keys[i],
            &ecr_before[i],
            &cypher_before[i],
        );
        assert_eq!(ecr_keys[i], ecr, "ecr slot {}", i);
        assert_eq!(cyphers[i], cypher, "cypher slot {}", i);
    }
}

#[test]
fn test_batch_split_across_chunks() {
    let p = prime(MODP_2048);
    let n = 30;
    let sizes = KernelSizes::new(BnWidth::Bits2048);
    let config = PoolConfig::containing(1, n / 3, OperationKind::Exp, &sizes);
    assert_eq!(sizes.max_slots(config.capacity_bytes, OperationKind::Exp), n / 3);

    let maths = GpuMaths::builder()
        .backend(Backend::Cpu)
        .width(BnWidth::Bits2048)
        .pool_config(config)
        .build()
        .unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    let bases = below(&mut rng, &p, n);
    let exponents = below(&mut rng, &BigUint::from(u64::MAX), n);
    let mut results = vec![BigUint::default(); n];
    maths.exp_chunk(&p, &bases, &exponents, &mut results).unwrap();

    for i in 0..n {
        assert_eq!(results[i], reference::exp(&p, &bases[i], &exponents[i]));
    }
    let stats = maths.stats().unwrap();
    assert_eq!(stats.per_stream_launches, vec![3]);
}

#[test]
fn test_mul2_and_mul3_match_reference() {
    let p = prime(MODP_2048);
    let mut rng = StdRng::seed_from_u64(11);
    let n = 300;
    let a = below(&mut rng, &p, n);
    let b = below(&mut rng, &p, n);
    let c = below(&mut rng, &p, n);

    let maths = cpu_maths(&p);
    let mut products = vec![BigUint::default(); n];
    maths.mul2_chunk(&p, &a, &b, &mut products).unwrap();
    for i in 0..n {
        assert_eq!(products[i], reference::mul2(&p, &a[i], &b[i]));
    }

    let mut triples = vec![BigUint::default(); n];
    maths.mul3_chunk(&p, &a, &b, &c, &mut triples).unwrap();
    for i in 0..n {
        assert_eq!(triples[i], reference::mul3(&p, &a[i], &b[i], &c[i]));
    }
}

#[test]
fn test_reveal_and_strip_match_reference() {
    let p = prime(MODP_2048);
    let mut rng = StdRng::seed_from_u64(19);
    let n = 6;
    let public_key = odd_keys(&mut rng, &p, 1).remove(0);

    let cypher_before = below(&mut rng, &p, n);
    let mut cyphers = cypher_before.clone();
    let maths = cpu_maths(&p);
    maths.reveal_chunk(&p, &public_key, &mut cyphers).unwrap();
    for i in 0..n {
        let expected = reference::reveal(&p, &public_key, &cypher_before[i]).unwrap();
        assert_eq!(cyphers[i], expected);
    }

    // a revealed cypher raised back to the key gives the input
    assert_eq!(cyphers[0].modpow(&public_key, &p), cypher_before[0]);

    let precomputations = below(&mut rng, &p, n);
    let mut stripped = vec![BigUint::default(); n];
    maths
        .strip_chunk(&p, &public_key, &precomputations, &cypher_before, &mut stripped)
        .unwrap();
    for i in 0..n {
        let expected =
            reference::strip(&p, &public_key, &precomputations[i], &cypher_before[i]).unwrap();
        assert_eq!(stripped[i], expected);
    }
}

#[test]
fn test_reveal_without_inverse_is_device_error() {
    let p = prime(MODP_2048);
    // even keys share the factor 2 with p - 1
    let public_key = BigUint::from(4u32);
    let mut cyphers = vec![BigUint::from(5u32); 3];

    let maths = cpu_maths(&p);
    let err = maths.reveal_chunk(&p, &public_key, &mut cyphers).unwrap_err();
    assert!(err.is_device_error());
}

#[test]
fn test_pipelined_matches_chunked() {
    let p = prime(MODP_2048);
    let sizes = KernelSizes::new(BnWidth::Bits2048);
    let mut rng = StdRng::seed_from_u64(5);
    let n = 50;
    let a = below(&mut rng, &p, n);
    let b = below(&mut rng, &p, n);

    let maths = GpuMaths::builder()
        .backend(Backend::Cpu)
        .width(BnWidth::Bits2048)
        .pool_config(PoolConfig::containing(2, 8, OperationKind::Mul2, &sizes))
        .pipelined(true)
        .build()
        .unwrap();

    let mut results = vec![BigUint::default(); n];
    maths.mul2_chunk(&p, &a, &b, &mut results).unwrap();
    for i in 0..n {
        assert_eq!(results[i], reference::mul2(&p, &a[i], &b[i]));
    }

    // seven chunks alternate between both streams
    let stats = maths.stats().unwrap();
    assert_eq!(stats.total_launches, 7);
    assert_eq!(stats.per_stream_launches, vec![4, 3]);
}

#[test]
fn test_empty_batch_touches_nothing() {
    let device = CpuDevice::new();
    let maths = GpuMaths::builder()
        .device(Arc::new(device.clone()))
        .width(BnWidth::Bits2048)
        .build()
        .unwrap();

    let p = prime(MODP_2048);
    let mut results: Vec<BigUint> = Vec::new();
    maths.mul2_chunk(&p, &[], &[], &mut results).unwrap();
    assert_eq!(device.enqueued(), 0);
    assert_eq!(maths.stats().unwrap().total_takes, 0);
}

#[test]
fn test_launch_failure_stops_batch() {
    let p = prime(MODP_2048);
    let device = CpuDevice::new();
    let sizes = KernelSizes::new(BnWidth::Bits2048);
    let maths = GpuMaths::builder()
        .device(Arc::new(device.clone()))
        .width(BnWidth::Bits2048)
        .pool_config(PoolConfig::containing(1, 4, OperationKind::Mul2, &sizes))
        .build()
        .unwrap();

    let n = 12;
    let a: Vec<BigUint> = (1..=n as u32).map(BigUint::from).collect();
    let b = vec![BigUint::from(3u32); n];
    let mut results = vec![BigUint::default(); n];

    device.fail_enqueue_at(1);
    let err = maths.mul2_chunk(&p, &a, &b, &mut results).unwrap_err();
    assert!(err.is_device_error());
    // no further launch after the failed one
    assert_eq!(device.enqueued(), 2);
    assert_eq!(maths.stats().unwrap().total_launches, 1);

    for i in 0..4 {
        assert_eq!(results[i], &a[i] * 3u32);
    }
    assert!(results[4..].iter().all(|r| *r == BigUint::default()));

    // the stream went back to the pool and works again
    device.clear_faults();
    assert_eq!(maths.pool().unwrap().available(), 1);
    maths.mul2_chunk(&p, &a, &b, &mut results).unwrap();
    assert_eq!(results[11], BigUint::from(36u32));
}

#[test]
fn test_unsupported_backend_fails_every_operation() {
    let maths = GpuMaths::with_backend(Backend::Unsupported).unwrap();
    assert!(!maths.is_supported());
    assert!(maths.stats().is_none());
    assert!(maths.pool().unwrap_err().is_device_error());

    let p = prime(MODP_2048);
    let one = vec![BigUint::one()];
    let mut out = vec![BigUint::default()];
    let mut out2 = vec![BigUint::default()];

    assert!(maths.exp_chunk(&p, &one, &one, &mut out).unwrap_err().is_device_error());
    assert!(maths
        .elgamal_chunk(&p, &p, &p, &one, &one, &mut out, &mut out2)
        .unwrap_err()
        .is_device_error());
    assert!(maths.mul2_chunk(&p, &one, &one, &mut out).unwrap_err().is_device_error());
    assert!(maths
        .mul3_chunk(&p, &one, &one, &one, &mut out)
        .unwrap_err()
        .is_device_error());
    assert!(maths.reveal_chunk(&p, &p, &mut out).unwrap_err().is_device_error());
    assert!(maths
        .strip_chunk(&p, &p, &one, &one, &mut out2)
        .unwrap_err()
        .is_device_error());
    assert!(maths.reset_device().unwrap_err().is_device_error());
    assert!(maths.start_profiling().unwrap_err().is_device_error());

    let err = maths.mul2_chunk(&p, &one, &one, &mut out).unwrap_err();
    assert_eq!(err, GpumathsError::unsupported());
}

#[test]
#[cfg(not(feature = "cuda"))]
fn test_cuda_backend_without_support_builds_unsupported() {
    let maths = GpuMaths::with_backend(Backend::Cuda).expect("Cuda backend should still build");
    assert!(!maths.is_supported());
    assert!(!maths.device().is_available());

    let p = prime(MODP_2048);
    let one = vec![BigUint::one()];
    let mut out = vec![BigUint::default()];
    let err = maths.mul2_chunk(&p, &one, &one, &mut out).unwrap_err();
    assert_eq!(err, GpumathsError::unsupported());
    maths.destroy().unwrap();
}

#[test]
fn test_big_endian_device_matches_reference() {
    let p = prime(MODP_2048);
    let device = CpuDevice::with_config(
        CpuDeviceConfig::builder()
            .with_wire_order(ByteOrder::BigEndian)
            .build(),
    );
    let sizes = KernelSizes::new(BnWidth::Bits2048);
    let maths = GpuMaths::builder()
        .device(Arc::new(device))
        .for_modulus(&p)
        .pool_config(PoolConfig::containing(2, 16, OperationKind::Mul2, &sizes))
        .build()
        .unwrap();
    assert_eq!(maths.device().wire_order(), ByteOrder::BigEndian);

    let mut rng = StdRng::seed_from_u64(23);
    let n = 50;
    let a = below(&mut rng, &p, n);
    let b = below(&mut rng, &p, n);
    let mut results = vec![BigUint::default(); n];
    maths.mul2_chunk(&p, &a, &b, &mut results).unwrap();
    for i in 0..n {
        assert_eq!(results[i], reference::mul2(&p, &a[i], &b[i]), "slot {}", i);
    }
}

#[test]
fn test_modulus_takes_precedence_over_width() {
    let p = prime(MODP_2048);
    let maths = GpuMaths::builder()
        .backend(Backend::Cpu)
        .width(BnWidth::Bits4096)
        .for_modulus(&p)
        .build()
        .unwrap();
    assert_eq!(maths.dispatcher().width(), BnWidth::Bits2048);

    let maths = GpuMaths::builder()
        .backend(Backend::Cpu)
        .width(BnWidth::Bits2048)
        .build()
        .unwrap();
    assert_eq!(maths.dispatcher().width(), BnWidth::Bits2048);
}

#[test]
fn test_auto_without_fallback_is_unsupported() {
    if is_cuda_available() {
        return;
    }
    let maths = GpuMaths::builder().backend(Backend::Auto).build().unwrap();
    assert!(!maths.is_supported());

    let maths = GpuMaths::builder()
        .backend(Backend::Auto)
        .cpu_fallback(true)
        .build()
        .unwrap();
    assert!(maths.is_supported());
}

#[test]
fn test_modulus_too_wide_is_configuration_error() {
    let p = BigUint::one() << 4096usize;
    let err = GpuMaths::builder()
        .backend(Backend::Cpu)
        .for_modulus(&p)
        .build()
        .unwrap_err();
    assert!(err.is_configuration_error());
}

#[test]
fn test_device_control_passthrough() {
    let device = CpuDevice::new();
    let maths = GpuMaths::builder()
        .device(Arc::new(device.clone()))
        .build()
        .unwrap();

    maths.start_profiling().unwrap();
    assert!(device.is_profiling());
    maths.stop_profiling().unwrap();
    assert!(!device.is_profiling());

    maths.reset_device().unwrap();
    assert_eq!(device.resets(), 1);
}
