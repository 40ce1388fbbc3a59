//! Reference arithmetic for every operation kind.
//!
//! These are the results the accelerator kernels must reproduce. They run
//! inside the CPU device and serve as the checking oracle in tests.

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{One, Zero};

use gpumaths_core::sizes::OperationKind;

/// `a^-1 mod m`, if `a` is invertible.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() {
        return None;
    }
    let a = BigInt::from(a % m);
    let m = BigInt::from(m.clone());
    let egcd = a.extended_gcd(&m);
    if !egcd.gcd.is_one() {
        return None;
    }
    egcd.x.mod_floor(&m).to_biguint()
}

/// `base^exponent mod modulus`.
pub fn exp(modulus: &BigUint, base: &BigUint, exponent: &BigUint) -> BigUint {
    base.modpow(exponent, modulus)
}

/// ElGamal transform of one slot. Returns `(ecr_key, cypher)`:
///
/// `ecr_key * key * generator^private_key mod modulus` and
/// `cypher * public_key^private_key mod modulus`.
pub fn elgamal(
    generator: &BigUint,
    modulus: &BigUint,
    public_key: &BigUint,
    private_key: &BigUint,
    key: &BigUint,
    ecr_key: &BigUint,
    cypher: &BigUint,
) -> (BigUint, BigUint) {
    let masked = generator.modpow(private_key, modulus);
    let ecr = (ecr_key * key % modulus) * masked % modulus;
    let cypher = cypher * public_key.modpow(private_key, modulus) % modulus;
    (ecr, cypher)
}

/// `a * b mod modulus`.
pub fn mul2(modulus: &BigUint, a: &BigUint, b: &BigUint) -> BigUint {
    a * b % modulus
}

/// `a * b * c mod modulus`.
pub fn mul3(modulus: &BigUint, a: &BigUint, b: &BigUint, c: &BigUint) -> BigUint {
    (a * b % modulus) * c % modulus
}

/// `value^(key^-1 mod (modulus - 1)) mod modulus`. `None` if `key` is not
/// coprime with `modulus - 1`.
pub fn root_coprime(modulus: &BigUint, key: &BigUint, value: &BigUint) -> Option<BigUint> {
    if modulus <= &BigUint::one() {
        return None;
    }
    let order = modulus - 1u8;
    let root = mod_inverse(key, &order)?;
    Some(value.modpow(&root, modulus))
}

/// Reveal one cypher: its root under the public cypher key.
pub fn reveal(modulus: &BigUint, public_key: &BigUint, cypher: &BigUint) -> Option<BigUint> {
    root_coprime(modulus, public_key, cypher)
}

/// Strip one slot: the inverse of the precomputation's root, times the cypher.
pub fn strip(
    modulus: &BigUint,
    public_key: &BigUint,
    precomputation: &BigUint,
    cypher: &BigUint,
) -> Option<BigUint> {
    let root = root_coprime(modulus, public_key, precomputation)?;
    let inverse = mod_inverse(&root, modulus)?;
    Some(inverse * cypher % modulus)
}

/// Outputs of one slot of `kind`, given the batch constants and the slot's
/// inputs in kernel order. `None` when the slot has no defined result (a
/// required inverse does not exist).
pub fn compute_slot(
    kind: OperationKind,
    constants: &[BigUint],
    inputs: &[BigUint],
) -> Option<Vec<BigUint>> {
    let arity = kind.arity();
    debug_assert_eq!(constants.len(), arity.constants);
    debug_assert_eq!(inputs.len(), arity.inputs);

    let outputs = match kind {
        OperationKind::Exp => vec![exp(&constants[0], &inputs[0], &inputs[1])],
        OperationKind::ElGamal => {
            let (ecr, cypher) = elgamal(
                &constants[0],
                &constants[1],
                &constants[2],
                &inputs[0],
                &inputs[1],
                &inputs[2],
                &inputs[3],
            );
            vec![ecr, cypher]
        }
        OperationKind::Mul2 => vec![mul2(&constants[0], &inputs[0], &inputs[1])],
        OperationKind::Mul3 => vec![mul3(&constants[0], &inputs[0], &inputs[1], &inputs[2])],
        OperationKind::Reveal => vec![reveal(&constants[0], &constants[1], &inputs[0])?],
        OperationKind::Strip => vec![strip(&constants[0], &constants[1], &inputs[0], &inputs[1])?],
    };
    Some(outputs)
}
