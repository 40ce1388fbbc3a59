//! Per-kind batch descriptors and chunk operations.
//!
//! Each operation kind is a thin [`KernelBatch`] over the caller's slices;
//! the operand order of `constant`/`input`/`store_output` is the order the
//! kernels read and write their buffers in.

use num_bigint::BigUint;

use crate::dispatch::{Dispatcher, KernelBatch};
use crate::error::Result;
use crate::sizes::OperationKind;
use crate::stream::StreamPool;

fn check_len(kind: OperationKind, what: &str, expected: usize, actual: usize) {
    assert_eq!(
        expected, actual,
        "{} batch: {} has {} entries, expected {}",
        kind, what, actual, expected
    );
}

/// `results[i] = bases[i]^exponents[i] mod modulus`.
pub struct ExpBatch<'a> {
    modulus: &'a BigUint,
    bases: &'a [BigUint],
    exponents: &'a [BigUint],
    results: &'a mut [BigUint],
}

impl<'a> ExpBatch<'a> {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(
        modulus: &'a BigUint,
        bases: &'a [BigUint],
        exponents: &'a [BigUint],
        results: &'a mut [BigUint],
    ) -> Self {
        let kind = OperationKind::Exp;
        check_len(kind, "exponents", bases.len(), exponents.len());
        check_len(kind, "results", bases.len(), results.len());
        Self {
            modulus,
            bases,
            exponents,
            results,
        }
    }
}

impl KernelBatch for ExpBatch<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Exp
    }

    fn len(&self) -> usize {
        self.bases.len()
    }

    fn constant(&self, _index: usize) -> &BigUint {
        self.modulus
    }

    fn input(&self, slot: usize, operand: usize) -> &BigUint {
        match operand {
            0 => &self.bases[slot],
            _ => &self.exponents[slot],
        }
    }

    fn store_output(&mut self, slot: usize, _operand: usize, value: BigUint) {
        self.results[slot] = value;
    }
}

/// ElGamal transform, in place over `ecr_keys` and `cyphers`:
///
/// `ecr_keys[i] = ecr_keys[i] * keys[i] * generator^private_keys[i] mod modulus`,
/// `cyphers[i] = cyphers[i] * public_key^private_keys[i] mod modulus`.
pub struct ElGamalBatch<'a> {
    generator: &'a BigUint,
    modulus: &'a BigUint,
    public_key: &'a BigUint,
    private_keys: &'a [BigUint],
    keys: &'a [BigUint],
    ecr_keys: &'a mut [BigUint],
    cyphers: &'a mut [BigUint],
}

impl<'a> ElGamalBatch<'a> {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(
        generator: &'a BigUint,
        modulus: &'a BigUint,
        public_key: &'a BigUint,
        private_keys: &'a [BigUint],
        keys: &'a [BigUint],
        ecr_keys: &'a mut [BigUint],
        cyphers: &'a mut [BigUint],
    ) -> Self {
        let kind = OperationKind::ElGamal;
        let n = private_keys.len();
        check_len(kind, "keys", n, keys.len());
        check_len(kind, "ecr_keys", n, ecr_keys.len());
        check_len(kind, "cyphers", n, cyphers.len());
        Self {
            generator,
            modulus,
            public_key,
            private_keys,
            keys,
            ecr_keys,
            cyphers,
        }
    }
}

impl KernelBatch for ElGamalBatch<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::ElGamal
    }

    fn len(&self) -> usize {
        self.private_keys.len()
    }

    fn constant(&self, index: usize) -> &BigUint {
        match index {
            0 => self.generator,
            1 => self.modulus,
            _ => self.public_key,
        }
    }

    fn input(&self, slot: usize, operand: usize) -> &BigUint {
        match operand {
            0 => &self.private_keys[slot],
            1 => &self.keys[slot],
            2 => &self.ecr_keys[slot],
            _ => &self.cyphers[slot],
        }
    }

    fn store_output(&mut self, slot: usize, operand: usize, value: BigUint) {
        match operand {
            0 => self.ecr_keys[slot] = value,
            _ => self.cyphers[slot] = value,
        }
    }
}

/// `results[i] = a[i] * b[i] mod modulus`.
pub struct Mul2Batch<'a> {
    modulus: &'a BigUint,
    a: &'a [BigUint],
    b: &'a [BigUint],
    results: &'a mut [BigUint],
}

impl<'a> Mul2Batch<'a> {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(
        modulus: &'a BigUint,
        a: &'a [BigUint],
        b: &'a [BigUint],
        results: &'a mut [BigUint],
    ) -> Self {
        let kind = OperationKind::Mul2;
        check_len(kind, "b", a.len(), b.len());
        check_len(kind, "results", a.len(), results.len());
        Self {
            modulus,
            a,
            b,
            results,
        }
    }
}

impl KernelBatch for Mul2Batch<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Mul2
    }

    fn len(&self) -> usize {
        self.a.len()
    }

    fn constant(&self, _index: usize) -> &BigUint {
        self.modulus
    }

    fn input(&self, slot: usize, operand: usize) -> &BigUint {
        match operand {
            0 => &self.a[slot],
            _ => &self.b[slot],
        }
    }

    fn store_output(&mut self, slot: usize, _operand: usize, value: BigUint) {
        self.results[slot] = value;
    }
}

/// `results[i] = a[i] * b[i] * c[i] mod modulus`.
pub struct Mul3Batch<'a> {
    modulus: &'a BigUint,
    a: &'a [BigUint],
    b: &'a [BigUint],
    c: &'a [BigUint],
    results: &'a mut [BigUint],
}

impl<'a> Mul3Batch<'a> {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(
        modulus: &'a BigUint,
        a: &'a [BigUint],
        b: &'a [BigUint],
        c: &'a [BigUint],
        results: &'a mut [BigUint],
    ) -> Self {
        let kind = OperationKind::Mul3;
        check_len(kind, "b", a.len(), b.len());
        check_len(kind, "c", a.len(), c.len());
        check_len(kind, "results", a.len(), results.len());
        Self {
            modulus,
            a,
            b,
            c,
            results,
        }
    }
}

impl KernelBatch for Mul3Batch<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Mul3
    }

    fn len(&self) -> usize {
        self.a.len()
    }

    fn constant(&self, _index: usize) -> &BigUint {
        self.modulus
    }

    fn input(&self, slot: usize, operand: usize) -> &BigUint {
        match operand {
            0 => &self.a[slot],
            1 => &self.b[slot],
            _ => &self.c[slot],
        }
    }

    fn store_output(&mut self, slot: usize, _operand: usize, value: BigUint) {
        self.results[slot] = value;
    }
}

/// Root-coprime reveal, in place:
/// `cyphers[i] = cyphers[i]^(public_key^-1 mod (modulus - 1)) mod modulus`.
pub struct RevealBatch<'a> {
    modulus: &'a BigUint,
    public_key: &'a BigUint,
    cyphers: &'a mut [BigUint],
}

impl<'a> RevealBatch<'a> {
    /// Batch over `cyphers`.
    pub fn new(modulus: &'a BigUint, public_key: &'a BigUint, cyphers: &'a mut [BigUint]) -> Self {
        Self {
            modulus,
            public_key,
            cyphers,
        }
    }
}

impl KernelBatch for RevealBatch<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Reveal
    }

    fn len(&self) -> usize {
        self.cyphers.len()
    }

    fn constant(&self, index: usize) -> &BigUint {
        match index {
            0 => self.modulus,
            _ => self.public_key,
        }
    }

    fn input(&self, slot: usize, _operand: usize) -> &BigUint {
        &self.cyphers[slot]
    }

    fn store_output(&mut self, slot: usize, _operand: usize, value: BigUint) {
        self.cyphers[slot] = value;
    }
}

/// Strip a precomputation off a cypher:
/// `results[i] = (precomputations[i]^(public_key^-1 mod (modulus - 1)))^-1 * cyphers[i] mod modulus`.
pub struct StripBatch<'a> {
    modulus: &'a BigUint,
    public_key: &'a BigUint,
    precomputations: &'a [BigUint],
    cyphers: &'a [BigUint],
    results: &'a mut [BigUint],
}

impl<'a> StripBatch<'a> {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn new(
        modulus: &'a BigUint,
        public_key: &'a BigUint,
        precomputations: &'a [BigUint],
        cyphers: &'a [BigUint],
        results: &'a mut [BigUint],
    ) -> Self {
        let kind = OperationKind::Strip;
        check_len(kind, "cyphers", precomputations.len(), cyphers.len());
        check_len(kind, "results", precomputations.len(), results.len());
        Self {
            modulus,
            public_key,
            precomputations,
            cyphers,
            results,
        }
    }
}

impl KernelBatch for StripBatch<'_> {
    fn kind(&self) -> OperationKind {
        OperationKind::Strip
    }

    fn len(&self) -> usize {
        self.precomputations.len()
    }

    fn constant(&self, index: usize) -> &BigUint {
        match index {
            0 => self.modulus,
            _ => self.public_key,
        }
    }

    fn input(&self, slot: usize, operand: usize) -> &BigUint {
        match operand {
            0 => &self.precomputations[slot],
            _ => &self.cyphers[slot],
        }
    }

    fn store_output(&mut self, slot: usize, _operand: usize, value: BigUint) {
        self.results[slot] = value;
    }
}

impl Dispatcher {
    /// Chunked modular exponentiation.
    pub fn exp_chunk(
        &self,
        pool: &StreamPool,
        modulus: &BigUint,
        bases: &[BigUint],
        exponents: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run_chunk(pool, &mut ExpBatch::new(modulus, bases, exponents, results))
    }

    /// Chunked ElGamal transform, in place over `ecr_keys` and `cyphers`.
    #[allow(clippy::too_many_arguments)]
    pub fn elgamal_chunk(
        &self,
        pool: &StreamPool,
        generator: &BigUint,
        modulus: &BigUint,
        public_key: &BigUint,
        private_keys: &[BigUint],
        keys: &[BigUint],
        ecr_keys: &mut [BigUint],
        cyphers: &mut [BigUint],
    ) -> Result<()> {
        let mut batch = ElGamalBatch::new(
            generator,
            modulus,
            public_key,
            private_keys,
            keys,
            ecr_keys,
            cyphers,
        );
        self.run_chunk(pool, &mut batch)
    }

    /// Chunked two-operand modular product.
    pub fn mul2_chunk(
        &self,
        pool: &StreamPool,
        modulus: &BigUint,
        a: &[BigUint],
        b: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run_chunk(pool, &mut Mul2Batch::new(modulus, a, b, results))
    }

    /// Chunked three-operand modular product.
    pub fn mul3_chunk(
        &self,
        pool: &StreamPool,
        modulus: &BigUint,
        a: &[BigUint],
        b: &[BigUint],
        c: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        self.run_chunk(pool, &mut Mul3Batch::new(modulus, a, b, c, results))
    }

    /// Chunked reveal, in place over `cyphers`.
    pub fn reveal_chunk(
        &self,
        pool: &StreamPool,
        modulus: &BigUint,
        public_key: &BigUint,
        cyphers: &mut [BigUint],
    ) -> Result<()> {
        self.run_chunk(pool, &mut RevealBatch::new(modulus, public_key, cyphers))
    }

    /// Chunked strip.
    pub fn strip_chunk(
        &self,
        pool: &StreamPool,
        modulus: &BigUint,
        public_key: &BigUint,
        precomputations: &[BigUint],
        cyphers: &[BigUint],
        results: &mut [BigUint],
    ) -> Result<()> {
        let mut batch = StripBatch::new(modulus, public_key, precomputations, cyphers, results);
        self.run_chunk(pool, &mut batch)
    }
}
