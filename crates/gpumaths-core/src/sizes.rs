//! Kernel size registry.
//!
//! Byte and word sizes of every operation kind's constants, per-slot inputs
//! and per-slot outputs, for one accelerator integer width. A [`KernelSizes`]
//! is built once and shared; nothing here is global.

use std::fmt;

use num_bigint::BigUint;

use crate::codec::WORD_BYTES;
use crate::error::{GpumathsError, Result};

/// Accelerator integer width. Fixed per configuration, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BnWidth {
    /// 2048-bit integers.
    Bits2048,
    /// 4096-bit integers.
    Bits4096,
}

impl BnWidth {
    /// All supported widths, narrowest first.
    pub const ALL: [BnWidth; 2] = [BnWidth::Bits2048, BnWidth::Bits4096];

    /// Width in bits.
    pub const fn bits(self) -> usize {
        match self {
            BnWidth::Bits2048 => 2048,
            BnWidth::Bits4096 => 4096,
        }
    }

    /// Width in bytes.
    pub const fn bytes(self) -> usize {
        self.bits() / 8
    }

    /// Width in machine words.
    pub const fn words(self) -> usize {
        self.bytes() / WORD_BYTES
    }

    /// Width whose integers are `bytes` long.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.bytes() == bytes)
    }

    /// Smallest width that holds every residue of `modulus`.
    pub fn for_modulus(modulus: &BigUint) -> Result<Self> {
        let bits = modulus.bits() as usize;
        Self::ALL
            .into_iter()
            .find(|w| bits <= w.bits())
            .ok_or_else(|| {
                GpumathsError::Configuration(format!(
                    "{}-bit modulus is wider than the widest supported integer ({} bits)",
                    bits,
                    BnWidth::Bits4096.bits()
                ))
            })
    }
}

impl fmt::Display for BnWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Operand counts of one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Values shared by every slot of a batch.
    pub constants: usize,
    /// Per-slot input operands.
    pub inputs: usize,
    /// Per-slot output operands.
    pub outputs: usize,
}

/// Accelerator-side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// `base^exponent mod p`.
    Exp,
    /// ElGamal transform of an encrypted key and cypher.
    ElGamal,
    /// Product of two operands mod p.
    Mul2,
    /// Product of three operands mod p.
    Mul3,
    /// Root-coprime reveal of a cypher.
    Reveal,
    /// Strip a precomputation off a cypher.
    Strip,
}

impl OperationKind {
    /// All operation kinds.
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Exp,
        OperationKind::ElGamal,
        OperationKind::Mul2,
        OperationKind::Mul3,
        OperationKind::Reveal,
        OperationKind::Strip,
    ];

    /// Operand counts.
    pub const fn arity(self) -> Arity {
        let (constants, inputs, outputs) = match self {
            OperationKind::Exp => (1, 2, 1),
            OperationKind::ElGamal => (3, 4, 2),
            OperationKind::Mul2 => (1, 2, 1),
            OperationKind::Mul3 => (1, 3, 1),
            OperationKind::Reveal => (2, 1, 1),
            OperationKind::Strip => (2, 2, 1),
        };
        Arity {
            constants,
            inputs,
            outputs,
        }
    }

    /// Stable kernel name.
    pub const fn name(self) -> &'static str {
        match self {
            OperationKind::Exp => "ExpChunk",
            OperationKind::ElGamal => "ElGamalChunk",
            OperationKind::Mul2 => "Mul2Chunk",
            OperationKind::Mul3 => "Mul3Chunk",
            OperationKind::Reveal => "RevealChunk",
            OperationKind::Strip => "StripChunk",
        }
    }

    /// Slots per batch the server pipeline prefers to feed this kernel.
    pub const fn preferred_chunk_slots(self) -> usize {
        match self {
            OperationKind::Exp | OperationKind::Mul2 | OperationKind::Mul3 => 256,
            OperationKind::ElGamal | OperationKind::Strip => 128,
            OperationKind::Reveal => 64,
        }
    }

    const fn index(self) -> usize {
        match self {
            OperationKind::Exp => 0,
            OperationKind::ElGamal => 1,
            OperationKind::Mul2 => 2,
            OperationKind::Mul3 => 3,
            OperationKind::Reveal => 4,
            OperationKind::Strip => 5,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KindSizes {
    constants: usize,
    input: usize,
    output: usize,
}

/// Per-kind sizing for one integer width. All sizes are in bytes unless the
/// method name says words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSizes {
    width: BnWidth,
    table: [KindSizes; 6],
}

impl KernelSizes {
    /// Compute the size table for `width`.
    pub fn new(width: BnWidth) -> Self {
        let int = width.bytes();
        let table = OperationKind::ALL.map(|kind| {
            let arity = kind.arity();
            KindSizes {
                constants: arity.constants * int,
                input: arity.inputs * int,
                output: arity.outputs * int,
            }
        });
        Self { width, table }
    }

    /// Integer width these sizes were computed for.
    pub fn width(&self) -> BnWidth {
        self.width
    }

    /// Bytes per encoded integer.
    pub fn int_bytes(&self) -> usize {
        self.width.bytes()
    }

    fn entry(&self, kind: OperationKind) -> &KindSizes {
        &self.table[kind.index()]
    }

    /// Bytes of shared constants.
    pub fn constants_size(&self, kind: OperationKind) -> usize {
        self.entry(kind).constants
    }

    /// Bytes of inputs per slot.
    pub fn input_size(&self, kind: OperationKind) -> usize {
        self.entry(kind).input
    }

    /// Bytes of outputs per slot.
    pub fn output_size(&self, kind: OperationKind) -> usize {
        self.entry(kind).output
    }

    /// Words of shared constants.
    pub fn constants_words(&self, kind: OperationKind) -> usize {
        self.constants_size(kind) / WORD_BYTES
    }

    /// Words of inputs per slot.
    pub fn input_words(&self, kind: OperationKind) -> usize {
        self.input_size(kind) / WORD_BYTES
    }

    /// Words of outputs per slot.
    pub fn output_words(&self, kind: OperationKind) -> usize {
        self.output_size(kind) / WORD_BYTES
    }

    /// Bytes one slot occupies (inputs plus outputs).
    pub fn slot_size(&self, kind: OperationKind) -> usize {
        self.input_size(kind) + self.output_size(kind)
    }

    /// Slots of `kind` that fit in `budget` bytes. Zero when the budget does
    /// not even hold the constants.
    pub fn max_slots(&self, budget: usize, kind: OperationKind) -> usize {
        budget.saturating_sub(self.constants_size(kind)) / self.slot_size(kind)
    }

    /// Buffer bytes needed to hold `num_items` slots of `kind` in one chunk.
    pub fn stream_size_containing(&self, num_items: usize, kind: OperationKind) -> usize {
        self.constants_size(kind) + num_items * self.slot_size(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_table() {
        let elgamal = OperationKind::ElGamal.arity();
        assert_eq!((elgamal.constants, elgamal.inputs, elgamal.outputs), (3, 4, 2));
        let strip = OperationKind::Strip.arity();
        assert_eq!((strip.constants, strip.inputs, strip.outputs), (2, 2, 1));
    }

    #[test]
    fn test_sizes_2048() {
        let sizes = KernelSizes::new(BnWidth::Bits2048);
        assert_eq!(sizes.constants_size(OperationKind::Exp), 256);
        assert_eq!(sizes.input_size(OperationKind::Exp), 512);
        assert_eq!(sizes.output_size(OperationKind::Exp), 256);
        assert_eq!(sizes.input_words(OperationKind::Mul3), 96);
    }

    #[test]
    fn test_max_slots_below_constants() {
        let sizes = KernelSizes::new(BnWidth::Bits4096);
        for kind in OperationKind::ALL {
            let constants = sizes.constants_size(kind);
            assert_eq!(sizes.max_slots(0, kind), 0);
            assert_eq!(sizes.max_slots(constants - 1, kind), 0);
            assert_eq!(sizes.max_slots(constants, kind), 0);
        }
    }

    #[test]
    fn test_max_slots_monotonic() {
        let sizes = KernelSizes::new(BnWidth::Bits2048);
        for kind in OperationKind::ALL {
            let mut prev = 0;
            for budget in (0..40_000).step_by(97) {
                let slots = sizes.max_slots(budget, kind);
                assert!(slots >= prev, "{kind} not monotonic at {budget}");
                prev = slots;
            }
        }
    }

    #[test]
    fn test_stream_size_containing_round_trip() {
        for width in BnWidth::ALL {
            let sizes = KernelSizes::new(width);
            for kind in OperationKind::ALL {
                for n in [0, 1, 2, 7, 64, 255, 1000] {
                    let budget = sizes.stream_size_containing(n, kind);
                    assert!(sizes.max_slots(budget, kind) >= n);
                    assert_eq!(sizes.max_slots(budget, kind), n);
                }
            }
        }
    }

    #[test]
    fn test_default_pool_capacity() {
        // a default 64 KiB stream
        let sizes = KernelSizes::new(BnWidth::Bits4096);
        assert_eq!(sizes.max_slots(65536, OperationKind::Exp), 42);
    }

    #[test]
    fn test_width_for_modulus() {
        let p2048 = (BigUint::from(1u8) << 2047u32) + 1u8;
        let p4096 = (BigUint::from(1u8) << 4095u32) + 1u8;
        assert_eq!(BnWidth::for_modulus(&BigUint::from(23u8)).unwrap(), BnWidth::Bits2048);
        assert_eq!(BnWidth::for_modulus(&p2048).unwrap(), BnWidth::Bits2048);
        assert_eq!(BnWidth::for_modulus(&p4096).unwrap(), BnWidth::Bits4096);
        let err = BnWidth::for_modulus(&(BigUint::from(1u8) << 4096u32)).unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(BnWidth::from_bytes(512), Some(BnWidth::Bits4096));
        assert_eq!(BnWidth::from_bytes(100), None);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(OperationKind::Reveal.to_string(), "RevealChunk");
        assert_eq!(OperationKind::Reveal.preferred_chunk_slots(), 64);
    }
}
