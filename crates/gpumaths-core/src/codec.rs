//! Fixed-width wire format for arbitrary-precision integers.
//!
//! Every integer crosses the host/device boundary as exactly `width` bytes.
//! The canonical form is little-endian: least-significant word first, and
//! least-significant byte first inside each word, with the unused high-order
//! region zero-filled. A value wider than `width` is a caller bug; the group
//! collaborator only hands over values reduced modulo a prime that fits.

use num_bigint::BigUint;

/// Size of one accelerator machine word in bytes.
pub const WORD_BYTES: usize = std::mem::size_of::<u64>();

/// Byte order of an integer inside its fixed-width wire slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Least-significant byte first, zero padding at the high end.
    #[default]
    LittleEndian,
    /// Most-significant byte first, zero padding at the low (leading) end.
    BigEndian,
}

/// Converts integers to and from fixed-width byte slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    width_bytes: usize,
    order: ByteOrder,
}

impl Codec {
    /// Create a codec for `width_bytes`-wide integers in the given order.
    ///
    /// # Panics
    ///
    /// Panics if `width_bytes` is zero or not a whole number of words.
    pub fn new(width_bytes: usize, order: ByteOrder) -> Self {
        assert!(
            width_bytes > 0 && width_bytes % WORD_BYTES == 0,
            "codec width must be a positive multiple of {} bytes, got {}",
            WORD_BYTES,
            width_bytes
        );
        Self { width_bytes, order }
    }

    /// Little-endian codec of the given width.
    pub fn little_endian(width_bytes: usize) -> Self {
        Self::new(width_bytes, ByteOrder::LittleEndian)
    }

    /// Width of one encoded integer in bytes.
    pub fn width_bytes(&self) -> usize {
        self.width_bytes
    }

    /// Width of one encoded integer in words.
    pub fn width_words(&self) -> usize {
        self.width_bytes / WORD_BYTES
    }

    /// Byte order of the wire slot.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Encode `value` into `dst`, which must be exactly one slot wide.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is not `width_bytes` long or `value` does not fit.
    pub fn encode(&self, value: &BigUint, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.width_bytes, "destination is not one slot wide");
        let le = value.to_bytes_le();
        // to_bytes_le yields [0] for zero
        let significant = if value.bits() == 0 { 0 } else { le.len() };
        assert!(
            significant <= self.width_bytes,
            "{}-byte integer does not fit a {}-byte slot",
            significant,
            self.width_bytes
        );
        dst[..significant].copy_from_slice(&le[..significant]);
        dst[significant..].fill(0);
        if self.order == ByteOrder::BigEndian {
            dst.reverse();
        }
    }

    /// Decode one slot back into an integer. Exact inverse of [`Codec::encode`].
    pub fn decode(&self, src: &[u8]) -> BigUint {
        assert_eq!(src.len(), self.width_bytes, "source is not one slot wide");
        match self.order {
            ByteOrder::LittleEndian => BigUint::from_bytes_le(src),
            ByteOrder::BigEndian => BigUint::from_bytes_be(src),
        }
    }

    /// Encode `value` into a word buffer, least-significant word first.
    pub fn encode_words(&self, value: &BigUint, dst: &mut [u64]) {
        encode_words(value, dst);
    }

    /// Decode a word buffer produced by [`Codec::encode_words`].
    pub fn decode_words(&self, src: &[u64]) -> BigUint {
        decode_words(src)
    }
}

/// Copy `value`'s significant words least-significant-first into `dst`,
/// zero-filling the remaining high-order words.
///
/// # Panics
///
/// Panics if `value` has more significant words than `dst.len()`.
pub fn encode_words(value: &BigUint, dst: &mut [u64]) {
    let digits = value.to_u64_digits();
    assert!(
        digits.len() <= dst.len(),
        "{}-word integer does not fit a {}-word buffer",
        digits.len(),
        dst.len()
    );
    dst[..digits.len()].copy_from_slice(&digits);
    dst[digits.len()..].fill(0);
}

/// Exact inverse of [`encode_words`].
pub fn decode_words(src: &[u64]) -> BigUint {
    let bytes: Vec<u8> = src.iter().flat_map(|w| w.to_le_bytes()).collect();
    BigUint::from_bytes_le(&bytes)
}

/// Write a host big-endian serialization into a little-endian slot.
///
/// `src_be` is the group collaborator's most-significant-byte-first form;
/// its bytes are reversed into the front of `dst` and the rest is zeroed.
///
/// # Panics
///
/// Panics if `src_be` is longer than `dst`.
pub fn put_int(dst: &mut [u8], src_be: &[u8]) {
    assert!(
        src_be.len() <= dst.len(),
        "{}-byte integer does not fit a {}-byte slot",
        src_be.len(),
        dst.len()
    );
    for (d, s) in dst.iter_mut().zip(src_be.iter().rev()) {
        *d = *s;
    }
    dst[src_be.len()..].fill(0);
}
