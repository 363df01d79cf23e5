//! The lock-word field layout: reserved tag bits, the R (reader)
//! field, the S (seeker) field, and the W (writer) field, for both the
//! 32-bit and 64-bit instantiations of [`crate::atomic::Word`].
//!
//! The unit increment and full mask of each field are exposed as associated
//! constants on [`Layout`] rather than generated per architecture by a
//! preprocessor, to make this compile-time generic instead.

use crate::atomic::{Ordering, Word};

/// Field constants for one word width. Sealed to `u32`/`u64` via [`Word`].
pub trait Layout: Word {
    /// `1 << low_bit_of(R)`.
    const R1: Self;
    /// Mask covering every bit of the R field.
    const R_ANY: Self;
    /// `1 << low_bit_of(S)`.
    const S1: Self;
    /// Mask covering every bit of the S field.
    const S_ANY: Self;
    /// `1 << low_bit_of(W)`.
    const W1: Self;
    /// Mask covering every bit of the W field.
    const W_ANY: Self;
    /// Mask covering the two caller-owned reserved low bits.
    const TAG_ANY: Self;

    /// Bit position of the lowest R bit; used only to compare the R and W
    /// field *counts* against each other (the J/C/A rendezvous), since the
    /// two fields sit at different offsets.
    const R_SHIFT: u32;
    /// Bit position of the lowest W bit.
    const W_SHIFT: u32;
}

/// Extracts the count held in `mask`'s field, normalized to an integer
/// starting at bit 0, so counts from different fields become comparable.
#[inline]
pub(crate) fn field_count<W: Layout>(word: W, mask: W, shift: u32) -> W {
    W::shr(W::bitand(word, mask), shift)
}

impl Layout for u32 {
    // reserved: bits 0-1
    const TAG_ANY: Self = 0x0000_0003;
    // R: bits 2-15 (14 bits)
    const R1: Self = 0x0000_0004;
    const R_ANY: Self = 0x0000_FFFC;
    // S: bits 16-17 (2 bits)
    const S1: Self = 0x0001_0000;
    const S_ANY: Self = 0x0003_0000;
    // W: bits 18-31 (14 bits)
    const W1: Self = 0x0004_0000;
    const W_ANY: Self = 0xFFFC_0000;

    const R_SHIFT: u32 = 2;
    const W_SHIFT: u32 = 18;
}

impl Layout for u64 {
    // reserved: bits 0-1
    const TAG_ANY: Self = 0x0000_0000_0000_0003;
    // R: bits 2-31 (30 bits)
    const R1: Self = 0x0000_0000_0000_0004;
    const R_ANY: Self = 0x0000_0000_FFFF_FFFC;
    // S: bits 32-33 (2 bits)
    const S1: Self = 0x0000_0001_0000_0000;
    const S_ANY: Self = 0x0000_0003_0000_0000;
    // W: bits 34-63 (30 bits)
    const W1: Self = 0x0000_0004_0000_0000;
    const W_ANY: Self = 0xFFFF_FFFC_0000_0000;

    const R_SHIFT: u32 = 2;
    const W_SHIFT: u32 = 34;
}

static_assertions::const_assert_eq!(<u32 as Layout>::R_ANY & <u32 as Layout>::S_ANY, 0);
static_assertions::const_assert_eq!(<u32 as Layout>::S_ANY & <u32 as Layout>::W_ANY, 0);
static_assertions::const_assert_eq!(<u64 as Layout>::R_ANY & <u64 as Layout>::S_ANY, 0);
static_assertions::const_assert_eq!(<u64 as Layout>::S_ANY & <u64 as Layout>::W_ANY, 0);

/// Reads the two reserved low bits, leaving the rest of the word untouched.
///
/// This is the only sanctioned way to read the caller-owned tag while the
/// lock may be held in any state other than `U`.
#[inline]
pub fn load_tag_bits<W: Layout>(atomic: &W::Atomic) -> W {
    W::bitand(W::load(atomic, Ordering::Acquire), W::TAG_ANY)
}

/// Overwrites the two reserved low bits with `tag & TAG_ANY`, via a
/// compare-exchange retry loop so the update never disturbs a concurrent
/// R/S/W mutation of the rest of the word.
#[inline]
pub fn store_tag_bits<W: Layout>(atomic: &W::Atomic, tag: W) {
    let tag = W::bitand(tag, W::TAG_ANY);
    let mut cur = W::load(atomic, Ordering::Relaxed);
    loop {
        let next = W::bitor(W::bitand(cur, W::bitnot(W::TAG_ANY)), tag);
        match W::compare_exchange(atomic, cur, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => cur = observed,
        }
    }
}
