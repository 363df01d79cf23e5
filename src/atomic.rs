//! The atomic word contract: fetch-add/sub/or/and, compare-exchange,
//! plain load/store, and the CPU relax hint, abstracted over the machine word
//! width so the rest of the crate is written once instead of once per width.

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::Ordering;
#[cfg(loom)]
pub(crate) use loom::sync::atomic::Ordering;

#[cfg(not(loom))]
use core::sync::atomic::{AtomicU32, AtomicU64};
#[cfg(loom)]
use loom::sync::atomic::{AtomicU32, AtomicU64};

use spin::relax::{RelaxStrategy, Spin};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// A machine word the lock can be built over, plus the atomic it is stored as.
///
/// Implemented for `u32` and `u64` only; callers pick one as the `Word`
/// parameter of [`crate::lock::PLock`]. Not implementable outside this crate.
pub trait Word: sealed::Sealed + Copy + Eq + core::fmt::Debug + 'static {
    /// The atomic cell this word lives in.
    type Atomic;

    /// The all-zero word (the unlocked state).
    const ZERO: Self;

    /// The value `1`, untyped by any field shift. Used by the round-tracking
    /// atomic in [`crate::lock::PLock`], which is a plain counter rather than
    /// a bitfield word.
    const ONE: Self;

    fn new_atomic(v: Self) -> Self::Atomic;
    fn load(a: &Self::Atomic, order: Ordering) -> Self;
    fn store(a: &Self::Atomic, v: Self, order: Ordering);
    fn fetch_add(a: &Self::Atomic, v: Self, order: Ordering) -> Self;
    fn fetch_sub(a: &Self::Atomic, v: Self, order: Ordering) -> Self;
    fn fetch_or(a: &Self::Atomic, v: Self, order: Ordering) -> Self;
    fn fetch_and(a: &Self::Atomic, v: Self, order: Ordering) -> Self;
    fn compare_exchange(
        a: &Self::Atomic,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;

    fn is_zero(self) -> bool;
    fn bitand(self, rhs: Self) -> Self;
    fn bitor(self, rhs: Self) -> Self;
    fn bitnot(self) -> Self;
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn eq(self, rhs: Self) -> bool;
    fn shr(self, bits: u32) -> Self;
}

macro_rules! impl_word {
    ($ty:ty, $atomic:ty) => {
        impl Word for $ty {
            type Atomic = $atomic;

            const ZERO: Self = 0;
            const ONE: Self = 1;

            #[inline(always)]
            fn new_atomic(v: Self) -> Self::Atomic {
                <$atomic>::new(v)
            }

            #[inline(always)]
            fn load(a: &Self::Atomic, order: Ordering) -> Self {
                a.load(order)
            }

            #[inline(always)]
            fn store(a: &Self::Atomic, v: Self, order: Ordering) {
                a.store(v, order)
            }

            #[inline(always)]
            fn fetch_add(a: &Self::Atomic, v: Self, order: Ordering) -> Self {
                a.fetch_add(v, order)
            }

            #[inline(always)]
            fn fetch_sub(a: &Self::Atomic, v: Self, order: Ordering) -> Self {
                a.fetch_sub(v, order)
            }

            #[inline(always)]
            fn fetch_or(a: &Self::Atomic, v: Self, order: Ordering) -> Self {
                a.fetch_or(v, order)
            }

            #[inline(always)]
            fn fetch_and(a: &Self::Atomic, v: Self, order: Ordering) -> Self {
                a.fetch_and(v, order)
            }

            #[inline(always)]
            fn compare_exchange(
                a: &Self::Atomic,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                a.compare_exchange(current, new, success, failure)
            }

            #[inline(always)]
            fn is_zero(self) -> bool {
                self == 0
            }

            #[inline(always)]
            fn bitand(self, rhs: Self) -> Self {
                self & rhs
            }

            #[inline(always)]
            fn bitor(self, rhs: Self) -> Self {
                self | rhs
            }

            #[inline(always)]
            fn bitnot(self) -> Self {
                !self
            }

            #[inline(always)]
            fn wrapping_add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            #[inline(always)]
            fn wrapping_sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            #[inline(always)]
            fn eq(self, rhs: Self) -> bool {
                self == rhs
            }

            #[inline(always)]
            fn shr(self, bits: u32) -> Self {
                self >> bits
            }
        }
    };
}

impl_word!(u32, AtomicU32);
impl_word!(u64, AtomicU64);

/// Hint the CPU that we are spinning (`PAUSE` on x86, `ISB` on aarch64, a
/// no-op elsewhere). Delegates to `spin`'s relax strategy rather than hand
/// rolling per-arch inline assembly.
#[inline(always)]
pub(crate) fn cpu_relax() {
    Spin::relax();
}
