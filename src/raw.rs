//! The acquisition/release/transition operations, operating
//! directly on a bare lock word with no user data attached. This is the
//! literal state machine: R, S, W (reached only via S), X (reached only
//! from U), A, and the extended J/C rendezvous.
//!
//! Every `take_*` retries forever and never fails. Every
//! `try_*` reports success/failure without ever blocking past its own
//! reader-drain wait, and a failed upgrade (`try_rtos`/`try_rtoa`/
//! `try_rtow`) requires the caller to drop its R before retrying, or it may
//! deadlock against a concurrent S waiting for R to drain.

use crate::atomic::{cpu_relax, Ordering, Word};
use crate::backoff::wait_unlock;
use crate::word::{field_count, Layout};

/// Encodes the state of the J/C rendezvous "round" atomic that accompanies
/// the main lock word: `ZERO` means no round is active, any other value is
/// `baseline + ONE`, where `baseline` is the W field's count of holders that
/// are not part of the round (concurrent or in-flight `A` holders) as
/// observed the instant the round started. Kept in a separate atomic instead
/// of more bits in the word because the round's own W contributions and an
/// unrelated `A` holder's W contribution are otherwise indistinguishable.
#[inline]
fn round_is_active<W: Layout>(round: W) -> bool {
    !round.is_zero()
}

#[inline]
fn round_baseline<W: Layout>(round: W) -> W {
    W::wrapping_sub(round, W::ONE)
}

/// Joins the round already in progress, or starts one and snapshots the
/// current external W noise as its baseline. Only the caller that wins the
/// compare-exchange performs the snapshot; everyone else reads it back.
fn ensure_round_started<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) -> W {
    let mut observed = W::load(round, Ordering::Acquire);
    loop {
        if round_is_active(observed) {
            return round_baseline::<W>(observed);
        }
        let noise = field_count::<W>(W::load(atomic, Ordering::Acquire), W::W_ANY, W::W_SHIFT);
        let want = W::wrapping_add(noise, W::ONE);
        match W::compare_exchange(round, W::ZERO, want, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return noise,
            Err(cur) => observed = cur,
        }
    }
}

/// Tears down the round once every participant (winner and losers alike)
/// has released, i.e. once the global R field has drained to zero.
fn maybe_end_round<W: Layout>(atomic: &W::Atomic, round: &W::Atomic, after_readers: W) {
    if after_readers.is_zero() {
        W::fetch_and(atomic, W::bitnot(W::S1), Ordering::SeqCst);
        W::store(round, W::ZERO, Ordering::Release);
    }
}

// ---------------------------------------------------------------- R: read

/// Attempt read access without blocking. Never mutates the word on failure.
pub fn try_r<W: Layout>(atomic: &W::Atomic) -> bool {
    if !W::bitand(W::load(atomic, Ordering::Relaxed), W::W_ANY).is_zero() {
        return false;
    }
    let observed = W::fetch_add(atomic, W::R1, Ordering::SeqCst);
    if !W::bitand(observed, W::W_ANY).is_zero() {
        W::fetch_sub(atomic, W::R1, Ordering::SeqCst);
        return false;
    }
    true
}

/// Acquire read access, retrying forever under writer contention.
pub fn take_r<W: Layout>(atomic: &W::Atomic) {
    while !try_r::<W>(atomic) {
        wait_unlock::<W>(atomic, W::W_ANY);
    }
}

/// Release read access.
pub fn drop_r<W: Layout>(atomic: &W::Atomic) {
    let prev = W::fetch_sub(atomic, W::R1, Ordering::SeqCst);
    debug_assert!(
        !W::bitand(prev, W::R_ANY).is_zero(),
        "drop_r: R count underflow (double drop, or drop without a matching take_r/try_r)"
    );
}

// ---------------------------------------------------------------- S: seek

/// Attempt seek access without blocking.
pub fn try_s<W: Layout>(atomic: &W::Atomic) -> bool {
    let conflict = W::bitor(W::W_ANY, W::S_ANY);
    if !W::bitand(W::load(atomic, Ordering::Relaxed), conflict).is_zero() {
        return false;
    }
    let add = W::bitor(W::S1, W::R1);
    let observed = W::fetch_add(atomic, add, Ordering::SeqCst);
    if !W::bitand(observed, conflict).is_zero() {
        W::fetch_sub(atomic, add, Ordering::SeqCst);
        return false;
    }
    true
}

/// Acquire seek access, retrying forever until no other S or W holder
/// remains. At most one thread is ever granted S at a time.
pub fn take_s<W: Layout>(atomic: &W::Atomic) {
    while !try_s::<W>(atomic) {
        wait_unlock::<W>(atomic, W::bitor(W::W_ANY, W::S_ANY));
    }
}

/// Release S (and the R it implies) back to U.
pub fn drop_s<W: Layout>(atomic: &W::Atomic) {
    let prev = W::fetch_sub(atomic, W::bitor(W::S1, W::R1), Ordering::SeqCst);
    debug_assert!(!W::bitand(prev, W::S_ANY).is_zero(), "drop_s: S count underflow");
    debug_assert!(!W::bitand(prev, W::R_ANY).is_zero(), "drop_s: R count underflow");
}

// --------------------------------------------------- S <-> W (stow / wtos)

/// Upgrade a held S to W. The caller already holds S+R and is the only
/// thread that can be progressing to W, so waiting on readers alone
/// suffices.
pub fn stow<W: Layout>(atomic: &W::Atomic) {
    W::fetch_add(atomic, W::W1, Ordering::SeqCst);
    loop {
        let cur = W::load(atomic, Ordering::Acquire);
        if W::eq(W::bitand(cur, W::R_ANY), W::R1) {
            return;
        }
        cpu_relax();
    }
}

/// Downgrade a held W back to S. The caller retains S+R.
pub fn wtos<W: Layout>(atomic: &W::Atomic) {
    let prev = W::fetch_sub(atomic, W::W1, Ordering::SeqCst);
    debug_assert!(!W::bitand(prev, W::W_ANY).is_zero(), "wtos: W count underflow");
}

/// Release a W reached through S, back to U.
pub fn drop_w<W: Layout>(atomic: &W::Atomic) {
    let all = W::wrapping_add(W::wrapping_add(W::W1, W::S1), W::R1);
    let prev = W::fetch_sub(atomic, all, Ordering::SeqCst);
    debug_assert!(!W::bitand(prev, W::W_ANY).is_zero(), "drop_w: W count underflow");
    debug_assert!(!W::bitand(prev, W::S_ANY).is_zero(), "drop_w: S count underflow");
    debug_assert!(
        W::eq(W::bitand(prev, W::R_ANY), W::R1),
        "drop_w: caller does not hold the sole remaining R (readers have not drained)"
    );
}

// ------------------------------------------------------------ X: exclusive

/// Attempt the direct exclusive lock without retrying past the initial
/// conflict check; still waits out any readers once granted.
pub fn try_x<W: Layout>(atomic: &W::Atomic) -> bool {
    let conflict = W::bitor(W::W_ANY, W::S_ANY);
    if !W::bitand(W::load(atomic, Ordering::Relaxed), conflict).is_zero() {
        return false;
    }

    let add = W::bitor(W::W1, W::R1);
    let mut r = W::fetch_add(atomic, add, Ordering::SeqCst);
    loop {
        if !W::bitand(r, conflict).is_zero() {
            W::fetch_sub(atomic, add, Ordering::SeqCst);
            return false;
        }

        r = W::bitand(r, W::R_ANY);
        if r.is_zero() {
            break;
        }

        // Re-derive the external view by subtracting our own contribution.
        r = W::wrapping_sub(W::load(atomic, Ordering::Acquire), add);
    }
    true
}

/// Acquire the direct exclusive lock from U, retrying forever.
pub fn take_x<W: Layout>(atomic: &W::Atomic) {
    while !try_x::<W>(atomic) {
        wait_unlock::<W>(atomic, W::bitor(W::W_ANY, W::S_ANY));
    }
}

/// Release X back to U.
pub fn drop_x<W: Layout>(atomic: &W::Atomic) {
    let prev = W::fetch_sub(atomic, W::wrapping_add(W::W1, W::R1), Ordering::SeqCst);
    debug_assert!(!W::bitand(prev, W::W_ANY).is_zero(), "drop_x: W count underflow");
    debug_assert!(
        W::eq(W::bitand(prev, W::R_ANY), W::R1),
        "drop_x: caller does not hold the sole R (readers have not drained)"
    );
}

// ------------------------------------------------------------- A: atomic

/// Attempt to join the set of concurrent atomic writers. Refuses to start
/// (and backs out if one starts while it is still draining readers) while a
/// J/C rendezvous round is in progress, since that round's own election and
/// completion check cannot tell this holder's W contribution apart from its
/// own.
pub fn try_a<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) -> bool {
    if !W::bitand(W::load(atomic, Ordering::Relaxed), W::S_ANY).is_zero() {
        return false;
    }
    if round_is_active::<W>(W::load(round, Ordering::Relaxed)) {
        return false;
    }

    let mut r = W::fetch_add(atomic, W::W1, Ordering::SeqCst);
    loop {
        if !W::bitand(r, W::S_ANY).is_zero()
            || round_is_active::<W>(W::load(round, Ordering::Acquire))
        {
            W::fetch_sub(atomic, W::W1, Ordering::SeqCst);
            return false;
        }

        r = W::bitand(r, W::R_ANY);
        if r.is_zero() {
            break;
        }
        r = W::load(atomic, Ordering::Acquire);
    }
    true
}

/// Join the set of concurrent atomic writers, retrying forever.
pub fn take_a<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) {
    while !try_a::<W>(atomic, round) {
        wait_unlock::<W>(atomic, W::S_ANY);
    }
}

/// Leave the set of concurrent atomic writers.
pub fn drop_a<W: Layout>(atomic: &W::Atomic) {
    let prev = W::fetch_sub(atomic, W::W1, Ordering::SeqCst);
    debug_assert!(!W::bitand(prev, W::W_ANY).is_zero(), "drop_a: W count underflow");
}

// ------------------------------------------------------------- upgrades

/// Upgrade a held R to S. On failure the caller must drop R before
/// retrying, or it may deadlock against a concurrent S waiting
/// for R to drain.
pub fn try_rtos<W: Layout>(atomic: &W::Atomic) -> bool {
    let conflict = W::bitor(W::W_ANY, W::S_ANY);
    if !W::bitand(W::load(atomic, Ordering::Relaxed), conflict).is_zero() {
        return false;
    }
    let observed = W::fetch_add(atomic, W::S1, Ordering::SeqCst);
    if !W::bitand(observed, conflict).is_zero() {
        W::fetch_sub(atomic, W::S1, Ordering::SeqCst);
        return false;
    }
    true
}

/// Upgrade a held R to A: convert the caller's R into a W, then wait for
/// every other reader to drain or itself convert to A. Same failure
/// contract as [`try_rtos`], plus the same round-in-progress exclusion as
/// [`try_a`].
pub fn try_rtoa<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) -> bool {
    if !W::bitand(W::load(atomic, Ordering::Relaxed), W::S_ANY).is_zero() {
        return false;
    }
    if round_is_active::<W>(W::load(round, Ordering::Relaxed)) {
        return false;
    }

    let delta = W::wrapping_sub(W::W1, W::R1);
    let mut r = W::fetch_add(atomic, delta, Ordering::SeqCst);
    loop {
        if !W::bitand(r, W::S_ANY).is_zero()
            || round_is_active::<W>(W::load(round, Ordering::Acquire))
        {
            W::fetch_sub(atomic, delta, Ordering::SeqCst);
            return false;
        }

        r = W::bitand(r, W::R_ANY);
        if r.is_zero() {
            break;
        }
        r = W::load(atomic, Ordering::Acquire);
    }
    true
}

/// Upgrade a held R directly to W: [`try_rtos`] and [`stow`] fused into one
/// atomic add, so a caller that only ever wants the end state doesn't pay
/// for an externally observable intermediate S. Same failure contract as
/// [`try_rtos`].
pub fn try_rtow<W: Layout>(atomic: &W::Atomic) -> bool {
    let conflict = W::bitor(W::W_ANY, W::S_ANY);
    if !W::bitand(W::load(atomic, Ordering::Relaxed), conflict).is_zero() {
        return false;
    }

    let add = W::bitor(W::S1, W::W1);
    let observed = W::fetch_add(atomic, add, Ordering::SeqCst);
    if !W::bitand(observed, conflict).is_zero() {
        W::fetch_sub(atomic, add, Ordering::SeqCst);
        return false;
    }

    loop {
        let cur = W::load(atomic, Ordering::Acquire);
        if W::eq(W::bitand(cur, W::R_ANY), W::R1) {
            return true;
        }
        cpu_relax();
    }
}

// ------------------------------------------------- extended J/C/A path

/// Announce a write candidacy on top of a held R. Multiple readers may call
/// this concurrently; each holds R+W afterwards (the "J" state) once
/// successful. Fails (`None`) if an S appears (another thread already
/// committed, or a plain seeker is pending); the caller must drop R before
/// retrying. Succeeds (`Some`) once the W field, less any outside noise from
/// concurrent `A` holders, has caught up with the R field, meaning every
/// surviving reader in this round has also announced.
///
/// The `round` atomic exists so this round's own W contributions can be told
/// apart from an unrelated, independently live or in-flight `A` holder: the
/// first caller to reach a round snapshots the W field's non-round content
/// as a baseline, and every comparison below is against `writers - baseline`
/// rather than the raw field. The field
/// count alone still cannot distinguish "my" contribution from anyone
/// else's once more than one thread in the round has added to it, so
/// election is decided at the moment of the caller's own fetch-add instead:
/// `Some(true)` iff no other round participant had announced yet when this
/// call made its own, which is true for exactly one of any number of racing
/// announcers. Use `JoinGuard::last_writer` rather than re-deriving this
/// from a later load.
pub fn rtoj<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) -> Option<bool> {
    let baseline = ensure_round_started::<W>(atomic, round);

    let before = W::fetch_add(atomic, W::W1, Ordering::SeqCst);
    let writers_before = field_count::<W>(before, W::W_ANY, W::W_SHIFT);
    let elected = W::eq(writers_before, baseline);
    loop {
        let cur = W::load(atomic, Ordering::Acquire);
        if !W::bitand(cur, W::S_ANY).is_zero() {
            W::fetch_sub(atomic, W::W1, Ordering::SeqCst);
            return None;
        }
        let readers = field_count::<W>(cur, W::R_ANY, W::R_SHIFT);
        let writers = field_count::<W>(cur, W::W_ANY, W::W_SHIFT);
        if W::eq(W::wrapping_sub(writers, baseline), readers) {
            return Some(elected);
        }
        cpu_relax();
    }
}

/// Mark a J as committed (the elected writer calls this exactly once;
/// idempotent if called more than once, e.g. by a racing near-simultaneous
/// winner).
pub fn jtoc<W: Layout>(atomic: &W::Atomic) {
    W::fetch_or(atomic, W::S1, Ordering::SeqCst);
}

/// Step a claim back down to a plain A hold: drop the caller's R
/// contribution (leaving only its W, the A encoding), and once the reader
/// field has fully drained, clear the commit marker and end the round so a
/// future `rtoj` rendezvous can start clean.
pub fn ctoa<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) {
    let before = W::fetch_sub(atomic, W::R1, Ordering::SeqCst);
    debug_assert!(!W::bitand(before, W::R_ANY).is_zero(), "ctoa: R count underflow");
    let after_readers = W::bitand(W::wrapping_sub(before, W::R1), W::R_ANY);
    maybe_end_round::<W>(atomic, round, after_readers);
}

/// Fully release a claim (C) or join (J) hold back to U: drop the R and W
/// this thread contributed (via an earlier `take_r` plus [`rtoj`]), and once
/// the reader field has fully drained, clear the commit marker and end the
/// round. The commit marker and round must stay up until every reader has
/// drained, not just this caller's own: clearing them unconditionally would
/// let a fresh `take_a` acquire the word while another participant (e.g. the
/// elected committer, still mutating through a live [`ClaimGuard`]) holds an
/// R the global count has not yet accounted for.
pub fn drop_c<W: Layout>(atomic: &W::Atomic, round: &W::Atomic) {
    let prev = W::fetch_sub(atomic, W::wrapping_add(W::W1, W::R1), Ordering::SeqCst);
    debug_assert!(!W::bitand(prev, W::W_ANY).is_zero(), "drop_c: W count underflow");
    debug_assert!(!W::bitand(prev, W::R_ANY).is_zero(), "drop_c: R count underflow");
    let after_readers = W::bitand(W::wrapping_sub(prev, W::R1), W::R_ANY);
    maybe_end_round::<W>(atomic, round, after_readers);
}
