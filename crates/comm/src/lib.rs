//! # Comm — the parallel-runtime seam
//!
//! Launch-time code in this workspace is generic over [`Comm`], a small
//! communicator surface modeled on the profiling layer of an MPI runtime:
//! ranks, broadcast, non-blocking point-to-point sends, tag-matched
//! receives, communicator splitting, barriers, and a whole-world abort.
//!
//! Two kinds of implementation make sense. [`LocalComm`] (provided here)
//! runs every rank as a thread of one process and backs the test harness.
//! A production backend wraps the real runtime's entry points; the
//! partitioning protocol never needs to know which one it is talking to.

mod local;

pub use local::LocalComm;

use thiserror::Error;

/// Message tag for selective receives.
///
/// Tags at and above [`RESERVED_TAGS`] are reserved for internal traffic
/// (collectives are implemented over point-to-point in some backends).
pub type Tag = u16;

/// First reserved tag value; application protocols must stay below this.
pub const RESERVED_TAGS: Tag = 0xff00;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommError {
    /// The world was aborted; every pending and future operation on any
    /// member fails with this error.
    #[error("allocation aborted with code {code}")]
    Aborted { code: i32 },
    /// A message did not fit, or a collective saw mismatched buffer sizes.
    #[error("short message: {expected} bytes sent, {actual} available")]
    ShortMessage { expected: usize, actual: usize },
}

/// Handle for a non-blocking send. Dropping without waiting is legal; the
/// send still completes, but its outcome is unobserved.
pub trait Request {
    /// Blocks until the send is delivered.
    fn wait(self) -> Result<(), CommError>;
}

/// A communicator: one handle per participating rank.
///
/// All collective operations (`broadcast`, `split`, `barrier`) must be
/// called by every member of the world, in the same order.
pub trait Comm: Sized {
    type Request: Request;

    /// This process's rank in `[0, size)`.
    fn rank(&self) -> u32;

    /// Number of ranks in this world.
    fn size(&self) -> u32;

    /// True if both handles refer to the same world (not merely worlds of
    /// equal size). This is the identity test world substitution relies on.
    fn same_world(&self, other: &Self) -> bool;

    /// Collective: copies `buf` from `root` into every rank's `buf`.
    /// Buffer lengths must match across ranks.
    fn broadcast(&self, root: u32, buf: &mut [u8]) -> Result<(), CommError>;

    /// Posts a non-blocking send of `payload` to `dest`.
    fn isend(&self, dest: u32, tag: Tag, payload: &[u8]) -> Result<Self::Request, CommError>;

    /// Blocks for the next message from `src` with `tag`, copies it into
    /// `buf`, and returns its length. Messages from one sender with one tag
    /// arrive in the order they were sent.
    fn recv(&self, src: u32, tag: Tag, buf: &mut [u8]) -> Result<usize, CommError>;

    /// Collective: partitions the world by `color`. Ranks passing the same
    /// `Some(color)` end up in a fresh sub-world ordered by `(key, rank)`;
    /// ranks passing `None` get `Ok(None)` back and join no sub-world.
    fn split(&self, color: Option<u32>, key: u32) -> Result<Option<Self>, CommError>;

    /// Collective: returns once every rank has entered the barrier.
    fn barrier(&self) -> Result<(), CommError>;

    /// Aborts the whole world. Poisons every member so blocked and future
    /// operations fail; returns the error the caller should propagate. A
    /// production backend does not return at all.
    fn abort(&self, code: i32) -> CommError;
}
