//! Submission/completion substrate abstraction.
//!
//! A `Substrate` is the async I/O facility underneath the server: a
//! fixed-depth submission queue, a completion queue, a 64-bit user-data
//! word round-tripped unchanged per operation, and the ability to bound a
//! receive with a linked timeout. The production implementation wraps
//! io_uring (`ringecho-uring`); tests drive the engine with a scripted
//! substrate and a virtual clock.
//!
//! **Contract:** `try_push` and `poll_ready` never block. `wait_one` is
//! the only suspension point in the system. Submission-queue exhaustion
//! is reported through `try_push`, not resolved here — the gateway makes
//! progress on completions and retries.

use crate::error::Result;
use crate::token::Token;
use std::os::fd::RawFd;

/// One I/O intent, not yet handed to the substrate.
///
/// Buffer pointers reference caller-owned storage; the caller keeps that
/// storage alive and un-moved until the matching completion is observed.
#[derive(Debug, Clone, Copy)]
pub enum Submission {
    /// Accept one connection on the listening socket. The kernel writes
    /// the peer address into `addr` and its length into `addr_len`.
    Accept {
        listener: RawFd,
        addr: *mut u8,
        addr_len: *mut u32,
        token: Token,
    },
    /// Receive up to `cap` bytes, bounded by the substrate's fixed idle
    /// timeout. Submitted as a linked pair: if the timeout fires first it
    /// cancels the receive (which then completes with an error result),
    /// and if the receive completes first the timeout is cancelled. Both
    /// halves produce a completion.
    Recv {
        fd: RawFd,
        buf: *mut u8,
        cap: u32,
        token: Token,
        timeout_token: Token,
    },
    /// Send `len` bytes from `buf`.
    Send {
        fd: RawFd,
        buf: *const u8,
        len: u32,
        token: Token,
    },
}

impl Submission {
    /// Submission-queue slots this intent occupies when pushed.
    /// A receive takes two: the receive itself plus its linked timeout.
    pub fn slots(&self) -> usize {
        match self {
            Self::Recv { .. } => 2,
            _ => 1,
        }
    }
}

/// A completed operation, as reported by the substrate.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// The token from the originating submission, round-tripped verbatim.
    pub user_data: u64,
    /// Byte count (or fd, for accepts) on success; negative errno on
    /// failure.
    pub result: i32,
}

/// The submission queue has no free slots for the intent.
/// Not an error — backpressure, resolved by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Async I/O submission and completion.
pub trait Substrate {
    /// Queue one intent without flushing. `Err(QueueFull)` when the
    /// fixed-depth queue cannot take every slot the intent needs.
    fn try_push(&mut self, sub: &Submission) -> std::result::Result<(), QueueFull>;

    /// Hand all queued intents to the kernel. Returns entries submitted.
    /// An error here is fatal to the server.
    fn flush(&mut self) -> Result<usize>;

    /// Block until at least one completion is available and return it.
    fn wait_one(&mut self) -> Result<Completion>;

    /// Pop one already-available completion without blocking.
    /// Repeated calls form the lazy post-wait drain.
    fn poll_ready(&mut self) -> Option<Completion>;

    /// Close a connection socket. Teardown path only — synchronous, not
    /// an async operation. Routed through the substrate so a test
    /// harness can account for every release.
    fn close(&mut self, fd: RawFd);
}
