//! io_uring substrate — the production [`Substrate`] implementation.
//!
//! Wraps the `io-uring` crate's safe API. No SQPOLL, no fixed files, no
//! provided buffers — plain SQE submission via `io_uring_enter`, which
//! works on any kernel with io_uring network opcodes (5.6+).
//!
//! A receive is pushed as a linked pair: the `Recv` SQE carries
//! `IOSQE_IO_LINK` and is followed by a `LinkTimeout` SQE. Every receive
//! shares one fixed idle timeout, so a single boxed timespec backs all
//! in-flight timeout SQEs; boxing keeps its address stable while the
//! kernel holds a pointer to it.

use io_uring::{opcode, squeue, types, IoUring};

use ringecho_core::error::{Result, RingError};
use ringecho_core::substrate::{Completion, QueueFull, Submission, Substrate};

use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Default io_uring backend.
///
/// The gateway calls:
/// 1. `try_push()` per intent (queues SQEs, reports a full queue)
/// 2. `flush()` once per loop iteration (one `io_uring_enter`)
/// 3. `wait_one()` to block, then `poll_ready()` to drain the backlog
pub struct UringRing {
    ring: IoUring,
    /// Idle timeout for every linked receive. Boxed — the kernel reads it
    /// through a raw pointer while the timeout SQE is in flight.
    idle_ts: Box<types::Timespec>,
}

impl UringRing {
    pub fn new(sq_entries: u32, idle_timeout: Duration) -> Result<Self> {
        let ring = IoUring::builder()
            .build(sq_entries)
            .map_err(|e| RingError::Setup(e.raw_os_error().unwrap_or(-1)))?;

        let idle_ts = Box::new(
            types::Timespec::new()
                .sec(idle_timeout.as_secs())
                .nsec(idle_timeout.subsec_nanos()),
        );

        Ok(Self { ring, idle_ts })
    }

    /// The ring fd (diagnostics).
    pub fn fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    fn pop_cqe(&mut self) -> Option<Completion> {
        self.ring.completion().next().map(|cqe| Completion {
            user_data: cqe.user_data(),
            result: cqe.result(),
        })
    }
}

impl Substrate for UringRing {
    fn try_push(&mut self, sub: &Submission) -> std::result::Result<(), QueueFull> {
        let ts_ptr: *const types::Timespec = &*self.idle_ts;
        let mut sq = self.ring.submission();

        if sq.capacity() - sq.len() < sub.slots() {
            return Err(QueueFull);
        }

        match *sub {
            Submission::Accept {
                listener,
                addr,
                addr_len,
                token,
            } => {
                let sqe = opcode::Accept::new(
                    types::Fd(listener),
                    addr as *mut libc::sockaddr,
                    addr_len as *mut libc::socklen_t,
                )
                .flags(libc::SOCK_CLOEXEC)
                .build()
                .user_data(token.encode());
                // Safety: the accept address storage is owned by the
                // server and outlives the operation.
                unsafe { sq.push(&sqe).map_err(|_| QueueFull)? };
            }

            Submission::Recv {
                fd,
                buf,
                cap,
                token,
                timeout_token,
            } => {
                let recv = opcode::Recv::new(types::Fd(fd), buf, cap)
                    .build()
                    .flags(squeue::Flags::IO_LINK)
                    .user_data(token.encode());
                let timeout = opcode::LinkTimeout::new(ts_ptr)
                    .build()
                    .user_data(timeout_token.encode());
                // Safety: buf points into the connection's input block,
                // which lives until the completion is dispatched; the
                // free-slot check above guarantees room for both SQEs.
                unsafe {
                    sq.push(&recv).map_err(|_| QueueFull)?;
                    sq.push(&timeout).map_err(|_| QueueFull)?;
                }
            }

            Submission::Send { fd, buf, len, token } => {
                let sqe = opcode::Send::new(types::Fd(fd), buf, len)
                    .build()
                    .user_data(token.encode());
                // Safety: buf points into the connection's output block.
                unsafe { sq.push(&sqe).map_err(|_| QueueFull)? };
            }
        }

        Ok(())
    }

    fn flush(&mut self) -> Result<usize> {
        self.ring
            .submit()
            .map_err(|e| RingError::Submit(e.raw_os_error().unwrap_or(-1)))
    }

    fn wait_one(&mut self) -> Result<Completion> {
        loop {
            if let Some(c) = self.pop_cqe() {
                return Ok(c);
            }
            self.ring
                .submit_and_wait(1)
                .map_err(|e| RingError::Wait(e.raw_os_error().unwrap_or(-1)))?;
        }
    }

    fn poll_ready(&mut self) -> Option<Completion> {
        self.pop_cqe()
    }

    fn close(&mut self, fd: RawFd) {
        // Safety: fd came from an accept completion and is closed exactly
        // once — the slab remove that triggers teardown cannot repeat.
        unsafe {
            libc::close(fd);
        }
    }
}
