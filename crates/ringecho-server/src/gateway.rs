//! Submission gateway — ordered queueing and backpressure.
//!
//! Intents are parked in a FIFO work queue and moved into the substrate's
//! fixed-depth submission queue in order. When the queue fills, the
//! leftovers stay parked; the event loop makes progress by dispatching
//! completions and pumping again. Nothing in the submit path ever waits
//! or recurses into the dispatcher, so dispatch handlers are free to
//! enqueue new work at any point.

use ringecho_core::error::Result;
use ringecho_core::substrate::{Completion, QueueFull, Submission, Substrate};

use std::collections::VecDeque;

pub struct Gateway<S: Substrate> {
    ring: S,
    backlog: VecDeque<Submission>,
}

impl<S: Substrate> Gateway<S> {
    pub fn new(ring: S) -> Self {
        Self {
            ring,
            backlog: VecDeque::new(),
        }
    }

    /// Park an intent for the next pump. Never blocks, never drops.
    pub fn enqueue(&mut self, sub: Submission) {
        self.backlog.push_back(sub);
    }

    /// Move parked intents into the submission queue until it fills,
    /// then flush everything queued. Returns entries handed to the
    /// kernel; a flush error is fatal.
    pub fn pump(&mut self) -> Result<usize> {
        while let Some(sub) = self.backlog.front() {
            match self.ring.try_push(sub) {
                Ok(()) => {
                    self.backlog.pop_front();
                }
                Err(QueueFull) => break,
            }
        }
        self.ring.flush()
    }

    pub fn wait_one(&mut self) -> Result<Completion> {
        self.ring.wait_one()
    }

    pub fn poll_ready(&mut self) -> Option<Completion> {
        self.ring.poll_ready()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn ring(&self) -> &S {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut S {
        &mut self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringecho_core::token::{ConnHandle, OpKind, Token};

    /// Records pushes in order; reports a full queue after `cap` slots.
    struct StubRing {
        cap: usize,
        used: usize,
        pushed: Vec<u64>,
        flushes: usize,
    }

    impl StubRing {
        fn new(cap: usize) -> Self {
            Self {
                cap,
                used: 0,
                pushed: Vec::new(),
                flushes: 0,
            }
        }

        fn drain(&mut self, slots: usize) {
            self.used -= slots.min(self.used);
        }
    }

    impl Substrate for StubRing {
        fn try_push(&mut self, sub: &Submission) -> std::result::Result<(), QueueFull> {
            if self.used + sub.slots() > self.cap {
                return Err(QueueFull);
            }
            self.used += sub.slots();
            let token = match sub {
                Submission::Accept { token, .. } => token,
                Submission::Recv { token, .. } => token,
                Submission::Send { token, .. } => token,
            };
            self.pushed.push(token.encode());
            Ok(())
        }

        fn flush(&mut self) -> Result<usize> {
            self.flushes += 1;
            Ok(0)
        }

        fn wait_one(&mut self) -> Result<Completion> {
            unreachable!("stub has no completions")
        }

        fn poll_ready(&mut self) -> Option<Completion> {
            None
        }

        fn close(&mut self, _fd: std::os::fd::RawFd) {}
    }

    fn send_sub(slot: u32) -> Submission {
        Submission::Send {
            fd: 9,
            buf: std::ptr::null(),
            len: 1,
            token: Token::new(OpKind::Send, ConnHandle { slot, gen: 0 }),
        }
    }

    #[test]
    fn test_pump_preserves_fifo_across_full_queue() {
        let mut gw = Gateway::new(StubRing::new(2));
        for slot in 0..5 {
            gw.enqueue(send_sub(slot));
        }

        gw.pump().unwrap();
        assert_eq!(gw.backlog_len(), 3);

        // Two slots free up; the next pump continues in order.
        gw.ring_mut().drain(2);
        gw.pump().unwrap();
        gw.ring_mut().drain(2);
        gw.pump().unwrap();
        assert_eq!(gw.backlog_len(), 0);

        let expected: Vec<u64> = (0..5)
            .map(|slot| Token::new(OpKind::Send, ConnHandle { slot, gen: 0 }).encode())
            .collect();
        assert_eq!(gw.ring().pushed, expected);
    }

    #[test]
    fn test_pump_flushes_even_when_backlog_empty() {
        let mut gw = Gateway::new(StubRing::new(4));
        gw.pump().unwrap();
        assert_eq!(gw.ring().flushes, 1);
    }

    #[test]
    fn test_two_slot_intent_waits_for_room() {
        let mut gw = Gateway::new(StubRing::new(3));
        gw.enqueue(send_sub(0));
        gw.enqueue(send_sub(1));
        let h = ConnHandle { slot: 2, gen: 0 };
        gw.enqueue(Submission::Recv {
            fd: 9,
            buf: std::ptr::null_mut(),
            cap: 16,
            token: Token::new(OpKind::Recv, h),
            timeout_token: Token::new(OpKind::Timeout, h),
        });

        // Two sends fit; the recv needs two slots and only one is free.
        gw.pump().unwrap();
        assert_eq!(gw.backlog_len(), 1);

        gw.ring_mut().drain(2);
        gw.pump().unwrap();
        assert_eq!(gw.backlog_len(), 0);
    }
}
