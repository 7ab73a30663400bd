//! The echo server — dispatcher, state machine, event loop.
//!
//! One control thread. Each loop iteration pumps the gateway, blocks for
//! one completion (the only suspension point), dispatches it, then
//! drains and dispatches every further completion already available
//! before waiting again. Dispatch decodes the completion's token and
//! routes by operation kind:
//!
//! - accept success → create the connection, arm its first receive, and
//!   re-arm the accept (the substrate does not keep listening on its
//!   own; exactly one accept is outstanding while the server runs)
//! - accept failure → count, log, re-arm the accept
//! - receive > 0 → stage the echo, submit the send
//! - receive ≤ 0 → teardown (EOF, error, or timeout-cancelled)
//! - send == requested → arm the next receive on the same connection
//! - send ≠ requested → teardown
//! - timeout with its receive still armed → teardown; otherwise ignored
//!
//! Handlers only park new intents in the gateway; nothing on the
//! dispatch path submits, waits, or recurses.

use crate::config::ServerConfig;
use crate::conn::{Conn, ConnSlab, ConnState, ADDR_CAP};
use crate::gateway::Gateway;

use ringecho_core::error::{Result, RingError};
use ringecho_core::substrate::{Completion, Submission, Substrate};
use ringecho_core::token::{ConnHandle, OpKind, Token};

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const STATS_INTERVAL_SECS: u64 = 5;

/// Listener-side address storage the kernel fills on each accept.
/// Reused across accepts — only one is ever outstanding. Boxed so the
/// pointers handed to the substrate stay stable.
struct AcceptSlot {
    addr: Box<[u8; ADDR_CAP]>,
    len: Box<u32>,
}

/// Loop counters, printed periodically and at shutdown.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub accepts: u64,
    pub recvs: u64,
    pub sends: u64,
    pub closes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub accept_errors: u64,
}

impl Stats {
    pub fn print(&self, active: usize, elapsed_secs: f64) {
        eprintln!(
            "[{:.1}s] conns={} accepts={} recv={} send={} close={} bytes_in={} bytes_out={} accept_err={}",
            elapsed_secs,
            active,
            self.accepts,
            self.recvs,
            self.sends,
            self.closes,
            self.bytes_in,
            self.bytes_out,
            self.accept_errors,
        );
    }
}

/// The server context: listener, config, connection slab, gateway,
/// accept storage, counters. Constructed once at startup; no globals.
pub struct Server<S: Substrate> {
    gw: Gateway<S>,
    conns: ConnSlab,
    cfg: ServerConfig,
    listener: RawFd,
    accept_slot: AcceptSlot,
    stats: Stats,
}

impl<S: Substrate> Server<S> {
    pub fn new(ring: S, listener: RawFd, cfg: ServerConfig) -> Self {
        Self {
            gw: Gateway::new(ring),
            conns: ConnSlab::new(cfg.max_conns),
            cfg,
            listener,
            accept_slot: AcceptSlot {
                addr: Box::new([0u8; ADDR_CAP]),
                len: Box::new(ADDR_CAP as u32),
            },
            stats: Stats::default(),
        }
    }

    /// Seed the first accept. Call once before driving the loop.
    pub fn start(&mut self) {
        self.submit_accept();
    }

    /// Run until `running` clears or a fatal substrate error.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        self.start();
        let started = Instant::now();
        let mut last_stats = started;

        while running.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(()) => {}
                // A signal interrupted the wait; re-check the flag.
                Err(RingError::Wait(e)) if e == libc::EINTR => continue,
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now.duration_since(last_stats).as_secs() >= STATS_INTERVAL_SECS {
                self.stats
                    .print(self.conns.active(), now.duration_since(started).as_secs_f64());
                last_stats = now;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One loop iteration: pump parked intents, block for one
    /// completion, dispatch it and everything else already available.
    pub fn run_once(&mut self) -> Result<()> {
        self.gw.pump()?;
        let first = self.gw.wait_one()?;
        self.dispatch(first);
        while let Some(c) = self.gw.poll_ready() {
            self.dispatch(c);
        }
        Ok(())
    }

    /// Tear down every remaining connection (shutdown sweep).
    pub fn shutdown(&mut self) {
        for conn in self.conns.take_all() {
            self.gw.ring_mut().close(conn.fd);
            self.stats.closes += 1;
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn active_conns(&self) -> usize {
        self.conns.active()
    }

    pub fn ring(&self) -> &S {
        self.gw.ring()
    }

    pub fn ring_mut(&mut self) -> &mut S {
        self.gw.ring_mut()
    }

    // ── Dispatch ──

    fn dispatch(&mut self, c: Completion) {
        let Some(tok) = Token::decode(c.user_data) else {
            eprintln!(
                "ringecho: dropping completion with bad token {:#018x}",
                c.user_data
            );
            return;
        };

        match tok.kind {
            OpKind::Accept => self.on_accept(c.result),
            OpKind::Recv => self.on_recv(tok.handle, c.result),
            OpKind::Send => self.on_send(tok.handle, c.result),
            OpKind::Timeout => self.on_timeout(tok.handle),
        }
    }

    fn on_accept(&mut self, res: i32) {
        if res < 0 {
            self.stats.accept_errors += 1;
            eprintln!("ringecho: accept failed: errno {}", -res);
            self.submit_accept();
            return;
        }

        let fd = res as RawFd;
        self.stats.accepts += 1;

        // Capture the peer address before the accept slot is re-armed.
        let peer = *self.accept_slot.addr;
        let peer_len = (*self.accept_slot.len).min(ADDR_CAP as u32);

        match self.conns.insert(Conn::new(fd, peer, peer_len)) {
            Some(h) => self.submit_recv(h),
            None => {
                // At capacity — shed the connection.
                eprintln!("ringecho: connection table full, dropping fd {}", fd);
                self.gw.ring_mut().close(fd);
                self.stats.closes += 1;
            }
        }

        self.submit_accept();
    }

    fn on_recv(&mut self, h: ConnHandle, res: i32) {
        let block = self.cfg.block_size;
        let Some(conn) = self.conns.get_mut(h) else {
            // Torn down while this completion was in flight.
            return;
        };
        conn.recv_armed = false;

        if res <= 0 {
            // EOF, error, or cancelled by the linked timeout.
            self.teardown(h);
            return;
        }

        let n = res as usize;
        conn.stage_echo(n, block);
        self.stats.recvs += 1;
        self.stats.bytes_in += n as u64;
        self.submit_send(h);
    }

    fn on_send(&mut self, h: ConnHandle, res: i32) {
        let Some(conn) = self.conns.get_mut(h) else {
            return;
        };
        let requested = conn.out_len;

        if res < 0 || res as usize != requested {
            // The peer did not get a full echo.
            self.teardown(h);
            return;
        }

        self.stats.sends += 1;
        self.stats.bytes_out += requested as u64;
        self.submit_recv(h);
    }

    fn on_timeout(&mut self, h: ConnHandle) {
        // The timeout half of a receive pair. Live only while its
        // receive is still armed; otherwise the pair already resolved —
        // either the receive succeeded or teardown made the handle stale.
        let fire = match self.conns.get_mut(h) {
            Some(conn) => conn.recv_armed && conn.state == ConnState::Receiving,
            None => false,
        };
        if fire {
            self.teardown(h);
        }
    }

    // ── Submissions ──

    fn submit_accept(&mut self) {
        *self.accept_slot.len = ADDR_CAP as u32;
        let sub = Submission::Accept {
            listener: self.listener,
            addr: self.accept_slot.addr.as_mut_ptr(),
            addr_len: &mut *self.accept_slot.len as *mut u32,
            token: Token::new(OpKind::Accept, ConnHandle::NONE),
        };
        self.gw.enqueue(sub);
    }

    fn submit_recv(&mut self, h: ConnHandle) {
        let block = self.cfg.block_size;
        let sub = match self.conns.get_mut(h) {
            Some(conn) => {
                conn.state = ConnState::Receiving;
                conn.recv_armed = true;
                let fd = conn.fd;
                Submission::Recv {
                    fd,
                    buf: conn.input_mut(block).as_mut_ptr(),
                    cap: block as u32,
                    token: Token::new(OpKind::Recv, h),
                    timeout_token: Token::new(OpKind::Timeout, h),
                }
            }
            None => return,
        };
        self.gw.enqueue(sub);
    }

    fn submit_send(&mut self, h: ConnHandle) {
        let sub = match self.conns.get_mut(h) {
            Some(conn) => {
                conn.state = ConnState::Sending;
                match conn.outbuf.as_ref() {
                    Some(out) => Submission::Send {
                        fd: conn.fd,
                        buf: out.as_ptr(),
                        len: conn.out_len as u32,
                        token: Token::new(OpKind::Send, h),
                    },
                    None => return,
                }
            }
            None => return,
        };
        self.gw.enqueue(sub);
    }

    /// Close the socket and release both blocks, exactly once. The slab
    /// remove bumps the slot generation, so completions still in flight
    /// for this connection resolve to nothing.
    fn teardown(&mut self, h: ConnHandle) {
        if let Some(conn) = self.conns.remove(h) {
            self.gw.ring_mut().close(conn.fd);
            self.stats.closes += 1;
        }
    }
}
