//! Per-connection state and the generation-checked connection slab.
//!
//! A connection is addressed only through a [`ConnHandle`]; the handle's
//! generation must match the slot's current generation or the lookup
//! misses. Removing a connection bumps the generation, so completions
//! still in flight for a torn-down connection resolve to nothing instead
//! of a reused slot.

use ringecho_core::token::{ConnHandle, GEN_MASK};

use std::os::fd::RawFd;

/// Room for the peer address as the kernel writes it (sockaddr_storage).
pub const ADDR_CAP: usize = 128;

/// Echo protocol position. The protocol is strictly sequential per
/// connection: one outstanding receive+timeout pair, or one outstanding
/// send, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Receiving,
    Sending,
}

/// One accepted connection's in-flight state.
pub struct Conn {
    pub fd: RawFd,
    /// Peer address bytes, captured at accept time.
    pub peer: [u8; ADDR_CAP],
    pub peer_len: u32,
    /// Receive block. Lazily allocated on first receive, reused after.
    pub inbuf: Option<Box<[u8]>>,
    /// Echo block. Lazily allocated on first send.
    pub outbuf: Option<Box<[u8]>>,
    /// Bytes produced by the most recent receive completion.
    pub in_len: usize,
    /// Bytes requested by the outstanding send.
    pub out_len: usize,
    pub state: ConnState,
    /// True from receive submission until its completion is observed.
    /// Decides whether a timeout completion is live or stale.
    pub recv_armed: bool,
}

impl Conn {
    pub fn new(fd: RawFd, peer: [u8; ADDR_CAP], peer_len: u32) -> Self {
        Self {
            fd,
            peer,
            peer_len,
            inbuf: None,
            outbuf: None,
            in_len: 0,
            out_len: 0,
            state: ConnState::Receiving,
            recv_armed: false,
        }
    }

    /// The receive block, allocated on first use.
    pub fn input_mut(&mut self, block_size: usize) -> &mut [u8] {
        self.inbuf
            .get_or_insert_with(|| vec![0u8; block_size].into_boxed_slice())
    }

    /// Copy the first `n` received bytes into the echo block and record
    /// them as the pending send.
    pub fn stage_echo(&mut self, n: usize, block_size: usize) {
        self.in_len = n;
        let out = self
            .outbuf
            .get_or_insert_with(|| vec![0u8; block_size].into_boxed_slice());
        if let Some(input) = self.inbuf.as_ref() {
            out[..n].copy_from_slice(&input[..n]);
        }
        self.out_len = n;
    }
}

struct Slot {
    gen: u32,
    conn: Option<Conn>,
}

/// Fixed-capacity slab of connections keyed by generation-checked
/// handles.
pub struct ConnSlab {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ConnSlab {
    pub fn new(max: usize) -> Self {
        let mut free = Vec::with_capacity(max);
        for i in (0..max as u32).rev() {
            free.push(i);
        }
        Self {
            slots: (0..max).map(|_| Slot { gen: 0, conn: None }).collect(),
            free,
        }
    }

    /// Claim a slot. `None` when the slab is at capacity.
    pub fn insert(&mut self, conn: Conn) -> Option<ConnHandle> {
        let slot = self.free.pop()?;
        let s = &mut self.slots[slot as usize];
        s.conn = Some(conn);
        Some(ConnHandle { slot, gen: s.gen })
    }

    pub fn get_mut(&mut self, h: ConnHandle) -> Option<&mut Conn> {
        let s = self.slots.get_mut(h.slot as usize)?;
        if s.gen != h.gen {
            return None;
        }
        s.conn.as_mut()
    }

    /// Release a slot and bump its generation; handles minted before the
    /// remove no longer resolve. `None` if the handle is already stale.
    pub fn remove(&mut self, h: ConnHandle) -> Option<Conn> {
        let s = self.slots.get_mut(h.slot as usize)?;
        if s.gen != h.gen {
            return None;
        }
        let conn = s.conn.take()?;
        s.gen = (s.gen + 1) & GEN_MASK;
        self.free.push(h.slot);
        Some(conn)
    }

    /// Drain every live connection (shutdown sweep).
    pub fn take_all(&mut self) -> Vec<Conn> {
        let mut out = Vec::new();
        for (i, s) in self.slots.iter_mut().enumerate() {
            if let Some(conn) = s.conn.take() {
                s.gen = (s.gen + 1) & GEN_MASK;
                self.free.push(i as u32);
                out.push(conn);
            }
        }
        out
    }

    pub fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(fd: RawFd) -> Conn {
        Conn::new(fd, [0u8; ADDR_CAP], 16)
    }

    #[test]
    fn test_insert_get_remove() {
        let mut slab = ConnSlab::new(4);
        let h = slab.insert(conn(10)).unwrap();
        assert_eq!(slab.get_mut(h).unwrap().fd, 10);
        assert_eq!(slab.active(), 1);

        let removed = slab.remove(h).unwrap();
        assert_eq!(removed.fd, 10);
        assert_eq!(slab.active(), 0);
    }

    #[test]
    fn test_stale_handle_misses_after_remove() {
        let mut slab = ConnSlab::new(4);
        let h = slab.insert(conn(10)).unwrap();
        slab.remove(h).unwrap();

        // Same slot, new generation — the old handle must not resolve.
        let h2 = slab.insert(conn(11)).unwrap();
        assert_eq!(h2.slot, h.slot);
        assert_ne!(h2.gen, h.gen);
        assert!(slab.get_mut(h).is_none());
        assert!(slab.remove(h).is_none());
        assert_eq!(slab.get_mut(h2).unwrap().fd, 11);
    }

    #[test]
    fn test_remove_is_exactly_once() {
        let mut slab = ConnSlab::new(2);
        let h = slab.insert(conn(7)).unwrap();
        assert!(slab.remove(h).is_some());
        assert!(slab.remove(h).is_none());
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut slab = ConnSlab::new(2);
        let a = slab.insert(conn(1)).unwrap();
        let _b = slab.insert(conn(2)).unwrap();
        assert!(slab.insert(conn(3)).is_none());

        slab.remove(a).unwrap();
        assert!(slab.insert(conn(3)).is_some());
    }

    #[test]
    fn test_generation_wraps_at_24_bits() {
        let mut slab = ConnSlab::new(1);
        slab.slots[0].gen = GEN_MASK;
        let h = slab.insert(conn(1)).unwrap();
        assert_eq!(h.gen, GEN_MASK);
        slab.remove(h).unwrap();
        let h2 = slab.insert(conn(2)).unwrap();
        assert_eq!(h2.gen, 0);
    }

    #[test]
    fn test_stage_echo_copies_received_bytes() {
        let mut c = conn(3);
        c.input_mut(16)[..5].copy_from_slice(b"hello");
        c.stage_echo(5, 16);
        assert_eq!(c.out_len, 5);
        assert_eq!(&c.outbuf.as_ref().unwrap()[..5], b"hello");

        // Blocks are reused, not reallocated.
        let in_ptr = c.inbuf.as_ref().unwrap().as_ptr();
        c.input_mut(16)[..2].copy_from_slice(b"xy");
        c.stage_echo(2, 16);
        assert_eq!(c.inbuf.as_ref().unwrap().as_ptr(), in_ptr);
        assert_eq!(&c.outbuf.as_ref().unwrap()[..2], b"xy");
    }
}
