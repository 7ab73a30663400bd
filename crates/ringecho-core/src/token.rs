//! Operation tokens — the user-data correlation codec.
//!
//! Every submission carries a 64-bit token the substrate round-trips
//! unchanged on the matching completion. The token packs the operation
//! kind and a generation-checked connection handle:
//!
//! ```text
//! bit 63       56 55             32 31              0
//!    [ kind: u8 ][ generation: 24 ][    slot: u32    ]
//! ```
//!
//! The generation is bumped each time a slot is freed, so a completion
//! that arrives after its connection was torn down decodes to a stale
//! handle and misses the slab lookup instead of touching a reused slot.
//! Encode and decode are exact inverses for every valid pair; only the
//! substrate boundary ever sees the raw bit pattern.

/// Generations wrap at 24 bits — the width the token layout affords.
pub const GEN_MASK: u32 = 0x00ff_ffff;

const KIND_SHIFT: u32 = 56;
const GEN_SHIFT: u32 = 32;

/// What a completion is reporting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    /// Accept on the listening socket.
    Accept = 0,
    /// The timeout half of a linked receive pair.
    Timeout = 1,
    /// Receive on a connection.
    Recv = 2,
    /// Send on a connection.
    Send = 3,
}

impl OpKind {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Accept),
            1 => Some(Self::Timeout),
            2 => Some(Self::Recv),
            3 => Some(Self::Send),
            _ => None,
        }
    }
}

/// Generation-checked reference to a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    /// Slab slot index.
    pub slot: u32,
    /// Slot generation at mint time. At most [`GEN_MASK`].
    pub gen: u32,
}

impl ConnHandle {
    /// Handle for operations with no connection (the listener accept).
    /// Never resolves against the slab.
    pub const NONE: Self = Self { slot: u32::MAX, gen: 0 };
}

/// A decoded (kind, handle) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: OpKind,
    pub handle: ConnHandle,
}

impl Token {
    pub fn new(kind: OpKind, handle: ConnHandle) -> Self {
        debug_assert!(handle.gen <= GEN_MASK);
        Self { kind, handle }
    }

    /// Pack into the substrate's 64-bit user-data word.
    pub fn encode(self) -> u64 {
        ((self.kind as u64) << KIND_SHIFT)
            | (u64::from(self.handle.gen & GEN_MASK) << GEN_SHIFT)
            | u64::from(self.handle.slot)
    }

    /// Recover the (kind, handle) pair. `None` if the kind bits are not
    /// one a submission could have carried.
    pub fn decode(raw: u64) -> Option<Self> {
        let kind = OpKind::from_bits((raw >> KIND_SHIFT) as u8)?;
        Some(Self {
            kind,
            handle: ConnHandle {
                slot: raw as u32,
                gen: (raw >> GEN_SHIFT) as u32 & GEN_MASK,
            },
        })
    }
}
