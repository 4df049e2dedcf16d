//! ## vindkanal-core::packet
//! **The unit of work flowing through the impairment pipeline**
//!
//! A packet is an owned byte buffer plus the direction it travels on the
//! emulated link. Duplication is an explicit `clone()`; handing a packet to
//! the delay queue or the transport is a move, so every buffer has exactly
//! one owner at any point in its life.

/// Travel direction of a packet on the emulated link.
///
/// The left side is the caller-facing API (`Link::send` / `Link::recv`);
/// the right side is the nested transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    LeftToRight,
    RightToLeft,
}

impl Direction {
    /// Array index for per-direction state vectors.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::LeftToRight => 0,
            Direction::RightToLeft => 1,
        }
    }

    /// Both directions, in index order.
    pub const BOTH: [Direction; 2] = [Direction::LeftToRight, Direction::RightToLeft];
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::LeftToRight => write!(f, "LR"),
            Direction::RightToLeft => write!(f, "RL"),
        }
    }
}

/// An owned frame travelling through the link.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Vec<u8>,
    pub direction: Direction,
    pub flags: u32,
}

impl Packet {
    pub fn new(payload: Vec<u8>, direction: Direction, flags: u32) -> Self {
        Self {
            payload,
            direction,
            flags,
        }
    }

    /// Empty packet, used as the heap sentinel.
    pub fn empty(direction: Direction) -> Self {
        Self {
            payload: Vec::new(),
            direction,
            flags: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
