//! # vindkanal-core
//!
//! A network-link "wind tunnel": the impairment pipeline, delay-scheduling
//! engine, and probabilistic network-condition state machine behind the
//! Vindkanal link emulator, driven by a single-threaded event core.
//!
//! ### Key Submodules:
//! - `wire`: randomized impairment parameters (base ± spread, distribution)
//! - `markov`: the condition graph selecting the link's active "weather"
//! - `queue`: time-ordered delay queue with FIFO-preserving tie-breaking
//! - `pipeline`: MTU / loss / duplication / shaping / delay / noise stages
//! - `link`: the event core and the caller-facing `Link` API
//! - `transport`: frame movers (in-memory pair, UDP)

pub mod clock;
pub mod error;
pub mod link;
pub mod markov;
pub mod packet;
pub mod pipeline;
pub mod queue;
pub mod transport;
pub mod wire;

pub mod prelude {
    pub use crate::error::LinkError;
    pub use crate::link::{Link, LinkHandle, LinkOptions, StateInfo};
    pub use crate::markov::{ConditionGraph, ConditionState};
    pub use crate::packet::{Direction, Packet};
    pub use crate::queue::DelayQueue;
    pub use crate::transport::{PairTransport, Transport, UdpTransport};
    pub use crate::wire::{Distribution, Metric, WireValue};
}

pub use error::LinkError;
pub use link::{Link, LinkHandle, LinkOptions};
