//! ## vindkanal-core::pipeline
//! **The ordered impairment stages applied to every packet**
//!
//! Stage order is fixed: MTU clip, loss (total / Gilbert-Elliott burst /
//! independent Bernoulli), duplication, then per copy: buffer capacity,
//! bandwidth shaping, interface-speed shaping, delay, bit noise, dispatch.
//! Apart from the shared speed cursors (read by the caller-facing API for
//! boundary throttling) all state here is owned and mutated by the link
//! worker alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::Rng;
use tracing::trace;

use crate::clock::ms_to_ns;
use crate::markov::ConditionState;
use crate::packet::{Direction, Packet};
use crate::queue::DelayQueue;
use crate::wire::Metric;

/// Gilbert-Elliott channel status, per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BurstStatus {
    #[default]
    Healthy,
    Faulty,
}

/// Upper bound on extra copies produced by the geometric duplication draw.
/// The unguarded loop diverges at p = 1, so the degenerate case is pinned
/// to a single extra copy and the tail is capped.
const MAX_DUPLICATES: usize = 128;

/// Noise densities are configured in flipped bits per megabyte.
const BITS_PER_MEGABYTE: f64 = 8.0 * 1024.0 * 1024.0;

/// Bit flipping skips this many header bytes at the front of the payload.
const NOISE_HEADER_BYTES: usize = 2;

/// Next-available-transmission cursor shared with the API boundary.
///
/// The worker is the only writer; callers read it to throttle ingress.
#[derive(Debug, Clone, Default)]
pub struct SpeedCursor(Arc<AtomicU64>);

impl SpeedCursor {
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn set(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }
}

/// Shaping and burst-loss state plus the pipeline's RNG.
#[derive(Debug)]
pub struct Pipeline {
    rng: SmallRng,
    bandwidth_next: [u64; 2],
    speed_next: [SpeedCursor; 2],
    burst_status: [BurstStatus; 2],
}

/// What the pipeline decided to do with one ingress packet.
#[derive(Debug, Default)]
pub struct Verdict {
    /// Copies to hand to the transport immediately.
    pub transmit: Vec<Packet>,
    /// Copies that went into the delay queue.
    pub queued: usize,
    /// Copies dropped by loss, MTU, or buffer capacity.
    pub dropped: usize,
}

impl Pipeline {
    pub fn new(rng: SmallRng) -> Self {
        Self {
            rng,
            bandwidth_next: [0, 0],
            speed_next: [SpeedCursor::default(), SpeedCursor::default()],
            burst_status: [BurstStatus::default(), BurstStatus::default()],
        }
    }

    /// Shared handle to one direction's speed cursor.
    pub fn speed_cursor(&self, direction: Direction) -> SpeedCursor {
        self.speed_next[direction.index()].clone()
    }

    #[cfg(test)]
    pub fn burst_status(&self, direction: Direction) -> BurstStatus {
        self.burst_status[direction.index()]
    }

    /// Runs one packet through every stage against the active condition
    /// state. Future sends land in `queue`; immediate sends are returned in
    /// the verdict.
    pub fn process(
        &mut self,
        packet: Packet,
        now: u64,
        state: &ConditionState,
        queue: &mut DelayQueue,
    ) -> Verdict {
        let mut verdict = Verdict::default();
        let dir = packet.direction;
        let len = packet.len();

        // MTU: worst-case-deterministic floor, so the bound decides, not a
        // sample.
        let mtu = state.lower_bound(Metric::Mtu, dir);
        if mtu > 0.0 && len as f64 > mtu {
            trace!(direction = %dir, len, mtu, "packet exceeds mtu, dropped");
            verdict.dropped += 1;
            return verdict;
        }

        if self.lost(&packet, state) {
            trace!(direction = %dir, len, "packet lost");
            verdict.dropped += 1;
            return verdict;
        }

        let copies = 1 + self.duplicates(&packet, state);

        for _ in 0..copies {
            let mut copy = packet.clone();
            let mut delay_ns: u64 = 0;

            // Buffer capacity: drop this copy if the queue for its
            // direction would overflow the sampled channel buffer.
            let capacity = state.upper_bound(Metric::ChanBufSize, dir);
            if capacity > 0.0 {
                let budget = state.sample(Metric::ChanBufSize, dir, &mut self.rng);
                if (queue.byte_size(dir) + len) as f64 > budget {
                    trace!(direction = %dir, len, budget, "channel buffer full, copy dropped");
                    verdict.dropped += 1;
                    continue;
                }
            }

            delay_ns += self.shape_bandwidth(&copy, now, state);
            delay_ns += self.shape_speed(&copy, now, state);

            if state.upper_bound(Metric::Delay, dir) > 0.0 {
                delay_ns += ms_to_ns(state.sample(Metric::Delay, dir, &mut self.rng));
            }

            self.apply_noise(&mut copy, state);

            // Zero-delay packets still queue behind already-delayed ones in
            // FIFO mode, otherwise they would overtake them.
            if delay_ns > 0 || (queue.is_fifo() && !queue.is_empty()) {
                queue.enqueue(copy, now + delay_ns);
                verdict.queued += 1;
            } else {
                verdict.transmit.push(copy);
            }
        }

        verdict
    }

    /// Loss decision: saturating total loss, then the two-state
    /// Gilbert-Elliott burst model when a burst length is configured,
    /// otherwise independent Bernoulli loss.
    fn lost(&mut self, packet: &Packet, state: &ConditionState) -> bool {
        let dir = packet.direction;

        if state.lower_bound(Metric::Loss, dir) >= 100.0 {
            return true;
        }

        if state.upper_bound(Metric::BurstyLoss, dir) > 0.0 {
            let loss = (state.sample(Metric::Loss, dir, &mut self.rng) / 100.0).clamp(0.0, 0.999);
            let burst_len = state.sample(Metric::BurstyLoss, dir, &mut self.rng).max(1.0);

            let mut status = self.burst_status[dir.index()];
            match status {
                BurstStatus::Healthy => {
                    let enter = (loss / (burst_len * (1.0 - loss))).clamp(0.0, 1.0);
                    if self.rng.random::<f64>() < enter {
                        status = BurstStatus::Faulty;
                    }
                }
                BurstStatus::Faulty => {
                    if self.rng.random::<f64>() < 1.0 / burst_len {
                        status = BurstStatus::Healthy;
                    }
                }
            }
            self.burst_status[dir.index()] = status;
            return status != BurstStatus::Healthy;
        }

        // Leaving the bursty regime heals the channel.
        self.burst_status[dir.index()] = BurstStatus::Healthy;

        let loss = (state.sample(Metric::Loss, dir, &mut self.rng) / 100.0).clamp(0.0, 1.0);
        self.rng.random::<f64>() < loss
    }

    /// Geometric draw of extra copies: Bernoulli successes until the first
    /// failure, capped, with p >= 1 pinned to one extra copy.
    fn duplicates(&mut self, packet: &Packet, state: &ConditionState) -> usize {
        let dir = packet.direction;
        if state.upper_bound(Metric::Dup, dir) <= 0.0 {
            return 0;
        }

        let p = state.sample(Metric::Dup, dir, &mut self.rng) / 100.0;
        if p <= 0.0 {
            return 0;
        }
        if p >= 1.0 {
            return 1;
        }

        let mut extra = 0;
        while extra < MAX_DUPLICATES && self.rng.random::<f64>() < p {
            extra += 1;
        }
        extra
    }

    /// Token-bucket serialization against the configured byte rate.
    fn shape_bandwidth(&mut self, packet: &Packet, now: u64, state: &ConditionState) -> u64 {
        let dir = packet.direction;
        if state.upper_bound(Metric::Bandwidth, dir) <= 0.0 {
            return 0;
        }

        let rate = state.sample(Metric::Bandwidth, dir, &mut self.rng).max(1.0);
        let send_time = serialization_ns(packet.len(), rate);
        let cursor = &mut self.bandwidth_next[dir.index()];

        let delay = if now > *cursor {
            *cursor = now;
            send_time
        } else {
            (*cursor - now) + send_time
        };
        *cursor += send_time;
        delay
    }

    /// Interface-speed shaping: same cursor arithmetic as bandwidth, but
    /// the cursor is shared with the API boundary, which additionally
    /// blocks ingress until it passes.
    fn shape_speed(&mut self, packet: &Packet, now: u64, state: &ConditionState) -> u64 {
        let dir = packet.direction;
        if state.upper_bound(Metric::Speed, dir) <= 0.0 {
            return 0;
        }

        let rate = state.sample(Metric::Speed, dir, &mut self.rng).max(1.0);
        let send_time = serialization_ns(packet.len(), rate);
        let cursor = &self.speed_next[dir.index()];
        let current = cursor.get();

        let delay = if now > current {
            cursor.set(now + send_time);
            send_time
        } else {
            cursor.set(current + send_time);
            (current - now) + send_time
        };
        delay
    }

    /// Draws a quasi-binomial number of bit errors for the configured noise
    /// density and flips that many pseudo-random bit positions, sparing the
    /// 2-byte header.
    fn apply_noise(&mut self, packet: &mut Packet, state: &ConditionState) {
        let dir = packet.direction;
        if state.upper_bound(Metric::Noise, dir) <= 0.0 {
            return;
        }
        if packet.len() <= NOISE_HEADER_BYTES {
            return;
        }

        let noise = state.sample(Metric::Noise, dir, &mut self.rng).max(0.0);
        let body_bits = ((packet.len() - NOISE_HEADER_BYTES) * 8) as u64;
        let threshold = (body_bits as f64 * noise).min(BITS_PER_MEGABYTE);

        let mut flips = 0u64;
        while flips < body_bits && self.rng.random_range(0.0..BITS_PER_MEGABYTE) < threshold {
            flips += 1;
        }

        for _ in 0..flips {
            let bit = self.rng.random_range(0..body_bits);
            let byte = NOISE_HEADER_BYTES + (bit / 8) as usize;
            packet.payload[byte] ^= 1 << (bit % 8);
        }
    }
}

/// Nanoseconds to serialize `len` bytes at `rate` bytes per second.
#[inline]
fn serialization_ns(len: usize, rate: f64) -> u64 {
    (len as f64 * 1_000_000_000.0 / rate) as u64
}
