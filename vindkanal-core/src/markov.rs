//! ## vindkanal-core::markov
//! **Network-condition state machine: the link's "weather" engine**
//!
//! A weighted directed graph of [`ConditionState`]s. Each state owns a full
//! per-direction vector of [`WireValue`]s; a timer-driven random walk over
//! the adjacency matrix selects the active state. Row weights live on a
//! 0–100 scale and the diagonal always absorbs the remainder, so every row
//! sums to exactly 100.

use rand::rngs::SmallRng;
use rand::Rng;

use crate::error::LinkError;
use crate::packet::Direction;
use crate::wire::{Metric, WireValue, METRIC_COUNT};

/// One "weather" regime of the link: a named bundle of randomized
/// impairment parameters, one vector per direction.
#[derive(Debug, Clone, Default)]
pub struct ConditionState {
    pub name: Option<String>,
    values: [[WireValue; METRIC_COUNT]; 2],
}

impl ConditionState {
    /// Overwrites a wire value. `direction = None` sets both directions;
    /// a later direction-specific set takes precedence simply by being
    /// applied last.
    pub fn set(&mut self, metric: Metric, direction: Option<Direction>, value: WireValue) {
        match direction {
            Some(dir) => self.values[dir.index()][metric.index()] = value,
            None => {
                for dir in Direction::BOTH {
                    self.values[dir.index()][metric.index()] = value;
                }
            }
        }
    }

    #[inline]
    pub fn get(&self, metric: Metric, direction: Direction) -> &WireValue {
        &self.values[direction.index()][metric.index()]
    }

    #[inline]
    pub fn lower_bound(&self, metric: Metric, direction: Direction) -> f64 {
        self.get(metric, direction).lower_bound()
    }

    #[inline]
    pub fn upper_bound(&self, metric: Metric, direction: Direction) -> f64 {
        self.get(metric, direction).upper_bound()
    }

    #[inline]
    pub fn sample(&self, metric: Metric, direction: Direction, rng: &mut SmallRng) -> f64 {
        self.get(metric, direction).sample(rng)
    }
}

/// Full row weight: a freshly created state only loops onto itself.
const FULL_WEIGHT: f64 = 100.0;

/// Default transition period.
pub const DEFAULT_TRANSITION_PERIOD_MS: u64 = 100;

/// The weighted state graph plus the index of the active state.
#[derive(Debug, Clone)]
pub struct ConditionGraph {
    states: Vec<ConditionState>,
    /// Row-major `len x len` matrix of transition weights on a 0–100 scale.
    adjacency: Vec<f64>,
    current: usize,
    /// Transition timer period in milliseconds.
    pub transition_period_ms: u64,
}

impl Default for ConditionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionGraph {
    /// A single-state graph with a full self-loop.
    pub fn new() -> Self {
        Self {
            states: vec![ConditionState::default()],
            adjacency: vec![FULL_WEIGHT],
            current: 0,
            transition_period_ms: DEFAULT_TRANSITION_PERIOD_MS,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        // Invariant: never empty, a resize below 1 is rejected.
        self.states.is_empty()
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn current_state(&self) -> &ConditionState {
        &self.states[self.current]
    }

    #[inline]
    pub fn current_state_mut(&mut self) -> &mut ConditionState {
        &mut self.states[self.current]
    }

    pub fn state(&self, index: usize) -> Result<&ConditionState, LinkError> {
        self.states.get(index).ok_or(LinkError::InvalidState(index))
    }

    pub fn state_mut(&mut self, index: usize) -> Result<&mut ConditionState, LinkError> {
        self.states
            .get_mut(index)
            .ok_or(LinkError::InvalidState(index))
    }

    pub fn set_current(&mut self, index: usize) -> Result<(), LinkError> {
        if index >= self.states.len() {
            return Err(LinkError::InvalidState(index));
        }
        self.current = index;
        Ok(())
    }

    pub fn set_name(&mut self, index: usize, name: String) -> Result<(), LinkError> {
        self.state_mut(index)?.name = Some(name);
        Ok(())
    }

    #[inline]
    fn at(&self, i: usize, j: usize) -> f64 {
        self.adjacency[i * self.states.len() + j]
    }

    pub fn edge(&self, i: usize, j: usize) -> Result<f64, LinkError> {
        if i >= self.states.len() || j >= self.states.len() {
            return Err(LinkError::InvalidEdge(i, j));
        }
        Ok(self.at(i, j))
    }

    /// Weights of row `i`, in column order.
    pub fn row(&self, i: usize) -> Result<Vec<f64>, LinkError> {
        if i >= self.states.len() {
            return Err(LinkError::InvalidState(i));
        }
        let n = self.states.len();
        Ok(self.adjacency[i * n..(i + 1) * n].to_vec())
    }

    /// Sets `weight[i][j]` and rebalances row `i`'s diagonal so the row
    /// still sums to 100. The diagonal itself cannot be set directly.
    pub fn set_edge(&mut self, i: usize, j: usize, weight: f64) -> Result<(), LinkError> {
        let n = self.states.len();
        if i >= n || j >= n {
            return Err(LinkError::InvalidEdge(i, j));
        }
        if i == j {
            return Err(LinkError::InvalidEdge(i, j));
        }
        self.adjacency[i * n + j] = weight;
        self.rebalance_row(i);
        Ok(())
    }

    fn rebalance_row(&mut self, i: usize) {
        let n = self.states.len();
        let off_diagonal: f64 = (0..n)
            .filter(|&j| j != i)
            .map(|j| self.adjacency[i * n + j])
            .sum();
        self.adjacency[i * n + i] = FULL_WEIGHT - off_diagonal;
    }

    /// Grows or shrinks the graph to `new_len` states.
    ///
    /// New states start empty with a full self-loop. Shrinking discards
    /// trailing states and resets `current` to 0 if it became invalid.
    /// Existing edges survive by remapping every `(i, (i + j) mod n)` pair
    /// into the new matrix and recomputing each diagonal.
    pub fn resize(&mut self, new_len: usize) -> Result<(), LinkError> {
        if new_len == 0 {
            return Err(LinkError::EmptyGraph);
        }
        let old_len = self.states.len();
        if new_len == old_len {
            return Ok(());
        }

        let mut new_adjacency = vec![0.0; new_len * new_len];
        for i in 0..new_len {
            new_adjacency[i * new_len + i] = FULL_WEIGHT;
            for j in 1..new_len {
                // Walk columns relative to the diagonal so a shrinking remap
                // keeps the surviving edges attached to the right rows.
                let real_j = (i + j) % new_len;
                if i < old_len && real_j < old_len {
                    let weight = self.at(i, real_j);
                    new_adjacency[i * new_len + real_j] = weight;
                    new_adjacency[i * new_len + i] -= weight;
                }
            }
        }

        self.states.resize_with(new_len, ConditionState::default);
        self.adjacency = new_adjacency;
        if self.current >= new_len {
            self.current = 0;
        }
        Ok(())
    }

    /// One step of the random walk: draws `p ~ U(0, 100)` and walks the
    /// current row in `(current + j) mod n` order, subtracting candidate
    /// weights until one covers the remainder. Exhaustion falls back to the
    /// last candidate. Returns the new current index.
    pub fn step(&mut self, rng: &mut SmallRng) -> usize {
        let n = self.states.len();
        let mut p: f64 = rng.random_range(0.0..FULL_WEIGHT);
        let mut next = (self.current + n - 1) % n;

        for j in 0..n {
            let candidate = (self.current + j) % n;
            let weight = self.at(self.current, candidate);
            if weight >= p {
                next = candidate;
                break;
            }
            p -= weight;
        }

        self.current = next;
        next
    }
}
