//! ## vindkanal-core::link
//! **The event core: one worker per link owns every piece of mutable state**
//!
//! The worker multiplexes three channels (caller egress, transport inbound,
//! control) under a wait bounded by the nearest software deadline: the
//! delay-queue head, the inbound speed-resume instant, and the condition
//! transition tick. Callers interact only through message passing and the
//! shared speed cursors; no locking exists inside the pipeline, the queue,
//! or the state machine.

use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, Select, Sender, TrySendError};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, trace, warn};

use vindkanal_telemetry::BlinkSender;

use crate::clock::{now_ns, until, NS_PER_MS};
use crate::error::LinkError;
use crate::markov::{ConditionGraph, DEFAULT_TRANSITION_PERIOD_MS};
use crate::packet::{Direction, Packet};
use crate::pipeline::{Pipeline, SpeedCursor};
use crate::queue::DelayQueue;
use crate::transport::Transport;
use crate::wire::{Metric, WireValue, METRIC_COUNT};

/// Knobs fixed at link-open time. Everything else is mutable at runtime
/// through the control plane.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub fifo: bool,
    /// Deterministic RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
    pub transition_period_ms: u64,
    pub egress_capacity: usize,
    pub delivery_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            fifo: true,
            seed: None,
            transition_period_ms: DEFAULT_TRANSITION_PERIOD_MS,
            egress_capacity: 1024,
            delivery_capacity: 1024,
        }
    }
}

/// Control-plane requests, executed on the worker.
#[derive(Debug)]
pub enum Request {
    SetValue {
        metric: Metric,
        direction: Option<Direction>,
        value: WireValue,
    },
    SetFifo(bool),
    Resize(usize),
    SetCurrent(usize),
    SetName(usize, String),
    SetEdge(usize, usize, f64),
    SetPeriod(u64),
    Current,
    Edges(Option<usize>),
    Info(Option<usize>),
    QueueDepth,
    Shutdown,
}

/// Control-plane replies.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Err(String),
    Current {
        index: usize,
        name: Option<String>,
    },
    Edges {
        row: usize,
        weights: Vec<f64>,
    },
    Info(Box<StateInfo>),
    QueueDepth {
        packets: usize,
        bytes: [usize; 2],
    },
}

/// Snapshot of one condition state plus the link-wide toggles, as returned
/// by `Info`.
#[derive(Debug, Clone)]
pub struct StateInfo {
    pub index: usize,
    pub name: Option<String>,
    pub current: usize,
    pub states: usize,
    pub fifo: bool,
    pub transition_period_ms: u64,
    /// `[metric index] -> [LR value, RL value]`.
    pub values: [[WireValue; 2]; METRIC_COUNT],
}

struct ControlMsg {
    request: Request,
    reply: Option<Sender<Reply>>,
}

/// Cloneable control-plane handle; every call is executed on the worker.
#[derive(Clone)]
pub struct LinkHandle {
    ctrl_tx: Sender<ControlMsg>,
}

impl LinkHandle {
    fn roundtrip(&self, request: Request) -> Result<Reply, LinkError> {
        let (tx, rx) = bounded(1);
        self.ctrl_tx
            .send(ControlMsg {
                request,
                reply: Some(tx),
            })
            .map_err(|_| LinkError::Closed)?;
        rx.recv().map_err(|_| LinkError::Closed)
    }

    fn expect_ok(&self, request: Request) -> Result<(), LinkError> {
        match self.roundtrip(request)? {
            Reply::Ok => Ok(()),
            Reply::Err(message) => Err(LinkError::Control(message)),
            other => Err(LinkError::Control(format!("unexpected reply {other:?}"))),
        }
    }

    pub fn set_value(
        &self,
        metric: Metric,
        direction: Option<Direction>,
        value: WireValue,
    ) -> Result<(), LinkError> {
        self.expect_ok(Request::SetValue {
            metric,
            direction,
            value,
        })
    }

    pub fn set_fifo(&self, fifo: bool) -> Result<(), LinkError> {
        self.expect_ok(Request::SetFifo(fifo))
    }

    pub fn resize(&self, states: usize) -> Result<(), LinkError> {
        self.expect_ok(Request::Resize(states))
    }

    pub fn set_current(&self, index: usize) -> Result<(), LinkError> {
        self.expect_ok(Request::SetCurrent(index))
    }

    pub fn set_name(&self, index: usize, name: String) -> Result<(), LinkError> {
        self.expect_ok(Request::SetName(index, name))
    }

    pub fn set_edge(&self, from: usize, to: usize, weight: f64) -> Result<(), LinkError> {
        self.expect_ok(Request::SetEdge(from, to, weight))
    }

    pub fn set_transition_period(&self, ms: u64) -> Result<(), LinkError> {
        self.expect_ok(Request::SetPeriod(ms))
    }

    pub fn current(&self) -> Result<(usize, Option<String>), LinkError> {
        match self.roundtrip(Request::Current)? {
            Reply::Current { index, name } => Ok((index, name)),
            Reply::Err(message) => Err(LinkError::Control(message)),
            other => Err(LinkError::Control(format!("unexpected reply {other:?}"))),
        }
    }

    pub fn edges(&self, row: Option<usize>) -> Result<(usize, Vec<f64>), LinkError> {
        match self.roundtrip(Request::Edges(row))? {
            Reply::Edges { row, weights } => Ok((row, weights)),
            Reply::Err(message) => Err(LinkError::Control(message)),
            other => Err(LinkError::Control(format!("unexpected reply {other:?}"))),
        }
    }

    pub fn info(&self, index: Option<usize>) -> Result<StateInfo, LinkError> {
        match self.roundtrip(Request::Info(index))? {
            Reply::Info(info) => Ok(*info),
            Reply::Err(message) => Err(LinkError::Control(message)),
            other => Err(LinkError::Control(format!("unexpected reply {other:?}"))),
        }
    }

    pub fn queue_depth(&self) -> Result<(usize, [usize; 2]), LinkError> {
        match self.roundtrip(Request::QueueDepth)? {
            Reply::QueueDepth { packets, bytes } => Ok((packets, bytes)),
            Reply::Err(message) => Err(LinkError::Control(message)),
            other => Err(LinkError::Control(format!("unexpected reply {other:?}"))),
        }
    }

    /// Fire-and-forget shutdown; `Link::close` uses this and joins.
    pub fn shutdown(&self) {
        let _ = self.ctrl_tx.send(ControlMsg {
            request: Request::Shutdown,
            reply: None,
        });
    }
}

/// One emulated link: caller-facing endpoint on the left, the nested
/// transport on the right.
pub struct Link {
    ctrl_tx: Sender<ControlMsg>,
    egress_tx: Sender<Packet>,
    delivery_rx: Mutex<Receiver<Packet>>,
    speed_lr: SpeedCursor,
    worker: Option<JoinHandle<()>>,
}

impl Link {
    /// Opens a link over `transport` and starts its worker.
    pub fn open(
        transport: Box<dyn Transport>,
        options: LinkOptions,
        blink: Option<BlinkSender>,
    ) -> Result<Self, LinkError> {
        let (ctrl_tx, ctrl_rx) = bounded(64);
        let (egress_tx, egress_rx) = bounded(options.egress_capacity);
        let (delivery_tx, delivery_rx) = bounded(options.delivery_capacity);

        let seed = options.seed.unwrap_or_else(rand::random);
        let pipeline = Pipeline::new(SmallRng::seed_from_u64(seed));
        let speed_lr = pipeline.speed_cursor(Direction::LeftToRight);
        let speed_rl = pipeline.speed_cursor(Direction::RightToLeft);

        let mut graph = ConditionGraph::new();
        graph.transition_period_ms = options.transition_period_ms;

        let core = EventCore {
            transport,
            graph,
            queue: DelayQueue::new(options.fifo),
            pipeline,
            rng: SmallRng::seed_from_u64(seed.wrapping_add(0x9E37_79B9_7F4A_7C15)),
            ctrl_rx,
            egress_rx,
            delivery_tx,
            blink,
            speed_rl,
            transition_next: None,
            inbound_open: true,
            running: true,
        };

        let worker = std::thread::Builder::new()
            .name("vindkanal-link".into())
            .spawn(move || core.run())
            .map_err(LinkError::Transport)?;

        Ok(Self {
            ctrl_tx,
            egress_tx,
            delivery_rx: Mutex::new(delivery_rx),
            speed_lr,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            ctrl_tx: self.ctrl_tx.clone(),
        }
    }

    /// Submits a frame for left-to-right transmission.
    ///
    /// Deep-copies the caller's buffer, throttles against the left-to-right
    /// interface-speed cursor, then hands off through the bounded egress
    /// channel.
    pub fn send(&self, frame: &[u8], flags: u32) -> Result<(), LinkError> {
        loop {
            let resume_at = self.speed_lr.get();
            if resume_at <= now_ns() {
                break;
            }
            std::thread::sleep(until(resume_at));
        }

        let packet = Packet::new(frame.to_vec(), Direction::LeftToRight, flags);
        self.egress_tx.send(packet).map_err(|_| LinkError::Closed)
    }

    /// Receives one right-to-left frame, blocking until one is processed.
    ///
    /// Concurrent callers serialize on an internal lock; each delivered
    /// frame is observed by exactly one of them.
    pub fn recv(&self) -> Result<Vec<u8>, LinkError> {
        let rx = self.delivery_rx.lock();
        rx.recv().map(|p| p.payload).map_err(|_| LinkError::Closed)
    }

    /// `recv` with a deadline; `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        use crossbeam::channel::RecvTimeoutError;
        let rx = self.delivery_rx.lock();
        match rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet.payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }

    /// Closes the link: the worker quits, queued packets are discarded.
    pub fn close(mut self) {
        self.handle().shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.handle().shutdown();
            let _ = worker.join();
        }
    }
}

struct EventCore {
    transport: Box<dyn Transport>,
    graph: ConditionGraph,
    queue: DelayQueue,
    pipeline: Pipeline,
    /// RNG of the condition walk, separate from the pipeline's.
    rng: SmallRng,
    ctrl_rx: Receiver<ControlMsg>,
    egress_rx: Receiver<Packet>,
    delivery_tx: Sender<Packet>,
    blink: Option<BlinkSender>,
    speed_rl: SpeedCursor,
    /// Next condition-transition instant, armed only for multi-state graphs.
    transition_next: Option<u64>,
    inbound_open: bool,
    running: bool,
}

impl EventCore {
    fn run(mut self) {
        debug!("link worker started");
        let ctrl_rx = self.ctrl_rx.clone();
        let egress_rx = self.egress_rx.clone();
        let inbound_rx = self.transport.incoming().clone();

        self.arm_transition(now_ns());

        while self.running {
            let now = now_ns();
            self.expire_timers(now);

            // Inbound reads stay paused while the right-to-left speed
            // cursor is in the future.
            let resume_at = self.speed_rl.get();
            let inbound_paused = resume_at > now;

            let mut sel = Select::new();
            let ctrl_i = sel.recv(&ctrl_rx);
            let egress_i = sel.recv(&egress_rx);
            let inbound_i = if self.inbound_open && !inbound_paused {
                Some(sel.recv(&inbound_rx))
            } else {
                None
            };

            let wait = self.next_wait(inbound_paused.then_some(resume_at));
            let oper = match wait {
                Some(timeout) => match sel.select_timeout(timeout) {
                    Ok(oper) => oper,
                    Err(_) => continue, // deadline fired, loop handles it
                },
                None => sel.select(),
            };

            let index = oper.index();
            if index == ctrl_i {
                match oper.recv(&ctrl_rx) {
                    Ok(msg) => self.handle_control(msg),
                    Err(_) => self.running = false,
                }
            } else if index == egress_i {
                match oper.recv(&egress_rx) {
                    Ok(packet) => self.process(packet),
                    Err(_) => self.running = false,
                }
            } else if Some(index) == inbound_i {
                match oper.recv(&inbound_rx) {
                    Ok(frame) => self.inbound(frame),
                    Err(_) => {
                        debug!("transport inbound channel closed");
                        self.inbound_open = false;
                    }
                }
            }
        }

        self.transport.close();
        debug!("link worker stopped");
    }

    /// Smallest pending deadline, as a wait from now. `None` blocks
    /// indefinitely.
    fn next_wait(&self, resume_at: Option<u64>) -> Option<Duration> {
        let mut deadline: Option<u64> = None;
        for candidate in [self.queue.peek_due_at(), self.transition_next, resume_at]
            .into_iter()
            .flatten()
        {
            deadline = Some(deadline.map_or(candidate, |d: u64| d.min(candidate)));
        }
        // Never sleep zero: a due-now deadline still yields one wait tick.
        deadline.map(|d| until(d).max(Duration::from_nanos(1)))
    }

    fn expire_timers(&mut self, now: u64) {
        // Drain discipline: everything due goes out in one tight loop.
        while self.queue.peek_due_at().is_some_and(|due| due <= now) {
            if let Some(packet) = self.queue.dequeue() {
                self.transmit(packet);
            }
        }

        if self.transition_next.is_some_and(|at| at <= now) {
            let next = self.graph.step(&mut self.rng);
            trace!(state = next, "condition transition");
            self.arm_transition(now);
        }
    }

    fn arm_transition(&mut self, now: u64) {
        let period_ms = self.graph.transition_period_ms;
        self.transition_next = if self.graph.len() > 1 && period_ms > 0 {
            // An absurd period must not overflow the deadline; it just lands
            // in the unreachable future.
            Some(now.saturating_add(period_ms.saturating_mul(NS_PER_MS)))
        } else {
            None
        };
    }

    fn inbound(&mut self, frame: Bytes) {
        if frame.is_empty() {
            trace!("empty inbound frame dropped");
            return;
        }
        self.process(Packet::new(frame.to_vec(), Direction::RightToLeft, 0));
    }

    fn process(&mut self, packet: Packet) {
        let now = now_ns();
        let verdict =
            self.pipeline
                .process(packet, now, self.graph.current_state(), &mut self.queue);
        for copy in verdict.transmit {
            self.transmit(copy);
        }
    }

    fn transmit(&mut self, packet: Packet) {
        let direction = packet.direction;
        let length = packet.len();

        match direction {
            Direction::LeftToRight => {
                if let Err(e) = self.transport.send(&packet.payload, packet.flags) {
                    warn!("transport send failed: {e}");
                    return;
                }
            }
            Direction::RightToLeft => match self.delivery_tx.try_send(packet) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("delivery channel full, frame dropped");
                    return;
                }
                Err(TrySendError::Disconnected(_)) => return,
            },
        }

        trace!(direction = %direction, length, "transmitted");
        if let Some(blink) = &self.blink {
            blink.notify(direction.index(), length);
        }
    }

    fn handle_control(&mut self, msg: ControlMsg) {
        let reply = self.execute(msg.request);
        if let Some(tx) = msg.reply {
            let _ = tx.send(reply);
        }
    }

    fn execute(&mut self, request: Request) -> Reply {
        match request {
            Request::SetValue {
                metric,
                direction,
                value,
            } => {
                self.graph.current_state_mut().set(metric, direction, value);
                Reply::Ok
            }
            Request::SetFifo(fifo) => {
                self.queue.set_fifo(fifo);
                Reply::Ok
            }
            Request::Resize(states) => match self.graph.resize(states) {
                Ok(()) => {
                    self.arm_transition(now_ns());
                    Reply::Ok
                }
                Err(e) => Reply::Err(e.to_string()),
            },
            Request::SetCurrent(index) => match self.graph.set_current(index) {
                Ok(()) => Reply::Ok,
                Err(e) => Reply::Err(e.to_string()),
            },
            Request::SetName(index, name) => match self.graph.set_name(index, name) {
                Ok(()) => Reply::Ok,
                Err(e) => Reply::Err(e.to_string()),
            },
            Request::SetEdge(from, to, weight) => match self.graph.set_edge(from, to, weight) {
                Ok(()) => Reply::Ok,
                Err(e) => Reply::Err(e.to_string()),
            },
            Request::SetPeriod(ms) => {
                self.graph.transition_period_ms = ms;
                self.arm_transition(now_ns());
                Reply::Ok
            }
            Request::Current => Reply::Current {
                index: self.graph.current_index(),
                name: self.graph.current_state().name.clone(),
            },
            Request::Edges(row) => {
                let row = row.unwrap_or_else(|| self.graph.current_index());
                match self.graph.row(row) {
                    Ok(weights) => Reply::Edges { row, weights },
                    Err(e) => Reply::Err(e.to_string()),
                }
            }
            Request::Info(index) => {
                let index = index.unwrap_or_else(|| self.graph.current_index());
                match self.graph.state(index) {
                    Ok(state) => {
                        let mut values = [[WireValue::default(); 2]; METRIC_COUNT];
                        for metric in Metric::ALL {
                            values[metric.index()] = [
                                *state.get(metric, Direction::LeftToRight),
                                *state.get(metric, Direction::RightToLeft),
                            ];
                        }
                        Reply::Info(Box::new(StateInfo {
                            index,
                            name: state.name.clone(),
                            current: self.graph.current_index(),
                            states: self.graph.len(),
                            fifo: self.queue.is_fifo(),
                            transition_period_ms: self.graph.transition_period_ms,
                            values,
                        }))
                    }
                    Err(e) => Reply::Err(e.to_string()),
                }
            }
            Request::QueueDepth => Reply::QueueDepth {
                packets: self.queue.len(),
                bytes: [
                    self.queue.byte_size(Direction::LeftToRight),
                    self.queue.byte_size(Direction::RightToLeft),
                ],
            },
            Request::Shutdown => {
                self.running = false;
                Reply::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PairTransport;

    fn open_link() -> (Link, PairTransport) {
        let (left, right) = PairTransport::pair();
        let options = LinkOptions {
            seed: Some(7),
            ..LinkOptions::default()
        };
        let link = Link::open(Box::new(left), options, None).unwrap();
        (link, right)
    }

    #[test]
    fn clean_link_forwards_both_directions() {
        let (link, far) = open_link();

        link.send(b"to-the-right", 0).unwrap();
        let frame = far.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.as_ref(), b"to-the-right");

        far.send(b"to-the-left", 0).unwrap();
        let frame = link.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(frame, b"to-the-left");

        link.close();
    }

    #[test]
    fn control_plane_round_trips() {
        let (link, _far) = open_link();
        let handle = link.handle();

        handle.resize(3).unwrap();
        handle.set_edge(0, 1, 40.0).unwrap();
        let (row, weights) = handle.edges(Some(0)).unwrap();
        assert_eq!(row, 0);
        assert_eq!(weights, vec![60.0, 40.0, 0.0]);

        handle.set_name(1, "storm".into()).unwrap();
        handle.set_current(1).unwrap();
        assert_eq!(handle.current().unwrap(), (1, Some("storm".into())));

        let info = handle.info(None).unwrap();
        assert_eq!(info.index, 1);
        assert_eq!(info.states, 3);
        assert!(info.fifo);

        assert!(handle.set_current(9).is_err());
        link.close();
    }

    #[test]
    fn shutdown_closes_the_api() {
        let (link, _far) = open_link();
        let handle = link.handle();
        link.close();
        assert!(matches!(handle.resize(2), Err(LinkError::Closed)));
    }

    #[test]
    fn extreme_transition_period_does_not_kill_the_worker() {
        let (link, _far) = open_link();
        let handle = link.handle();

        handle.resize(2).unwrap();
        handle.set_transition_period(u64::MAX).unwrap();

        // The worker must survive the re-arm and keep serving requests.
        assert_eq!(handle.current().unwrap().0, 0);
        link.send(b"still-alive", 0).unwrap();
        assert_eq!(handle.info(None).unwrap().states, 2);

        link.close();
    }

    #[test]
    fn queue_depth_reports_pending_bytes() {
        let (link, _far) = open_link();
        let handle = link.handle();
        handle
            .set_value(Metric::Delay, None, WireValue::fixed(200.0))
            .unwrap();

        link.send(&[0u8; 100], 0).unwrap();
        // Give the worker a moment to run the pipeline.
        std::thread::sleep(Duration::from_millis(50));
        let (packets, bytes) = handle.queue_depth().unwrap();
        assert_eq!(packets, 1);
        assert_eq!(bytes[0], 100);

        link.close();
    }
}
