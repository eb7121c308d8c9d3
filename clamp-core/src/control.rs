//! Request seam between the control path and the tick loop.
//!
//! Every mutation of controller state travels as a [`ControlRequest`]. The
//! control path closes the [`TickGate`], waits until no tick is in flight,
//! hands the request to the tick side through a queue, and reopens the gate
//! once the request has been applied. Queue transports stay abstract behind
//! [`RequestQueueProducer`] and [`RequestQueueConsumer`] so the same logic runs
//! over an in-memory mock in tests and over channels on the bench.

use alloc::vec::Vec;
use core::fmt;

use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::buffers::{BufferError, BufferIndex};
use crate::config::{ParameterError, Parameters};
use crate::controller::ExecutionMode;
use crate::protocol::Protocol;

/// Mutation requested by the control path.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlRequest {
    StartThreshold,
    StopThreshold,
    StartPace,
    StopPace,
    /// Starts a run over a snapshot of the operator's protocol.
    StartProtocol(Protocol),
    StopProtocol,
    /// Parked until the next mode activation.
    UpdateParameters(Parameters),
    /// New sampling period in milliseconds.
    SetPeriod(f64),
    /// The external data recorder changed state on its own.
    RecordingChanged { active: bool },
    LoadWaveform { index: BufferIndex, samples: Vec<f64> },
    /// Rewinds the run clock without changing mode.
    ResetClock,
}

impl ControlRequest {
    /// Short label used in transcripts and diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            ControlRequest::StartThreshold => "start-threshold",
            ControlRequest::StopThreshold => "stop-threshold",
            ControlRequest::StartPace => "start-pace",
            ControlRequest::StopPace => "stop-pace",
            ControlRequest::StartProtocol(_) => "start-protocol",
            ControlRequest::StopProtocol => "stop-protocol",
            ControlRequest::UpdateParameters(_) => "update-parameters",
            ControlRequest::SetPeriod(_) => "set-period",
            ControlRequest::RecordingChanged { .. } => "recording-changed",
            ControlRequest::LoadWaveform { .. } => "load-waveform",
            ControlRequest::ResetClock => "reset-clock",
        }
    }
}

/// Reasons the tick side refuses a request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A protocol start was requested with no steps.
    EmptyProtocol,
    /// Another mode (or the requested one) is already running.
    Busy { active: ExecutionMode },
    /// Sampling period is zero, negative or not finite.
    InvalidPeriod,
    Parameter(ParameterError),
    Buffer(BufferError),
    /// The slot is being played back by the running protocol.
    ClampSourceActive,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyProtocol => f.write_str("no protocol entered"),
            ConfigError::Busy { active } => write!(f, "{active} mode is active"),
            ConfigError::InvalidPeriod => f.write_str("period must be a positive number of ms"),
            ConfigError::Parameter(error) => error.fmt(f),
            ConfigError::Buffer(error) => error.fmt(f),
            ConfigError::ClampSourceActive => {
                f.write_str("buffer is the source of the running AP clamp")
            }
        }
    }
}

impl From<ParameterError> for ConfigError {
    fn from(error: ParameterError) -> Self {
        ConfigError::Parameter(error)
    }
}

impl From<BufferError> for ConfigError {
    fn from(error: BufferError) -> Self {
        ConfigError::Buffer(error)
    }
}

/// Verdict the tick side returns for each applied request.
pub type RequestOutcome = Result<(), ConfigError>;

/// Error surfaced when a request cannot be enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestEnqueueError<E = ()> {
    /// Queue has reached its maximum capacity.
    QueueFull,
    /// Queue has been disconnected from its consumer.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

impl<E> RequestEnqueueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> RequestEnqueueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            RequestEnqueueError::QueueFull => RequestEnqueueError::QueueFull,
            RequestEnqueueError::Disconnected => RequestEnqueueError::Disconnected,
            RequestEnqueueError::Other(err) => RequestEnqueueError::Other(mapper(err)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RequestEnqueueError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestEnqueueError::QueueFull => f.write_str("request queue full"),
            RequestEnqueueError::Disconnected => f.write_str("tick loop disconnected"),
            RequestEnqueueError::Other(err) => err.fmt(f),
        }
    }
}

/// Error surfaced when dequeueing from the request queue fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestDequeueError<E = ()> {
    /// Queue has been disconnected from its producers.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

impl<E> RequestDequeueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> RequestDequeueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            RequestDequeueError::Disconnected => RequestDequeueError::Disconnected,
            RequestDequeueError::Other(err) => RequestDequeueError::Other(mapper(err)),
        }
    }
}

/// Implemented by producers that push requests toward the tick loop.
pub trait RequestQueueProducer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to enqueue a request without blocking.
    ///
    /// # Errors
    ///
    /// Reports a full or disconnected queue.
    fn try_enqueue(&mut self, request: ControlRequest)
    -> Result<(), RequestEnqueueError<Self::Error>>;

    /// Returns the queue capacity if it is known at compile- or run-time.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Returns the current queue depth if it can be observed.
    fn len(&self) -> Option<usize> {
        None
    }

    /// Returns `true` when the queue reports that it currently holds no items.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|current| current == 0)
    }

    /// Remaining slots when both capacity and length are observable.
    fn remaining(&self) -> Option<usize> {
        match (self.capacity(), self.len()) {
            (Some(capacity), Some(len)) => Some(capacity.saturating_sub(len)),
            _ => None,
        }
    }

    /// Returns `true` when the queue reports that it is currently full.
    fn is_full(&self) -> Option<bool> {
        self.remaining().map(|slot_count| slot_count == 0)
    }
}

/// Implemented by the tick side to drain pending requests between ticks.
pub trait RequestQueueConsumer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to dequeue a request without blocking.
    ///
    /// Returns `Ok(None)` when the queue is currently empty.
    ///
    /// # Errors
    ///
    /// Reports a disconnected or failed transport.
    fn try_dequeue(&mut self) -> Result<Option<ControlRequest>, RequestDequeueError<Self::Error>>;
}

/// Failure reported to the operator for a control request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlError<E = ()> {
    Queue(RequestEnqueueError<E>),
    /// The tick side refused the request.
    Rejected(ConfigError),
    /// No verdict arrived in time; the gate was reopened regardless.
    Timeout,
}

impl<E> From<RequestEnqueueError<E>> for ControlError<E> {
    fn from(error: RequestEnqueueError<E>) -> Self {
        ControlError::Queue(error)
    }
}

impl<E: fmt::Display> fmt::Display for ControlError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Queue(error) => error.fmt(f),
            ControlError::Rejected(error) => error.fmt(f),
            ControlError::Timeout => f.write_str("tick loop did not answer"),
        }
    }
}

/// Control-path handle used by the operator console.
pub trait ControlPort {
    /// Transport-specific error type.
    type Error;

    /// Applies `request` behind the tick barrier and returns the verdict.
    ///
    /// # Errors
    ///
    /// Returns the queue failure, the tick side's rejection, or a timeout.
    fn reconfigure(&mut self, request: ControlRequest) -> Result<(), ControlError<Self::Error>>;

    /// Queues `request` without closing the gate. Used for deferred updates.
    ///
    /// # Errors
    ///
    /// Returns the queue failure.
    fn defer(&mut self, request: ControlRequest) -> Result<(), ControlError<Self::Error>>;
}

/// Disable/barrier/enable primitive shared by the tick loop and control path.
///
/// The tick side calls [`TickGate::enter`] before every tick and holds the
/// returned permit for the duration of the tick. The control side calls
/// [`TickGate::quiesce`], mutates, then [`TickGate::enable`].
#[derive(Debug)]
pub struct TickGate {
    enabled: AtomicBool,
    in_flight: AtomicBool,
    ticks: AtomicU64,
}

impl TickGate {
    /// Creates an open gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    /// Claims the right to run one tick. Returns `None` while disabled.
    #[must_use]
    pub fn enter(&self) -> Option<TickPermit<'_>> {
        self.in_flight.store(true, Ordering::SeqCst);
        if self.enabled.load(Ordering::SeqCst) {
            Some(TickPermit { gate: self })
        } else {
            self.in_flight.store(false, Ordering::SeqCst);
            None
        }
    }

    /// Stops new ticks from starting. An in-flight tick still completes.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// `true` when disabled and no tick is running.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        !self.is_enabled() && !self.in_flight.load(Ordering::SeqCst)
    }

    /// Disables the gate and waits until any in-flight tick has returned.
    pub fn quiesce<R: FnMut()>(&self, mut relax: R) {
        self.disable();
        while self.in_flight.load(Ordering::SeqCst) {
            relax();
        }
    }

    /// Number of ticks that have run to completion.
    #[must_use]
    pub fn completed_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

impl Default for TickGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that a tick may run. Dropping it marks the tick finished.
#[derive(Debug)]
pub struct TickPermit<'a> {
    gate: &'a TickGate,
}

impl Drop for TickPermit<'_> {
    fn drop(&mut self) {
        self.gate.ticks.fetch_add(1, Ordering::AcqRel);
        self.gate.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec as HeaplessVec;

    struct MockQueue {
        capacity: usize,
        requests: HeaplessVec<ControlRequest, 4>,
    }

    impl MockQueue {
        fn new(capacity: usize) -> Self {
            Self {
                capacity,
                requests: HeaplessVec::new(),
            }
        }
    }

    impl RequestQueueProducer for MockQueue {
        type Error = ();

        fn try_enqueue(
            &mut self,
            request: ControlRequest,
        ) -> Result<(), RequestEnqueueError<Self::Error>> {
            if self.requests.len() >= self.capacity {
                return Err(RequestEnqueueError::QueueFull);
            }
            self.requests
                .push(request)
                .map_err(|_| RequestEnqueueError::QueueFull)
        }

        fn capacity(&self) -> Option<usize> {
            Some(self.capacity)
        }

        fn len(&self) -> Option<usize> {
            Some(self.requests.len())
        }
    }

    impl RequestQueueConsumer for MockQueue {
        type Error = ();

        fn try_dequeue(
            &mut self,
        ) -> Result<Option<ControlRequest>, RequestDequeueError<Self::Error>> {
            if self.requests.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.requests.remove(0)))
            }
        }
    }

    #[test]
    fn producer_reports_capacity_and_fullness() {
        let mut queue = MockQueue::new(2);
        assert_eq!(queue.is_empty(), Some(true));
        queue.try_enqueue(ControlRequest::StartPace).expect("room");
        assert_eq!(queue.remaining(), Some(1));
        queue.try_enqueue(ControlRequest::StopPace).expect("room");
        assert_eq!(queue.is_full(), Some(true));
        assert_eq!(
            queue.try_enqueue(ControlRequest::ResetClock),
            Err(RequestEnqueueError::QueueFull)
        );
    }

    #[test]
    fn consumer_drains_in_fifo_order() {
        let mut queue = MockQueue::new(4);
        queue.try_enqueue(ControlRequest::StartThreshold).expect("room");
        queue
            .try_enqueue(ControlRequest::SetPeriod(0.5))
            .expect("room");

        assert_eq!(queue.try_dequeue(), Ok(Some(ControlRequest::StartThreshold)));
        assert_eq!(queue.try_dequeue(), Ok(Some(ControlRequest::SetPeriod(0.5))));
        assert_eq!(queue.try_dequeue(), Ok(None));
    }

    #[test]
    fn map_other_preserves_variants() {
        let err: RequestEnqueueError<u8> = RequestEnqueueError::Other(3);
        assert_eq!(err.map_other(u16::from), RequestEnqueueError::Other(3_u16));
        let full: RequestEnqueueError<u8> = RequestEnqueueError::QueueFull;
        assert_eq!(full.map_other(u16::from), RequestEnqueueError::QueueFull);
        let gone: RequestDequeueError<u8> = RequestDequeueError::Disconnected;
        assert_eq!(gone.map_other(u16::from), RequestDequeueError::Disconnected);
    }

    #[test]
    fn gate_refuses_ticks_while_disabled() {
        let gate = TickGate::new();
        {
            let permit = gate.enter();
            assert!(permit.is_some());
            assert!(!gate.is_quiescent());
        }
        assert_eq!(gate.completed_ticks(), 1);

        gate.quiesce(|| panic!("no tick should be in flight"));
        assert!(gate.is_quiescent());
        assert!(gate.enter().is_none());
        assert_eq!(gate.completed_ticks(), 1);

        gate.enable();
        assert!(gate.enter().is_some());
        assert_eq!(gate.completed_ticks(), 2);
    }

    #[test]
    fn quiesce_waits_for_the_running_tick() {
        let gate = TickGate::new();
        let permit = gate.enter().expect("gate open");
        let mut permit = Some(permit);
        let mut spins = 0;
        gate.quiesce(|| {
            spins += 1;
            permit.take();
        });
        assert_eq!(spins, 1);
        assert!(gate.is_quiescent());
    }
}
