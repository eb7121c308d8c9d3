//! Tick thread and the control port that reconfigures it.
//!
//! The tick thread owns the [`Controller`] and the [`SampleSource`]. Each
//! loop pass drains pending requests, runs one tick if the [`TickGate`] lets
//! it, and publishes a snapshot. Requests cross over on `embassy-sync`
//! channels so the console never touches controller state directly.
//!
//! Barrier requests are numbered in the order they are queued, and every
//! verdict carries the number of the request it answers. A request whose
//! caller gave up waiting is withdrawn and never applied.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clamp_core::control::{
    ConfigError, ControlError, ControlPort, ControlRequest, RequestDequeueError,
    RequestEnqueueError, RequestOutcome, RequestQueueConsumer, RequestQueueProducer, TickGate,
};
use clamp_core::controller::{Controller, Snapshot};
use clamp_core::repl::status::StatusProvider;
use clamp_core::telemetry::{EventId, TelemetryRecord};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use heapless::Vec as HeaplessVec;

use crate::cell::SampleSource;
use crate::config::Pacing;

type RigMutex = CriticalSectionRawMutex;

/// Depth of the request, deferred and reply queues.
pub const REQUEST_QUEUE_DEPTH: usize = 4;
/// Telemetry records buffered between console polls.
pub const EVENT_QUEUE_DEPTH: usize = 64;

/// How long [`RigPort::reconfigure`] waits for a verdict once the gate is closed.
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
/// Realtime pacing gives up on catching up past this lag.
const MAX_LAG: Duration = Duration::from_millis(50);
/// Longest realtime sleep between two looks at the request queues.
const IDLE_SLICE: Duration = Duration::from_millis(5);

/// Tick-side answer to the barrier request numbered `ticket`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub ticket: u64,
    pub outcome: RequestOutcome,
}

pub type RequestQueue = Channel<RigMutex, ControlRequest, REQUEST_QUEUE_DEPTH>;
pub type ReplyQueue = Channel<RigMutex, Verdict, REQUEST_QUEUE_DEPTH>;
pub type EventQueue = Channel<RigMutex, TelemetryRecord, EVENT_QUEUE_DEPTH>;

/// Numbering of barrier requests. Queueing and numbering happen under one
/// lock, so the n-th request dequeued is always ticket n.
#[derive(Debug, Default)]
struct Tickets {
    issued: u64,
    served: u64,
    /// Queued tickets whose caller timed out.
    withdrawn: HeaplessVec<u64, REQUEST_QUEUE_DEPTH>,
}

/// State shared between the tick thread and the console.
pub struct RigShared {
    gate: TickGate,
    /// Barrier requests; every one gets a reply.
    requests: RequestQueue,
    /// Requests applied without closing the gate.
    deferred: RequestQueue,
    replies: ReplyQueue,
    tickets: Mutex<RigMutex, RefCell<Tickets>>,
    events: EventQueue,
    snapshot: Mutex<RigMutex, Cell<Snapshot>>,
    deferred_error: Mutex<RigMutex, Cell<Option<ConfigError>>>,
    shutdown: AtomicBool,
}

impl RigShared {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            gate: TickGate::new(),
            requests: Channel::new(),
            deferred: Channel::new(),
            replies: Channel::new(),
            tickets: Mutex::new(RefCell::new(Tickets::default())),
            events: Channel::new(),
            snapshot: Mutex::new(Cell::new(snapshot)),
            deferred_error: Mutex::new(Cell::new(None)),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// Adapter exposing a request channel as a [`RequestQueueProducer`].
pub struct RequestProducer<'a> {
    queue: &'a RequestQueue,
}

impl<'a> RequestProducer<'a> {
    #[must_use]
    pub const fn new(queue: &'a RequestQueue) -> Self {
        Self { queue }
    }
}

impl RequestQueueProducer for RequestProducer<'_> {
    type Error = Infallible;

    fn try_enqueue(
        &mut self,
        request: ControlRequest,
    ) -> Result<(), RequestEnqueueError<Self::Error>> {
        match self.queue.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RequestEnqueueError::QueueFull),
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(REQUEST_QUEUE_DEPTH)
    }

    fn len(&self) -> Option<usize> {
        Some(self.queue.len())
    }
}

/// Adapter exposing a request channel as a [`RequestQueueConsumer`].
pub struct RequestConsumer<'a> {
    queue: &'a RequestQueue,
}

impl<'a> RequestConsumer<'a> {
    #[must_use]
    pub const fn new(queue: &'a RequestQueue) -> Self {
        Self { queue }
    }
}

impl RequestQueueConsumer for RequestConsumer<'_> {
    type Error = Infallible;

    fn try_dequeue(&mut self) -> Result<Option<ControlRequest>, RequestDequeueError<Self::Error>> {
        Ok(self.queue.try_receive().ok())
    }
}

/// Running bench: the tick thread plus the handles the console needs.
pub struct Rig<S> {
    shared: Arc<RigShared>,
    handle: Option<JoinHandle<(Controller, S)>>,
}

impl<S> Rig<S>
where
    S: SampleSource + Send + 'static,
{
    /// Starts the tick thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(controller: Controller, source: S, pacing: Pacing) -> io::Result<Self> {
        let shared = Arc::new(RigShared::new(controller.snapshot()));
        let tick_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("clamp-tick".to_string())
            .spawn(move || run_ticks(&tick_shared, controller, source, pacing))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

impl<S> Rig<S> {
    /// A control port bound to this rig.
    #[must_use]
    pub fn port(&self) -> RigPort {
        RigPort {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot published after the most recent loop pass.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        latest_snapshot(&self.shared)
    }

    /// Ticks that have run to completion.
    #[must_use]
    pub fn completed_ticks(&self) -> u64 {
        self.shared.gate.completed_ticks()
    }

    /// Telemetry forwarded since the last call, oldest first.
    #[must_use]
    pub fn drain_events(&self) -> Vec<TelemetryRecord> {
        let mut events = Vec::new();
        while let Ok(record) = self.shared.events.try_receive() {
            events.push(record);
        }
        events
    }

    /// Rejection of the most recent deferred request, if it failed.
    #[must_use]
    pub fn take_deferred_error(&self) -> Option<ConfigError> {
        self.shared.deferred_error.lock(Cell::take)
    }

    /// Stops the tick thread and hands back what it owned.
    ///
    /// Returns `None` if the tick thread panicked.
    pub fn shutdown(mut self) -> Option<(Controller, S)> {
        self.stop()
    }

    fn stop(&mut self) -> Option<(Controller, S)> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.gate.enable();
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

impl<S> Drop for Rig<S> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Console-side handle implementing the disable/barrier/mutate/enable cycle.
#[derive(Clone)]
pub struct RigPort {
    shared: Arc<RigShared>,
}

impl RigPort {
    /// Queues `request` and waits for its verdict. The console is the only
    /// caller, so at most one exchange is in progress.
    fn exchange(&self, request: ControlRequest) -> Result<(), ControlError<Infallible>> {
        let ticket = self.shared.tickets.lock(|tickets| {
            let mut tickets = tickets.borrow_mut();
            RequestProducer::new(&self.shared.requests).try_enqueue(request)?;
            let ticket = tickets.issued;
            tickets.issued += 1;
            Ok::<_, RequestEnqueueError<Infallible>>(ticket)
        })?;

        let deadline = Instant::now() + REPLY_TIMEOUT;
        while Instant::now() < deadline {
            if let Some(outcome) = self.take_verdict(ticket) {
                return outcome.map_err(ControlError::Rejected);
            }
            thread::yield_now();
        }

        // Either the verdict is already queued or the request never runs.
        let late = self.shared.tickets.lock(|tickets| {
            let verdict = self.take_verdict(ticket);
            if verdict.is_none() {
                let _ = tickets.borrow_mut().withdrawn.push(ticket);
            }
            verdict
        });
        match late {
            Some(outcome) => outcome.map_err(ControlError::Rejected),
            None => Err(ControlError::Timeout),
        }
    }

    /// Takes the verdict for `ticket`, dropping verdicts left over from
    /// earlier requests.
    fn take_verdict(&self, ticket: u64) -> Option<RequestOutcome> {
        while let Ok(verdict) = self.shared.replies.try_receive() {
            if verdict.ticket == ticket {
                return Some(verdict.outcome);
            }
        }
        None
    }
}

impl ControlPort for RigPort {
    type Error = Infallible;

    fn reconfigure(&mut self, request: ControlRequest) -> Result<(), ControlError<Self::Error>> {
        self.shared.gate.quiesce(thread::yield_now);
        let result = self.exchange(request);
        self.shared.gate.enable();
        result
    }

    fn defer(&mut self, request: ControlRequest) -> Result<(), ControlError<Self::Error>> {
        RequestProducer::new(&self.shared.deferred).try_enqueue(request)?;
        Ok(())
    }
}

impl StatusProvider for RigPort {
    fn snapshot(&self) -> Snapshot {
        latest_snapshot(&self.shared)
    }
}

fn latest_snapshot(shared: &RigShared) -> Snapshot {
    shared.snapshot.lock(Cell::get)
}

fn run_ticks<S: SampleSource>(
    shared: &RigShared,
    mut controller: Controller,
    mut source: S,
    pacing: Pacing,
) -> (Controller, S) {
    let mut cursor: EventId = controller.telemetry().next_id();
    let mut deadline = Instant::now();

    while !shared.shutdown.load(Ordering::Acquire) {
        apply_pending(shared, &mut controller);

        if let Some(_permit) = shared.gate.enter() {
            let reading = source.read();
            let output = controller.execute(reading);
            let clamping = controller.clamp_source().is_some();
            source.drive(output, clamping, controller.period());
        }

        cursor = publish(shared, &controller, cursor);

        match pacing {
            Pacing::Realtime => {
                deadline += Duration::from_secs_f64(controller.period().as_ms() / 1e3);
                let now = Instant::now();
                if now > deadline && now - deadline > MAX_LAG {
                    deadline = now;
                }
                cursor = idle_until(shared, &mut controller, cursor, deadline);
            }
            Pacing::Fast => thread::yield_now(),
        }
    }

    (controller, source)
}

/// Sleeps until `deadline` in slices of at most [`IDLE_SLICE`], serving
/// requests between slices so long periods do not stall the console.
fn idle_until(
    shared: &RigShared,
    controller: &mut Controller,
    mut cursor: EventId,
    deadline: Instant,
) -> EventId {
    loop {
        let now = Instant::now();
        if now >= deadline || shared.shutdown.load(Ordering::Acquire) {
            return cursor;
        }
        thread::sleep((deadline - now).min(IDLE_SLICE));
        if apply_pending(shared, controller) {
            cursor = publish(shared, controller, cursor);
        }
    }
}

fn publish(shared: &RigShared, controller: &Controller, cursor: EventId) -> EventId {
    shared.snapshot.lock(|cell| cell.set(controller.snapshot()));
    forward_events(shared, controller, cursor)
}

/// Applies every queued request. Returns `true` if any was taken off a queue.
fn apply_pending(shared: &RigShared, controller: &mut Controller) -> bool {
    let mut taken = false;
    let mut deferred = RequestConsumer::new(&shared.deferred);
    while let Ok(Some(request)) = deferred.try_dequeue() {
        taken = true;
        if let Err(error) = controller.apply(request) {
            shared.deferred_error.lock(|cell| cell.set(Some(error)));
        }
    }

    let mut requests = RequestConsumer::new(&shared.requests);
    while serve_request(shared, controller, &mut requests) {
        taken = true;
    }
    taken
}

/// Dequeues one barrier request and answers it, unless its caller withdrew
/// it. Returns `false` once the queue is empty.
fn serve_request(
    shared: &RigShared,
    controller: &mut Controller,
    requests: &mut RequestConsumer<'_>,
) -> bool {
    shared.tickets.lock(|tickets| {
        let Ok(Some(request)) = requests.try_dequeue() else {
            return false;
        };
        let mut tickets = tickets.borrow_mut();
        let ticket = tickets.served;
        tickets.served += 1;
        if let Some(position) = tickets.withdrawn.iter().position(|t| *t == ticket) {
            tickets.withdrawn.swap_remove(position);
        } else {
            let outcome = controller.apply(request);
            // A full reply queue only holds verdicts nobody is waiting for.
            let _ = shared.replies.try_send(Verdict { ticket, outcome });
        }
        true
    })
}

/// Pushes new telemetry to the console. Records that do not fit stay behind
/// the returned cursor until the console drains the queue.
fn forward_events(shared: &RigShared, controller: &Controller, cursor: EventId) -> EventId {
    for record in controller.telemetry().since(cursor) {
        if shared.events.try_send(*record).is_err() {
            return record.id;
        }
    }
    controller.telemetry().next_id()
}
