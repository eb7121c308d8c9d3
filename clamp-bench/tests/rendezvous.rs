use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clamp_bench::cell::SampleSource;
use clamp_bench::config::Pacing;
use clamp_bench::rig::Rig;
use clamp_core::buffers::WaveformStore;
use clamp_core::config::Parameters;
use clamp_core::control::{ConfigError, ControlPort, ControlRequest};
use clamp_core::controller::{Actuation, Controller, ExecutionMode};
use clamp_core::timing::SamplePeriod;

/// Source that parks inside `read` once armed, until the test releases it.
struct ParkingCell {
    armed: Arc<AtomicBool>,
    entered: Sender<()>,
    release: Receiver<()>,
    outputs: Sender<Actuation>,
}

impl SampleSource for ParkingCell {
    fn read(&mut self) -> f64 {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        -0.08
    }

    fn drive(&mut self, output: Actuation, _clamping: bool, _period: SamplePeriod) {
        let _ = self.outputs.send(output);
    }
}

struct Harness {
    rig: Rig<ParkingCell>,
    armed: Arc<AtomicBool>,
    entered: Receiver<()>,
    release: Sender<()>,
    outputs: Receiver<Actuation>,
}

fn harness() -> Harness {
    let armed = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let (outputs_tx, outputs) = mpsc::channel();
    let cell = ParkingCell {
        armed: Arc::clone(&armed),
        entered: entered_tx,
        release: release_rx,
        outputs: outputs_tx,
    };
    let period = SamplePeriod::from_ms(1.0).expect("valid period");
    let controller = Controller::new(period, WaveformStore::with_slot_capacity(16));
    let rig = Rig::spawn(controller, cell, Pacing::Fast).expect("tick thread starts");
    Harness {
        rig,
        armed,
        entered,
        release,
        outputs,
    }
}

fn wait_for<F: FnMut() -> bool>(mut condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::yield_now();
    }
}

#[test]
fn reconfigure_waits_for_the_in_flight_tick() {
    let harness = harness();
    harness.armed.store(true, Ordering::SeqCst);
    harness
        .entered
        .recv_timeout(Duration::from_secs(5))
        .expect("tick parks inside read");
    let parked_at = harness.rig.completed_ticks();

    let mut port = harness.rig.port();
    let (done_tx, done) = mpsc::channel();
    let control = thread::spawn(move || {
        let _ = done_tx.send(port.reconfigure(ControlRequest::StartPace));
    });

    assert_eq!(
        done.recv_timeout(Duration::from_millis(200)),
        Err(RecvTimeoutError::Timeout),
        "reconfigure finished while a tick was still running"
    );
    assert_eq!(harness.rig.snapshot().mode, ExecutionMode::Idle);
    assert_eq!(harness.rig.completed_ticks(), parked_at);

    // Only outputs from ticks that started before the request can be queued.
    while harness.outputs.try_recv().is_ok() {}

    harness.release.send(()).expect("tick thread listening");
    let verdict = done
        .recv_timeout(Duration::from_secs(5))
        .expect("reconfigure completes after the tick");
    assert_eq!(verdict, Ok(()));
    control.join().expect("control thread joins");

    assert!(harness.rig.completed_ticks() > parked_at);
    let parked_output = harness
        .outputs
        .recv_timeout(Duration::from_secs(5))
        .expect("parked tick drives the cell");
    assert_eq!(parked_output, Actuation::ZERO, "parked tick ran as idle");

    wait_for(|| harness.rig.snapshot().mode == ExecutionMode::Pace);
}

#[test]
fn deferred_updates_do_not_close_the_gate() {
    let harness = harness();
    harness.armed.store(true, Ordering::SeqCst);
    harness
        .entered
        .recv_timeout(Duration::from_secs(5))
        .expect("tick parks inside read");

    // A deferred update returns at once even with a tick in flight.
    let mut port = harness.rig.port();
    port.defer(ControlRequest::UpdateParameters(Parameters {
        ljp_mv: f64::NAN,
        ..Parameters::DEFAULT
    }))
    .expect("queue has room");
    assert!(harness.rig.take_deferred_error().is_none());

    harness.release.send(()).expect("tick thread listening");
    let mut rejection = None;
    wait_for(|| {
        rejection = harness.rig.take_deferred_error();
        rejection.is_some()
    });
    assert!(matches!(rejection, Some(ConfigError::Parameter(_))));
    assert_eq!(harness.rig.snapshot().mode, ExecutionMode::Idle);
}
