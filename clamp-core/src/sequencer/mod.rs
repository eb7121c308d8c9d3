//! Protocol sequencer: walks the step list one tick at a time.
//!
//! ```text
//! StepInit --(timed step ready)--> Exec --(end sample reached)--> StepInit
//!     |                              |
//!     +--(list exhausted / abort)--> End --(trials left)--> StepInit
//! ```
//!
//! `StepInit` consumes every untimed step (recorder toggles, Vm record start
//! and stop) within a single tick and stops at the first timed step, which
//! then executes in the same tick. Trials repeat back to back.

use core::fmt;

use crate::buffers::{BufferIndex, WaveformStore};
use crate::config::Parameters;
use crate::controller::{Actuation, PacingTiming, RunState};
use crate::protocol::{BeatTrain, Protocol, ProtocolStep};
use crate::telemetry::{AbortReason, TelemetryEventKind, TelemetryPayload, TelemetryRecorder};
use crate::timing::SamplePeriod;

/// How long the AP-clamp digital marker stays asserted after a cycle starts.
pub const CLAMP_MARKER_MS: f64 = 50.0;

/// Sub-phase of a protocol run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolPhase {
    StepInit,
    Exec,
    End,
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolPhase::StepInit => f.write_str("step-init"),
            ProtocolPhase::Exec => f.write_str("exec"),
            ProtocolPhase::End => f.write_str("end"),
        }
    }
}

/// Position of a running protocol, as published in the snapshot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtocolProgress {
    pub phase: ProtocolPhase,
    /// Zero-based index of the current step.
    pub step: usize,
    pub steps: usize,
    /// One-based trial number.
    pub trial: u32,
    pub trials: u32,
}

/// Outcome of one sequencer tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SequencerStatus {
    Running,
    Finished,
}

/// Everything a sequencer tick may read or write.
pub(crate) struct TickContext<'a> {
    pub(crate) period: SamplePeriod,
    pub(crate) params: &'a Parameters,
    pub(crate) timing: PacingTiming,
    pub(crate) run: &'a mut RunState,
    pub(crate) store: &'a mut WaveformStore,
    pub(crate) telemetry: &'a mut TelemetryRecorder,
}

impl TickContext<'_> {
    fn emit(&mut self, event: TelemetryEventKind, payload: TelemetryPayload) {
        self.run.emit(self.telemetry, event, payload);
    }
}

/// Timed step currently in `Exec`.
#[derive(Copy, Clone, Debug, PartialEq)]
struct ActiveStep {
    step: ProtocolStep,
    cycle_samples: i64,
    end_sample: i64,
}

/// Per-run protocol state. Owns its own copy of the step list.
#[derive(Clone, Debug)]
pub struct ProtocolSequencer {
    protocol: Protocol,
    phase: ProtocolPhase,
    step_index: usize,
    trial: u32,
    trials: u32,
    active: Option<ActiveStep>,
    average_count: u32,
    vm_record: Option<BufferIndex>,
    vm_overflowed: bool,
    aborted: Option<AbortReason>,
}

impl ProtocolSequencer {
    pub(crate) fn new(protocol: Protocol, trials: u32) -> Self {
        Self {
            protocol,
            phase: ProtocolPhase::StepInit,
            step_index: 0,
            trial: 1,
            trials: trials.max(1),
            active: None,
            average_count: 0,
            vm_record: None,
            vm_overflowed: false,
            aborted: None,
        }
    }

    #[must_use]
    pub fn progress(&self) -> ProtocolProgress {
        ProtocolProgress {
            phase: self.phase,
            step: self.step_index,
            steps: self.protocol.len(),
            trial: self.trial,
            trials: self.trials,
        }
    }

    /// Buffer being played back by an executing AP-clamp step.
    #[must_use]
    pub fn clamp_source(&self) -> Option<BufferIndex> {
        match self.active?.step {
            ProtocolStep::ApClamp { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    #[must_use]
    pub const fn aborted(&self) -> Option<AbortReason> {
        self.aborted
    }

    /// Restarts the current trial from the first step.
    pub(crate) fn rewind(&mut self) {
        self.phase = ProtocolPhase::StepInit;
        self.step_index = 0;
        self.active = None;
    }

    pub(crate) fn tick(&mut self, ctx: &mut TickContext<'_>) -> SequencerStatus {
        if self.phase == ProtocolPhase::StepInit {
            self.init_steps(ctx);
        }
        if self.phase == ProtocolPhase::Exec {
            self.exec(ctx);
        }
        if self.phase == ProtocolPhase::End {
            return self.finish(ctx);
        }
        SequencerStatus::Running
    }

    fn init_steps(&mut self, ctx: &mut TickContext<'_>) {
        loop {
            let Some(step) = self.protocol.get(self.step_index).copied() else {
                self.phase = ProtocolPhase::End;
                return;
            };

            match step {
                ProtocolStep::StartDataRecord => {
                    if !ctx.run.recording {
                        ctx.run.recording = true;
                        ctx.emit(TelemetryEventKind::RecordingStarted, TelemetryPayload::none());
                    }
                }
                ProtocolStep::StopDataRecord => {
                    if ctx.run.recording {
                        ctx.run.recording = false;
                        ctx.emit(TelemetryEventKind::RecordingStopped, TelemetryPayload::none());
                    }
                }
                ProtocolStep::StartVmRecord(buffer) => {
                    ctx.store.clear(buffer);
                    self.vm_record = Some(buffer);
                    self.vm_overflowed = false;
                }
                ProtocolStep::StopVmRecord => self.vm_record = None,
                ProtocolStep::Pace(train)
                | ProtocolStep::AverageVm { train, .. }
                | ProtocolStep::ApClamp { train, .. } => {
                    self.begin_train(ctx, step, train);
                    return;
                }
                ProtocolStep::Wait { wait_ms } => {
                    let active = ActiveStep {
                        step,
                        cycle_samples: 0,
                        end_sample: ctx.period.samples(wait_ms) - 1,
                    };
                    self.begin_timed(ctx, active);
                    return;
                }
            }
            self.step_index += 1;
        }
    }

    fn begin_train(&mut self, ctx: &mut TickContext<'_>, step: ProtocolStep, train: BeatTrain) {
        let cycle_samples = ctx.period.samples(train.cycle_length_ms);
        let cycle_len = ctx.period.sample_len(train.cycle_length_ms);
        ctx.run.beat = ctx.run.beat.saturating_add(1);

        match step {
            ProtocolStep::AverageVm { buffer, .. } => {
                if ctx.store.prepare_average(buffer, cycle_len).is_err() {
                    self.abort(ctx, AbortReason::AverageCapacity, buffer);
                    return;
                }
                self.average_count = 1;
            }
            ProtocolStep::ApClamp { buffer, .. } => {
                if ctx.store.slot(buffer).len() < cycle_len {
                    self.abort(ctx, AbortReason::ClampSourceTooShort, buffer);
                    return;
                }
            }
            _ => {}
        }

        let active = ActiveStep {
            step,
            cycle_samples,
            end_sample: ctx.period.samples(train.duration_ms()) - 1,
        };
        self.begin_timed(ctx, active);
    }

    fn begin_timed(&mut self, ctx: &mut TickContext<'_>, active: ActiveStep) {
        ctx.run.step_time = 0;
        ctx.run.cycle_start = 0;
        ctx.run.resting_mv = ctx.run.voltage_mv;
        ctx.run.apd.begin_beat(ctx.run.resting_mv);
        ctx.emit(
            TelemetryEventKind::StepStarted,
            TelemetryPayload::Step {
                index: self.step_index,
                kind: active.step.kind(),
            },
        );
        self.active = Some(active);
        self.phase = ProtocolPhase::Exec;
    }

    fn exec(&mut self, ctx: &mut TickContext<'_>) {
        let Some(active) = self.active else {
            self.phase = ProtocolPhase::StepInit;
            return;
        };

        match active.step {
            ProtocolStep::Pace(train) => self.pace(ctx, active, train, None),
            ProtocolStep::AverageVm { buffer, train } => {
                self.pace(ctx, active, train, Some(buffer));
            }
            ProtocolStep::ApClamp { buffer, train } => self.clamp(ctx, active, train, buffer),
            ProtocolStep::Wait { .. } => ctx.run.output.analog = 0.0,
            ProtocolStep::StartVmRecord(_)
            | ProtocolStep::StopVmRecord
            | ProtocolStep::StartDataRecord
            | ProtocolStep::StopDataRecord => {}
        }
        if self.phase != ProtocolPhase::Exec {
            return;
        }

        if let Some(buffer) = self.vm_record {
            if !ctx.store.record(buffer, ctx.run.voltage_mv) && !self.vm_overflowed {
                self.vm_overflowed = true;
                ctx.emit(
                    TelemetryEventKind::VmRecordOverflow,
                    TelemetryPayload::Buffer(buffer),
                );
            }
        }

        if ctx.run.step_time >= active.end_sample {
            self.step_index += 1;
            self.active = None;
            self.phase = ProtocolPhase::StepInit;
        }
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn pace(
        &mut self,
        ctx: &mut TickContext<'_>,
        active: ActiveStep,
        train: BeatTrain,
        average: Option<BufferIndex>,
    ) {
        if ctx.run.elapsed() >= active.cycle_samples {
            ctx.run.next_beat();
            if average.is_some() {
                self.average_count = self.average_count.saturating_add(1);
            }
        }

        let offset = ctx.run.elapsed();
        ctx.run.output = if offset < ctx.timing.stimulus_samples {
            Actuation::stimulus(ctx.params.stim_magnitude_na, train.digital_out)
        } else {
            Actuation::ZERO
        };

        if let Some(buffer) = average {
            let finalize = (self.average_count == train.beats).then_some(train.beats);
            let voltage = ctx.run.voltage_mv;
            if !ctx.store.accumulate(buffer, offset as usize, voltage, finalize) {
                self.abort(ctx, AbortReason::AverageCapacity, buffer);
                return;
            }
        }

        ctx.run.measure(ctx.telemetry);
    }

    #[allow(
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )]
    fn clamp(
        &mut self,
        ctx: &mut TickContext<'_>,
        active: ActiveStep,
        train: BeatTrain,
        buffer: BufferIndex,
    ) {
        if ctx.run.elapsed() >= active.cycle_samples {
            ctx.run.beat = ctx.run.beat.saturating_add(1);
            ctx.run.output.digital = train.digital_out;
            ctx.run.cycle_start = ctx.run.step_time;
        }

        let offset = ctx.run.elapsed();
        if train.digital_out != 0 && offset as f64 > CLAMP_MARKER_MS / ctx.period.as_ms() {
            ctx.run.output.digital = 0;
        }

        match ctx.store.slot(buffer).get(offset as usize) {
            Some(command_mv) => {
                ctx.run.voltage_mv = command_mv;
                ctx.run.output.analog = (command_mv + ctx.params.ljp_mv) * 1e-3;
            }
            None => self.abort(ctx, AbortReason::ClampSourceTooShort, buffer),
        }
    }

    fn abort(&mut self, ctx: &mut TickContext<'_>, reason: AbortReason, buffer: BufferIndex) {
        self.aborted = Some(reason);
        self.active = None;
        self.phase = ProtocolPhase::End;
        ctx.emit(
            TelemetryEventKind::ProtocolAborted(reason),
            TelemetryPayload::Buffer(buffer),
        );
    }

    fn finish(&mut self, ctx: &mut TickContext<'_>) -> SequencerStatus {
        if ctx.run.recording {
            ctx.run.recording = false;
            ctx.emit(TelemetryEventKind::RecordingStopped, TelemetryPayload::none());
        }

        if self.aborted.is_some() {
            return SequencerStatus::Finished;
        }

        if self.trial < self.trials {
            ctx.run.rewind(ctx.period);
            // Step init opens beat one.
            ctx.run.beat = 0;
            self.rewind();
            self.trial += 1;
            ctx.emit(
                TelemetryEventKind::TrialStarted,
                TelemetryPayload::Trial {
                    trial: self.trial,
                    of: self.trials,
                },
            );
            return SequencerStatus::Running;
        }

        ctx.emit(TelemetryEventKind::ProtocolComplete, TelemetryPayload::none());
        SequencerStatus::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlRequest;
    use crate::controller::{Controller, ExecutionMode};
    use alloc::vec;

    fn index(value: u16) -> BufferIndex {
        BufferIndex::new(value).expect("index")
    }

    fn train(cycle_length_ms: f64, beats: u32, digital_out: u8) -> BeatTrain {
        BeatTrain {
            cycle_length_ms,
            beats,
            digital_out,
        }
    }

    fn start(steps: &[ProtocolStep]) -> Controller {
        let period = SamplePeriod::from_ms(1.0).expect("period");
        let mut ctl = Controller::new(period, WaveformStore::with_slot_capacity(32));
        let mut protocol = Protocol::new();
        for step in steps {
            protocol.push(*step).expect("push");
        }
        ctl.apply(ControlRequest::StartProtocol(protocol))
            .expect("start");
        ctl
    }

    #[test]
    fn untimed_steps_do_not_consume_a_tick() {
        let mut ctl = start(&[
            ProtocolStep::StartDataRecord,
            ProtocolStep::StartVmRecord(index(0)),
            ProtocolStep::Wait { wait_ms: 3.0 },
        ]);

        let _ = ctl.execute(-0.08);
        let snapshot = ctl.snapshot();
        assert!(snapshot.recording);
        let progress = snapshot.protocol.expect("running");
        assert_eq!(progress.step, 2);
        assert_eq!(progress.phase, ProtocolPhase::Exec);
        assert_eq!(ctl.store().slot(index(0)).len(), 1);
    }

    #[test]
    fn wait_holds_for_its_duration_then_completes() {
        let mut ctl = start(&[ProtocolStep::Wait { wait_ms: 5.0 }]);
        for _ in 0..5 {
            let _ = ctl.execute(-0.08);
            assert_eq!(ctl.mode(), ExecutionMode::Protocol);
        }
        // The step ended on the fifth tick; END runs on the next one.
        let _ = ctl.execute(-0.08);
        assert_eq!(ctl.mode(), ExecutionMode::Idle);
        assert!(
            ctl.telemetry()
                .oldest_first()
                .any(|r| r.event == TelemetryEventKind::ProtocolComplete)
        );
    }

    #[test]
    fn clamp_source_too_short_aborts_the_run() {
        let period = SamplePeriod::from_ms(1.0).expect("period");
        let mut ctl = Controller::new(period, WaveformStore::with_slot_capacity(32));
        ctl.apply(ControlRequest::LoadWaveform {
            index: index(5),
            samples: vec![-80.0; 4],
        })
        .expect("fits");
        let mut params = Parameters::DEFAULT;
        params.trials = 3;
        ctl.apply(ControlRequest::UpdateParameters(params))
            .expect("valid");
        let mut protocol = Protocol::new();
        protocol
            .push(ProtocolStep::ApClamp {
                buffer: index(5),
                train: train(10.0, 2, 1),
            })
            .expect("push");
        ctl.apply(ControlRequest::StartProtocol(protocol))
            .expect("start");

        let out = ctl.execute(-0.08);
        assert_eq!(out, Actuation::ZERO);
        assert_eq!(ctl.mode(), ExecutionMode::Idle);
        assert!(ctl.telemetry().oldest_first().any(|r| r.event
            == TelemetryEventKind::ProtocolAborted(AbortReason::ClampSourceTooShort)));
        assert!(
            !ctl.telemetry()
                .oldest_first()
                .any(|r| r.event == TelemetryEventKind::ProtocolComplete)
        );
    }

    #[test]
    fn clamp_marker_rises_on_cycle_boundaries_only() {
        let period = SamplePeriod::from_ms(10.0).expect("period");
        let mut ctl = Controller::new(period, WaveformStore::with_slot_capacity(32));
        let source: vec::Vec<f64> = (0..10).map(|i| -80.0 + f64::from(i)).collect();
        ctl.apply(ControlRequest::LoadWaveform {
            index: index(1),
            samples: source,
        })
        .expect("fits");
        let mut protocol = Protocol::new();
        protocol
            .push(ProtocolStep::ApClamp {
                buffer: index(1),
                train: train(100.0, 2, 1),
            })
            .expect("push");
        ctl.apply(ControlRequest::StartProtocol(protocol))
            .expect("start");

        let mut digital = heapless::Vec::<u8, 20>::new();
        let mut commands = heapless::Vec::<f64, 20>::new();
        for _ in 0..20 {
            let out = ctl.execute(0.0);
            digital.push(out.digital).expect("capacity");
            commands.push(out.analog).expect("capacity");
        }

        // First beat never asserts; second asserts for 50 ms (offsets 0..=5).
        assert!(digital[..10].iter().all(|&d| d == 0));
        assert_eq!(&digital[10..], &[1, 1, 1, 1, 1, 1, 0, 0, 0, 0]);
        assert!((commands[3] - (-77.0e-3)).abs() < 1e-12);
        assert!((commands[13] - (-77.0e-3)).abs() < 1e-12);
        assert_eq!(ctl.mode(), ExecutionMode::Protocol);
    }

    #[test]
    fn vm_record_overflow_is_reported_once() {
        let mut ctl = start(&[
            ProtocolStep::StartVmRecord(index(9)),
            ProtocolStep::Wait { wait_ms: 40.0 },
        ]);
        for _ in 0..40 {
            let _ = ctl.execute(-0.07);
        }
        assert_eq!(ctl.store().slot(index(9)).len(), 32);
        let overflows = ctl
            .telemetry()
            .oldest_first()
            .filter(|r| r.event == TelemetryEventKind::VmRecordOverflow)
            .count();
        assert_eq!(overflows, 1);
    }
}
