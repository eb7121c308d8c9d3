//! Execution-mode controller: the periodic tick entry point.
//!
//! [`Controller::execute`] runs once per sampling period and returns the
//! actuator command. [`Controller::apply`] is the only way to change modes,
//! parameters, the sampling period or waveform contents, and must only be
//! called between ticks (the bench enforces this with a
//! [`TickGate`](crate::control::TickGate)).

mod threshold;

use core::fmt;

pub use threshold::{
    BASELINE_TOLERANCE_MV, MAGNITUDE_STEP_NA, MIN_PEAK_RISE_MV, MIN_RESPONSE_MS,
    REST_BEFORE_RETRY_MS, SAFETY_FACTOR, START_MAGNITUDE_NA,
};

use crate::apd::ApdDetector;
use crate::buffers::{BufferIndex, WaveformStore};
use crate::config::Parameters;
use crate::control::{ConfigError, ControlRequest, RequestOutcome};
use crate::protocol::Protocol;
use crate::sequencer::{ProtocolProgress, ProtocolSequencer, SequencerStatus, TickContext};
use crate::telemetry::{EventId, TelemetryEventKind, TelemetryPayload, TelemetryRecorder};
use crate::timing::SamplePeriod;
use threshold::{SearchStep, ThresholdSearch};

/// Conversion from nanoamperes to the amperes the amplifier expects.
pub const AMPS_PER_NANOAMP: f64 = 1e-9;

/// Top-level operating modes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExecutionMode {
    #[default]
    Idle,
    Threshold,
    Pace,
    Protocol,
}

impl ExecutionMode {
    /// Numeric code used by telemetry.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            ExecutionMode::Idle => 0,
            ExecutionMode::Threshold => 1,
            ExecutionMode::Pace => 2,
            ExecutionMode::Protocol => 3,
        }
    }

    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(ExecutionMode::Idle),
            1 => Some(ExecutionMode::Threshold),
            2 => Some(ExecutionMode::Pace),
            3 => Some(ExecutionMode::Protocol),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionMode::Idle => "idle",
            ExecutionMode::Threshold => "threshold",
            ExecutionMode::Pace => "pace",
            ExecutionMode::Protocol => "protocol",
        };
        f.write_str(label)
    }
}

/// Command written to the hardware after each tick.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Actuation {
    /// Amperes while stimulating, volts while clamping.
    pub analog: f64,
    pub digital: u8,
}

impl Actuation {
    pub const ZERO: Self = Self {
        analog: 0.0,
        digital: 0,
    };

    #[must_use]
    pub fn stimulus(magnitude_na: f64, digital: u8) -> Self {
        Self {
            analog: magnitude_na * AMPS_PER_NANOAMP,
            digital,
        }
    }
}

/// Beat and pulse lengths in samples for the active parameters and period.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacingTiming {
    pub cycle_samples: i64,
    pub stimulus_samples: i64,
}

impl PacingTiming {
    #[must_use]
    pub fn new(params: &Parameters, period: SamplePeriod) -> Self {
        Self {
            cycle_samples: period.samples(params.cycle_length_ms),
            stimulus_samples: period.samples(params.stim_length_ms),
        }
    }
}

/// Mutable state shared by the mode handlers and the sequencer.
#[derive(Clone, Debug)]
pub(crate) struct RunState {
    pub(crate) tick: u64,
    pub(crate) time_ms: f64,
    pub(crate) step_time: i64,
    pub(crate) cycle_start: i64,
    pub(crate) voltage_mv: f64,
    pub(crate) resting_mv: f64,
    pub(crate) beat: u32,
    pub(crate) apd: ApdDetector,
    pub(crate) recording: bool,
    pub(crate) output: Actuation,
}

impl RunState {
    const fn new() -> Self {
        Self {
            tick: 0,
            time_ms: 0.0,
            step_time: 0,
            cycle_start: 0,
            voltage_mv: 0.0,
            resting_mv: 0.0,
            beat: 0,
            apd: ApdDetector::new(crate::apd::ApdSettings::new(90.0, 4.0)),
            recording: false,
            output: Actuation::ZERO,
        }
    }

    /// Puts the clock one sample before zero so the next tick lands on t=0.
    pub(crate) fn rewind(&mut self, period: SamplePeriod) {
        self.step_time = -1;
        self.time_ms = -period.as_ms();
        self.cycle_start = 0;
        self.beat = 1;
        self.resting_mv = self.voltage_mv;
        self.apd.begin_beat(self.resting_mv);
    }

    pub(crate) fn advance(&mut self, period: SamplePeriod) {
        self.time_ms += period.as_ms();
        self.step_time += 1;
    }

    /// Samples since the current cycle started.
    pub(crate) const fn elapsed(&self) -> i64 {
        self.step_time - self.cycle_start
    }

    /// Opens a new beat: restarts the cycle and re-arms APD detection.
    pub(crate) fn next_beat(&mut self) {
        self.cycle_start = self.step_time;
        self.beat = self.beat.saturating_add(1);
        self.resting_mv = self.voltage_mv;
        self.apd.begin_beat(self.resting_mv);
    }

    pub(crate) fn measure(&mut self, telemetry: &mut TelemetryRecorder) {
        if let Some(apd_ms) = self.apd.observe(self.time_ms, self.voltage_mv) {
            self.emit(
                telemetry,
                TelemetryEventKind::ApdMeasured,
                TelemetryPayload::Apd {
                    beat: self.beat,
                    apd_ms,
                },
            );
        }
    }

    pub(crate) fn emit(
        &self,
        telemetry: &mut TelemetryRecorder,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
    ) -> EventId {
        telemetry.record(event, payload, self.tick, self.time_ms)
    }
}

/// Copy of the observable runtime state, published after every tick.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub tick: u64,
    pub mode: ExecutionMode,
    pub time_ms: f64,
    pub voltage_mv: f64,
    pub resting_mv: f64,
    pub beat: u32,
    pub apd_ms: f64,
    pub recording: bool,
    /// Operating stimulus magnitude (nA).
    pub stim_magnitude_na: f64,
    /// Failed threshold-search cycles in the current or last search.
    pub threshold_cycles: u32,
    pub output: Actuation,
    pub protocol: Option<ProtocolProgress>,
}

impl Snapshot {
    /// State of a controller that has never ticked.
    pub const INITIAL: Self = Self {
        tick: 0,
        mode: ExecutionMode::Idle,
        time_ms: 0.0,
        voltage_mv: 0.0,
        resting_mv: 0.0,
        beat: 0,
        apd_ms: 0.0,
        recording: false,
        stim_magnitude_na: Parameters::DEFAULT.stim_magnitude_na,
        threshold_cycles: 0,
        output: Actuation::ZERO,
        protocol: None,
    };
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Top-level state machine for the rig.
pub struct Controller {
    mode: ExecutionMode,
    period: SamplePeriod,
    params: Parameters,
    pending: Option<Parameters>,
    timing: PacingTiming,
    run: RunState,
    search: ThresholdSearch,
    sequencer: Option<ProtocolSequencer>,
    store: WaveformStore,
    telemetry: TelemetryRecorder,
}

impl Controller {
    /// Builds an idle controller with default parameters.
    #[must_use]
    pub fn new(period: SamplePeriod, store: WaveformStore) -> Self {
        let params = Parameters::DEFAULT;
        let mut run = RunState::new();
        run.apd.configure(params.apd_settings());
        Self {
            mode: ExecutionMode::Idle,
            period,
            params,
            pending: None,
            timing: PacingTiming::new(&params, period),
            run,
            search: ThresholdSearch::new(),
            sequencer: None,
            store,
            telemetry: TelemetryRecorder::new(),
        }
    }

    /// Runs one sampling period.
    ///
    /// `input_volts` is the amplifier reading. The returned command is also
    /// held in the snapshot until the next tick changes it.
    pub fn execute(&mut self, input_volts: f64) -> Actuation {
        self.run.tick = self.run.tick.wrapping_add(1);
        self.run.voltage_mv = input_volts * 1e3 - self.params.ljp_mv;

        match self.mode {
            ExecutionMode::Idle => {}
            ExecutionMode::Threshold => self.tick_threshold(),
            ExecutionMode::Pace => self.tick_pace(),
            ExecutionMode::Protocol => self.tick_protocol(),
        }

        self.run.output
    }

    fn tick_threshold(&mut self) {
        self.run.advance(self.period);
        match self
            .search
            .step(self.run.time_ms, self.run.voltage_mv, self.params.stim_length_ms)
        {
            SearchStep::Stimulate(magnitude_na) => {
                self.run.output = Actuation::stimulus(magnitude_na, 0);
            }
            SearchStep::Quiet => self.run.output = Actuation::ZERO,
            SearchStep::Found(magnitude_na) => {
                self.params.stim_magnitude_na = magnitude_na;
                if let Some(pending) = self.pending.as_mut() {
                    pending.stim_magnitude_na = magnitude_na;
                }
                self.run.emit(
                    &mut self.telemetry,
                    TelemetryEventKind::ThresholdFound,
                    TelemetryPayload::Stimulus {
                        magnitude_na,
                        cycles: self.search.cycles(),
                    },
                );
                self.enter_idle();
            }
        }
    }

    fn tick_pace(&mut self) {
        self.run.advance(self.period);
        if self.run.elapsed() >= self.timing.cycle_samples {
            self.run.next_beat();
        }

        self.run.output = if self.run.elapsed() < self.timing.stimulus_samples {
            Actuation::stimulus(self.params.stim_magnitude_na, 1)
        } else {
            Actuation::ZERO
        };

        self.run.measure(&mut self.telemetry);
    }

    fn tick_protocol(&mut self) {
        self.run.advance(self.period);
        let Some(sequencer) = self.sequencer.as_mut() else {
            self.enter_idle();
            return;
        };

        let mut ctx = TickContext {
            period: self.period,
            params: &self.params,
            timing: self.timing,
            run: &mut self.run,
            store: &mut self.store,
            telemetry: &mut self.telemetry,
        };
        if sequencer.tick(&mut ctx) == SequencerStatus::Finished {
            self.sequencer = None;
            self.enter_idle();
        }
    }

    /// Applies a control request. Call only while no tick is in flight.
    ///
    /// # Errors
    ///
    /// Returns the reason the request was refused; state is left unchanged.
    pub fn apply(&mut self, request: ControlRequest) -> RequestOutcome {
        match request {
            ControlRequest::StartThreshold => {
                self.ensure_idle()?;
                self.activate();
                self.search.begin(self.run.voltage_mv);
                self.set_mode(ExecutionMode::Threshold);
            }
            ControlRequest::StopThreshold => {
                if self.mode == ExecutionMode::Threshold {
                    self.enter_idle();
                }
            }
            ControlRequest::StartPace => {
                self.ensure_idle()?;
                self.activate();
                self.set_mode(ExecutionMode::Pace);
            }
            ControlRequest::StopPace => {
                if self.mode == ExecutionMode::Pace {
                    self.stop_recording();
                    self.enter_idle();
                }
            }
            ControlRequest::StartProtocol(protocol) => self.start_protocol(protocol)?,
            ControlRequest::StopProtocol => {
                if self.mode == ExecutionMode::Protocol {
                    self.stop_recording();
                    self.sequencer = None;
                    self.enter_idle();
                }
            }
            ControlRequest::UpdateParameters(params) => {
                params.validate()?;
                self.pending = Some(params);
            }
            ControlRequest::SetPeriod(period_ms) => {
                self.period = SamplePeriod::from_ms(period_ms).ok_or(ConfigError::InvalidPeriod)?;
                self.timing = PacingTiming::new(&self.params, self.period);
            }
            ControlRequest::RecordingChanged { active } => self.run.recording = active,
            ControlRequest::LoadWaveform { index, samples } => {
                let playing = self
                    .sequencer
                    .as_ref()
                    .and_then(ProtocolSequencer::clamp_source);
                if playing == Some(index) {
                    return Err(ConfigError::ClampSourceActive);
                }
                self.store.load(index, &samples)?;
            }
            ControlRequest::ResetClock => {
                self.timing = PacingTiming::new(&self.params, self.period);
                self.run.rewind(self.period);
                self.search.rewind();
                if let Some(sequencer) = self.sequencer.as_mut() {
                    sequencer.rewind();
                }
            }
        }
        Ok(())
    }

    fn start_protocol(&mut self, protocol: Protocol) -> RequestOutcome {
        self.ensure_idle()?;
        if protocol.is_empty() {
            return Err(ConfigError::EmptyProtocol);
        }
        self.activate();
        // Step init opens beat one.
        self.run.beat = 0;
        let sequencer = ProtocolSequencer::new(protocol, self.params.trials);
        let progress = sequencer.progress();
        self.sequencer = Some(sequencer);
        self.set_mode(ExecutionMode::Protocol);
        self.run.emit(
            &mut self.telemetry,
            TelemetryEventKind::TrialStarted,
            TelemetryPayload::Trial {
                trial: progress.trial,
                of: progress.trials,
            },
        );
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), ConfigError> {
        if self.mode == ExecutionMode::Idle {
            Ok(())
        } else {
            Err(ConfigError::Busy { active: self.mode })
        }
    }

    /// Promotes deferred parameters and rewinds the run clock.
    fn activate(&mut self) {
        if let Some(params) = self.pending.take() {
            self.params = params;
        }
        self.run.apd.configure(self.params.apd_settings());
        self.timing = PacingTiming::new(&self.params, self.period);
        self.run.rewind(self.period);
    }

    fn stop_recording(&mut self) {
        if self.run.recording {
            self.run.recording = false;
            self.run.emit(
                &mut self.telemetry,
                TelemetryEventKind::RecordingStopped,
                TelemetryPayload::none(),
            );
        }
    }

    fn enter_idle(&mut self) {
        self.run.output = Actuation::ZERO;
        self.set_mode(ExecutionMode::Idle);
    }

    fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
        self.run.emit(
            &mut self.telemetry,
            TelemetryEventKind::ModeChanged(mode),
            TelemetryPayload::none(),
        );
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.run.tick,
            mode: self.mode,
            time_ms: self.run.time_ms,
            voltage_mv: self.run.voltage_mv,
            resting_mv: self.run.resting_mv,
            beat: self.run.beat,
            apd_ms: self.run.apd.apd_ms(),
            recording: self.run.recording,
            stim_magnitude_na: self.params.stim_magnitude_na,
            threshold_cycles: self.search.cycles(),
            output: self.run.output,
            protocol: self.sequencer.as_ref().map(ProtocolSequencer::progress),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Parameters in effect for the current run.
    #[must_use]
    pub const fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Update parked until the next mode activation.
    #[must_use]
    pub const fn pending_parameters(&self) -> Option<&Parameters> {
        self.pending.as_ref()
    }

    #[must_use]
    pub const fn period(&self) -> SamplePeriod {
        self.period
    }

    #[must_use]
    pub const fn timing(&self) -> PacingTiming {
        self.timing
    }

    #[must_use]
    pub const fn store(&self) -> &WaveformStore {
        &self.store
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Buffer the running protocol is replaying as a voltage command.
    #[must_use]
    pub fn clamp_source(&self) -> Option<BufferIndex> {
        self.sequencer
            .as_ref()
            .and_then(ProtocolSequencer::clamp_source)
    }

    /// Current stimulus magnitude tried by the threshold search (nA).
    #[must_use]
    pub const fn search_magnitude_na(&self) -> f64 {
        self.search.magnitude_na()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BeatTrain, ProtocolStep};
    use alloc::vec;

    fn controller(period_ms: f64) -> Controller {
        let period = SamplePeriod::from_ms(period_ms).expect("valid period");
        Controller::new(period, WaveformStore::with_slot_capacity(64))
    }

    fn events(controller: &Controller) -> heapless::Vec<TelemetryEventKind, 128> {
        controller.telemetry().oldest_first().map(|r| r.event).collect()
    }

    #[test]
    fn pace_stimulates_at_start_of_each_beat() {
        let mut ctl = controller(1.0);
        let mut params = Parameters::DEFAULT;
        params.cycle_length_ms = 10.0;
        params.stim_length_ms = 2.0;
        params.stim_magnitude_na = 3.0;
        ctl.apply(ControlRequest::UpdateParameters(params))
            .expect("valid parameters");
        // Deferred until the next start.
        assert!((ctl.parameters().stim_magnitude_na - 4.0).abs() < 1e-12);

        ctl.apply(ControlRequest::StartPace).expect("idle");
        assert!((ctl.parameters().stim_magnitude_na - 3.0).abs() < 1e-12);

        let mut digital = heapless::Vec::<u8, 25>::new();
        for _ in 0..25 {
            let out = ctl.execute(-0.08);
            digital.push(out.digital).expect("capacity");
        }
        let expected: [u8; 25] = [
            1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 0,
        ];
        assert_eq!(digital.as_slice(), &expected);
        assert_eq!(ctl.snapshot().beat, 3);
        assert!((ctl.snapshot().time_ms - 24.0).abs() < 1e-9);
    }

    #[test]
    fn starting_while_active_is_busy() {
        let mut ctl = controller(1.0);
        ctl.apply(ControlRequest::StartPace).expect("idle");
        assert_eq!(
            ctl.apply(ControlRequest::StartThreshold),
            Err(ConfigError::Busy {
                active: ExecutionMode::Pace
            })
        );
        assert_eq!(
            ctl.apply(ControlRequest::StartPace),
            Err(ConfigError::Busy {
                active: ExecutionMode::Pace
            })
        );
        // Stopping a mode that is not running changes nothing.
        ctl.apply(ControlRequest::StopThreshold).expect("no-op");
        assert_eq!(ctl.mode(), ExecutionMode::Pace);
    }

    #[test]
    fn stop_pace_zeroes_output_and_stops_recording() {
        let mut ctl = controller(1.0);
        ctl.apply(ControlRequest::StartPace).expect("idle");
        ctl.apply(ControlRequest::RecordingChanged { active: true })
            .expect("notice");
        let out = ctl.execute(-0.08);
        assert_eq!(out.digital, 1);

        ctl.apply(ControlRequest::StopPace).expect("stop");
        let snapshot = ctl.snapshot();
        assert_eq!(snapshot.mode, ExecutionMode::Idle);
        assert_eq!(snapshot.output, Actuation::ZERO);
        assert!(!snapshot.recording);

        let log = events(&ctl);
        assert_eq!(
            log.as_slice(),
            &[
                TelemetryEventKind::ModeChanged(ExecutionMode::Pace),
                TelemetryEventKind::RecordingStopped,
                TelemetryEventKind::ModeChanged(ExecutionMode::Idle),
            ]
        );
    }

    #[test]
    fn empty_protocol_is_refused() {
        let mut ctl = controller(1.0);
        assert_eq!(
            ctl.apply(ControlRequest::StartProtocol(Protocol::new())),
            Err(ConfigError::EmptyProtocol)
        );
        assert_eq!(ctl.mode(), ExecutionMode::Idle);
    }

    #[test]
    fn invalid_requests_leave_state_untouched() {
        let mut ctl = controller(1.0);
        assert_eq!(
            ctl.apply(ControlRequest::SetPeriod(0.0)),
            Err(ConfigError::InvalidPeriod)
        );
        let mut params = Parameters::DEFAULT;
        params.repolarization_percent = 150.0;
        match ctl.apply(ControlRequest::UpdateParameters(params)) {
            Err(ConfigError::Parameter(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(ctl.pending_parameters().is_none());

        let index = BufferIndex::new(1).expect("index");
        match ctl.apply(ControlRequest::LoadWaveform {
            index,
            samples: vec![0.0; 65],
        }) {
            Err(ConfigError::Buffer(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn running_clamp_source_cannot_be_reloaded() {
        let mut ctl = controller(1.0);
        let index = BufferIndex::new(3).expect("index");
        ctl.apply(ControlRequest::LoadWaveform {
            index,
            samples: vec![-80.0; 10],
        })
        .expect("fits");

        let mut protocol = Protocol::new();
        protocol
            .push(ProtocolStep::ApClamp {
                buffer: index,
                train: BeatTrain {
                    cycle_length_ms: 10.0,
                    beats: 5,
                    digital_out: 0,
                },
            })
            .expect("push");
        ctl.apply(ControlRequest::StartProtocol(protocol))
            .expect("start");
        let _ = ctl.execute(0.0);

        assert_eq!(
            ctl.apply(ControlRequest::LoadWaveform {
                index,
                samples: vec![0.0; 10],
            }),
            Err(ConfigError::ClampSourceActive)
        );
        let other = BufferIndex::new(4).expect("index");
        ctl.apply(ControlRequest::LoadWaveform {
            index: other,
            samples: vec![0.0; 10],
        })
        .expect("other slots stay writable");
    }

    #[test]
    fn clock_reset_mid_search_keeps_the_pulse_short() {
        let mut ctl = controller(1.0);
        let _ = ctl.execute(-0.08);
        ctl.apply(ControlRequest::StartThreshold).expect("idle");
        // An unresponsive cell keeps the search cycling.
        for _ in 0..1_000 {
            let _ = ctl.execute(-0.08);
        }

        ctl.apply(ControlRequest::ResetClock).expect("reset");
        // The next retry is more than 200 ms after the trace settles.
        let stimulated = (0..200)
            .filter(|_| ctl.execute(-0.08).analog > 0.0)
            .count();
        // t=0 and t=1 fall inside the 1 ms pulse.
        assert_eq!(stimulated, 2);
        assert_eq!(ctl.mode(), ExecutionMode::Threshold);
        assert_eq!(ctl.snapshot().output, Actuation::ZERO);
    }

    #[test]
    fn threshold_result_becomes_operating_magnitude() {
        let mut ctl = controller(1.0);
        // Baseline comes from the last sample seen before the start.
        let _ = ctl.execute(-0.08);
        ctl.apply(ControlRequest::StartThreshold).expect("idle");

        // The cell answers any stimulus with a 100 ms plateau at +20 mV.
        let mut fired_until = None;
        for tick in 0..2_000_u32 {
            let now = f64::from(tick);
            let volts = match fired_until {
                Some(until) if now < until => 0.02,
                _ => -0.08,
            };
            let out = ctl.execute(volts);
            if out.analog > 0.0 && fired_until.is_none() {
                fired_until = Some(now + 100.0);
            }
            if ctl.mode() == ExecutionMode::Idle {
                break;
            }
        }

        assert_eq!(ctl.mode(), ExecutionMode::Idle);
        let snapshot = ctl.snapshot();
        assert!((snapshot.stim_magnitude_na - START_MAGNITUDE_NA * SAFETY_FACTOR).abs() < 1e-9);
        assert_eq!(snapshot.threshold_cycles, 0);
        assert!(events(&ctl).contains(&TelemetryEventKind::ThresholdFound));
    }
}
