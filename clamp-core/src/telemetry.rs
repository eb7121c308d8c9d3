//! Telemetry event catalog and the ring buffer the tick records into.
//!
//! The tick path records notable transitions (mode changes, recorder
//! notifications, step and trial boundaries, measurements) into a fixed-size
//! [`HistoryBuf`]. Host code drains new entries by id with
//! [`TelemetryRecorder::since`] and forwards them to the data logger or
//! transcript. Event kinds encode to compact numeric codes for transport.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::buffers::BufferIndex;
use crate::controller::ExecutionMode;
use crate::protocol::StepKind;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Why a protocol run was cut short.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    /// AP clamp source holds fewer samples than one cycle.
    ClampSourceTooShort,
    /// Averaging target cannot hold one cycle of samples.
    AverageCapacity,
}

impl AbortReason {
    const CLAMP_SOURCE_CODE: u16 = 0;
    const AVERAGE_CAPACITY_CODE: u16 = 1;

    const fn code(self) -> u16 {
        match self {
            AbortReason::ClampSourceTooShort => Self::CLAMP_SOURCE_CODE,
            AbortReason::AverageCapacity => Self::AVERAGE_CAPACITY_CODE,
        }
    }

    const fn from_code(code: u16) -> Option<Self> {
        match code {
            Self::CLAMP_SOURCE_CODE => Some(AbortReason::ClampSourceTooShort),
            Self::AVERAGE_CAPACITY_CODE => Some(AbortReason::AverageCapacity),
            _ => None,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ClampSourceTooShort => f.write_str("clamp-source-too-short"),
            AbortReason::AverageCapacity => f.write_str("average-capacity"),
        }
    }
}

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    ModeChanged(ExecutionMode),
    /// Ask the external data recorder to start.
    RecordingStarted,
    /// Ask the external data recorder to stop.
    RecordingStopped,
    StepStarted,
    TrialStarted,
    ProtocolComplete,
    ProtocolAborted(AbortReason),
    ThresholdFound,
    ApdMeasured,
    /// A Vm recording reached its slot capacity; later samples are dropped.
    VmRecordOverflow,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ModeChanged(mode) => write!(f, "mode-changed {mode}"),
            TelemetryEventKind::RecordingStarted => f.write_str("recording-started"),
            TelemetryEventKind::RecordingStopped => f.write_str("recording-stopped"),
            TelemetryEventKind::StepStarted => f.write_str("step-started"),
            TelemetryEventKind::TrialStarted => f.write_str("trial-started"),
            TelemetryEventKind::ProtocolComplete => f.write_str("protocol-complete"),
            TelemetryEventKind::ProtocolAborted(reason) => write!(f, "protocol-aborted {reason}"),
            TelemetryEventKind::ThresholdFound => f.write_str("threshold-found"),
            TelemetryEventKind::ApdMeasured => f.write_str("apd-measured"),
            TelemetryEventKind::VmRecordOverflow => f.write_str("vm-record-overflow"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const MODE_CHANGED_BASE: u16 = 0x0000;
    const RECORDING_STARTED_CODE: u16 = 0x0010;
    const RECORDING_STOPPED_CODE: u16 = 0x0011;
    const STEP_STARTED_CODE: u16 = 0x0020;
    const TRIAL_STARTED_CODE: u16 = 0x0021;
    const PROTOCOL_COMPLETE_CODE: u16 = 0x0022;
    const PROTOCOL_ABORTED_BASE: u16 = 0x0028;
    const THRESHOLD_FOUND_CODE: u16 = 0x0030;
    const APD_MEASURED_CODE: u16 = 0x0031;
    const VM_RECORD_OVERFLOW_CODE: u16 = 0x0032;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::ModeChanged(mode) => Self::MODE_CHANGED_BASE + mode.code(),
            TelemetryEventKind::RecordingStarted => Self::RECORDING_STARTED_CODE,
            TelemetryEventKind::RecordingStopped => Self::RECORDING_STOPPED_CODE,
            TelemetryEventKind::StepStarted => Self::STEP_STARTED_CODE,
            TelemetryEventKind::TrialStarted => Self::TRIAL_STARTED_CODE,
            TelemetryEventKind::ProtocolComplete => Self::PROTOCOL_COMPLETE_CODE,
            TelemetryEventKind::ProtocolAborted(reason) => {
                Self::PROTOCOL_ABORTED_BASE + reason.code()
            }
            TelemetryEventKind::ThresholdFound => Self::THRESHOLD_FOUND_CODE,
            TelemetryEventKind::ApdMeasured => Self::APD_MEASURED_CODE,
            TelemetryEventKind::VmRecordOverflow => Self::VM_RECORD_OVERFLOW_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::RECORDING_STARTED_CODE => TelemetryEventKind::RecordingStarted,
            Self::RECORDING_STOPPED_CODE => TelemetryEventKind::RecordingStopped,
            Self::STEP_STARTED_CODE => TelemetryEventKind::StepStarted,
            Self::TRIAL_STARTED_CODE => TelemetryEventKind::TrialStarted,
            Self::PROTOCOL_COMPLETE_CODE => TelemetryEventKind::ProtocolComplete,
            Self::THRESHOLD_FOUND_CODE => TelemetryEventKind::ThresholdFound,
            Self::APD_MEASURED_CODE => TelemetryEventKind::ApdMeasured,
            Self::VM_RECORD_OVERFLOW_CODE => TelemetryEventKind::VmRecordOverflow,
            value if (Self::MODE_CHANGED_BASE..Self::RECORDING_STARTED_CODE).contains(&value) => {
                ExecutionMode::from_code(value - Self::MODE_CHANGED_BASE)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::ModeChanged)
            }
            value
                if (Self::PROTOCOL_ABORTED_BASE..Self::THRESHOLD_FOUND_CODE).contains(&value) =>
            {
                AbortReason::from_code(value - Self::PROTOCOL_ABORTED_BASE).map_or(
                    TelemetryEventKind::Custom(value),
                    TelemetryEventKind::ProtocolAborted,
                )
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// Protocol step that just entered execution.
    Step { index: usize, kind: StepKind },
    /// Trial counter after the transition.
    Trial { trial: u32, of: u32 },
    /// APD measured for a beat.
    Apd { beat: u32, apd_ms: f64 },
    /// Stimulus magnitude settled by the threshold search.
    Stimulus { magnitude_na: f64, cycles: u32 },
    /// Buffer involved in the event.
    Buffer(BufferIndex),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Step { index, kind } => write!(f, "step={} kind={kind}", index + 1),
            TelemetryPayload::Trial { trial, of } => write!(f, "trial={trial}/{of}"),
            TelemetryPayload::Apd { beat, apd_ms } => write!(f, "beat={beat} apd={apd_ms:.1}ms"),
            TelemetryPayload::Stimulus {
                magnitude_na,
                cycles,
            } => write!(f, "stim={magnitude_na:.2}nA cycles={cycles}"),
            TelemetryPayload::Buffer(index) => write!(f, "buffer={index}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    /// Tick count when the event was recorded.
    pub tick: u64,
    /// Experiment clock when the event was recorded.
    pub time_ms: f64,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Records at or after `cursor`, oldest first. Entries already
    /// overwritten by the ring are skipped.
    pub fn since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.oldest_first()
            .filter(move |record| record.id.wrapping_sub(cursor) <= EventId::MAX / 2)
    }

    /// Id the next recorded event will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        tick: u64,
        time_ms: f64,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        #[cfg(feature = "defmt")]
        defmt::debug!("telemetry id={} event={}", id, event);

        self.ring.write(TelemetryRecord {
            id,
            tick,
            time_ms,
            event,
            details: payload,
        });

        id
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_round_trip() {
        let fixtures = [
            TelemetryEventKind::ModeChanged(ExecutionMode::Protocol),
            TelemetryEventKind::RecordingStarted,
            TelemetryEventKind::RecordingStopped,
            TelemetryEventKind::ProtocolAborted(AbortReason::ClampSourceTooShort),
            TelemetryEventKind::ProtocolAborted(AbortReason::AverageCapacity),
            TelemetryEventKind::ApdMeasured,
        ];
        for event in fixtures {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
        assert_eq!(
            TelemetryEventKind::from_raw(0x0009),
            TelemetryEventKind::Custom(0x0009)
        );
    }

    #[test]
    fn ring_keeps_latest_entries_in_order() {
        let mut recorder: TelemetryRecorder<4> = TelemetryRecorder::new();
        for tick in 0..6_u32 {
            recorder.record(
                TelemetryEventKind::StepStarted,
                TelemetryPayload::none(),
                u64::from(tick),
                f64::from(tick),
            );
        }

        assert_eq!(recorder.len(), 4);
        let ids: heapless::Vec<EventId, 4> = recorder.oldest_first().map(|r| r.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4, 5]);
        assert_eq!(recorder.latest().map(|r| r.tick), Some(5));
    }

    #[test]
    fn since_skips_records_already_read() {
        let mut recorder: TelemetryRecorder<8> = TelemetryRecorder::new();
        recorder.record(
            TelemetryEventKind::RecordingStarted,
            TelemetryPayload::none(),
            1,
            0.0,
        );
        let cursor = recorder.next_id();
        recorder.record(
            TelemetryEventKind::RecordingStopped,
            TelemetryPayload::none(),
            2,
            1.0,
        );

        let unread: heapless::Vec<TelemetryEventKind, 8> =
            recorder.since(cursor).map(|r| r.event).collect();
        assert_eq!(unread.as_slice(), &[TelemetryEventKind::RecordingStopped]);
        assert_eq!(recorder.since(recorder.next_id()).count(), 0);
    }
}
