//! Typed protocol steps and their flat descriptor form.

use core::convert::TryFrom;
use core::fmt;

use crate::buffers::BufferIndex;

/// Step discriminants with their persisted codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepKind {
    Pace,
    StartVmRecord,
    StopVmRecord,
    AverageVm,
    ApClamp,
    StartDataRecord,
    StopDataRecord,
    Wait,
}

impl StepKind {
    pub const ALL: [StepKind; 8] = [
        StepKind::Pace,
        StepKind::StartVmRecord,
        StepKind::StopVmRecord,
        StepKind::AverageVm,
        StepKind::ApClamp,
        StepKind::StartDataRecord,
        StepKind::StopDataRecord,
        StepKind::Wait,
    ];

    /// Code stored in protocol files.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            StepKind::Pace => 0,
            StepKind::StartVmRecord => 1,
            StepKind::StopVmRecord => 2,
            StepKind::AverageVm => 3,
            StepKind::ApClamp => 4,
            StepKind::StartDataRecord => 5,
            StepKind::StopDataRecord => 6,
            StepKind::Wait => 7,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(StepKind::Pace),
            1 => Some(StepKind::StartVmRecord),
            2 => Some(StepKind::StopVmRecord),
            3 => Some(StepKind::AverageVm),
            4 => Some(StepKind::ApClamp),
            5 => Some(StepKind::StartDataRecord),
            6 => Some(StepKind::StopDataRecord),
            7 => Some(StepKind::Wait),
            _ => None,
        }
    }

    /// Console keyword for the step.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            StepKind::Pace => "pace",
            StepKind::StartVmRecord => "vm-start",
            StepKind::StopVmRecord => "vm-stop",
            StepKind::AverageVm => "average",
            StepKind::ApClamp => "clamp",
            StepKind::StartDataRecord => "record-start",
            StepKind::StopDataRecord => "record-stop",
            StepKind::Wait => "wait",
        }
    }

    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.keyword().eq_ignore_ascii_case(keyword))
    }

    /// Fields a descriptor of this kind must carry.
    #[must_use]
    pub const fn required_fields(self) -> &'static [StepField] {
        match self {
            StepKind::Pace => &[StepField::CycleLength, StepField::Beats],
            StepKind::StartVmRecord => &[StepField::BufferIndex],
            StepKind::AverageVm | StepKind::ApClamp => &[
                StepField::BufferIndex,
                StepField::CycleLength,
                StepField::Beats,
            ],
            StepKind::Wait => &[StepField::Wait],
            StepKind::StopVmRecord | StepKind::StartDataRecord | StepKind::StopDataRecord => &[],
        }
    }

    /// Fields a descriptor of this kind may carry.
    #[must_use]
    pub const fn accepts(self, field: StepField) -> bool {
        match self {
            StepKind::Pace => matches!(
                field,
                StepField::CycleLength | StepField::Beats | StepField::DigitalOut
            ),
            StepKind::StartVmRecord => matches!(field, StepField::BufferIndex),
            StepKind::AverageVm | StepKind::ApClamp => !matches!(field, StepField::Wait),
            StepKind::Wait => matches!(field, StepField::Wait),
            StepKind::StopVmRecord | StepKind::StartDataRecord | StepKind::StopDataRecord => false,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Descriptor fields, named as they appear on the console and in files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepField {
    CycleLength,
    Beats,
    BufferIndex,
    Wait,
    DigitalOut,
}

impl StepField {
    pub const ALL: [StepField; 5] = [
        StepField::CycleLength,
        StepField::Beats,
        StepField::BufferIndex,
        StepField::Wait,
        StepField::DigitalOut,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            StepField::CycleLength => "bcl",
            StepField::Beats => "beats",
            StepField::BufferIndex => "index",
            StepField::Wait => "wait",
            StepField::DigitalOut => "dout",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.key().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for StepField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Repeated stimulus cycles shared by pacing, averaging, and AP clamp steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeatTrain {
    pub cycle_length_ms: f64,
    pub beats: u32,
    pub digital_out: u8,
}

impl BeatTrain {
    /// Total train duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.cycle_length_ms * f64::from(self.beats)
    }
}

/// A single protocol step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProtocolStep {
    /// Stimulate once per cycle.
    Pace(BeatTrain),
    /// Start appending every sample to a buffer.
    StartVmRecord(BufferIndex),
    /// Stop Vm recording.
    StopVmRecord,
    /// Pace while averaging the per-beat voltage trace into a buffer.
    AverageVm { buffer: BufferIndex, train: BeatTrain },
    /// Replay a buffer as the voltage command once per cycle.
    ApClamp { buffer: BufferIndex, train: BeatTrain },
    /// Ask the external data recorder to start.
    StartDataRecord,
    /// Ask the external data recorder to stop.
    StopDataRecord,
    /// Hold the analog output at zero.
    Wait { wait_ms: f64 },
}

impl ProtocolStep {
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            ProtocolStep::Pace(_) => StepKind::Pace,
            ProtocolStep::StartVmRecord(_) => StepKind::StartVmRecord,
            ProtocolStep::StopVmRecord => StepKind::StopVmRecord,
            ProtocolStep::AverageVm { .. } => StepKind::AverageVm,
            ProtocolStep::ApClamp { .. } => StepKind::ApClamp,
            ProtocolStep::StartDataRecord => StepKind::StartDataRecord,
            ProtocolStep::StopDataRecord => StepKind::StopDataRecord,
            ProtocolStep::Wait { .. } => StepKind::Wait,
        }
    }

    /// Flattens the step into its descriptor form.
    #[must_use]
    pub fn descriptor(&self) -> StepDescriptor {
        let mut descriptor = StepDescriptor::new(self.kind());
        match *self {
            ProtocolStep::Pace(train) => descriptor.set_train(train),
            ProtocolStep::StartVmRecord(buffer) => {
                descriptor.buffer_index = Some(buffer_code(buffer));
            }
            ProtocolStep::AverageVm { buffer, train } | ProtocolStep::ApClamp { buffer, train } => {
                descriptor.buffer_index = Some(buffer_code(buffer));
                descriptor.set_train(train);
            }
            ProtocolStep::Wait { wait_ms } => descriptor.wait_ms = Some(wait_ms),
            ProtocolStep::StopVmRecord
            | ProtocolStep::StartDataRecord
            | ProtocolStep::StopDataRecord => {}
        }
        descriptor
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn buffer_code(buffer: BufferIndex) -> u16 {
    buffer.get() as u16
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolStep::Pace(train) => write!(
                f,
                "Pace : {} beats - {}ms BCL | DO({})",
                train.beats, train.cycle_length_ms, train.digital_out
            ),
            ProtocolStep::StartVmRecord(buffer) => {
                write!(f, "Start - Vm Record : Index({buffer})")
            }
            ProtocolStep::StopVmRecord => f.write_str("Stop - Vm Record : All Indexes"),
            ProtocolStep::AverageVm { buffer, train } => write!(
                f,
                "Average Vm : Index({buffer}) | {} beats - {}ms BCL | DO({})",
                train.beats, train.cycle_length_ms, train.digital_out
            ),
            ProtocolStep::ApClamp { buffer, train } => write!(
                f,
                "AP Clamp : Index({buffer}) | {} iterations - Repeats every {}ms | DO({})",
                train.beats, train.cycle_length_ms, train.digital_out
            ),
            ProtocolStep::StartDataRecord => f.write_str("Start - Data Recorder"),
            ProtocolStep::StopDataRecord => f.write_str("Stop - Data Recorder"),
            ProtocolStep::Wait { wait_ms } => write!(f, "Wait : {wait_ms}ms"),
        }
    }
}

/// Flat step description used by the editor and by protocol files.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepDescriptor {
    pub step_type: u8,
    pub cycle_length_ms: Option<f64>,
    pub beats: Option<u32>,
    pub buffer_index: Option<u16>,
    pub wait_ms: Option<f64>,
    pub digital_out: Option<u8>,
}

impl StepDescriptor {
    /// Empty descriptor for `kind`.
    #[must_use]
    pub const fn new(kind: StepKind) -> Self {
        Self::with_code(kind.code())
    }

    /// Empty descriptor carrying a raw, possibly unknown, type code.
    #[must_use]
    pub const fn with_code(step_type: u8) -> Self {
        Self {
            step_type,
            cycle_length_ms: None,
            beats: None,
            buffer_index: None,
            wait_ms: None,
            digital_out: None,
        }
    }

    /// Whether `field` carries a value.
    #[must_use]
    pub const fn has(&self, field: StepField) -> bool {
        match field {
            StepField::CycleLength => self.cycle_length_ms.is_some(),
            StepField::Beats => self.beats.is_some(),
            StepField::BufferIndex => self.buffer_index.is_some(),
            StepField::Wait => self.wait_ms.is_some(),
            StepField::DigitalOut => self.digital_out.is_some(),
        }
    }

    fn set_train(&mut self, train: BeatTrain) {
        self.cycle_length_ms = Some(train.cycle_length_ms);
        self.beats = Some(train.beats);
        self.digital_out = Some(train.digital_out);
    }

    fn train(&self) -> Result<BeatTrain, StepError> {
        let cycle_length_ms = self.cycle_length_ms.unwrap_or_default();
        if !cycle_length_ms.is_finite() || cycle_length_ms <= 0.0 {
            return Err(StepError::InvalidValue {
                field: StepField::CycleLength,
            });
        }
        let beats = self.beats.unwrap_or_default();
        if beats == 0 {
            return Err(StepError::InvalidValue {
                field: StepField::Beats,
            });
        }
        Ok(BeatTrain {
            cycle_length_ms,
            beats,
            digital_out: self.digital_out.unwrap_or(0),
        })
    }

    fn buffer(&self) -> Result<BufferIndex, StepError> {
        let raw = self.buffer_index.unwrap_or_default();
        BufferIndex::new(raw).ok_or(StepError::BufferIndex(raw))
    }
}

impl TryFrom<StepDescriptor> for ProtocolStep {
    type Error = StepError;

    fn try_from(descriptor: StepDescriptor) -> Result<Self, Self::Error> {
        let kind = StepKind::from_code(descriptor.step_type)
            .ok_or(StepError::UnknownStepType(descriptor.step_type))?;

        for field in StepField::ALL {
            if descriptor.has(field) && !kind.accepts(field) {
                return Err(StepError::UnexpectedField { step: kind, field });
            }
        }
        for field in kind.required_fields() {
            if !descriptor.has(*field) {
                return Err(StepError::MissingField {
                    step: kind,
                    field: *field,
                });
            }
        }

        let step = match kind {
            StepKind::Pace => ProtocolStep::Pace(descriptor.train()?),
            StepKind::StartVmRecord => ProtocolStep::StartVmRecord(descriptor.buffer()?),
            StepKind::StopVmRecord => ProtocolStep::StopVmRecord,
            StepKind::AverageVm => ProtocolStep::AverageVm {
                buffer: descriptor.buffer()?,
                train: descriptor.train()?,
            },
            StepKind::ApClamp => ProtocolStep::ApClamp {
                buffer: descriptor.buffer()?,
                train: descriptor.train()?,
            },
            StepKind::StartDataRecord => ProtocolStep::StartDataRecord,
            StepKind::StopDataRecord => ProtocolStep::StopDataRecord,
            StepKind::Wait => {
                let wait_ms = descriptor.wait_ms.unwrap_or_default();
                if !wait_ms.is_finite() || wait_ms < 0.0 {
                    return Err(StepError::InvalidValue {
                        field: StepField::Wait,
                    });
                }
                ProtocolStep::Wait { wait_ms }
            }
        };
        Ok(step)
    }
}

/// Reasons a descriptor cannot become a [`ProtocolStep`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepError {
    UnknownStepType(u8),
    MissingField { step: StepKind, field: StepField },
    UnexpectedField { step: StepKind, field: StepField },
    InvalidValue { field: StepField },
    BufferIndex(u16),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::UnknownStepType(code) => write!(f, "unknown step type {code}"),
            StepError::MissingField { step, field } => {
                write!(f, "{step} step requires `{field}`")
            }
            StepError::UnexpectedField { step, field } => {
                write!(f, "{step} step does not take `{field}`")
            }
            StepError::InvalidValue { field } => match field {
                StepField::CycleLength => write!(f, "`{field}` must be greater than 0"),
                StepField::Beats => write!(f, "`{field}` must be at least 1"),
                _ => write!(f, "`{field}` is out of range"),
            },
            StepError::BufferIndex(index) => {
                write!(f, "buffer index {index} is outside 0-99")
            }
        }
    }
}
