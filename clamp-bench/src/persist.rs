//! Protocol files.
//!
//! ```text
//! # ap-clamp protocol v1
//! step type=0 bcl=1000 beats=10 dout=1
//! step type=7 wait=500
//! ```
//!
//! Blank lines and `#` comments may follow the header. A file either loads
//! completely or not at all.

use std::fmt::{self, Write as _};
use std::fs;
use std::io;
use std::path::Path;

use clamp_core::protocol::{
    DescriptorError, Protocol, ProtocolError, StepDescriptor, StepError, StepField,
};
use winnow::ascii::space1;
use winnow::combinator::{preceded, separated, separated_pair};
use winnow::prelude::*;
use winnow::token::take_while;

pub const HEADER: &str = "# ap-clamp protocol v1";

#[derive(Debug)]
pub enum PersistError {
    Io(io::Error),
    Format(fmt::Error),
    MissingHeader,
    /// The line is not `step key=value...`.
    Syntax { line: usize },
    UnknownKey { line: usize, key: String },
    DuplicateKey { line: usize, key: String },
    InvalidNumber { line: usize, key: String },
    MissingType { line: usize },
    Step { line: usize, error: StepError },
    Protocol { line: usize, error: ProtocolError },
    /// No steps to load or save.
    Empty,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io(error) => error.fmt(f),
            PersistError::Format(error) => error.fmt(f),
            PersistError::MissingHeader => write!(f, "first line must be `{HEADER}`"),
            PersistError::Syntax { line } => {
                write!(f, "line {line}: expected `step key=value...`")
            }
            PersistError::UnknownKey { line, key } => write!(f, "line {line}: unknown key `{key}`"),
            PersistError::DuplicateKey { line, key } => {
                write!(f, "line {line}: `{key}` given twice")
            }
            PersistError::InvalidNumber { line, key } => {
                write!(f, "line {line}: `{key}` has an invalid value")
            }
            PersistError::MissingType { line } => write!(f, "line {line}: missing `type`"),
            PersistError::Step { line, error } => write!(f, "line {line}: {error}"),
            PersistError::Protocol { line, error } => write!(f, "line {line}: {error}"),
            PersistError::Empty => f.write_str("protocol has no steps"),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<fmt::Error> for PersistError {
    fn from(error: fmt::Error) -> Self {
        PersistError::Format(error)
    }
}

impl From<io::Error> for PersistError {
    fn from(error: io::Error) -> Self {
        PersistError::Io(error)
    }
}

/// Reads and parses a protocol file.
///
/// # Errors
///
/// Returns [`PersistError::Io`] when the file cannot be read, or the first
/// problem found by [`parse_protocol`].
pub fn load(path: &Path) -> Result<Protocol, PersistError> {
    let text = fs::read_to_string(path)?;
    parse_protocol(&text)
}

/// Writes `protocol` to `path`, replacing any existing file.
///
/// # Errors
///
/// Returns [`PersistError::Empty`] for an empty protocol, or
/// [`PersistError::Io`] when the file cannot be written.
pub fn save(path: &Path, protocol: &Protocol) -> Result<(), PersistError> {
    let text = render_protocol(protocol)?;
    fs::write(path, text)?;
    Ok(())
}

/// Renders `protocol` in file form, header first.
///
/// # Errors
///
/// Returns [`PersistError::Empty`] for an empty protocol.
pub fn render_protocol(protocol: &Protocol) -> Result<String, PersistError> {
    if protocol.is_empty() {
        return Err(PersistError::Empty);
    }

    let mut text = String::from(HEADER);
    text.push('\n');
    for descriptor in protocol.descriptors() {
        text.push_str(&render_descriptor(&descriptor)?);
        text.push('\n');
    }
    Ok(text)
}

fn render_descriptor(descriptor: &StepDescriptor) -> Result<String, fmt::Error> {
    let mut line = format!("step type={}", descriptor.step_type);
    if let Some(value) = descriptor.cycle_length_ms {
        write!(line, " {}={value}", StepField::CycleLength)?;
    }
    if let Some(value) = descriptor.beats {
        write!(line, " {}={value}", StepField::Beats)?;
    }
    if let Some(value) = descriptor.buffer_index {
        write!(line, " {}={value}", StepField::BufferIndex)?;
    }
    if let Some(value) = descriptor.wait_ms {
        write!(line, " {}={value}", StepField::Wait)?;
    }
    if let Some(value) = descriptor.digital_out {
        write!(line, " {}={value}", StepField::DigitalOut)?;
    }
    Ok(line)
}

/// Parses a whole protocol file.
///
/// # Errors
///
/// Returns the first offending line and why it was rejected. Nothing is
/// kept from a file that fails.
pub fn parse_protocol(text: &str) -> Result<Protocol, PersistError> {
    let mut lines = text.lines().enumerate().map(|(index, line)| (index + 1, line.trim()));
    match lines.next() {
        Some((_, header)) if header == HEADER => {}
        _ => return Err(PersistError::MissingHeader),
    }

    let mut numbered: Vec<(usize, StepDescriptor)> = Vec::new();
    for (line, content) in lines {
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        let fields = step_line
            .parse(content)
            .map_err(|_| PersistError::Syntax { line })?;
        numbered.push((line, descriptor_from_fields(line, &fields)?));
    }

    if numbered.is_empty() {
        return Err(PersistError::Empty);
    }
    let line_of = |position: usize| numbered[position].0;
    Protocol::from_descriptors(numbered.iter().map(|(_, descriptor)| *descriptor)).map_err(
        |error| match error {
            DescriptorError::Step { position, error } => PersistError::Step {
                line: line_of(position),
                error,
            },
            DescriptorError::Protocol { position, error } => PersistError::Protocol {
                line: line_of(position),
                error,
            },
        },
    )
}

fn step_line<'s>(input: &mut &'s str) -> ModalResult<Vec<(&'s str, &'s str)>> {
    preceded(("step", space1), separated(1.., field, space1)).parse_next(input)
}

fn field<'s>(input: &mut &'s str) -> ModalResult<(&'s str, &'s str)> {
    separated_pair(
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-'),
        '=',
        take_while(1.., |c: char| {
            c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E'
        }),
    )
    .parse_next(input)
}

fn descriptor_from_fields(
    line: usize,
    fields: &[(&str, &str)],
) -> Result<StepDescriptor, PersistError> {
    let mut step_type = None;
    let mut descriptor = StepDescriptor::with_code(0);

    for (position, (key, value)) in fields.iter().enumerate() {
        if fields[..position].iter().any(|(seen, _)| seen.eq_ignore_ascii_case(key)) {
            return Err(PersistError::DuplicateKey {
                line,
                key: (*key).to_string(),
            });
        }
        let invalid = || PersistError::InvalidNumber {
            line,
            key: (*key).to_string(),
        };

        if key.eq_ignore_ascii_case("type") {
            step_type = Some(value.parse::<u8>().map_err(|_| invalid())?);
            continue;
        }

        match StepField::from_key(key) {
            Some(StepField::CycleLength) => {
                descriptor.cycle_length_ms = Some(value.parse().map_err(|_| invalid())?);
            }
            Some(StepField::Beats) => descriptor.beats = Some(value.parse().map_err(|_| invalid())?),
            Some(StepField::BufferIndex) => {
                descriptor.buffer_index = Some(value.parse().map_err(|_| invalid())?);
            }
            Some(StepField::Wait) => descriptor.wait_ms = Some(value.parse().map_err(|_| invalid())?),
            Some(StepField::DigitalOut) => {
                descriptor.digital_out = Some(value.parse().map_err(|_| invalid())?);
            }
            None => {
                return Err(PersistError::UnknownKey {
                    line,
                    key: (*key).to_string(),
                });
            }
        }
    }

    descriptor.step_type = step_type.ok_or(PersistError::MissingType { line })?;
    Ok(descriptor)
}
