//! Console command dispatcher.
//!
//! Turns parsed [`Command`]s into [`ControlRequest`]s for the tick side and
//! keeps the operator's editable copy of the protocol and parameters. Protocol
//! edits never touch a running protocol: `protocol start` ships a snapshot.

use core::fmt;

use crate::config::{ParameterError, Parameters};
use crate::control::{ConfigError, ControlError, ControlPort, ControlRequest};
use crate::controller::Snapshot;
use crate::protocol::{Protocol, ProtocolError, ProtocolStep, StepError};
use crate::timing::SamplePeriod;

use super::grammar::{self, Assignments, Command, ProtocolCommand, Toggle};

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<'a> {
    /// The tick side accepted the request with this label.
    Applied(&'static str),
    /// New parameters are queued and take effect on the next mode start.
    ParametersQueued,
    /// A step was stored at this one-based position.
    StepStored { position: usize },
    /// The step at this one-based position was removed.
    StepDeleted { position: usize, step: ProtocolStep },
    ProtocolCleared,
    /// The caller should print the protocol.
    ListProtocol,
    /// The caller should print a status snapshot.
    ShowStatus,
    Help { topic: Option<&'a str> },
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    Step(StepError),
    Protocol(ProtocolError),
    Parameter(ParameterError),
    Control(ControlError<E>),
    /// Refused before reaching the tick side.
    Config(ConfigError),
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E> From<StepError> for CommandError<'_, E> {
    fn from(error: StepError) -> Self {
        Self::Step(error)
    }
}

impl<E> From<ProtocolError> for CommandError<'_, E> {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }
}

impl<E> From<ParameterError> for CommandError<'_, E> {
    fn from(error: ParameterError) -> Self {
        Self::Parameter(error)
    }
}

impl<E> From<ControlError<E>> for CommandError<'_, E> {
    fn from(error: ControlError<E>) -> Self {
        Self::Control(error)
    }
}

impl<E> From<ConfigError> for CommandError<'_, E> {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl<E: fmt::Display> fmt::Display for CommandError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => error.fmt(f),
            CommandError::Step(error) => error.fmt(f),
            CommandError::Protocol(error) => error.fmt(f),
            CommandError::Parameter(error) => error.fmt(f),
            CommandError::Control(error) => error.fmt(f),
            CommandError::Config(error) => error.fmt(f),
        }
    }
}

type CommandResult<'a, P> = Result<CommandOutcome<'a>, CommandError<'a, <P as ControlPort>::Error>>;

/// Dispatches console commands into the control port.
pub struct CommandExecutor<P> {
    port: P,
    protocol: Protocol,
    parameters: Parameters,
    /// Operating magnitude the tick side last reported.
    reported_stim_na: f64,
}

impl<P> CommandExecutor<P> {
    /// Creates an executor with an empty protocol and default parameters.
    #[must_use]
    pub const fn new(port: P) -> Self {
        Self {
            port,
            protocol: Protocol::new(),
            parameters: Parameters::DEFAULT,
            reported_stim_na: Parameters::DEFAULT.stim_magnitude_na,
        }
    }

    #[must_use]
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// The protocol being edited.
    #[must_use]
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Replaces the edited protocol, e.g. after loading one from disk.
    pub fn replace_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    /// Parameters as last sent by the operator.
    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Adopts the stimulus magnitude reported by the tick side when it
    /// changes, as it does when a threshold search settles. A magnitude
    /// queued with `set` but not yet promoted is kept.
    #[allow(clippy::float_cmp)]
    pub fn sync(&mut self, snapshot: &Snapshot) {
        if snapshot.stim_magnitude_na != self.reported_stim_na {
            self.reported_stim_na = snapshot.stim_magnitude_na;
            self.parameters.stim_magnitude_na = snapshot.stim_magnitude_na;
        }
    }
}

impl<P> CommandExecutor<P>
where
    P: ControlPort,
{
    /// Parses and executes one console line.
    ///
    /// # Errors
    ///
    /// Returns the parse failure, the edit failure, or the control failure.
    pub fn execute<'a>(&mut self, line: &'a str) -> CommandResult<'a, P> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    /// Executes an already-parsed command.
    ///
    /// # Errors
    ///
    /// Returns the edit failure or the control failure.
    pub fn dispatch<'a>(&mut self, command: Command<'a>) -> CommandResult<'a, P> {
        match command {
            Command::Threshold(toggle) => self.request(match toggle {
                Toggle::Start => ControlRequest::StartThreshold,
                Toggle::Stop => ControlRequest::StopThreshold,
            }),
            Command::Pace(toggle) => self.request(match toggle {
                Toggle::Start => ControlRequest::StartPace,
                Toggle::Stop => ControlRequest::StopPace,
            }),
            Command::Record(toggle) => self.request(ControlRequest::RecordingChanged {
                active: toggle == Toggle::Start,
            }),
            Command::Protocol(command) => self.handle_protocol(command),
            Command::Set(values) => self.handle_set(&values),
            Command::Period(period_ms) => {
                SamplePeriod::from_ms(period_ms).ok_or(ConfigError::InvalidPeriod)?;
                self.request(ControlRequest::SetPeriod(period_ms))
            }
            Command::Reset => self.request(ControlRequest::ResetClock),
            Command::Status => Ok(CommandOutcome::ShowStatus),
            Command::Help(help) => Ok(CommandOutcome::Help { topic: help.topic }),
        }
    }

    fn request<'a>(&mut self, request: ControlRequest) -> CommandResult<'a, P> {
        let label = request.label();
        self.port.reconfigure(request)?;
        Ok(CommandOutcome::Applied(label))
    }

    fn handle_protocol<'a>(&mut self, command: ProtocolCommand) -> CommandResult<'a, P> {
        match command {
            ProtocolCommand::Start => {
                self.request(ControlRequest::StartProtocol(self.protocol.clone()))
            }
            ProtocolCommand::Stop => self.request(ControlRequest::StopProtocol),
            ProtocolCommand::List => Ok(CommandOutcome::ListProtocol),
            ProtocolCommand::Clear => {
                self.protocol.clear();
                Ok(CommandOutcome::ProtocolCleared)
            }
            ProtocolCommand::Add(descriptor) => {
                let step = ProtocolStep::try_from(descriptor)?;
                let index = self.protocol.push(step)?;
                Ok(CommandOutcome::StepStored {
                    position: index + 1,
                })
            }
            ProtocolCommand::Insert { after, step } => {
                let step = ProtocolStep::try_from(step)?;
                let index = if after == 0 {
                    self.protocol.insert(0, step)?
                } else {
                    self.protocol.insert_after(after - 1, step)?
                };
                Ok(CommandOutcome::StepStored {
                    position: index + 1,
                })
            }
            ProtocolCommand::Delete(position) => {
                let step = self.protocol.remove(position.saturating_sub(1))?;
                Ok(CommandOutcome::StepDeleted { position, step })
            }
        }
    }

    fn handle_set<'a>(&mut self, values: &Assignments) -> CommandResult<'a, P> {
        let mut updated = self.parameters;
        for (key, value) in values {
            updated.set(*key, *value)?;
        }
        updated.validate()?;

        self.port
            .defer(ControlRequest::UpdateParameters(updated))?;
        self.parameters = updated;
        Ok(CommandOutcome::ParametersQueued)
    }
}
