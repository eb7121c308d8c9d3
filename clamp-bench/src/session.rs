//! Console session driving a running [`Rig`].
//!
//! Lines go through the core [`CommandExecutor`]; the file-backed commands
//! (`protocol load|save`, `buffer load`) are handled here because the core
//! has no filesystem. Every input and reply is mirrored to the transcript
//! when one is configured.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use clamp_core::buffers::{BufferIndex, WaveformStore};
use clamp_core::control::{ControlError, ControlPort, ControlRequest};
use clamp_core::controller::Controller;
use clamp_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use clamp_core::repl::status::{StatusFormatter, StatusProvider, write_parameters, write_protocol};
use clamp_core::telemetry::TelemetryRecord;

use crate::cell::SampleSource;
use crate::config::BenchConfig;
use crate::persist;
use crate::rig::{Rig, RigPort};

const STATUS_LINE_CAPACITY: usize = 128;

type StatusLine = heapless::String<STATUS_LINE_CAPACITY>;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "threshold",
        "threshold start|stop             - search for the stimulus threshold",
    ),
    (
        "pace",
        "pace start|stop                  - pace at the configured cycle length",
    ),
    (
        "protocol",
        "protocol start|stop|list|clear   - run or edit the protocol",
    ),
    (
        "step",
        "protocol add|insert <n>|delete <n> <kind> key=value ... - edit steps",
    ),
    (
        "files",
        "protocol load|save <file>        - read or write a protocol file",
    ),
    (
        "buffer",
        "buffer load <index> <file>       - load a waveform (mV) into a slot",
    ),
    (
        "set",
        "set <key>=<value> ...            - queue parameters for the next start",
    ),
    (
        "period",
        "period <ms>                      - change the sampling period",
    ),
    (
        "record",
        "record start|stop                - note the data recorder state",
    ),
    (
        "reset",
        "reset                            - rewind the run clock",
    ),
    (
        "status",
        "status                           - show mode, cell and parameters",
    ),
    (
        "help",
        "help [topic]                     - show help for a command",
    ),
];

pub struct Session<S> {
    rig: Rig<S>,
    executor: CommandExecutor<RigPort>,
    transcript: Option<TranscriptLogger>,
    started_at: Instant,
}

impl<S> Session<S>
where
    S: SampleSource + Send + 'static,
{
    /// Spawns the rig around `source` and loads the startup protocol, if any.
    ///
    /// # Errors
    ///
    /// Fails when the transcript cannot be created, the tick thread cannot be
    /// spawned, or the startup protocol does not load.
    pub fn start(config: &BenchConfig, source: S) -> io::Result<Self> {
        let transcript = match &config.transcript {
            Some(path) => Some(TranscriptLogger::new(path)?),
            None => None,
        };

        let store = WaveformStore::with_slot_capacity(config.slot_capacity);
        let controller = Controller::new(config.period, store);
        let rig = Rig::spawn(controller, source, config.pacing)?;
        let mut executor = CommandExecutor::new(rig.port());

        if let Some(path) = &config.protocol {
            let protocol = persist::load(path)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            executor.replace_protocol(protocol);
        }

        Ok(Self {
            rig,
            executor,
            transcript,
            started_at: Instant::now(),
        })
    }
}

impl<S> Session<S> {
    #[must_use]
    pub fn rig(&self) -> &Rig<S> {
        &self.rig
    }

    #[must_use]
    pub fn executor(&self) -> &CommandExecutor<RigPort> {
        &self.executor
    }

    /// Runs one console line and returns the reply lines. An empty line only
    /// collects pending events.
    ///
    /// # Errors
    ///
    /// Fails only when the transcript cannot be written.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        let elapsed = self.started_at.elapsed();
        let mut lines = Vec::new();

        if !trimmed.is_empty() {
            self.log(elapsed, TranscriptRole::Host, trimmed)?;
            lines = match bench_command(trimmed) {
                Some(command) => self.handle_bench(command),
                None => self.handle_core(trimmed),
            };
            self.log_all(elapsed, TranscriptRole::Bench, &lines)?;
        }

        let events = self.collect_events();
        self.log_all(elapsed, TranscriptRole::Event, &events)?;
        lines.extend(events);
        Ok(lines)
    }

    fn handle_core(&mut self, line: &str) -> Vec<String> {
        match self.executor.execute(line) {
            Ok(CommandOutcome::Applied(label)) => vec![format!("OK {label}")],
            Ok(CommandOutcome::ParametersQueued) => {
                vec!["OK parameters queued for the next start".to_string()]
            }
            Ok(CommandOutcome::StepStored { position }) => {
                vec![format!("OK step {position} stored")]
            }
            Ok(CommandOutcome::StepDeleted { position, step }) => {
                vec![format!("OK step {position} deleted ({step})")]
            }
            Ok(CommandOutcome::ProtocolCleared) => vec!["OK protocol cleared".to_string()],
            Ok(CommandOutcome::ListProtocol) => self.protocol_lines(),
            Ok(CommandOutcome::ShowStatus) => self.status_lines(),
            Ok(CommandOutcome::Help { topic }) => help_lines(topic),
            Err(CommandError::Parse(err)) => vec![format!("ERR syntax {err}")],
            Err(CommandError::Control(ControlError::Rejected(err))) => {
                vec![format!("ERR rejected {err}")]
            }
            Err(CommandError::Control(err)) => vec![format!("ERR control {err}")],
            Err(err) => vec![format!("ERR {err}")],
        }
    }

    fn handle_bench(&mut self, command: BenchCommand<'_>) -> Vec<String> {
        match command {
            BenchCommand::LoadProtocol(path) => match persist::load(Path::new(path)) {
                Ok(protocol) => {
                    let count = protocol.len();
                    self.executor.replace_protocol(protocol);
                    vec![format!("OK protocol loaded ({count} steps)")]
                }
                Err(err) => vec![format!("ERR load {err}")],
            },
            BenchCommand::SaveProtocol(path) => {
                match persist::save(Path::new(path), self.executor.protocol()) {
                    Ok(()) => vec![format!("OK protocol saved to {path}")],
                    Err(err) => vec![format!("ERR save {err}")],
                }
            }
            BenchCommand::LoadBuffer { index, path } => match read_waveform(Path::new(path)) {
                Ok(samples) => {
                    let count = samples.len();
                    let request = ControlRequest::LoadWaveform { index, samples };
                    match self.executor.port_mut().reconfigure(request) {
                        Ok(()) => vec![format!("OK buffer {index} loaded ({count} samples)")],
                        Err(ControlError::Rejected(err)) => vec![format!("ERR rejected {err}")],
                        Err(err) => vec![format!("ERR control {err}")],
                    }
                }
                Err(err) => vec![format!("ERR buffer {err}")],
            },
            BenchCommand::Invalid(message) => vec![format!("ERR syntax {message}")],
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let snapshot = self.executor.port().snapshot();
        let formatter = StatusFormatter::new(&snapshot);
        let writers: [fn(&_, &mut StatusLine) -> fmt::Result; 4] = [
            StatusFormatter::write_mode_line,
            StatusFormatter::write_cell_line,
            StatusFormatter::write_output_line,
            StatusFormatter::write_protocol_line,
        ];

        let mut lines = Vec::new();
        for write in writers {
            let mut line = StatusLine::new();
            match write(&formatter, &mut line) {
                Ok(()) => lines.push(line.to_string()),
                Err(_) => lines.push("ERR status line overflow".to_string()),
            }
        }

        let mut parameters = String::new();
        if write_parameters(self.executor.parameters(), &mut parameters).is_ok() {
            lines.extend(parameters.lines().map(|entry| format!("  {entry}")));
        }
        lines
    }

    fn protocol_lines(&self) -> Vec<String> {
        let mut listing = String::new();
        if write_protocol(self.executor.protocol(), &mut listing).is_err() {
            return vec!["ERR protocol listing failed".to_string()];
        }
        listing.lines().map(str::to_string).collect()
    }

    fn collect_events(&mut self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .rig
            .drain_events()
            .iter()
            .map(describe_event)
            .collect();
        if let Some(err) = self.rig.take_deferred_error() {
            lines.push(format!("ERR deferred {err}"));
        }
        let snapshot = self.rig.snapshot();
        self.executor.sync(&snapshot);
        lines
    }

    fn log(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        match &mut self.transcript {
            Some(transcript) => transcript.append_line(elapsed, role, line),
            None => Ok(()),
        }
    }

    fn log_all(&mut self, elapsed: Duration, role: TranscriptRole, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.log(elapsed, role, line)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum BenchCommand<'a> {
    LoadProtocol(&'a str),
    SaveProtocol(&'a str),
    LoadBuffer { index: BufferIndex, path: &'a str },
    Invalid(String),
}

/// Recognizes the file-backed commands. Everything else goes to the core
/// grammar.
fn bench_command(line: &str) -> Option<BenchCommand<'_>> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    let second = words.next()?;

    if first.eq_ignore_ascii_case("protocol")
        && (second.eq_ignore_ascii_case("load") || second.eq_ignore_ascii_case("save"))
    {
        let Some(path) = words.next() else {
            return Some(BenchCommand::Invalid(format!(
                "expected file after `protocol {second}`"
            )));
        };
        return Some(if second.eq_ignore_ascii_case("load") {
            BenchCommand::LoadProtocol(path)
        } else {
            BenchCommand::SaveProtocol(path)
        });
    }

    if first.eq_ignore_ascii_case("buffer") {
        if !second.eq_ignore_ascii_case("load") {
            return Some(BenchCommand::Invalid(format!(
                "expected `load` after `buffer`, found `{second}`"
            )));
        }
        let index = words
            .next()
            .and_then(|raw| raw.parse::<u16>().ok())
            .and_then(BufferIndex::new);
        let path = words.next();
        return Some(match (index, path) {
            (Some(index), Some(path)) => BenchCommand::LoadBuffer { index, path },
            (None, _) => BenchCommand::Invalid("expected buffer index 0-99".to_string()),
            (Some(_), None) => BenchCommand::Invalid("expected waveform file".to_string()),
        });
    }

    None
}

/// Reads millivolt samples separated by whitespace or commas. `#` starts a
/// comment.
fn read_waveform(path: &Path) -> Result<Vec<f64>, String> {
    let text = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    let mut samples = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or_default();
        for field in content
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|field| !field.is_empty())
        {
            let value = field
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| format!("line {}: `{field}` is not a number", number + 1))?;
            samples.push(value);
        }
    }
    if samples.is_empty() {
        return Err(format!("{}: no samples", path.display()));
    }
    Ok(samples)
}

fn describe_event(record: &TelemetryRecord) -> String {
    let mut line = format!("EVENT t={:.1}ms {}", record.time_ms, record.event);
    let details = record.details.to_string();
    if !details.is_empty() {
        line.push(' ');
        line.push_str(&details);
    }
    line
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) if !target.is_empty() => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        _ => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "AP clamp bench transcript")?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Bench,
    Event,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Bench => "BENCH<",
            TranscriptRole::Event => "TICK <",
        }
    }
}
