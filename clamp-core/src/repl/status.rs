//! Shared status surface for the console.
//!
//! Front-ends implement [`StatusProvider`] so the `status` command can show
//! the latest published [`Snapshot`]. [`StatusFormatter`] keeps the textual
//! rendering consistent between the live console and transcripts.
//!
//! Every writer here only fails when the underlying [`fmt::Write`] does.

#![allow(clippy::missing_errors_doc)]

use core::fmt;

use crate::config::{ParameterKey, Parameters};
use crate::controller::Snapshot;
use crate::protocol::Protocol;
use crate::sequencer::ProtocolProgress;

/// Platform hook that supplies the latest controller snapshot.
pub trait StatusProvider {
    fn snapshot(&self) -> Snapshot;
}

/// Renders a [`Snapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a Snapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a Snapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the mode line (e.g. `mode pace tick=1200 t=1200.0ms beat=2 record=off`).
    pub fn write_mode_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "mode {} tick={} t={:.1}ms beat={} record={}",
            snapshot.mode,
            snapshot.tick,
            snapshot.time_ms,
            snapshot.beat,
            if snapshot.recording { "on" } else { "off" }
        )
    }

    /// Writes the cell line (e.g. `cell vm=-80.1mV rest=-80.0mV apd=212.4ms`).
    pub fn write_cell_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "cell vm={:.1}mV rest={:.1}mV apd=",
            snapshot.voltage_mv, snapshot.resting_mv
        )?;
        if snapshot.apd_ms > 0.0 {
            write!(writer, "{:.1}ms", snapshot.apd_ms)
        } else {
            writer.write_str("n/a")
        }
    }

    /// Writes the output line (e.g. `output analog=4.000e-9 dout=1 stim=4.00nA`).
    pub fn write_output_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "output analog={:.3e} dout={} stim={:.2}nA",
            snapshot.output.analog, snapshot.output.digital, snapshot.stim_magnitude_na
        )?;
        if snapshot.threshold_cycles > 0 {
            write!(writer, " search-cycles={}", snapshot.threshold_cycles)?;
        }
        Ok(())
    }

    /// Writes the protocol line (e.g. `protocol exec step=2/5 trial=1/3`).
    pub fn write_protocol_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        match self.snapshot.protocol {
            None => writer.write_str("protocol idle"),
            Some(ProtocolProgress {
                phase,
                step,
                steps,
                trial,
                trials,
            }) => write!(
                writer,
                "protocol {phase} step={}/{steps} trial={trial}/{trials}",
                (step + 1).min(steps)
            ),
        }
    }
}

/// Writes one `name=value unit` line per parameter.
pub fn write_parameters<W: fmt::Write>(parameters: &Parameters, writer: &mut W) -> fmt::Result {
    for key in ParameterKey::ALL {
        writeln!(writer, "{key}={}{}", parameters.get(key), key.unit())?;
    }
    Ok(())
}

/// Writes the protocol as numbered lines, or a note when it is empty.
pub fn write_protocol<W: fmt::Write>(protocol: &Protocol, writer: &mut W) -> fmt::Result {
    if protocol.is_empty() {
        return writeln!(writer, "no protocol entered");
    }
    for (index, step) in protocol.iter().enumerate() {
        writeln!(writer, "{:>2}. {step}", index + 1)?;
    }
    Ok(())
}
