//! Simulated excitable cell used in place of the amplifier.
//!
//! A FitzHugh-Nagumo oscillator in dimensionless units, rescaled so that the
//! resting state sits near -76 mV and a full action potential lasts a few
//! hundred milliseconds. The controller drives it either with a stimulus
//! current or with a clamp voltage.

use clamp_core::controller::{AMPS_PER_NANOAMP, Actuation};
use clamp_core::timing::SamplePeriod;

/// Millivolts per dimensionless voltage unit.
const MV_PER_UNIT: f64 = 30.0;
/// Membrane potential at dimensionless zero.
const OFFSET_MV: f64 = -40.0;
/// Longest Euler step taken in model time.
const MAX_MODEL_STEP: f64 = 0.05;

/// Source of membrane readings for the tick loop.
pub trait SampleSource {
    /// Amplifier reading, in volts, for the tick about to run.
    fn read(&mut self) -> f64;

    /// Feeds back the command the controller produced. `clamping` is set
    /// while the analog output is a voltage command rather than a current.
    fn drive(&mut self, output: Actuation, clamping: bool, period: SamplePeriod);
}

#[derive(Clone, Debug)]
pub struct FitzHughNagumoCell {
    /// Dimensionless membrane potential.
    pub v: f64,
    /// Recovery variable.
    pub w: f64,
    pub a: f64,
    pub b: f64,
    /// Recovery time constant in model time.
    pub tau: f64,
    /// Model drive per nanoampere of injected current.
    pub drive_per_na: f64,
    /// Model time per millisecond.
    pub time_scale: f64,
}

impl Default for FitzHughNagumoCell {
    fn default() -> Self {
        Self {
            v: -1.1994,
            w: -0.6243,
            a: 0.7,
            b: 0.8,
            tau: 12.5,
            drive_per_na: 3.0,
            time_scale: 0.1,
        }
    }
}

impl FitzHughNagumoCell {
    #[must_use]
    pub fn membrane_mv(&self) -> f64 {
        OFFSET_MV + self.v * MV_PER_UNIT
    }

    /// Advances the model by `duration_ms` with a constant injected current.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn inject(&mut self, current_na: f64, duration_ms: f64) {
        let total = duration_ms * self.time_scale;
        let steps = (total / MAX_MODEL_STEP).ceil().max(1.0) as u32;
        let dt = total / f64::from(steps);
        let drive = current_na * self.drive_per_na;
        for _ in 0..steps {
            let dv = (self.v - self.v.powi(3) / 3.0 - self.w + drive) * dt;
            let dw = (self.v + self.a - self.b * self.w) * (dt / self.tau);
            self.v += dv;
            self.w += dw;
        }
    }

    /// Holds the membrane at `command_mv` while recovery keeps evolving.
    pub fn clamp(&mut self, command_mv: f64, duration_ms: f64) {
        self.v = (command_mv - OFFSET_MV) / MV_PER_UNIT;
        let dt = duration_ms * self.time_scale;
        self.w += (self.v + self.a - self.b * self.w) * (dt / self.tau);
    }
}

impl SampleSource for FitzHughNagumoCell {
    fn read(&mut self) -> f64 {
        self.membrane_mv() * 1e-3
    }

    fn drive(&mut self, output: Actuation, clamping: bool, period: SamplePeriod) {
        if clamping {
            self.clamp(output.analog * 1e3, period.as_ms());
        } else {
            self.inject(output.analog / AMPS_PER_NANOAMP, period.as_ms());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rests_without_input() {
        let mut cell = FitzHughNagumoCell::default();
        let start = cell.membrane_mv();
        cell.inject(0.0, 2_000.0);
        assert!((cell.membrane_mv() - start).abs() < 0.5);
        assert!(start < -70.0 && start > -80.0);
    }

    #[test]
    fn strong_pulse_fires_and_recovers() {
        let mut cell = FitzHughNagumoCell::default();
        let rest = cell.membrane_mv();
        cell.inject(10.0, 1.0);

        let mut peak = f64::MIN;
        for _ in 0..200 {
            cell.inject(0.0, 1.0);
            peak = peak.max(cell.membrane_mv());
        }
        assert!(peak > 0.0, "no upstroke, peak {peak}");

        cell.inject(0.0, 3_000.0);
        assert!((cell.membrane_mv() - rest).abs() < 5.0);
    }

    #[test]
    fn clamp_sets_the_reading() {
        let mut cell = FitzHughNagumoCell::default();
        let period = SamplePeriod::from_ms(1.0).expect("period");
        cell.drive(
            Actuation {
                analog: -0.02,
                digital: 0,
            },
            true,
            period,
        );
        assert!((cell.read() + 0.02).abs() < 1e-9);
    }
}
