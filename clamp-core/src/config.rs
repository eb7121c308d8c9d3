//! Operator-tunable parameters and their validation.
//!
//! Parameter edits are deferred: the controller parks an accepted update and
//! promotes it the next time a mode is activated.

use core::fmt;

use crate::apd::ApdSettings;

/// Numeric knobs exposed to the operator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parameters {
    /// Repolarization fraction used by APD detection, in percent.
    pub repolarization_percent: f64,
    /// Minimum action-potential duration (ms). Reserved; not consulted by the detector.
    pub min_apd_ms: f64,
    /// Stimulus-artifact window after the upstroke (ms).
    pub stim_window_ms: f64,
    /// Number of protocol trials.
    pub trials: u32,
    /// Inter-trial interval (ms). Stored for the operator; trials restart back to back.
    pub interval_ms: f64,
    /// Static pacing cycle length (ms).
    pub cycle_length_ms: f64,
    /// Stimulus amplitude (nA).
    pub stim_magnitude_na: f64,
    /// Stimulus pulse duration (ms).
    pub stim_length_ms: f64,
    /// Liquid junction potential correction (mV).
    pub ljp_mv: f64,
}

impl Parameters {
    /// Defaults used when the rig boots.
    pub const DEFAULT: Self = Self {
        repolarization_percent: 90.0,
        min_apd_ms: 50.0,
        stim_window_ms: 4.0,
        trials: 1,
        interval_ms: 1000.0,
        cycle_length_ms: 1000.0,
        stim_magnitude_na: 4.0,
        stim_length_ms: 1.0,
        ljp_mv: 0.0,
    };

    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first offending key.
    pub fn validate(&self) -> Result<(), ParameterError> {
        for key in ParameterKey::ALL {
            check(key, self.get(key))?;
        }
        Ok(())
    }

    /// Reads a field by key.
    #[must_use]
    pub fn get(&self, key: ParameterKey) -> f64 {
        match key {
            ParameterKey::Repolarization => self.repolarization_percent,
            ParameterKey::MinApd => self.min_apd_ms,
            ParameterKey::StimWindow => self.stim_window_ms,
            ParameterKey::Trials => f64::from(self.trials),
            ParameterKey::Interval => self.interval_ms,
            ParameterKey::CycleLength => self.cycle_length_ms,
            ParameterKey::StimMagnitude => self.stim_magnitude_na,
            ParameterKey::StimLength => self.stim_length_ms,
            ParameterKey::Ljp => self.ljp_mv,
        }
    }

    /// Validates and writes a single field.
    ///
    /// # Errors
    ///
    /// Leaves `self` untouched when `value` is out of range for `key`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set(&mut self, key: ParameterKey, value: f64) -> Result<(), ParameterError> {
        check(key, value)?;
        match key {
            ParameterKey::Repolarization => self.repolarization_percent = value,
            ParameterKey::MinApd => self.min_apd_ms = value,
            ParameterKey::StimWindow => self.stim_window_ms = value,
            ParameterKey::Trials => self.trials = value as u32,
            ParameterKey::Interval => self.interval_ms = value,
            ParameterKey::CycleLength => self.cycle_length_ms = value,
            ParameterKey::StimMagnitude => self.stim_magnitude_na = value,
            ParameterKey::StimLength => self.stim_length_ms = value,
            ParameterKey::Ljp => self.ljp_mv = value,
        }
        Ok(())
    }

    /// Detector tuning derived from these parameters.
    #[must_use]
    pub const fn apd_settings(&self) -> ApdSettings {
        ApdSettings::new(self.repolarization_percent, self.stim_window_ms)
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Names of the operator-visible parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterKey {
    Repolarization,
    MinApd,
    StimWindow,
    Trials,
    Interval,
    CycleLength,
    StimMagnitude,
    StimLength,
    Ljp,
}

impl ParameterKey {
    pub const ALL: [ParameterKey; 9] = [
        ParameterKey::Repolarization,
        ParameterKey::MinApd,
        ParameterKey::StimWindow,
        ParameterKey::Trials,
        ParameterKey::Interval,
        ParameterKey::CycleLength,
        ParameterKey::StimMagnitude,
        ParameterKey::StimLength,
        ParameterKey::Ljp,
    ];

    /// Console spelling of the key.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ParameterKey::Repolarization => "repol",
            ParameterKey::MinApd => "min-apd",
            ParameterKey::StimWindow => "stim-window",
            ParameterKey::Trials => "trials",
            ParameterKey::Interval => "interval",
            ParameterKey::CycleLength => "bcl",
            ParameterKey::StimMagnitude => "stim-mag",
            ParameterKey::StimLength => "stim-length",
            ParameterKey::Ljp => "ljp",
        }
    }

    /// Case-insensitive lookup by console spelling.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.name().eq_ignore_ascii_case(name))
    }

    /// Unit suffix used when printing values.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            ParameterKey::Repolarization => "%",
            ParameterKey::Trials => "",
            ParameterKey::StimMagnitude => "nA",
            ParameterKey::Ljp => "mV",
            ParameterKey::MinApd
            | ParameterKey::StimWindow
            | ParameterKey::Interval
            | ParameterKey::CycleLength
            | ParameterKey::StimLength => "ms",
        }
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validation failures for parameter edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterError {
    NotFinite { key: ParameterKey },
    OutOfRange { key: ParameterKey },
    UnknownKey,
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::NotFinite { key } => write!(f, "{key} must be a finite number"),
            ParameterError::OutOfRange { key } => match key {
                ParameterKey::Repolarization => write!(f, "{key} must be within (0, 100]"),
                ParameterKey::Trials => write!(f, "{key} must be a whole number of at least 1"),
                ParameterKey::CycleLength => write!(f, "{key} must be greater than 0"),
                _ => write!(f, "{key} must not be negative"),
            },
            ParameterError::UnknownKey => f.write_str("unknown parameter"),
        }
    }
}

fn check(key: ParameterKey, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() {
        return Err(ParameterError::NotFinite { key });
    }
    let valid = match key {
        ParameterKey::Repolarization => value > 0.0 && value <= 100.0,
        ParameterKey::Trials => value >= 1.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX),
        ParameterKey::CycleLength => value > 0.0,
        ParameterKey::MinApd
        | ParameterKey::StimWindow
        | ParameterKey::Interval
        | ParameterKey::StimLength => value >= 0.0,
        ParameterKey::StimMagnitude | ParameterKey::Ljp => true,
    };
    if valid {
        Ok(())
    } else {
        Err(ParameterError::OutOfRange { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(Parameters::DEFAULT.validate(), Ok(()));
        assert_eq!(Parameters::default().trials, 1);
    }

    #[test]
    fn set_rejects_out_of_range_values() {
        let mut params = Parameters::DEFAULT;
        assert_eq!(
            params.set(ParameterKey::Trials, 0.0),
            Err(ParameterError::OutOfRange {
                key: ParameterKey::Trials
            })
        );
        assert_eq!(
            params.set(ParameterKey::Trials, 2.5),
            Err(ParameterError::OutOfRange {
                key: ParameterKey::Trials
            })
        );
        assert_eq!(
            params.set(ParameterKey::CycleLength, f64::NAN),
            Err(ParameterError::NotFinite {
                key: ParameterKey::CycleLength
            })
        );
        assert_eq!(params, Parameters::DEFAULT);
    }

    #[test]
    fn set_accepts_negative_junction_potential() {
        let mut params = Parameters::DEFAULT;
        params.set(ParameterKey::Ljp, -12.5).expect("ljp may be negative");
        params.set(ParameterKey::Trials, 3.0).expect("whole trials");
        assert!((params.ljp_mv - -12.5).abs() < f64::EPSILON);
        assert_eq!(params.trials, 3);
    }

    #[test]
    fn keys_resolve_case_insensitively() {
        assert_eq!(ParameterKey::from_name("BCL"), Some(ParameterKey::CycleLength));
        assert_eq!(ParameterKey::from_name("stim-mag"), Some(ParameterKey::StimMagnitude));
        assert_eq!(ParameterKey::from_name("voltage"), None);
    }
}
