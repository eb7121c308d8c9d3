//! Command-line configuration for the bench.

use std::path::PathBuf;

use clamp_core::buffers::DEFAULT_SLOT_CAPACITY;
use clamp_core::timing::SamplePeriod;

pub const USAGE: &str = "Usage: clamp-bench [--period <ms>] [--protocol <file>] \
[--transcript <file>] [--speed <realtime|fast>] [--slot-capacity <n>]";

/// How the tick thread spaces its ticks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Pacing {
    /// Sleep until each sampling period has elapsed on the wall clock.
    Realtime,
    /// Tick back to back.
    Fast,
}

impl Pacing {
    /// # Errors
    ///
    /// Returns a message naming `tag` when it is neither `realtime` nor `fast`.
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("realtime") {
            Ok(Self::Realtime)
        } else if tag.eq_ignore_ascii_case("fast") {
            Ok(Self::Fast)
        } else {
            Err(format!("Unknown speed `{tag}`"))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    pub period: SamplePeriod,
    pub protocol: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
    pub pacing: Pacing,
    pub slot_capacity: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            protocol: None,
            transcript: None,
            pacing: Pacing::Realtime,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
        }
    }
}

const DEFAULT_PERIOD: SamplePeriod = match SamplePeriod::from_ms(0.1) {
    Some(period) => period,
    None => panic!("default period must be valid"),
};

impl BenchConfig {
    /// Parses flags in either `--flag value` or `--flag=value` form.
    ///
    /// # Errors
    ///
    /// Returns a message for unknown flags, missing values, and values that
    /// do not parse.
    pub fn from_args<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| format!("Expected value after {flag}"))
            };

            match flag.as_str() {
                "--period" => {
                    let raw = value()?;
                    config.period = raw
                        .parse::<f64>()
                        .ok()
                        .and_then(SamplePeriod::from_ms)
                        .ok_or_else(|| format!("Invalid period `{raw}`"))?;
                }
                "--protocol" => config.protocol = Some(PathBuf::from(value()?)),
                "--transcript" => config.transcript = Some(PathBuf::from(value()?)),
                "--speed" => config.pacing = Pacing::from_tag(&value()?)?,
                "--slot-capacity" => {
                    let raw = value()?;
                    config.slot_capacity = raw
                        .parse::<usize>()
                        .ok()
                        .filter(|capacity| *capacity > 0)
                        .ok_or_else(|| format!("Invalid slot capacity `{raw}`"))?;
                }
                other => return Err(format!("Unknown argument `{other}`")),
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn defaults_without_flags() {
        let config = BenchConfig::from_args(Vec::new()).expect("defaults");
        assert_eq!(config, BenchConfig::default());
        assert!((config.period.as_ms() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn accepts_both_flag_forms() {
        let config = BenchConfig::from_args(args(&[
            "--period",
            "0.5",
            "--speed=fast",
            "--slot-capacity",
            "2048",
            "--protocol=runs/pace.txt",
        ]))
        .expect("valid flags");
        assert!((config.period.as_ms() - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.pacing, Pacing::Fast);
        assert_eq!(config.slot_capacity, 2048);
        assert_eq!(config.protocol, Some(PathBuf::from("runs/pace.txt")));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(BenchConfig::from_args(args(&["--period", "0"])).is_err());
        assert!(BenchConfig::from_args(args(&["--speed", "warp"])).is_err());
        assert!(BenchConfig::from_args(args(&["--slot-capacity"])).is_err());
        assert!(BenchConfig::from_args(args(&["--verbose"])).is_err());
    }
}
