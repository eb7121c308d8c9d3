//! Action-potential duration measurement, one beat at a time.
//!
//! [`ApdDetector::begin_beat`] arms the detector at each beat boundary and
//! [`ApdDetector::observe`] advances it once per tick:
//!
//! ```text
//! Start --(v >= upstroke)--> Peak --(5 ms past last maximum)--> Down --(v <= downstroke)--> Done
//! ```

/// Voltage the upstroke must reach to mark the start of an action potential.
pub const DEFAULT_UPSTROKE_THRESHOLD_MV: f64 = -40.0;

/// Time without a new maximum before the peak is considered settled.
pub const PEAK_CONFIRMATION_MS: f64 = 5.0;

/// Phases of a single-beat measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ApdPhase {
    Start,
    Peak,
    Down,
    Done,
}

/// Detector tuning captured when a mode is activated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ApdSettings {
    /// Fraction of the amplitude, in percent, that marks repolarization.
    pub repolarization_percent: f64,
    /// Samples closer than this to the upstroke are ignored as stimulus artifact.
    pub stim_window_ms: f64,
    /// Voltage that marks the upstroke.
    pub upstroke_threshold_mv: f64,
}

impl ApdSettings {
    #[must_use]
    pub const fn new(repolarization_percent: f64, stim_window_ms: f64) -> Self {
        Self {
            repolarization_percent,
            stim_window_ms,
            upstroke_threshold_mv: DEFAULT_UPSTROKE_THRESHOLD_MV,
        }
    }
}

impl Default for ApdSettings {
    fn default() -> Self {
        Self::new(90.0, 4.0)
    }
}

/// Four-phase repolarization-crossing detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ApdDetector {
    settings: ApdSettings,
    phase: ApdPhase,
    resting_mv: f64,
    upstroke_at_ms: f64,
    peak_mv: f64,
    peak_at_ms: f64,
    downstroke_mv: f64,
    apd_ms: f64,
}

impl ApdDetector {
    #[must_use]
    pub const fn new(settings: ApdSettings) -> Self {
        Self {
            settings,
            phase: ApdPhase::Start,
            resting_mv: 0.0,
            upstroke_at_ms: 0.0,
            peak_mv: 0.0,
            peak_at_ms: 0.0,
            downstroke_mv: 0.0,
            apd_ms: 0.0,
        }
    }

    /// Replaces the tuning. Takes effect from the next observation.
    pub fn configure(&mut self, settings: ApdSettings) {
        self.settings = settings;
    }

    /// Arms the detector for a new beat. The last APD stays readable.
    pub fn begin_beat(&mut self, resting_mv: f64) {
        self.phase = ApdPhase::Start;
        self.resting_mv = resting_mv;
    }

    /// Feeds one sample. Returns the APD when this sample completes the beat.
    pub fn observe(&mut self, now_ms: f64, voltage_mv: f64) -> Option<f64> {
        match self.phase {
            ApdPhase::Start => {
                if voltage_mv >= self.settings.upstroke_threshold_mv {
                    self.upstroke_at_ms = now_ms;
                    self.peak_mv = self.resting_mv;
                    self.peak_at_ms = now_ms;
                    self.phase = ApdPhase::Peak;
                }
                None
            }
            ApdPhase::Peak => {
                if now_ms - self.upstroke_at_ms > self.settings.stim_window_ms {
                    if self.peak_mv < voltage_mv {
                        self.peak_mv = voltage_mv;
                        self.peak_at_ms = now_ms;
                    } else if now_ms - self.peak_at_ms > PEAK_CONFIRMATION_MS {
                        let amplitude = self.peak_mv - self.resting_mv;
                        self.downstroke_mv = self.peak_mv
                            - amplitude * (self.settings.repolarization_percent / 100.0);
                        self.phase = ApdPhase::Down;
                    }
                }
                None
            }
            ApdPhase::Down => {
                if voltage_mv <= self.downstroke_mv {
                    self.apd_ms = now_ms - self.upstroke_at_ms;
                    self.phase = ApdPhase::Done;
                    Some(self.apd_ms)
                } else {
                    None
                }
            }
            ApdPhase::Done => None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> ApdPhase {
        self.phase
    }

    /// Most recent completed measurement, in milliseconds.
    #[must_use]
    pub const fn apd_ms(&self) -> f64 {
        self.apd_ms
    }

    /// Repolarization threshold computed for the current beat.
    #[must_use]
    pub const fn downstroke_mv(&self) -> f64 {
        self.downstroke_mv
    }

    /// Peak tracked for the current beat.
    #[must_use]
    pub const fn peak_mv(&self) -> f64 {
        self.peak_mv
    }

    #[must_use]
    pub const fn upstroke_at_ms(&self) -> f64 {
        self.upstroke_at_ms
    }
}

impl Default for ApdDetector {
    fn default() -> Self {
        Self::new(ApdSettings::default())
    }
}
