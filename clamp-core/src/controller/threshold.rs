//! Linear search for the smallest stimulus that evokes an action potential.
//!
//! Each cycle injects a pulse, then watches the trace return to baseline. A
//! response longer than [`MIN_RESPONSE_MS`] that peaked more than
//! [`MIN_PEAK_RISE_MV`] above baseline settles the search. Otherwise the
//! magnitude grows by [`MAGNITUDE_STEP_NA`] once the cell has rested for
//! [`REST_BEFORE_RETRY_MS`]. There is no retry limit.

/// First magnitude tried.
pub const START_MAGNITUDE_NA: f64 = 2.0;
/// Increment applied after every failed cycle.
pub const MAGNITUDE_STEP_NA: f64 = 0.1;
/// Margin applied to the discovered threshold.
pub const SAFETY_FACTOR: f64 = 1.5;
/// Shortest response, measured from the end of the pulse, that counts as an AP.
pub const MIN_RESPONSE_MS: f64 = 50.0;
/// Rise above baseline an AP must exceed.
pub const MIN_PEAK_RISE_MV: f64 = 10.0;
/// The trace is back at rest while `voltage - baseline` stays below this.
pub const BASELINE_TOLERANCE_MV: f64 = 2.0;
/// Rest required before the next, stronger pulse.
pub const REST_BEFORE_RETRY_MS: f64 = 200.0;

/// What the search wants from the actuator this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum SearchStep {
    /// Inject the current magnitude, in nA.
    Stimulate(f64),
    Quiet,
    /// Settled; carries the operating magnitude (threshold times the safety factor).
    Found(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ThresholdSearch {
    magnitude_na: f64,
    baseline_mv: f64,
    peak_mv: f64,
    cycle_start_ms: f64,
    back_to_baseline: bool,
    response_ms: f64,
    returned_at_ms: f64,
    cycles: u32,
}

impl ThresholdSearch {
    pub(crate) const fn new() -> Self {
        Self {
            magnitude_na: START_MAGNITUDE_NA,
            baseline_mv: 0.0,
            peak_mv: 0.0,
            cycle_start_ms: 0.0,
            back_to_baseline: false,
            response_ms: 0.0,
            returned_at_ms: 0.0,
            cycles: 0,
        }
    }

    /// Restarts the search from [`START_MAGNITUDE_NA`] with a fresh baseline.
    pub(crate) fn begin(&mut self, baseline_mv: f64) {
        *self = Self::new();
        self.baseline_mv = baseline_mv;
        self.peak_mv = baseline_mv;
    }

    /// Follows a run-clock reset: the current cycle restarts at t=0 with the
    /// magnitude reached so far.
    pub(crate) fn rewind(&mut self) {
        self.cycle_start_ms = 0.0;
        self.returned_at_ms = 0.0;
        self.back_to_baseline = false;
    }

    pub(crate) fn step(&mut self, now_ms: f64, voltage_mv: f64, pulse_ms: f64) -> SearchStep {
        let since_cycle = now_ms - self.cycle_start_ms;
        if since_cycle <= pulse_ms {
            self.back_to_baseline = false;
            self.peak_mv = self.baseline_mv;
            return SearchStep::Stimulate(self.magnitude_na);
        }

        if voltage_mv > self.peak_mv {
            self.peak_mv = voltage_mv;
        }

        if voltage_mv - self.baseline_mv < BASELINE_TOLERANCE_MV {
            if !self.back_to_baseline {
                self.back_to_baseline = true;
                self.response_ms = since_cycle - pulse_ms;
                self.returned_at_ms = now_ms;
            }

            if self.response_ms > MIN_RESPONSE_MS
                && self.peak_mv - self.baseline_mv > MIN_PEAK_RISE_MV
            {
                return SearchStep::Found(self.magnitude_na * SAFETY_FACTOR);
            }

            if now_ms - self.returned_at_ms > REST_BEFORE_RETRY_MS {
                self.magnitude_na += MAGNITUDE_STEP_NA;
                self.cycle_start_ms = now_ms;
                self.cycles = self.cycles.saturating_add(1);
            }
        }

        SearchStep::Quiet
    }

    pub(crate) const fn magnitude_na(&self) -> f64 {
        self.magnitude_na
    }

    /// Failed cycles so far.
    pub(crate) const fn cycles(&self) -> u32 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD_MS: f64 = 1.0;
    const PULSE_MS: f64 = 1.0;

    /// Cell that fires a 120 ms, +40 mV response whenever a pulse of at
    /// least `threshold_na` was delivered.
    struct ToyCell {
        threshold_na: f64,
        fired_at: Option<f64>,
    }

    impl ToyCell {
        fn voltage(&mut self, now_ms: f64, last: SearchStep) -> f64 {
            if let SearchStep::Stimulate(magnitude) = last {
                if magnitude >= self.threshold_na && self.fired_at.is_none() {
                    self.fired_at = Some(now_ms);
                }
            }
            match self.fired_at {
                Some(at) if now_ms - at < 120.0 => -40.0,
                _ => -80.0,
            }
        }
    }

    #[test]
    fn settles_on_first_magnitude_that_fires() {
        let mut search = ThresholdSearch::new();
        search.begin(-80.0);
        let mut cell = ToyCell {
            threshold_na: 2.25,
            fired_at: None,
        };

        let mut last = SearchStep::Quiet;
        for tick in 0..10_000 {
            let now = f64::from(tick) * PERIOD_MS;
            let voltage = cell.voltage(now, last);
            last = search.step(now, voltage, PULSE_MS);
            if let SearchStep::Found(operating) = last {
                // 2.0 and 2.1 and 2.2 fail; 2.3 fires.
                assert_eq!(search.cycles(), 3);
                assert!((operating - 2.3 * SAFETY_FACTOR).abs() < 1e-9);
                return;
            }
        }
        panic!("search never settled");
    }

    #[test]
    fn unresponsive_cell_keeps_the_search_running() {
        let mut search = ThresholdSearch::new();
        search.begin(-80.0);
        assert!((search.magnitude_na() - START_MAGNITUDE_NA).abs() < 1e-12);

        for tick in 0..5_000 {
            let now = f64::from(tick) * PERIOD_MS;
            match search.step(now, -80.0, PULSE_MS) {
                SearchStep::Found(magnitude) => panic!("unexpected settle at {magnitude}"),
                SearchStep::Stimulate(_) | SearchStep::Quiet => {}
            }
        }

        assert!(search.cycles() > 10);
        let expected = START_MAGNITUDE_NA + f64::from(search.cycles()) * MAGNITUDE_STEP_NA;
        assert!((search.magnitude_na() - expected).abs() < 1e-9);
    }

    #[test]
    fn rewind_restarts_the_cycle_at_zero() {
        let mut search = ThresholdSearch::new();
        search.begin(-80.0);
        for tick in 0..1_000 {
            let _ = search.step(f64::from(tick), -80.0, PULSE_MS);
        }
        let magnitude = search.magnitude_na();

        search.rewind();
        assert_eq!(search.step(0.0, -80.0, PULSE_MS), SearchStep::Stimulate(magnitude));
        assert_eq!(search.step(1.0, -80.0, PULSE_MS), SearchStep::Stimulate(magnitude));
        for tick in 2..100 {
            assert_eq!(search.step(f64::from(tick), -80.0, PULSE_MS), SearchStep::Quiet);
        }
    }

    #[test]
    fn short_response_is_not_an_action_potential() {
        let mut search = ThresholdSearch::new();
        search.begin(-80.0);

        // Pulse, then a 20 ms excursion that never qualifies.
        for tick in 0..2 {
            let _ = search.step(f64::from(tick), -80.0, PULSE_MS);
        }
        for tick in 2..22 {
            assert_eq!(search.step(f64::from(tick), 0.0, PULSE_MS), SearchStep::Quiet);
        }
        assert_eq!(search.step(22.0, -80.0, PULSE_MS), SearchStep::Quiet);
        assert_eq!(search.cycles(), 0);
    }
}
