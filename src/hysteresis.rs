//! Hysteresis damper for charger setpoints
//!
//! Holds the last accepted setpoint and only lets a change of direction
//! (charge, idle, discharge) through once it has been recommended more than
//! `max_count` times. Changes within the same direction pass immediately.

/// Default number of tolerated opposing recommendations
pub const DEFAULT_MAX_COUNT: u32 = 4;

#[derive(Debug, Clone)]
pub struct HysteresisDamper {
    max_count: u32,
    last: Option<i32>,
    zeros: u32,
    positive: u32,
    negative: u32,
}

impl HysteresisDamper {
    pub fn new(max_count: u32) -> Self {
        Self {
            max_count,
            last: None,
            zeros: 0,
            positive: 0,
            negative: 0,
        }
    }

    /// Last accepted value, `None` before the first recommendation
    pub fn last(&self) -> Option<i32> {
        self.last
    }

    fn reset(&mut self) {
        self.zeros = 0;
        self.positive = 0;
        self.negative = 0;
    }

    /// Feed a recommendation and return the value that should be applied
    pub fn stabilize(&mut self, recommended: i32) -> i32 {
        let Some(last) = self.last else {
            self.last = Some(recommended);
            return recommended;
        };

        let same_direction =
            (last == 0 && recommended == 0) || last.signum() * recommended.signum() > 0;

        if !same_direction {
            if last == 0 {
                if recommended > 0 {
                    self.positive += 1;
                    self.negative = 0;
                } else {
                    self.negative += 1;
                    self.positive = 0;
                }
            } else if recommended == 0 {
                self.zeros += 1;
            } else if last > 0 {
                self.negative += 1;
            } else {
                self.positive += 1;
            }
        }

        let exceeded = self.zeros > self.max_count
            || self.positive > self.max_count
            || self.negative > self.max_count;

        if same_direction || exceeded {
            self.reset();
            self.last = Some(recommended);
            recommended
        } else {
            last
        }
    }
}

impl Default for HysteresisDamper {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_is_adopted() {
        let mut damper = HysteresisDamper::default();
        assert_eq!(damper.last(), None);
        assert_eq!(damper.stabilize(-7), -7);
    }

    #[test]
    fn same_direction_passes_through() {
        let mut damper = HysteresisDamper::default();
        damper.stabilize(6);
        assert_eq!(damper.stabilize(9), 9);
        assert_eq!(damper.stabilize(3), 3);
    }

    #[test]
    fn opposite_run_must_exceed_max_count() {
        let mut damper = HysteresisDamper::new(4);
        damper.stabilize(5);
        for _ in 0..4 {
            assert_eq!(damper.stabilize(-5), 5);
        }
        assert_eq!(damper.stabilize(-5), -5);
    }

    #[test]
    fn zero_run_switches_off_after_threshold() {
        let mut damper = HysteresisDamper::new(2);
        damper.stabilize(-4);
        assert_eq!(damper.stabilize(0), -4);
        assert_eq!(damper.stabilize(0), -4);
        assert_eq!(damper.stabilize(0), 0);
    }

    #[test]
    fn leaving_zero_resets_the_opposite_counter() {
        let mut damper = HysteresisDamper::new(2);
        damper.stabilize(0);
        damper.stabilize(4);
        damper.stabilize(4);
        // A single negative sample restarts the positive run
        damper.stabilize(-4);
        assert_eq!(damper.stabilize(4), 0);
        assert_eq!(damper.stabilize(4), 0);
        assert_eq!(damper.stabilize(4), 4);
    }

    #[test]
    fn counters_survive_interleaved_noise_until_a_change() {
        let mut damper = HysteresisDamper::new(4);
        damper.stabilize(5);
        for _ in 0..3 {
            damper.stabilize(-5);
        }
        damper.stabilize(0);
        damper.stabilize(-5);
        // Fifth negative sample flips the output
        assert_eq!(damper.stabilize(-2), -2);
    }
}
