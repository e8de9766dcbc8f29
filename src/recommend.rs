//! Recommendation engine
//!
//! Turns a net current estimate, the resolved mode state, the battery state of
//! charge and the active price into a charger setpoint. Positive setpoints
//! charge, negative setpoints discharge; the result always opposes the
//! measured imbalance.

use serde::{Deserialize, Serialize};

/// Setpoint the charger treats as "charge at the full available rate"
pub const MAX_CHARGE_SENTINEL: i32 = 32;

/// Minimum charging magnitude used when rounding a surplus
pub const MIN_CHARGE_RATE: i32 = 3;

/// A state of charge threshold paired with the price it substitutes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocBoundary {
    /// Percent
    pub threshold: f64,
    pub value: f64,
}

impl SocBoundary {
    pub const fn new(threshold: f64, value: f64) -> Self {
        Self { threshold, value }
    }
}

/// Mode state with every field evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedState {
    pub charge_cost_limit: f64,
    pub discharge_value: f64,
    pub min_discharge_rate: i32,
    pub max_soc_bounds: Vec<SocBoundary>,
    pub min_soc_bounds: Vec<SocBoundary>,
}

/// Round an estimate to whole amps, snapping small values to `minimum` or zero.
///
/// The fractional part rounds down while it is below `fraction`. The sign of
/// the result is the opposite of the sign of `value`.
pub fn round_estimation(value: f64, fraction: f64, minimum: i32) -> i32 {
    let magnitude = value.abs();
    let min = f64::from(minimum);

    let rounded = if magnitude == 0.0 {
        0
    } else if magnitude > min {
        if magnitude.fract() < fraction {
            magnitude.floor() as i32
        } else {
            magnitude.ceil() as i32
        }
    } else if magnitude >= fraction * min {
        minimum
    } else {
        0
    };

    if value >= 0.0 { -rounded } else { rounded }
}

/// Charge cost limit after the first satisfied upper boundary (`soc >= threshold`)
pub fn effective_charge_cost_limit(state: &ResolvedState, soc: u16) -> f64 {
    if soc == 0 {
        return state.charge_cost_limit;
    }
    let soc = f64::from(soc);
    state
        .max_soc_bounds
        .iter()
        .find(|b| soc >= b.threshold)
        .map_or(state.charge_cost_limit, |b| b.value)
}

/// Discharge value after the first satisfied lower boundary (`soc <= threshold`)
pub fn effective_discharge_value(state: &ResolvedState, soc: u16) -> f64 {
    if soc == 0 {
        return state.discharge_value;
    }
    let soc = f64::from(soc);
    state
        .min_soc_bounds
        .iter()
        .find(|b| soc <= b.threshold)
        .map_or(state.discharge_value, |b| b.value)
}

fn price_ratio(threshold: f64, price: f64) -> f64 {
    if price <= 0.0 {
        1.0
    } else {
        (threshold / price).min(1.0)
    }
}

/// Recommended setpoint in amps; `soc` of 0 means unknown and disables boundaries
pub fn recommend(estimate: f64, state: &ResolvedState, soc: u16, price: f64) -> i32 {
    if estimate <= 0.0 {
        let charge_cost_limit = effective_charge_cost_limit(state, soc);
        if price < charge_cost_limit {
            return MAX_CHARGE_SENTINEL;
        }
        round_estimation(
            estimate,
            price_ratio(charge_cost_limit, price),
            MIN_CHARGE_RATE,
        )
    } else {
        let discharge_value = effective_discharge_value(state, soc);
        if price < discharge_value {
            return 0;
        }
        round_estimation(
            estimate,
            1.0 - price_ratio(discharge_value, price),
            state.min_discharge_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ccl: f64, dv: f64) -> ResolvedState {
        ResolvedState {
            charge_cost_limit: ccl,
            discharge_value: dv,
            min_discharge_rate: 3,
            max_soc_bounds: vec![],
            min_soc_bounds: vec![],
        }
    }

    #[test]
    fn rounding_uses_the_fraction_as_threshold() {
        assert_eq!(round_estimation(5.3, 0.5, 3), -5);
        assert_eq!(round_estimation(5.7, 0.5, 3), -6);
        assert_eq!(round_estimation(-5.3, 0.2, 3), 6);
        assert_eq!(round_estimation(-5.3, 0.4, 3), 5);
    }

    #[test]
    fn small_values_snap_to_minimum_or_zero() {
        assert_eq!(round_estimation(2.0, 0.5, 3), -3);
        assert_eq!(round_estimation(1.4, 0.5, 3), 0);
        assert_eq!(round_estimation(-1.5, 0.5, 3), 3);
        assert_eq!(round_estimation(3.0, 0.9, 3), -3);
        assert_eq!(round_estimation(0.0, 0.0, 3), 0);
    }

    #[test]
    fn magnitude_never_exceeds_ceiling_or_minimum() {
        for tenths in -200..=200 {
            let value = f64::from(tenths) / 10.0;
            for fraction in [0.0, 0.25, 0.5, 0.75, 1.0] {
                let out = round_estimation(value, fraction, 3);
                let bound = (value.abs().ceil() as i32).max(3);
                assert!(out.abs() <= bound, "{value} {fraction} -> {out}");
                if value > 0.0 {
                    assert!(out <= 0);
                } else if value < 0.0 {
                    assert!(out >= 0);
                } else {
                    assert_eq!(out, 0);
                }
            }
        }
    }

    #[test]
    fn cheap_price_with_surplus_charges_flat_out() {
        let s = state(35.0, 35.0);
        assert_eq!(recommend(0.0, &s, 50, 30.7), MAX_CHARGE_SENTINEL);
        assert_eq!(recommend(-4.2, &s, 50, 30.7), MAX_CHARGE_SENTINEL);
    }

    #[test]
    fn deficit_below_discharge_value_does_nothing() {
        let s = state(0.0, 15.0);
        assert_eq!(recommend(5.0, &s, 60, 7.5), 0);
    }

    #[test]
    fn deficit_above_discharge_value_discharges() {
        let s = state(0.0, 15.0);
        // fraction = 1 - 15/30 = 0.5
        assert_eq!(recommend(5.3, &s, 60, 30.0), -5);
        assert_eq!(recommend(5.6, &s, 60, 30.0), -6);
    }

    #[test]
    fn surplus_above_cost_limit_tracks_the_surplus() {
        let s = state(7.5, 35.0);
        // fraction = 7.5/30 = 0.25
        assert_eq!(recommend(-6.2, &s, 60, 30.0), 6);
        assert_eq!(recommend(-6.3, &s, 60, 30.0), 7);
    }

    #[test]
    fn first_satisfied_upper_boundary_wins() {
        let mut s = state(35.0, 15.0);
        s.max_soc_bounds = vec![SocBoundary::new(80.0, 5.0), SocBoundary::new(90.0, 0.0)];
        assert!((effective_charge_cost_limit(&s, 85) - 5.0).abs() < f64::EPSILON);
        assert!((effective_charge_cost_limit(&s, 95) - 5.0).abs() < f64::EPSILON);
        assert!((effective_charge_cost_limit(&s, 70) - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn boundaries_are_matched_in_authoring_order() {
        // Out-of-order lists are honoured as written, no sorting happens
        let mut s = state(35.0, 15.0);
        s.max_soc_bounds = vec![SocBoundary::new(90.0, 0.0), SocBoundary::new(80.0, 5.0)];
        assert!((effective_charge_cost_limit(&s, 95) - 0.0).abs() < f64::EPSILON);
        assert!((effective_charge_cost_limit(&s, 85) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_soc_skips_boundaries() {
        let mut s = state(35.0, 15.0);
        s.max_soc_bounds = vec![SocBoundary::new(80.0, 0.0)];
        s.min_soc_bounds = vec![SocBoundary::new(20.0, 35.0)];
        assert!((effective_charge_cost_limit(&s, 0) - 35.0).abs() < f64::EPSILON);
        assert!((effective_discharge_value(&s, 0) - 15.0).abs() < f64::EPSILON);
        assert!((effective_discharge_value(&s, 10) - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn full_battery_stops_paid_charging() {
        let mut s = state(35.0, 15.0);
        s.max_soc_bounds = vec![SocBoundary::new(80.0, 0.0)];
        assert_eq!(recommend(0.0, &s, 50, 30.7), MAX_CHARGE_SENTINEL);
        // fraction 0/30.7 = 0: any surplus above the minimum rounds up
        assert_eq!(recommend(-4.1, &s, 85, 30.7), 5);
    }

    #[test]
    fn non_positive_price_does_not_divide_by_zero() {
        let s = state(-1.0, 0.0);
        assert_eq!(recommend(4.4, &s, 50, 0.0), -5);
    }
}
