//! Operating modes and the tariff state each one resolves to
//!
//! A mode maps to a [`State`] whose fields are either constants or derived
//! from live inputs (user settings, configured tiers, the seasonal tracker).
//! Fields are evaluated in declaration order every time the state is read.

use crate::charger::ControlOwnership;
use crate::config::{BatteryConfig, TariffConfig};
use crate::error::{HesperusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::recommend::{MIN_CHARGE_RATE, ResolvedState, SocBoundary};
use crate::settings::UserSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Recommend but leave the charger alone
    #[default]
    Off,
    ChargeOnly,
    ChargeDischarge,
    MaxCharge,
    Auto,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Off,
        Mode::ChargeOnly,
        Mode::ChargeDischarge,
        Mode::MaxCharge,
        Mode::Auto,
    ];

    pub fn code(self) -> u8 {
        match self {
            Mode::Off => 0,
            Mode::ChargeOnly => 1,
            Mode::ChargeDischarge => 2,
            Mode::MaxCharge => 3,
            Mode::Auto => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Off => "OFF",
            Mode::ChargeOnly => "CHARGE_ONLY",
            Mode::ChargeDischarge => "CHARGE_DISCHARGE",
            Mode::MaxCharge => "MAX_CHARGE",
            Mode::Auto => "AUTO",
        }
    }

    /// Initials of the name, as written to the data log
    pub fn shorthand(self) -> &'static str {
        match self {
            Mode::Off => "O",
            Mode::ChargeOnly => "CO",
            Mode::ChargeDischarge => "CD",
            Mode::MaxCharge => "MC",
            Mode::Auto => "A",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = HesperusError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        if let Ok(code) = wanted.parse::<u8>() {
            return Self::from_code(code)
                .ok_or_else(|| HesperusError::validation("mode".to_string(), format!("Unknown mode {}", s)));
        }
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted) || m.shorthand().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| HesperusError::validation("mode".to_string(), format!("Unknown mode {}", s)))
    }
}

/// Remembers the day the battery last fell to its minimum ("winter day")
#[derive(Debug, Clone, Default)]
pub struct SeasonTracker {
    winter_day: Option<u32>,
}

impl SeasonTracker {
    /// Mark `day` as a winter day if the known SoC is at or below `min_charge`
    pub fn observe(&mut self, soc: u16, min_charge: f64, day: u32) {
        if soc != 0 && f64::from(soc) <= min_charge {
            self.winter_day = Some(day);
        }
    }

    pub fn is_winter(&self, day: u32) -> bool {
        self.winter_day == Some(day)
    }

    pub fn winter_day(&self) -> Option<u32> {
        self.winter_day
    }
}

/// Live inputs a derived field may consult
pub struct ResolveContext<'a> {
    pub settings: &'a UserSettings,
    pub tariff: &'a TariffConfig,
    pub battery: &'a BatteryConfig,
    pub season: &'a mut SeasonTracker,
    /// State of charge, 0 when unknown
    pub soc: u16,
    /// Day of month
    pub day: u32,
}

/// A state field that is either fixed or computed on each read
#[derive(Clone)]
pub enum Field<T> {
    Constant(T),
    Derived(fn(&mut ResolveContext<'_>) -> T),
}

impl<T: Clone> Field<T> {
    pub fn resolve(&self, ctx: &mut ResolveContext<'_>) -> T {
        match self {
            Field::Constant(value) => value.clone(),
            Field::Derived(f) => f(ctx),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Constant(value) => write!(f, "Constant({:?})", value),
            Field::Derived(_) => f.write_str("Derived"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct State {
    pub charge_cost_limit: Field<f64>,
    pub discharge_value: Field<f64>,
    pub min_discharge_rate: Field<i32>,
    pub max_soc_bounds: Field<Vec<SocBoundary>>,
    pub min_soc_bounds: Field<Vec<SocBoundary>>,
}

impl State {
    pub fn resolve(&self, ctx: &mut ResolveContext<'_>) -> ResolvedState {
        // Order matters: AUTO's discharge value updates the season read by its bounds
        let charge_cost_limit = self.charge_cost_limit.resolve(ctx);
        let discharge_value = self.discharge_value.resolve(ctx);
        let min_discharge_rate = self.min_discharge_rate.resolve(ctx);
        let max_soc_bounds = self.max_soc_bounds.resolve(ctx);
        let min_soc_bounds = self.min_soc_bounds.resolve(ctx);
        ResolvedState {
            charge_cost_limit,
            discharge_value,
            min_discharge_rate,
            max_soc_bounds,
            min_soc_bounds,
        }
    }
}

fn user_charge_cost_limit(ctx: &mut ResolveContext<'_>) -> f64 {
    ctx.settings.charge_cost_limit
}

fn user_discharge_value(ctx: &mut ResolveContext<'_>) -> f64 {
    ctx.settings.discharge_value
}

fn user_min_discharge_rate(ctx: &mut ResolveContext<'_>) -> i32 {
    ctx.settings.min_discharge_rate
}

fn user_max_soc_bounds(ctx: &mut ResolveContext<'_>) -> Vec<SocBoundary> {
    ctx.settings.max_soc_bounds()
}

fn user_min_soc_bounds(ctx: &mut ResolveContext<'_>) -> Vec<SocBoundary> {
    ctx.settings.min_soc_bounds(ctx.tariff.high_day)
}

fn high_day(ctx: &mut ResolveContext<'_>) -> f64 {
    ctx.tariff.high_day
}

fn auto_charge_cost_limit(ctx: &mut ResolveContext<'_>) -> f64 {
    ctx.tariff.high_night
}

fn auto_discharge_value(ctx: &mut ResolveContext<'_>) -> f64 {
    ctx.season.observe(ctx.soc, ctx.battery.min_charge, ctx.day);
    if ctx.season.is_winter(ctx.day) {
        ctx.tariff.low_day
    } else {
        ctx.tariff.discharge_rate
    }
}

fn auto_max_soc_bounds(ctx: &mut ResolveContext<'_>) -> Vec<SocBoundary> {
    let ceiling = if ctx.season.is_winter(ctx.day) {
        ctx.battery.winter_max_charge
    } else {
        ctx.battery.summer_max_charge
    };
    vec![SocBoundary::new(ceiling, ctx.tariff.low_night)]
}

fn auto_min_soc_bounds(ctx: &mut ResolveContext<'_>) -> Vec<SocBoundary> {
    vec![SocBoundary::new(ctx.battery.min_charge, ctx.tariff.high_day)]
}

/// State table keyed by mode
pub fn state_for(mode: Mode) -> State {
    use Field::*;
    match mode {
        // OFF still recommends, as CHARGE_DISCHARGE would
        Mode::Off | Mode::ChargeDischarge => State {
            charge_cost_limit: Derived(user_charge_cost_limit),
            discharge_value: Derived(user_discharge_value),
            min_discharge_rate: Derived(user_min_discharge_rate),
            max_soc_bounds: Derived(user_max_soc_bounds),
            min_soc_bounds: Derived(user_min_soc_bounds),
        },
        Mode::ChargeOnly => State {
            charge_cost_limit: Derived(user_charge_cost_limit),
            discharge_value: Derived(high_day),
            min_discharge_rate: Constant(MIN_CHARGE_RATE),
            max_soc_bounds: Derived(user_max_soc_bounds),
            min_soc_bounds: Constant(Vec::new()),
        },
        Mode::MaxCharge => State {
            charge_cost_limit: Derived(user_charge_cost_limit),
            discharge_value: Derived(high_day),
            min_discharge_rate: Constant(MIN_CHARGE_RATE),
            max_soc_bounds: Constant(Vec::new()),
            min_soc_bounds: Constant(Vec::new()),
        },
        Mode::Auto => State {
            charge_cost_limit: Derived(auto_charge_cost_limit),
            discharge_value: Derived(auto_discharge_value),
            min_discharge_rate: Constant(MIN_CHARGE_RATE),
            max_soc_bounds: Derived(auto_max_soc_bounds),
            min_soc_bounds: Derived(auto_min_soc_bounds),
        },
    }
}

/// The active mode plus the state AUTO carries between cycles
pub struct Modes {
    mode: Mode,
    season: SeasonTracker,
    logger: StructuredLogger,
}

impl Modes {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            season: SeasonTracker::default(),
            logger: get_logger("modes"),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn season(&self) -> &SeasonTracker {
        &self.season
    }

    /// Switch mode; entering OFF releases the charger, leaving OFF takes it
    pub async fn set_mode<C>(&mut self, new_mode: Mode, charger: &mut C) -> Result<()>
    where
        C: ControlOwnership + ?Sized,
    {
        if new_mode == Mode::Off {
            charger.relinquish_control().await?;
        } else if self.mode == Mode::Off {
            charger.take_control().await?;
        }
        if new_mode != self.mode {
            self.logger
                .info(&format!("Mode changed from {} to {}", self.mode, new_mode));
        }
        self.mode = new_mode;
        Ok(())
    }

    /// Evaluate the active mode's state against live inputs
    pub fn resolve(
        &mut self,
        settings: &UserSettings,
        tariff: &TariffConfig,
        battery: &BatteryConfig,
        soc: u16,
        day: u32,
    ) -> ResolvedState {
        let mut ctx = ResolveContext {
            settings,
            tariff,
            battery,
            season: &mut self.season,
            soc,
            day,
        };
        state_for(self.mode).resolve(&mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ownership {
        calls: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl ControlOwnership for Ownership {
        async fn take_control(&mut self) -> Result<()> {
            self.calls.push("take");
            Ok(())
        }

        async fn relinquish_control(&mut self) -> Result<()> {
            self.calls.push("relinquish");
            Ok(())
        }
    }

    fn resolve(modes: &mut Modes, settings: &UserSettings, soc: u16, day: u32) -> ResolvedState {
        modes.resolve(
            settings,
            &TariffConfig::default(),
            &BatteryConfig::default(),
            soc,
            day,
        )
    }

    fn settings() -> UserSettings {
        UserSettings::defaults(&TariffConfig::default(), &BatteryConfig::default())
    }

    #[test]
    fn mode_names_and_codes() {
        assert_eq!("auto".parse::<Mode>().unwrap(), Mode::Auto);
        assert_eq!("CD".parse::<Mode>().unwrap(), Mode::ChargeDischarge);
        assert_eq!("3".parse::<Mode>().unwrap(), Mode::MaxCharge);
        assert!("7".parse::<Mode>().is_err());
        assert!("sideways".parse::<Mode>().is_err());
        assert_eq!(Mode::MaxCharge.to_string(), "MAX_CHARGE");
        for mode in Mode::ALL {
            assert_eq!(Mode::from_code(mode.code()), Some(mode));
        }
    }

    #[tokio::test]
    async fn ownership_follows_off_transitions() {
        let mut modes = Modes::new(Mode::Off);
        let mut charger = Ownership::default();

        modes.set_mode(Mode::Auto, &mut charger).await.unwrap();
        modes.set_mode(Mode::ChargeOnly, &mut charger).await.unwrap();
        modes.set_mode(Mode::Off, &mut charger).await.unwrap();
        assert_eq!(charger.calls, vec!["take", "relinquish"]);
        assert_eq!(modes.mode(), Mode::Off);
    }

    #[test]
    fn user_driven_modes_read_live_settings() {
        let mut modes = Modes::new(Mode::ChargeDischarge);
        let mut s = settings();
        s.charge_cost_limit = 12.0;
        s.min_discharge_rate = 6;
        let state = resolve(&mut modes, &s, 50, 1);
        assert!((state.charge_cost_limit - 12.0).abs() < f64::EPSILON);
        assert_eq!(state.min_discharge_rate, 6);
        assert_eq!(state.max_soc_bounds, vec![SocBoundary::new(80.0, 0.0)]);
        assert_eq!(state.min_soc_bounds, vec![SocBoundary::new(20.0, 35.0)]);

        s.charge_cost_limit = 4.0;
        let state = resolve(&mut modes, &s, 50, 1);
        assert!((state.charge_cost_limit - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn charge_only_blocks_discharge() {
        let mut modes = Modes::new(Mode::ChargeOnly);
        let state = resolve(&mut modes, &settings(), 50, 1);
        assert!((state.discharge_value - 35.0).abs() < f64::EPSILON);
        assert_eq!(state.min_discharge_rate, 3);
        assert!(state.min_soc_bounds.is_empty());
        assert_eq!(state.max_soc_bounds.len(), 1);
    }

    #[test]
    fn max_charge_has_no_boundaries() {
        let mut modes = Modes::new(Mode::MaxCharge);
        let state = resolve(&mut modes, &settings(), 95, 1);
        assert!(state.max_soc_bounds.is_empty());
        assert!(state.min_soc_bounds.is_empty());
    }

    #[test]
    fn auto_switches_to_winter_when_battery_runs_low() {
        let mut modes = Modes::new(Mode::Auto);
        let s = settings();

        let summer = resolve(&mut modes, &s, 60, 10);
        assert!((summer.charge_cost_limit - 8.0).abs() < f64::EPSILON);
        assert!((summer.discharge_value - 9.0).abs() < f64::EPSILON);
        assert_eq!(summer.max_soc_bounds, vec![SocBoundary::new(80.0, 7.0)]);
        assert_eq!(summer.min_soc_bounds, vec![SocBoundary::new(20.0, 35.0)]);

        let winter = resolve(&mut modes, &s, 20, 10);
        assert!((winter.discharge_value - 15.0).abs() < f64::EPSILON);
        assert_eq!(winter.max_soc_bounds, vec![SocBoundary::new(100.0, 7.0)]);

        // Stays winter for the rest of the day even once the battery recovers
        let later = resolve(&mut modes, &s, 70, 10);
        assert!((later.discharge_value - 15.0).abs() < f64::EPSILON);

        let next_day = resolve(&mut modes, &s, 70, 11);
        assert!((next_day.discharge_value - 9.0).abs() < f64::EPSILON);
        assert_eq!(modes.season().winter_day(), Some(10));
    }

    #[test]
    fn unknown_soc_never_marks_winter() {
        let mut tracker = SeasonTracker::default();
        tracker.observe(0, 20.0, 3);
        assert!(!tracker.is_winter(3));
    }
}
