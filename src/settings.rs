//! User settings driving the manual modes
//!
//! Prices are pence per kWh, state of charge thresholds are percent. `-1`
//! on either SoC threshold means "no boundary".

use crate::config::{BatteryConfig, TariffConfig};
use crate::error::Result;
use crate::logging::get_logger;
use crate::modes::Mode;
use crate::persistence::SettingsStore;
use crate::recommend::{MIN_CHARGE_RATE, SocBoundary};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Threshold value meaning "unset"
pub const UNSET: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Charge from the grid at full rate while the price is below this
    pub charge_cost_limit: f64,

    /// Discharge only while the price is at or above this
    pub discharge_value: f64,

    /// Discharge value the user prefers on low-SoC days
    pub low_discharge_value: f64,

    /// Smallest discharge current worth applying
    pub min_discharge_rate: i32,

    /// Stop paid charging at or above this SoC
    pub max_paid_soc: i32,

    /// Stop discharging at or below this SoC
    pub min_discharge_soc: i32,

    /// Mode `/manual` switches to
    pub manual_mode: Mode,
}

impl UserSettings {
    /// Settings used before the user changes anything
    pub fn defaults(tariff: &TariffConfig, battery: &BatteryConfig) -> Self {
        Self {
            charge_cost_limit: 0.0,
            discharge_value: tariff.low_day,
            low_discharge_value: tariff.low_day,
            min_discharge_rate: MIN_CHARGE_RATE,
            max_paid_soc: battery.summer_max_charge.round() as i32,
            min_discharge_soc: battery.min_charge.round() as i32,
            manual_mode: Mode::ChargeOnly,
        }
    }

    /// Overlay whatever the store holds on top of `defaults`, one key at a
    /// time. A missing or mistyped key keeps its default and leaves the other
    /// stored values in effect.
    pub fn load(store: &SettingsStore, defaults: Self) -> Self {
        Self {
            charge_cost_limit: stored_or(store, "charge_cost_limit", defaults.charge_cost_limit),
            discharge_value: stored_or(store, "discharge_value", defaults.discharge_value),
            low_discharge_value: stored_or(
                store,
                "low_discharge_value",
                defaults.low_discharge_value,
            ),
            min_discharge_rate: stored_or(store, "min_discharge_rate", defaults.min_discharge_rate),
            max_paid_soc: stored_or(store, "max_paid_soc", defaults.max_paid_soc),
            min_discharge_soc: stored_or(store, "min_discharge_soc", defaults.min_discharge_soc),
            manual_mode: stored_or(store, "manual_mode", defaults.manual_mode),
        }
    }

    /// Write every field to the store
    pub fn persist(&self, store: &mut SettingsStore) -> Result<()> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => store.merge_general(map),
            _ => Ok(()),
        }
    }

    /// Boundaries overriding the charge cost limit
    pub fn max_soc_bounds(&self) -> Vec<SocBoundary> {
        if self.max_paid_soc == UNSET {
            Vec::new()
        } else {
            vec![SocBoundary::new(f64::from(self.max_paid_soc), 0.0)]
        }
    }

    /// Boundaries overriding the discharge value; `block_price` disables discharge
    pub fn min_soc_bounds(&self, block_price: f64) -> Vec<SocBoundary> {
        if self.min_discharge_soc == UNSET {
            Vec::new()
        } else {
            vec![SocBoundary::new(
                f64::from(self.min_discharge_soc),
                block_price,
            )]
        }
    }
}

fn stored_or<T: DeserializeOwned>(store: &SettingsStore, name: &str, default: T) -> T {
    match store.get_general(name) {
        Some(value) => value,
        None => {
            if store.general().contains_key(name) {
                get_logger("settings").warn(&format!("Stored setting {} ignored", name));
            }
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> UserSettings {
        UserSettings::defaults(&TariffConfig::default(), &BatteryConfig::default())
    }

    #[test]
    fn defaults_follow_configuration() {
        let s = defaults();
        assert_eq!(s.charge_cost_limit, 0.0);
        assert!((s.discharge_value - 15.0).abs() < f64::EPSILON);
        assert_eq!(s.min_discharge_rate, 3);
        assert_eq!(s.max_paid_soc, 80);
        assert_eq!(s.min_discharge_soc, 20);
        assert_eq!(s.manual_mode, Mode::ChargeOnly);
    }

    #[test]
    fn unset_thresholds_drop_boundaries() {
        let mut s = defaults();
        assert_eq!(s.max_soc_bounds(), vec![SocBoundary::new(80.0, 0.0)]);
        assert_eq!(s.min_soc_bounds(35.0), vec![SocBoundary::new(20.0, 35.0)]);
        s.max_paid_soc = UNSET;
        s.min_discharge_soc = UNSET;
        assert!(s.max_soc_bounds().is_empty());
        assert!(s.min_soc_bounds(35.0).is_empty());
    }

    #[test]
    fn load_overlays_stored_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::load(dir.path().join("s.json")).unwrap();
        store.set_general("charge_cost_limit", 9.5).unwrap();
        store.set_general("manual_mode", "CHARGE_DISCHARGE").unwrap();
        store.set_general("unrelated", true).unwrap();

        let s = UserSettings::load(&store, defaults());
        assert!((s.charge_cost_limit - 9.5).abs() < f64::EPSILON);
        assert_eq!(s.manual_mode, Mode::ChargeDischarge);
        assert_eq!(s.max_paid_soc, 80);
    }

    #[test]
    fn persist_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut store = SettingsStore::load(&path).unwrap();
        let mut s = defaults();
        s.min_discharge_soc = UNSET;
        s.persist(&mut store).unwrap();

        let reopened = SettingsStore::load(&path).unwrap();
        assert_eq!(UserSettings::load(&reopened, defaults()), s);
    }

    #[test]
    fn mistyped_value_keeps_the_other_stored_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut store = SettingsStore::load(&path).unwrap();
        store.set_general("charge_cost_limit", 9.5).unwrap();
        store.set_general("max_paid_soc", 90).unwrap();
        store.set_general("discharge_value", serde_json::Value::Null).unwrap();
        store.set_general("min_discharge_rate", "lots").unwrap();

        let s = UserSettings::load(&store, defaults());
        assert!((s.charge_cost_limit - 9.5).abs() < f64::EPSILON);
        assert_eq!(s.max_paid_soc, 90);
        assert!((s.discharge_value - 15.0).abs() < f64::EPSILON);
        assert_eq!(s.min_discharge_rate, 3);

        // Saving again must not clobber what the user set
        s.persist(&mut store).unwrap();
        let reopened = SettingsStore::load(&path).unwrap();
        assert_eq!(reopened.get_general::<f64>("charge_cost_limit"), Some(9.5));
        assert_eq!(reopened.get_general::<i32>("max_paid_soc"), Some(90));
    }
}
