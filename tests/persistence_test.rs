use hesperus::config::{BatteryConfig, TariffConfig};
use hesperus::modes::Mode;
use hesperus::persistence::SettingsStore;
use hesperus::settings::{UNSET, UserSettings};

fn defaults() -> UserSettings {
    UserSettings::defaults(&TariffConfig::default(), &BatteryConfig::default())
}

#[test]
fn settings_file_is_plain_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let mut store = SettingsStore::load(&path).unwrap();
    let mut settings = defaults();
    settings.max_paid_soc = UNSET;
    settings.manual_mode = Mode::ChargeDischarge;
    settings.persist(&mut store).unwrap();
    store.add_caller("12345").unwrap();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["general"]["max_paid_soc"], -1);
    assert_eq!(doc["general"]["manual_mode"], "CHARGE_DISCHARGE");
    assert_eq!(doc["callers"][0], "12345");
}

#[test]
fn partial_file_keeps_remaining_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"general": {"discharge_value": 22.5}, "callers": []}"#,
    )
    .unwrap();

    let store = SettingsStore::load(&path).unwrap();
    let settings = UserSettings::load(&store, defaults());
    assert!((settings.discharge_value - 22.5).abs() < f64::EPSILON);
    assert_eq!(settings.min_discharge_soc, 20);
    assert_eq!(settings.manual_mode, Mode::ChargeOnly);
}

#[test]
fn store_without_callers_field_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"general": {}}"#).unwrap();
    let store = SettingsStore::load(&path).unwrap();
    assert_eq!(store.callers().count(), 0);
}
