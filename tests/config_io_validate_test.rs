use hesperus::config::Config;
use hesperus::estimator::ChannelRole;
use hesperus::modes::Mode;
use hesperus::tariff::WindowComparison;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.charger.ip = "10.0.0.5".to_string();
    cfg.controls.startup_mode = Mode::Auto;
    cfg.tariff.window = WindowComparison::ClockRange;

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.charger.ip, "10.0.0.5");
    assert_eq!(loaded.controls.startup_mode, Mode::Auto);
    assert_eq!(loaded.tariff.window, WindowComparison::ClockRange);
    assert_eq!(loaded.sensor.channels.len(), cfg.sensor.channels.len());
}

#[test]
fn handwritten_yaml_uses_readable_names() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        r#"
sensor:
  channels:
    - name: Solar
      role: source
    - name: Kitchen
      role: Drain
tariff:
  night_start: "23:30"
  night_end: "05:30"
  window: clock_range
controls:
  startup_mode: CHARGE_DISCHARGE
"#,
    )
    .unwrap();

    let cfg = Config::from_file(tmp.path()).unwrap();
    assert_eq!(cfg.sensor.channels[0].role, ChannelRole::Source);
    assert_eq!(cfg.sensor.channels[1].name, "Kitchen");
    assert_eq!(cfg.controls.startup_mode, Mode::ChargeDischarge);
    // Untouched sections keep their defaults
    assert_eq!(cfg.charger.port, 502);
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();
    cfg.charger.ip.clear();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.charger.port = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.sensor.channels.clear();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.tariff.night_end = "25:00".to_string();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.controls.hysteresis_max_count = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.timezone = "Mars/Olympus_Mons".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), "charger: [unterminated").unwrap();
    assert!(Config::from_file(tmp.path()).is_err());
}
