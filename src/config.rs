//! Configuration management for Hesperus
//!
//! This module handles loading, validation, and management of the controller
//! configuration from YAML files. Every section has defaults so a partial file
//! only needs to name what differs from the stock installation.

use crate::error::{HesperusError, Result};
use crate::estimator::ChannelRole;
use crate::modes::Mode;
use crate::tariff::{TariffWindow, WindowComparison, parse_time_of_day};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable that points at an explicit configuration file
pub const CONFIG_ENV: &str = "HESPERUS_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Modbus TCP connection to the charger
    pub charger: ChargerConfig,

    /// Current sensor line source
    pub sensor: SensorConfig,

    /// Tariff window and price tiers
    pub tariff: TariffConfig,

    /// Battery state of charge thresholds
    pub battery: BatteryConfig,

    /// Control loop tuning
    pub controls: ControlsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// User settings store
    pub persistence: PersistenceConfig,

    /// CSV data log
    pub datalog: DatalogConfig,

    /// HTTP command/status API
    pub web: WebConfig,

    /// Caller registration
    pub auth: AuthConfig,

    /// Timezone used for the tariff clock and the seasonal day
    pub timezone: String,
}

/// Modbus TCP connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// IP address of the charger
    pub ip: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Modbus unit identifier
    pub slave_id: u8,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Per-register operation timeout in milliseconds
    pub operation_timeout_ms: u64,

    /// Drive an in-memory register bank instead of the network charger
    pub dry_run: bool,
}

/// One measured channel on the current sensor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    /// Display name, also used in the data log header
    pub name: String,

    /// Polarity role of the channel
    pub role: ChannelRole,
}

/// Current sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Device or file the sensor lines are read from
    pub device: String,

    /// Channels in field order (field 0 of each line is skipped)
    pub channels: Vec<ChannelConfig>,

    /// Raw reading divisor yielding amps
    pub divisor: f64,

    /// Decimal places kept after conversion
    pub precision: u32,
}

/// Tariff configuration, prices in pence per kWh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TariffConfig {
    /// Start of the discounted window, "HH:MM"
    pub night_start: String,

    /// End of the discounted window, "HH:MM"
    pub night_end: String,

    /// Price outside the window
    pub day_rate: f64,

    /// Price inside the window
    pub night_rate: f64,

    /// Tier just below the night rate
    pub low_night: f64,

    /// Tier just above the night rate
    pub high_night: f64,

    /// Tier well below the day rate
    pub low_day: f64,

    /// Tier above the day rate; used to disable discharging
    pub high_day: f64,

    /// Export-friendly discharge value used by AUTO outside winter days
    pub discharge_rate: f64,

    /// How "now" is compared against the window endpoints
    pub window: WindowComparison,
}

/// Battery state of charge thresholds (percent)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// SoC at or below which discharging stops; touching it marks a winter day
    pub min_charge: f64,

    /// Paid-charging ceiling on summer days
    pub summer_max_charge: f64,

    /// Paid-charging ceiling on winter days
    pub winter_max_charge: f64,
}

/// Control loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Opposing recommendations tolerated before the output flips
    pub hysteresis_max_count: u32,

    /// Minimum seconds between state of charge register reads
    pub soc_refresh_secs: u64,

    /// Smallest current magnitude the charger sustains reliably
    pub min_current: i32,

    /// Setpoint meaning "charge at the full available rate"
    pub max_charge_current: i32,

    /// Mode entered at startup
    pub startup_mode: Mode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// User settings persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON file holding user settings and registered callers
    pub settings_file: String,
}

/// CSV data log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatalogConfig {
    /// Whether rows are written at all
    pub enabled: bool,

    /// Folder receiving the daily files
    pub folder: String,

    /// Minimum seconds between rows
    pub interval_secs: u64,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Whether the API is served
    pub enabled: bool,

    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

/// Caller registration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Password accepted by `/start`; empty disables registration
    pub password: String,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.74".to_string(),
            port: 502,
            slave_id: 1,
            connect_timeout_ms: 5000,
            operation_timeout_ms: 2000,
            dry_run: false,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        let channel = |name: &str, role: ChannelRole| ChannelConfig {
            name: name.to_string(),
            role,
        };
        Self {
            device: "/dev/ttyAMA0".to_string(),
            channels: vec![
                channel("Solar", ChannelRole::Source),
                channel("House", ChannelRole::Drain),
                channel("Car", ChannelRole::Unknown),
                channel("Heat Pump", ChannelRole::Drain),
                channel("Grid", ChannelRole::Unknown),
            ],
            divisor: 240.0,
            precision: 4,
        }
    }
}

impl Default for TariffConfig {
    fn default() -> Self {
        Self {
            night_start: "00:30".to_string(),
            night_end: "04:30".to_string(),
            day_rate: 30.7,
            night_rate: 7.5,
            low_night: 7.0,
            high_night: 8.0,
            low_day: 15.0,
            high_day: 35.0,
            discharge_rate: 9.0,
            window: WindowComparison::Literal,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            min_charge: 20.0,
            summer_max_charge: 80.0,
            winter_max_charge: 100.0,
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            hysteresis_max_count: 4,
            soc_refresh_secs: 120,
            min_current: 3,
            max_charge_current: 32,
            startup_mode: Mode::Off,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/hesperus.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            settings_file: "/data/hesperus_settings.json".to_string(),
        }
    }
}

impl Default for DatalogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            folder: "/data/hesperus".to_string(),
            interval_secs: 15,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8089,
        }
    }
}

impl TariffConfig {
    /// Build the tariff window from the configured endpoints
    pub fn window(&self) -> Result<TariffWindow> {
        Ok(TariffWindow {
            night_start: parse_time_of_day(&self.night_start)?,
            night_end: parse_time_of_day(&self.night_end)?,
            day_rate: self.day_rate,
            night_rate: self.night_rate,
            comparison: self.window,
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `HESPERUS_CONFIG` or the default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(path);
        }

        let default_paths = [
            "hesperus.yaml",
            "/data/hesperus.yaml",
            "/etc/hesperus/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Resolve the configured timezone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            HesperusError::validation("timezone".to_string(), format!("Unknown timezone {}", self.timezone))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.charger.ip.is_empty() {
            return Err(HesperusError::validation(
                "charger.ip",
                "IP address cannot be empty",
            ));
        }

        if self.charger.port == 0 {
            return Err(HesperusError::validation(
                "charger.port",
                "Port must be greater than 0",
            ));
        }

        if self.sensor.channels.is_empty() {
            return Err(HesperusError::validation(
                "sensor.channels",
                "At least one channel is required",
            ));
        }

        if self.sensor.divisor <= 0.0 {
            return Err(HesperusError::validation(
                "sensor.divisor",
                "Must be positive",
            ));
        }

        if self.tariff.day_rate <= 0.0 || self.tariff.night_rate <= 0.0 {
            return Err(HesperusError::validation(
                "tariff",
                "Day and night rates must be positive",
            ));
        }

        self.tariff.window()?;

        if self.controls.hysteresis_max_count == 0 {
            return Err(HesperusError::validation(
                "controls.hysteresis_max_count",
                "Must be greater than 0",
            ));
        }

        if self.controls.min_current <= 0 {
            return Err(HesperusError::validation(
                "controls.min_current",
                "Must be positive",
            ));
        }

        self.tz()?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            charger: ChargerConfig::default(),
            sensor: SensorConfig::default(),
            tariff: TariffConfig::default(),
            battery: BatteryConfig::default(),
            controls: ControlsConfig::default(),
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
            datalog: DatalogConfig::default(),
            web: WebConfig::default(),
            auth: AuthConfig::default(),
            timezone: "Europe/London".to_string(),
        }
    }
}
