//! # Hesperus - tariff-aware controller for bidirectional EV chargers
//!
//! Reads household current flows from a multi-channel sensor, recommends a
//! charge or discharge setpoint from the current tariff price, the battery's
//! state of charge and the active operating mode, damps direction changes
//! and drives the charger over Modbus TCP.
//!
//! ## Architecture
//!
//! - `estimator`: net household flow from per-channel readings
//! - `tariff`: day/night window and the clock it is read against
//! - `recommend`: price and SoC driven setpoint recommendation
//! - `modes`: operating modes and the state each one resolves to
//! - `hysteresis`: damping of direction changes
//! - `modbus` / `charger`: register transport and the charger session
//! - `sensor`: sensor line parsing and sources
//! - `settings` / `persistence`: user settings and their JSON store
//! - `datalog` / `notify`: CSV data log and status line sinks
//! - `commands`: text commands and the caller guard
//! - `driver`: the control loop tying everything together
//! - `web`: HTTP command/status API

pub mod charger;
pub mod commands;
pub mod config;
pub mod datalog;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod hysteresis;
pub mod logging;
pub mod modbus;
pub mod modes;
pub mod notify;
pub mod persistence;
pub mod recommend;
pub mod sensor;
pub mod settings;
pub mod tariff;
#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use driver::Controller;
pub use error::{HesperusError, Result};
