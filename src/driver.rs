//! Control loop
//!
//! One task owns the charger session, the sensor and every piece of control
//! state. Each sensor line drives one cycle:
//! parse, estimate, resolve the mode, recommend, damp, apply. Commands from
//! the HTTP front end arrive over a channel and are handled between cycles,
//! so nothing here needs a lock.

mod commands;
pub mod types;

pub use types::{CycleSnapshot, DriverCommand, DriverState};

use crate::charger::ChargerSession;
use crate::config::Config;
use crate::datalog::DataLogger;
use crate::error::Result;
use crate::estimator::{ChannelReading, ChannelRole, combine};
use crate::hysteresis::HysteresisDamper;
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::RegisterTransport;
use crate::modes::{Mode, Modes};
use crate::notify::NotificationSink;
use crate::persistence::SettingsStore;
use crate::recommend::{MAX_CHARGE_SENTINEL, recommend};
use crate::sensor::{SensorSource, parse_sensor_line};
use crate::settings::UserSettings;
use crate::tariff::{Clock, TariffWindow};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// The closed-loop controller
pub struct Controller<T: RegisterTransport, S: SensorSource> {
    config: Config,

    /// Exclusive owner of the charger link
    charger: ChargerSession<T>,
    sensor: S,

    modes: Modes,
    damper: HysteresisDamper,
    settings: UserSettings,
    store: SettingsStore,

    window: TariffWindow,
    clock: Arc<dyn Clock>,
    roles: Vec<ChannelRole>,

    datalog: Option<DataLogger>,
    sinks: Vec<Box<dyn NotificationSink>>,

    state: watch::Sender<DriverState>,
    snapshot: watch::Sender<Option<CycleSnapshot>>,
    /// (recommended, applied, mode) of the last status line sent
    last_status: Option<(i32, Option<i32>, Mode)>,

    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    logger: StructuredLogger,
}

impl<T: RegisterTransport, S: SensorSource> Controller<T, S> {
    pub fn new(
        config: Config,
        transport: T,
        sensor: S,
        store: SettingsStore,
        clock: Arc<dyn Clock>,
        commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Result<Self> {
        let logger = get_logger("driver");
        logger.info("Initializing controller");

        let window = config.tariff.window()?;
        let defaults = UserSettings::defaults(&config.tariff, &config.battery);
        let settings = UserSettings::load(&store, defaults);

        let charger = ChargerSession::with_limits(
            transport,
            config.controls.min_current,
            Duration::from_secs(config.controls.soc_refresh_secs),
        );
        let roles = config.sensor.channels.iter().map(|c| c.role).collect();
        let datalog = config
            .datalog
            .enabled
            .then(|| DataLogger::new(&config.datalog, &config.sensor.channels));

        let (state, _) = watch::channel(DriverState::Initializing);
        let (snapshot, _) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        Ok(Self {
            damper: HysteresisDamper::new(config.controls.hysteresis_max_count),
            // The configured startup mode is entered by `run`
            modes: Modes::new(Mode::Off),
            config,
            charger,
            sensor,
            settings,
            store,
            window,
            clock,
            roles,
            datalog,
            sinks: Vec::new(),
            state,
            snapshot,
            last_status: None,
            commands_rx,
            shutdown_tx,
            shutdown_rx,
            logger,
        })
    }

    /// Route status lines and metadata to `sink` as well
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn charger(&self) -> &ChargerSession<T> {
        &self.charger
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn get_state(&self) -> DriverState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Latest cycle, `None` until the first line has been processed
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<CycleSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Sender that ends `run` between cycles
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }

    /// Enter the configured startup mode; OFF leaves the charger untouched
    pub async fn start(&mut self) -> Result<()> {
        let startup = self.config.controls.startup_mode;
        if startup != Mode::Off {
            self.modes.set_mode(startup, &mut self.charger).await?;
        }
        self.logger.info(&format!("Started in {} mode", startup));
        self.state.send_replace(DriverState::Running);
        Ok(())
    }

    /// Run until shutdown, the end of sensor input, or a fatal error.
    /// The charger is stopped and released on the way out.
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting control loop");

        let result = match self.start().await {
            Ok(()) => self.main_loop().await,
            Err(e) => Err(e),
        };

        self.state.send_replace(DriverState::ShuttingDown);
        self.shutdown().await;

        if let Err(e) = &result {
            self.logger.error(&format!("Control loop failed: {}", e));
            self.state.send_replace(DriverState::Error(e.to_string()));
        }
        result
    }

    async fn main_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                line = self.sensor.next_line() => {
                    match line? {
                        Some(line) => {
                            self.process_line(&line).await?;
                        }
                        None => {
                            self.logger.info("Sensor input ended");
                            return Ok(());
                        }
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }

    /// One control cycle. A malformed line is logged and skipped (`Ok(None)`);
    /// a failed charger write is returned as an error.
    pub async fn process_line(&mut self, line: &str) -> Result<Option<CycleSnapshot>> {
        let currents = match parse_sensor_line(
            line,
            self.roles.len(),
            self.config.sensor.divisor,
            self.config.sensor.precision,
        ) {
            Ok(currents) => currents,
            Err(e) => {
                self.logger.warn(&format!("Skipping sensor line: {}", e));
                return Ok(None);
            }
        };

        let estimate = combine(&currents, &self.roles);
        let soc = self.charger.state_of_charge().await;
        let now = self.clock.now();
        let state = self.modes.resolve(
            &self.settings,
            &self.config.tariff,
            &self.config.battery,
            soc,
            self.clock.day_of_month(),
        );
        let price = self.window.price(now.time());
        let recommended = self.damper.stabilize(recommend(estimate, &state, soc, price));

        let mode = self.modes.mode();
        if mode != Mode::Off {
            let amps = if recommended == MAX_CHARGE_SENTINEL {
                self.config.controls.max_charge_current
            } else {
                recommended
            };
            self.charger.apply_setpoint(amps).await?;
        }

        if let Some(datalog) = self.datalog.as_mut() {
            if let Err(e) = datalog.tick(&now, &currents, Some(recommended), mode, soc) {
                self.logger.warn(&format!("Data log write failed: {}", e));
            }
        }

        let snapshot = CycleSnapshot {
            timestamp: now.to_rfc3339(),
            currents: self
                .config
                .sensor
                .channels
                .iter()
                .zip(&currents)
                .map(|(channel, amps)| ChannelReading {
                    name: channel.name.clone(),
                    amps: *amps,
                    role: channel.role,
                })
                .collect(),
            estimate,
            recommended,
            applied: self.charger.state().setpoint_amps,
            mode,
            soc,
            price,
        };

        let key = (snapshot.recommended, snapshot.applied, snapshot.mode);
        if self.last_status != Some(key) {
            self.last_status = Some(key);
            let text = status_text(&snapshot);
            for sink in &mut self.sinks {
                sink.notify(&text);
            }
        }

        self.logger.trace(&format!(
            "Cycle: estimate={:.2}A recommended={}A mode={} soc={} price={}",
            estimate, recommended, mode, soc, price
        ));
        self.snapshot.send_replace(Some(snapshot.clone()));
        Ok(Some(snapshot))
    }

    /// Fan an annotation out to every sink and the data log
    pub fn add_metadata(&mut self, text: &str) {
        for sink in &mut self.sinks {
            sink.add_metadata(text);
        }
        if let Some(datalog) = self.datalog.as_mut() {
            if let Err(e) = datalog.metadata(&self.clock.now(), text) {
                self.logger.warn(&format!("Data log write failed: {}", e));
            }
        }
    }

    async fn shutdown(&mut self) {
        self.logger.info("Shutting down controller");
        if let Err(e) = self.charger.cleanup().await {
            self.logger
                .warn(&format!("Failed to release the charger: {}", e));
        }
        self.logger.info("Controller shutdown complete");
    }
}

/// Kilowatts per amp at the nominal 240 V supply
pub const KW_PER_AMP: f64 = 0.24;

/// Channel readings as power, rounded to 2 decimals
pub fn status_kw_text(snapshot: &CycleSnapshot) -> String {
    snapshot
        .currents
        .iter()
        .map(|c| {
            let kw = (c.amps * KW_PER_AMP * 100.0).round() / 100.0;
            format!("{}kW: {} ({})", kw, c.name, c.role)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable summary of a cycle, one value per line
pub fn status_text(snapshot: &CycleSnapshot) -> String {
    let mut lines: Vec<String> = snapshot
        .currents
        .iter()
        .map(|c| format!("{}A: {} ({})", c.amps, c.name, c.role))
        .collect();
    lines.push(format!("{:.2}A: Estimated", snapshot.estimate));
    lines.push(format!("{}A: Recommended", snapshot.recommended));
    lines.push(match snapshot.applied {
        Some(amps) => format!("{}A: Charge Rate", amps),
        None => "None: Charge Rate".to_string(),
    });
    lines.push(match snapshot.soc {
        0 => "?%: State of Charge".to_string(),
        soc => format!("{}%: State of Charge", soc),
    });
    lines.push(format!("{}p: Price", snapshot.price));
    lines.push(format!("{}: Mode", snapshot.mode));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_marks_unknown_soc() {
        let snapshot = CycleSnapshot {
            timestamp: String::new(),
            currents: vec![ChannelReading {
                name: "Solar".to_string(),
                amps: 10.0,
                role: ChannelRole::Source,
            }],
            estimate: -10.0,
            recommended: 10,
            applied: None,
            mode: Mode::Off,
            soc: 0,
            price: 30.7,
        };
        assert_eq!(
            status_text(&snapshot),
            "10A: Solar (Source)\n-10.00A: Estimated\n10A: Recommended\nNone: Charge Rate\n?%: State of Charge\n30.7p: Price\nOFF: Mode"
        );
    }

    #[test]
    fn kw_status_lists_channel_power() {
        let snapshot = CycleSnapshot {
            timestamp: String::new(),
            currents: vec![
                ChannelReading {
                    name: "Solar".to_string(),
                    amps: 10.0,
                    role: ChannelRole::Source,
                },
                ChannelReading {
                    name: "House".to_string(),
                    amps: 2.0833,
                    role: ChannelRole::Drain,
                },
            ],
            estimate: -7.9167,
            recommended: 8,
            applied: Some(8),
            mode: Mode::Auto,
            soc: 50,
            price: 30.7,
        };
        assert_eq!(
            status_kw_text(&snapshot),
            "2.4kW: Solar (Source)\n0.5kW: House (Drain)"
        );
    }
}
