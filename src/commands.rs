//! Text commands
//!
//! Commands arrive as chat-style lines (`/auto`, `/charge_cost_limit 7.5`) from
//! the HTTP API. Everything except `/start` runs through [`guard`], which
//! refuses callers that have not registered with the password.

use crate::charger::ChargerStatus;
use crate::error::{HesperusError, Result};
use crate::logging::{LogContext, get_logger_with_context};
use crate::modes::Mode;
use crate::settings::{UNSET, UserSettings};

/// A parsed command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { password: String },
    Status,
    /// Channel readings in kW
    StatusKw,
    Soc,
    ChargerStatus,
    Settings,
    SetMode(Mode),
    /// Switch to the preferred manual mode
    Manual,
    /// Choose the preferred manual mode
    PreferManual(Mode),
    ChargeCostLimit(f64),
    DischargeValue { value: f64, low: Option<f64> },
    MaxPaidSoc(i32),
    MinDischargeSoc(i32),
    MinDischargeRate(i32),
    Disconnect(u64),
    Log(String),
    ListFiles,
}

fn usage(command: &str, message: &str) -> HesperusError {
    HesperusError::validation(command.to_string(), message.to_string())
}

fn number<T: std::str::FromStr>(command: &str, arg: Option<&str>, what: &str) -> Result<T> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| usage(command, &format!("Incorrectly formatted command, please enter {}", what)))
}

fn soc_threshold(command: &str, arg: Option<&str>) -> Result<i32> {
    let value: i32 = number(command, arg, "a percentage or -1")?;
    if value == UNSET || (0..=100).contains(&value) {
        Ok(value)
    } else {
        Err(usage(command, "SoC must be between 0 and 100, or -1 for none"))
    }
}

impl Command {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        let name = head
            .strip_prefix('/')
            .ok_or_else(|| usage("command", "Commands start with '/'"))?
            .to_ascii_lowercase();
        let mut args = rest.split_whitespace();
        let first = args.next();

        let command = match name.as_str() {
            "start" => Command::Start {
                password: rest.to_string(),
            },
            "status" => Command::Status,
            "statuskw" => Command::StatusKw,
            "soc" => Command::Soc,
            "charger_status" => Command::ChargerStatus,
            "settings" => Command::Settings,
            "off" => Command::SetMode(Mode::Off),
            "auto" => Command::SetMode(Mode::Auto),
            "max_charge" => Command::SetMode(Mode::MaxCharge),
            "manual" => Command::Manual,
            "charge_only" => Command::PreferManual(Mode::ChargeOnly),
            "charge_discharge" => Command::PreferManual(Mode::ChargeDischarge),
            "charge_cost_limit" => {
                Command::ChargeCostLimit(number(&name, first, "a price in pence")?)
            }
            "discharge_value" => {
                let value = number(&name, first, "a price in pence")?;
                let low = match args.next() {
                    Some(arg) => Some(number(&name, Some(arg), "a price in pence")?),
                    None => None,
                };
                Command::DischargeValue { value, low }
            }
            "max_paid_soc" => Command::MaxPaidSoc(soc_threshold(&name, first)?),
            "min_discharge_soc" => Command::MinDischargeSoc(soc_threshold(&name, first)?),
            "min_discharge_rate" => {
                let rate: i32 = number(&name, first, "a current in amps")?;
                if rate <= 0 {
                    return Err(usage(&name, "Minimum discharge rate must be positive"));
                }
                Command::MinDischargeRate(rate)
            }
            "disconnect" => {
                let secs: u64 = number(&name, first, "a number of seconds")?;
                if secs == 0 {
                    return Err(usage(&name, "Disconnect time must be positive"));
                }
                Command::Disconnect(secs)
            }
            "log" => {
                if rest.is_empty() {
                    return Err(usage(
                        &name,
                        "Incorrectly formatted command, please specify something to log",
                    ));
                }
                Command::Log(rest.to_string())
            }
            "listfiles" => Command::ListFiles,
            _ => return Err(usage("command", &format!("Unknown command /{}", name))),
        };
        Ok(command)
    }
}

/// What commands act on; implemented by the controller
#[async_trait::async_trait]
pub trait CommandTarget: Send {
    fn is_authorized(&self, caller: &str) -> bool;
    fn password_matches(&self, password: &str) -> bool;
    /// Returns false if the caller was already registered
    fn register_caller(&mut self, caller: &str) -> Result<bool>;

    /// Latest cycle summary; `kw` lists only channel power in kW
    fn status_text(&self, kw: bool) -> String;
    async fn state_of_charge(&mut self) -> u16;
    async fn charger_status(&mut self) -> Result<ChargerStatus>;

    fn mode(&self) -> Mode;
    async fn set_mode(&mut self, mode: Mode) -> Result<()>;

    fn settings(&self) -> &UserSettings;
    /// Replace and persist the user settings
    fn save_settings(&mut self, settings: UserSettings) -> Result<()>;

    async fn disconnect(&mut self, seconds: u64) -> Result<()>;
    fn add_metadata(&mut self, text: &str);
    fn list_files(&self) -> Result<Vec<String>>;
}

fn price(value: f64) -> String {
    format!("{}p", value)
}

fn soc_text(soc: i32) -> String {
    if soc == UNSET {
        "None".to_string()
    } else {
        format!("{}%", soc)
    }
}

/// Settings summary, one command per line
pub fn settings_text(mode: Mode, settings: &UserSettings) -> String {
    let discharge = if settings.discharge_value == settings.low_discharge_value {
        price(settings.discharge_value)
    } else {
        format!(
            "{} [{}]",
            price(settings.discharge_value),
            price(settings.low_discharge_value)
        )
    };
    [
        format!("/user_mode {}", mode),
        format!("/manual {}", settings.manual_mode),
        format!("/charge_cost_limit {}", price(settings.charge_cost_limit)),
        format!("/discharge_value {}", discharge),
        format!("/min_discharge_rate {}A", settings.min_discharge_rate),
        format!("/max_paid_soc {}", soc_text(settings.max_paid_soc)),
        format!("/min_discharge_soc {}", soc_text(settings.min_discharge_soc)),
    ]
    .join("\n")
}

async fn change_mode<T: CommandTarget + ?Sized>(target: &mut T, mode: Mode) -> Result<String> {
    target.set_mode(mode).await?;
    let reply = format!("The user mode has been changed to {}", mode);
    target.add_metadata(&reply);
    Ok(reply)
}

fn change_settings<T, F>(target: &mut T, change: F) -> Result<UserSettings>
where
    T: CommandTarget + ?Sized,
    F: FnOnce(&mut UserSettings),
{
    let mut settings = target.settings().clone();
    change(&mut settings);
    target.save_settings(settings.clone())?;
    Ok(settings)
}

/// Run a command that has already passed authorization
pub async fn execute<T: CommandTarget + ?Sized>(target: &mut T, command: Command) -> Result<String> {
    let reply = match command {
        Command::Start { .. } => "Already registered".to_string(),
        Command::Status => target.status_text(false),
        Command::StatusKw => target.status_text(true),
        Command::Soc => match target.state_of_charge().await {
            0 => "Unknown".to_string(),
            soc => format!("{}%", soc),
        },
        Command::ChargerStatus => target.charger_status().await?.to_string(),
        Command::Settings => settings_text(target.mode(), target.settings()),
        Command::SetMode(mode) => change_mode(target, mode).await?,
        Command::Manual => {
            let mode = target.settings().manual_mode;
            change_mode(target, mode).await?
        }
        Command::PreferManual(mode) => {
            change_settings(target, |s| s.manual_mode = mode)?;
            let current = target.mode();
            if matches!(current, Mode::ChargeOnly | Mode::ChargeDischarge) && current != mode {
                target.set_mode(mode).await?;
            }
            let reply = format!("Set charge mode to {}", mode);
            target.add_metadata(&reply);
            reply
        }
        Command::ChargeCostLimit(value) => {
            change_settings(target, |s| s.charge_cost_limit = value)?;
            let reply = format!("The charge cost limit has been changed to {}", price(value));
            target.add_metadata(&reply);
            reply
        }
        Command::DischargeValue { value, low } => {
            let low = low.unwrap_or(value);
            change_settings(target, |s| {
                s.discharge_value = value;
                s.low_discharge_value = low;
            })?;
            let change = if low == value {
                price(value)
            } else {
                format!("{} [{}]", price(value), price(low))
            };
            let reply = format!("The discharge value has been changed to {}", change);
            target.add_metadata(&reply);
            reply
        }
        Command::MaxPaidSoc(soc) => {
            change_settings(target, |s| s.max_paid_soc = soc)?;
            let current = target.state_of_charge().await;
            let reply = format!(
                "The max paid SoC has been changed to {}, the current SoC is {}%",
                soc_text(soc),
                current
            );
            target.add_metadata(&reply);
            reply
        }
        Command::MinDischargeSoc(soc) => {
            change_settings(target, |s| s.min_discharge_soc = soc)?;
            let current = target.state_of_charge().await;
            let reply = format!(
                "The min discharge SoC has been changed to {}, the current SoC is {}%",
                soc_text(soc),
                current
            );
            target.add_metadata(&reply);
            reply
        }
        Command::MinDischargeRate(rate) => {
            change_settings(target, |s| s.min_discharge_rate = rate)?;
            let reply = format!("The minimum discharge rate has been changed to {}A", rate);
            target.add_metadata(&reply);
            reply
        }
        Command::Disconnect(seconds) => {
            target.disconnect(seconds).await?;
            let reply = format!("Disconnected from the charger for {}s", seconds);
            target.add_metadata(&reply);
            reply
        }
        Command::Log(text) => {
            target.add_metadata(&text);
            format!("Added '{}' to the log", text)
        }
        Command::ListFiles => target.list_files()?.join(", "),
    };
    Ok(reply)
}

/// Run `command` only if `authorized` accepts `caller`
pub async fn guard<T, P>(target: &mut T, authorized: P, caller: &str, command: Command) -> Result<String>
where
    T: CommandTarget + ?Sized,
    P: FnOnce(&T, &str) -> bool,
{
    if !authorized(target, caller) {
        let logger = get_logger_with_context(LogContext::new("commands").with_caller(caller));
        logger.warn("Refused command from unregistered caller");
        return Err(HesperusError::auth("Not registered, send /start <password> first"));
    }
    execute(target, command).await
}

fn register<T: CommandTarget + ?Sized>(target: &mut T, caller: &str, password: &str) -> Result<String> {
    if !target.password_matches(password) {
        return Err(HesperusError::auth("Incorrect password"));
    }
    target.register_caller(caller)?;
    Ok("Password correct".to_string())
}

/// Parse and run one line from `caller`
pub async fn dispatch<T: CommandTarget + ?Sized>(target: &mut T, caller: &str, text: &str) -> Result<String> {
    let parsed = Command::parse(text);
    if let Ok(Command::Start { password }) = &parsed {
        return register(target, caller, password);
    }
    // Unregistered callers learn nothing about command syntax
    if !target.is_authorized(caller) {
        return guard(target, |_, _| false, caller, Command::Status).await;
    }
    guard(target, |t, c| t.is_authorized(c), caller, parsed?).await
}
