//! Charger session: register-level control of the bidirectional charger
//!
//! Wraps a [`RegisterTransport`] and keeps enough state to make setpoint
//! writes idempotent, to throttle state of charge reads, and to honour a
//! temporary disconnect window during which no register is written.

use crate::error::{HesperusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::{RegisterTransport, decode_signed, encode_setpoint};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Control ownership (0 = release, 1 = take)
pub const REG_CONTROL: u16 = 0x51;
/// Operating submode (0 = current control)
pub const REG_SUBMODE: u16 = 0x53;
/// Start (1) / stop (2) charging
pub const REG_START_STOP: u16 = 0x101;
/// Current setpoint in amps, two's complement when negative
pub const REG_SETPOINT: u16 = 0x102;
/// Maximum available current
pub const REG_MAX_CURRENT: u16 = 0x200;
/// Maximum available power
pub const REG_MAX_POWER: u16 = 0x202;
/// Charger status, see [`ChargerStatus`]
pub const REG_STATUS: u16 = 0x219;
/// State of charge in percent, 0 when unknown
pub const REG_SOC: u16 = 0x21A;

const START_CHARGING: u16 = 1;
const STOP_CHARGING: u16 = 2;
const SUBMODE_CURRENT_CONTROL: u16 = 0;

/// Smallest setpoint magnitude the charger sustains
pub const MIN_SETPOINT: i32 = 3;

/// Default minimum interval between state of charge reads
pub const SOC_REFRESH: Duration = Duration::from_secs(120);

/// Status reported by register 0x219
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargerStatus {
    Ready,
    Charging,
    WaitingForCarDemand,
    WaitingForNextSchedule,
    PausedByUser,
    EndOfSchedule,
    Disconnected,
    Error,
    InqueuePowerSharing,
    UnconfiguredPowerSharing,
    InqueuePowerBoost,
    Discharging,
}

impl TryFrom<u16> for ChargerStatus {
    type Error = HesperusError;

    fn try_from(value: u16) -> Result<Self> {
        use ChargerStatus::*;
        Ok(match value {
            0 => Ready,
            1 => Charging,
            2 => WaitingForCarDemand,
            3 => WaitingForNextSchedule,
            4 => PausedByUser,
            5 => EndOfSchedule,
            6 => Disconnected,
            7 => Error,
            8 => InqueuePowerSharing,
            9 => UnconfiguredPowerSharing,
            10 => InqueuePowerBoost,
            11 => Discharging,
            other => {
                return Err(HesperusError::modbus(format!(
                    "Unknown charger status {}",
                    other
                )));
            }
        })
    }
}

impl fmt::Display for ChargerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ChargerStatus::*;
        let name = match self {
            Ready => "READY",
            Charging => "CHARGING",
            WaitingForCarDemand => "WAITING_FOR_CAR_DEMAND",
            WaitingForNextSchedule => "WAITING_FOR_NEXT_SCHEDULE",
            PausedByUser => "PAUSED_BY_USER",
            EndOfSchedule => "END_OF_SCHEDULE",
            Disconnected => "DISCONNECTED",
            Error => "ERROR",
            InqueuePowerSharing => "INQUEUE_POWER_SHARING",
            UnconfiguredPowerSharing => "UNCONFIGURED_POWER_SHARING",
            InqueuePowerBoost => "INQUEUE_POWER_BOOST",
            Discharging => "DISCHARGING",
        };
        f.write_str(name)
    }
}

/// Acquire and release control of the charger
#[async_trait::async_trait]
pub trait ControlOwnership: Send {
    async fn take_control(&mut self) -> Result<()>;
    async fn relinquish_control(&mut self) -> Result<()>;
}

/// Observable session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Last applied setpoint, `None` when nothing is applied
    pub setpoint_amps: Option<i32>,
    /// `None` until the first start/stop write
    pub charging: Option<bool>,
    pub controlling: bool,
    /// Seconds left in the disconnect window
    pub disconnected_secs: Option<u64>,
    pub cached_soc: u16,
}

pub struct ChargerSession<T: RegisterTransport> {
    transport: T,
    setpoint_amps: Option<i32>,
    charging: Option<bool>,
    controlling: bool,
    disconnected_until: Option<Instant>,
    // Ownership to restore when the disconnect window closes
    control_after_disconnect: bool,
    cached_soc: u16,
    soc_refresh_deadline: Option<Instant>,
    soc_refresh: Duration,
    min_setpoint: i32,
    logger: StructuredLogger,
}

impl<T: RegisterTransport> ChargerSession<T> {
    pub fn new(transport: T) -> Self {
        Self::with_limits(transport, MIN_SETPOINT, SOC_REFRESH)
    }

    pub fn with_limits(transport: T, min_setpoint: i32, soc_refresh: Duration) -> Self {
        Self {
            transport,
            setpoint_amps: None,
            charging: None,
            controlling: false,
            disconnected_until: None,
            control_after_disconnect: false,
            cached_soc: 0,
            soc_refresh_deadline: None,
            soc_refresh,
            min_setpoint,
            logger: get_logger("charger"),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        let now = Instant::now();
        SessionState {
            setpoint_amps: self.setpoint_amps,
            charging: self.charging,
            controlling: self.controlling,
            disconnected_secs: self
                .disconnected_until
                .filter(|until| *until > now)
                .map(|until| until.duration_since(now).as_secs()),
            cached_soc: self.cached_soc,
        }
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    /// Whether the disconnect window is currently open
    pub fn is_disconnected(&self) -> bool {
        self.disconnected_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// True while writes are suppressed. Closes an expired window and
    /// restores ownership if it was held before the window opened.
    async fn write_gate(&mut self) -> Result<bool> {
        let Some(until) = self.disconnected_until else {
            return Ok(false);
        };
        if Instant::now() < until {
            return Ok(true);
        }

        self.disconnected_until = None;
        self.logger.info("Disconnect window expired");
        if self.control_after_disconnect {
            self.acquire().await?;
        }
        Ok(false)
    }

    async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        self.transport.write_single_register(address, value).await
    }

    async fn acquire(&mut self) -> Result<()> {
        self.write(REG_CONTROL, 1).await?;
        self.write(REG_SUBMODE, SUBMODE_CURRENT_CONTROL).await?;
        self.controlling = true;
        self.logger.info("Took control of the charger");
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        self.stop_charging().await?;
        self.write(REG_CONTROL, 0).await?;
        self.controlling = false;
        // Re-taking control must re-send whatever is recommended next
        self.setpoint_amps = None;
        self.logger.info("Relinquished control of the charger");
        Ok(())
    }

    async fn start_charging(&mut self) -> Result<()> {
        if self.charging != Some(true) {
            self.write(REG_START_STOP, START_CHARGING).await?;
            self.charging = Some(true);
        }
        Ok(())
    }

    async fn stop_charging(&mut self) -> Result<()> {
        if self.charging != Some(false) {
            self.write(REG_START_STOP, STOP_CHARGING).await?;
            self.charging = Some(false);
        }
        Ok(())
    }

    /// Take control and select current-control mode
    pub async fn take_control(&mut self) -> Result<()> {
        if self.write_gate().await? {
            self.control_after_disconnect = true;
            return Ok(());
        }
        self.acquire().await
    }

    /// Stop charging and hand control back to the charger
    pub async fn relinquish_control(&mut self) -> Result<()> {
        if self.write_gate().await? {
            self.control_after_disconnect = false;
            return Ok(());
        }
        self.release().await
    }

    /// Apply a setpoint in amps; positive charges, negative discharges
    pub async fn apply_setpoint(&mut self, amps: i32) -> Result<()> {
        if self.write_gate().await? {
            return Ok(());
        }
        if self.setpoint_amps == Some(amps) {
            return Ok(());
        }

        if amps.abs() < self.min_setpoint {
            self.stop_charging().await?;
        } else {
            self.write(REG_SETPOINT, encode_setpoint(amps)).await?;
            self.start_charging().await?;
        }
        self.setpoint_amps = Some(amps);
        self.logger
            .debug(&format!("Applied setpoint {}A", amps));
        Ok(())
    }

    /// Battery state of charge in percent, 0 if it has never been known.
    ///
    /// The register is read at most once per refresh interval. A read of 0 or
    /// a failed read keeps the last known value.
    pub async fn state_of_charge(&mut self) -> u16 {
        let now = Instant::now();
        if self.soc_refresh_deadline.is_some_and(|deadline| now < deadline) {
            return self.cached_soc;
        }
        self.soc_refresh_deadline = Some(now + self.soc_refresh);

        match self.transport.read_holding_register(REG_SOC).await {
            Ok(0) => self.logger.debug("State of charge unavailable"),
            Ok(soc) => self.cached_soc = soc,
            Err(e) => self
                .logger
                .warn(&format!("Failed to read state of charge: {}", e)),
        }
        self.cached_soc
    }

    /// Last state of charge without touching the charger
    pub fn cached_soc(&self) -> u16 {
        self.cached_soc
    }

    pub async fn status(&mut self) -> Result<ChargerStatus> {
        let raw = self.transport.read_holding_register(REG_STATUS).await?;
        ChargerStatus::try_from(raw)
    }

    pub async fn max_available_current(&mut self) -> Result<u16> {
        self.transport.read_holding_register(REG_MAX_CURRENT).await
    }

    pub async fn max_available_power(&mut self) -> Result<i32> {
        let raw = self.transport.read_holding_register(REG_MAX_POWER).await?;
        Ok(decode_signed(raw))
    }

    /// Yield the charger for `seconds`, restoring ownership afterwards if held
    pub async fn disconnect(&mut self, seconds: u64) -> Result<()> {
        let until = Instant::now() + Duration::from_secs(seconds);
        if self.is_disconnected() {
            self.disconnected_until = Some(until);
            self.logger
                .info(&format!("Disconnect window extended to {}s", seconds));
            return Ok(());
        }

        // Settle an expired window first so its ownership intent is honoured
        self.write_gate().await?;
        self.control_after_disconnect = self.controlling;
        if self.controlling {
            self.release().await?;
        }
        self.disconnected_until = Some(until);
        self.logger
            .info(&format!("Disconnected from the charger for {}s", seconds));
        Ok(())
    }

    /// Stop charging and release control before exit
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.is_disconnected() {
            return Ok(());
        }
        self.release().await
    }
}

#[async_trait::async_trait]
impl<T: RegisterTransport> ControlOwnership for ChargerSession<T> {
    async fn take_control(&mut self) -> Result<()> {
        ChargerSession::take_control(self).await
    }

    async fn relinquish_control(&mut self) -> Result<()> {
        ChargerSession::relinquish_control(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::MemoryTransport;

    fn session() -> (ChargerSession<MemoryTransport>, MemoryTransport) {
        let transport = MemoryTransport::new();
        (ChargerSession::new(transport.clone()), transport)
    }

    #[test]
    fn status_values_map_in_register_order() {
        assert_eq!(ChargerStatus::try_from(0).unwrap(), ChargerStatus::Ready);
        assert_eq!(
            ChargerStatus::try_from(11).unwrap(),
            ChargerStatus::Discharging
        );
        assert!(ChargerStatus::try_from(12).is_err());
        assert_eq!(
            ChargerStatus::WaitingForCarDemand.to_string(),
            "WAITING_FOR_CAR_DEMAND"
        );
    }

    #[tokio::test]
    async fn take_control_selects_current_mode() {
        let (mut charger, regs) = session();
        charger.take_control().await.unwrap();
        assert_eq!(regs.writes(), vec![(REG_CONTROL, 1), (REG_SUBMODE, 0)]);
        assert!(charger.is_controlling());
    }

    #[tokio::test]
    async fn relinquish_stops_before_releasing() {
        let (mut charger, regs) = session();
        charger.take_control().await.unwrap();
        charger.apply_setpoint(10).await.unwrap();
        regs.clear_writes();

        charger.relinquish_control().await.unwrap();
        assert_eq!(
            regs.writes(),
            vec![(REG_START_STOP, STOP_CHARGING), (REG_CONTROL, 0)]
        );
        assert_eq!(charger.state().setpoint_amps, None);
        assert_eq!(charger.state().charging, Some(false));
    }

    #[tokio::test]
    async fn setpoint_then_start() {
        let (mut charger, regs) = session();
        charger.apply_setpoint(-6).await.unwrap();
        assert_eq!(
            regs.writes(),
            vec![(REG_SETPOINT, 65530), (REG_START_STOP, START_CHARGING)]
        );

        regs.clear_writes();
        charger.apply_setpoint(8).await.unwrap();
        assert_eq!(regs.writes(), vec![(REG_SETPOINT, 8)]);
    }

    #[tokio::test]
    async fn failed_write_leaves_setpoint_unrecorded() {
        let (mut charger, regs) = session();
        regs.fail_writes(true);
        assert!(charger.apply_setpoint(10).await.is_err());
        assert_eq!(charger.state().setpoint_amps, None);
    }

    #[tokio::test(start_paused = true)]
    async fn soc_is_throttled_and_ignores_unknown() {
        let (mut charger, regs) = session();
        regs.set_register(REG_SOC, 55);
        assert_eq!(charger.state_of_charge().await, 55);

        regs.set_register(REG_SOC, 60);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(charger.state_of_charge().await, 55);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(charger.state_of_charge().await, 60);

        regs.set_register(REG_SOC, 0);
        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(charger.state_of_charge().await, 60);

        regs.fail_reads(true);
        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(charger.state_of_charge().await, 60);
    }

    #[tokio::test]
    async fn power_register_is_signed() {
        let (mut charger, regs) = session();
        regs.set_register(REG_MAX_POWER, encode_setpoint(-7400));
        regs.set_register(REG_MAX_CURRENT, 32);
        assert_eq!(charger.max_available_power().await.unwrap(), -7400);
        assert_eq!(charger.max_available_current().await.unwrap(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn ownership_changes_during_window_update_the_intent() {
        let (mut charger, regs) = session();
        charger.take_control().await.unwrap();
        charger.disconnect(30).await.unwrap();

        // Going OFF while disconnected: nothing written, nothing restored later
        regs.clear_writes();
        charger.relinquish_control().await.unwrap();
        assert!(regs.writes().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        charger.apply_setpoint(5).await.unwrap();
        assert!(!charger.is_controlling());
        assert_eq!(
            regs.writes(),
            vec![(REG_SETPOINT, 5), (REG_START_STOP, START_CHARGING)]
        );
    }

    #[tokio::test]
    async fn cleanup_stops_and_releases() {
        let (mut charger, regs) = session();
        charger.take_control().await.unwrap();
        regs.clear_writes();
        charger.cleanup().await.unwrap();
        assert_eq!(
            regs.writes(),
            vec![(REG_START_STOP, STOP_CHARGING), (REG_CONTROL, 0)]
        );
    }
}
