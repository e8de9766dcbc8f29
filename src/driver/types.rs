use crate::error::Result;
use crate::estimator::ChannelReading;
use crate::modes::Mode;
use serde::Serialize;
use tokio::sync::oneshot;

/// Main controller state
#[derive(Debug, Clone, PartialEq)]
pub enum DriverState {
    /// Controller is initializing
    Initializing,
    /// Cycles are running
    Running,
    /// Controller stopped on an error
    Error(String),
    /// Controller is shutting down
    ShuttingDown,
}

impl DriverState {
    pub fn name(&self) -> &'static str {
        match self {
            DriverState::Initializing => "Initializing",
            DriverState::Running => "Running",
            DriverState::Error(_) => "Error",
            DriverState::ShuttingDown => "ShuttingDown",
        }
    }
}

/// Requests marshalled to the control task
#[derive(Debug)]
pub enum DriverCommand {
    /// A text command from `caller`; the reply (or refusal) comes back on `reply`
    Text {
        caller: String,
        text: String,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// Outcome of one control cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSnapshot {
    pub timestamp: String,
    pub currents: Vec<ChannelReading>,
    /// Net household flow in amps, positive is a deficit
    pub estimate: f64,
    /// Damped recommendation in amps, positive charges
    pub recommended: i32,
    /// Setpoint held by the charger, `None` when nothing is applied
    pub applied: Option<i32>,
    pub mode: Mode,
    /// 0 when unknown
    pub soc: u16,
    /// Pence per kWh at the time of the cycle
    pub price: f64,
}
