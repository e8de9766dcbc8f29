//! Modbus TCP client for the charger register interface
//!
//! This module provides the register transport used by the charger session:
//! a small async trait so the control logic can be exercised without hardware,
//! and a `tokio-modbus` backed implementation with timeouts and lazy reconnect.

use crate::config::ChargerConfig;
use crate::error::{HesperusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// Single-register access to the charger
#[async_trait::async_trait]
pub trait RegisterTransport: Send {
    /// Read one holding register
    async fn read_holding_register(&mut self, address: u16) -> Result<u16>;

    /// Write one holding register
    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Modbus TCP client for charger communication
pub struct ModbusClient {
    /// Modbus TCP client connection, `None` until first use or after a link error
    client: Option<tokio_modbus::client::Context>,

    /// Configuration
    config: ChargerConfig,

    /// Connection timeout
    connection_timeout: Duration,

    /// Operation timeout
    operation_timeout: Duration,

    logger: StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client; no connection is made until first use
    pub fn new(config: &ChargerConfig) -> Self {
        Self {
            client: None,
            config: config.clone(),
            connection_timeout: Duration::from_millis(config.connect_timeout_ms),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
            logger: get_logger("modbus"),
        }
    }

    /// Connect to the charger
    pub async fn connect(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.config.ip, self.config.port);

        self.logger
            .info(&format!("Connecting to Modbus server at {}", address));

        let socket_addr: std::net::SocketAddr = address
            .parse()
            .map_err(|e| HesperusError::modbus(format!("Invalid socket address: {}", e)))?;

        let slave = Slave(self.config.slave_id);
        match timeout(self.connection_timeout, tcp::connect_slave(socket_addr, slave)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Successfully connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to Modbus server: {}", e);
                self.logger.error(&error_msg);
                Err(HesperusError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Connection timeout".to_string();
                self.logger.error(&error_msg);
                Err(HesperusError::timeout(error_msg))
            }
        }
    }

    /// Drop the connection; the next operation reconnects
    pub fn disconnect(&mut self) {
        if self.client.take().is_some() {
            self.logger.info("Disconnecting from Modbus server");
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn ensure_connected(&mut self) -> Result<&mut tokio_modbus::client::Context> {
        if self.client.is_none() {
            self.connect().await?;
        }
        self.client
            .as_mut()
            .ok_or_else(|| HesperusError::modbus("Not connected to Modbus server"))
    }

    /// Log a failed request and drop the link so the next request reconnects
    fn fail(&mut self, error: HesperusError) -> HesperusError {
        self.logger.error(&error.to_string());
        self.disconnect();
        error
    }

    /// Log a device exception; the link itself is still healthy
    fn rejected(&self, message: String) -> HesperusError {
        self.logger.error(&message);
        HesperusError::modbus(message)
    }
}

#[async_trait::async_trait]
impl RegisterTransport for ModbusClient {
    async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        let timeout_duration = self.operation_timeout;
        self.logger
            .debug(&format!("Reading register {:#06x}", address));

        let result = {
            let client = self.ensure_connected().await?;
            timeout(timeout_duration, client.read_holding_registers(address, 1)).await
        };

        match result {
            Ok(Ok(Ok(response))) => match response.first() {
                Some(&value) => {
                    self.logger
                        .trace(&format!("Register {:#06x} = {}", address, value));
                    Ok(value)
                }
                None => Err(self.fail(HesperusError::modbus(format!(
                    "Empty response reading register {:#06x}",
                    address
                )))),
            },
            Ok(Ok(Err(exception))) => Err(self.rejected(format!(
                "Charger rejected read of register {:#06x}: {}",
                address, exception
            ))),
            Ok(Err(e)) => Err(self.fail(HesperusError::modbus(format!(
                "Failed to read register {:#06x}: {}",
                address, e
            )))),
            Err(_) => Err(self.fail(HesperusError::timeout(format!(
                "Read of register {:#06x} timed out",
                address
            )))),
        }
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        let timeout_duration = self.operation_timeout;
        self.logger.debug(&format!(
            "Writing value {} to register {:#06x}",
            value, address
        ));

        let result = {
            let client = self.ensure_connected().await?;
            timeout(timeout_duration, client.write_single_register(address, value)).await
        };

        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(self.rejected(format!(
                "Charger rejected write of {} to register {:#06x}: {}",
                value, address, exception
            ))),
            Ok(Err(e)) => Err(self.fail(HesperusError::modbus(format!(
                "Failed to write register {:#06x}: {}",
                address, e
            )))),
            Err(_) => Err(self.fail(HesperusError::timeout(format!(
                "Write of register {:#06x} timed out",
                address
            )))),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryRegisters {
    values: HashMap<u16, u16>,
    writes: Vec<(u16, u16)>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory register bank standing in for a charger (dry runs and tests).
///
/// Clones share the same registers, so a handle kept outside the session can
/// inspect every write and script the values reads return.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryRegisters>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryRegisters) -> R) -> R {
        match self.inner.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Set the value subsequent reads of `address` return
    pub fn set_register(&self, address: u16, value: u16) {
        self.with(|r| {
            r.values.insert(address, value);
        });
    }

    /// Current value of `address` (0 if never written)
    pub fn register(&self, address: u16) -> u16 {
        self.with(|r| r.values.get(&address).copied().unwrap_or(0))
    }

    /// Every write in order as `(address, value)`
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.with(|r| r.writes.clone())
    }

    pub fn clear_writes(&self) {
        self.with(|r| r.writes.clear());
    }

    pub fn fail_reads(&self, fail: bool) {
        self.with(|r| r.fail_reads = fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|r| r.fail_writes = fail);
    }
}

#[async_trait::async_trait]
impl RegisterTransport for MemoryTransport {
    async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        self.with(|r| {
            if r.fail_reads {
                return Err(HesperusError::modbus(format!(
                    "Failed to read register {:#06x}: link down",
                    address
                )));
            }
            Ok(r.values.get(&address).copied().unwrap_or(0))
        })
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.with(|r| {
            if r.fail_writes {
                return Err(HesperusError::modbus(format!(
                    "Failed to write register {:#06x}: link down",
                    address
                )));
            }
            r.values.insert(address, value);
            r.writes.push((address, value));
            Ok(())
        })
    }
}

/// Encode a signed setpoint as a 16-bit two's-complement register value.
/// Values outside the `i16` range saturate rather than wrap.
pub fn encode_setpoint(amps: i32) -> u16 {
    let clamped = amps.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
    clamped as i16 as u16
}

/// Interpret a register value as a signed 16-bit quantity
pub fn decode_signed(value: u16) -> i32 {
    i32::from(value as i16)
}
