//! Current sensor input
//!
//! The sensor board emits one ASCII line per sample: a leading field (node id)
//! followed by raw readings. Lines are read from a device or file path; serial
//! parameters are set up outside the process.

use crate::config::SensorConfig;
use crate::error::{HesperusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Parse one sensor line into amps for the first `channels` readings.
///
/// Fields are separated by whitespace, commas, or both. Field 0 is skipped;
/// fields beyond the last channel are ignored. Non-finite readings are
/// rejected.
pub fn parse_sensor_line(
    line: &str,
    channels: usize,
    divisor: f64,
    precision: u32,
) -> Result<Vec<f64>> {
    let fields: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .collect();

    if fields.len() < channels + 1 {
        return Err(HesperusError::sensor(format!(
            "Expected {} readings, got {} fields in {:?}",
            channels,
            fields.len(),
            line
        )));
    }

    let scale = 10f64.powi(precision as i32);
    fields[1..=channels]
        .iter()
        .map(|field| {
            let raw = field
                .parse::<f64>()
                .ok()
                .filter(|raw| raw.is_finite())
                .ok_or_else(|| {
                    HesperusError::sensor(format!("Non-numeric reading {:?} in {:?}", field, line))
                })?;
            Ok((raw / divisor * scale).round() / scale)
        })
        .collect()
}

/// Something that yields raw sensor lines
#[async_trait::async_trait]
pub trait SensorSource: Send {
    /// Next line, `None` once the source is exhausted
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Line reader over a device node or a recorded file
pub struct LineSensor {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    logger: StructuredLogger,
}

impl LineSensor {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            path: PathBuf::from(&config.device),
            lines: None,
            logger: get_logger("sensor"),
        }
    }

    async fn open(&mut self) -> Result<&mut Lines<BufReader<File>>> {
        if self.lines.is_none() {
            let file = File::open(&self.path).await.map_err(|e| {
                HesperusError::sensor(format!("Cannot open {}: {}", self.path.display(), e))
            })?;
            self.logger
                .info(&format!("Reading sensor lines from {}", self.path.display()));
            self.lines = Some(BufReader::new(file).lines());
        }
        self.lines
            .as_mut()
            .ok_or_else(|| HesperusError::sensor("Sensor not open"))
    }
}

#[async_trait::async_trait]
impl SensorSource for LineSensor {
    async fn next_line(&mut self) -> Result<Option<String>> {
        let lines = self.open().await?;
        Ok(lines.next_line().await?)
    }
}

/// Fixed list of lines, for replaying captures
#[derive(Debug, Default)]
pub struct ScriptedSensor {
    lines: std::collections::VecDeque<String>,
}

impl ScriptedSensor {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
impl SensorSource for ScriptedSensor {
    async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}
