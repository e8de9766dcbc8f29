//! CSV data log
//!
//! One file per day named `D<day>.csv` where `<day>` counts days since the
//! Unix epoch in local time. When a file of that name already exists with a
//! different header (channels were reconfigured) the next free `_<n>` suffix
//! is used instead.

use crate::config::{ChannelConfig, DatalogConfig};
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::modes::Mode;
use chrono::{DateTime, Datelike};
use chrono_tz::Tz;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub struct DataLogger {
    folder: PathBuf,
    interval_secs: i64,
    header: Vec<String>,
    channels: usize,
    file: Option<PathBuf>,
    day: Option<i64>,
    last_tick: Option<i64>,
    logger: StructuredLogger,
}

// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

fn day_number(now: &DateTime<Tz>) -> i64 {
    i64::from(now.date_naive().num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

impl DataLogger {
    pub fn new(config: &DatalogConfig, channels: &[ChannelConfig]) -> Self {
        let mut header = vec!["Time".to_string()];
        header.extend(
            channels
                .iter()
                .map(|c| format!("{}({})", c.name, c.role)),
        );
        header.extend(["Recommended", "Mode", "SoC", "Metadata"].map(String::from));

        Self {
            folder: PathBuf::from(&config.folder),
            interval_secs: config.interval_secs.max(1) as i64,
            header,
            channels: channels.len(),
            file: None,
            day: None,
            last_tick: None,
            logger: get_logger("datalog"),
        }
    }

    /// File currently written to
    pub fn current_file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Names (without extension) of the log files, sorted
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.folder.is_dir() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.folder)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn header_line(&self) -> String {
        self.header.join(",")
    }

    /// Pick (or create) today's file
    fn open_for_day(&mut self, now: &DateTime<Tz>) -> Result<PathBuf> {
        fs::create_dir_all(&self.folder)?;
        let day = day_number(now);
        let expected = self.header_line();

        let mut index = 1;
        let path = loop {
            let name = if index == 1 {
                format!("D{}.csv", day)
            } else {
                format!("D{}_{}.csv", day, index)
            };
            let path = self.folder.join(name);
            if !path.is_file() {
                let mut writer = csv::Writer::from_path(&path)?;
                writer.write_record(&self.header)?;
                writer.flush()?;
                self.logger
                    .info(&format!("Started data log {}", path.display()));
                break path;
            }

            let mut first = String::new();
            BufReader::new(fs::File::open(&path)?).read_line(&mut first)?;
            if first.trim_end() == expected {
                break path;
            }
            index += 1;
        };

        self.day = Some(day);
        self.file = Some(path.clone());
        Ok(path)
    }

    fn append(&mut self, now: &DateTime<Tz>, record: Vec<String>) -> Result<()> {
        let current = match (&self.file, self.day) {
            (Some(path), Some(day)) if day == day_number(now) => Some(path.clone()),
            _ => None,
        };
        let path = match current {
            Some(path) => path,
            None => self.open_for_day(now)?,
        };
        let file = OpenOptions::new().append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(&record)?;
        writer.flush()?;
        Ok(())
    }

    /// Write a row if a new interval has started; returns whether a row was written
    pub fn tick(
        &mut self,
        now: &DateTime<Tz>,
        currents: &[f64],
        recommended: Option<i32>,
        mode: Mode,
        soc: u16,
    ) -> Result<bool> {
        let this_tick = now.timestamp().div_euclid(self.interval_secs);
        if self.last_tick.is_some_and(|last| last >= this_tick) {
            return Ok(false);
        }
        self.last_tick = Some(this_tick);

        let mut record = vec![now.format("%Y-%m-%dT%H:%M:%S").to_string()];
        record.extend(currents.iter().map(|c| c.to_string()));
        record.push(recommended.map(|r| r.to_string()).unwrap_or_default());
        record.push(mode.shorthand().to_string());
        record.push(soc.to_string());
        record.push(String::new());
        self.append(now, record)?;
        Ok(true)
    }

    /// Write an annotation row with only the time and metadata columns filled
    pub fn metadata(&mut self, now: &DateTime<Tz>, text: &str) -> Result<()> {
        let mut record = vec![String::new(); self.header.len()];
        record[0] = now.format("%Y-%m-%dT%H:%M:%S").to_string();
        record[self.channels + 4] = text.to_string();
        self.append(now, record)
    }
}
