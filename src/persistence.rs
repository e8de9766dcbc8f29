//! Settings store
//!
//! A small JSON document holding the user's general settings and the callers
//! allowed to issue commands. Every mutation is written straight back to disk.

use crate::error::{HesperusError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// On-disk layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredState {
    /// Named user settings
    #[serde(default)]
    pub general: Map<String, Value>,

    /// Callers allowed to run commands
    #[serde(default)]
    pub callers: BTreeSet<String>,
}

/// JSON-backed settings store
pub struct SettingsStore {
    file_path: PathBuf,
    state: StoredState,
    logger: StructuredLogger,
}

impl SettingsStore {
    /// Open the store at `path`; a missing file starts empty
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let logger = get_logger("persistence");
        let file_path = path.as_ref().to_path_buf();

        let state = if file_path.exists() {
            let contents = std::fs::read_to_string(&file_path)?;
            let state: StoredState = serde_json::from_str(&contents).map_err(|e| {
                HesperusError::persistence(format!(
                    "Invalid settings file {}: {}",
                    file_path.display(),
                    e
                ))
            })?;
            logger.info(&format!(
                "Loaded {} settings and {} callers",
                state.general.len(),
                state.callers.len()
            ));
            state
        } else {
            logger.info("No settings file found, using defaults");
            StoredState::default()
        };

        Ok(Self {
            file_path,
            state,
            logger,
        })
    }

    /// Save the document to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved settings to disk");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Typed access to one general setting; `None` if absent or of another type
    pub fn get_general<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.state
            .general
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn general(&self) -> &Map<String, Value> {
        &self.state.general
    }

    /// Set one general setting and save
    pub fn set_general<T: Serialize>(&mut self, name: &str, value: T) -> Result<()> {
        self.state
            .general
            .insert(name.to_string(), serde_json::to_value(value)?);
        self.save()
    }

    /// Overwrite several general settings with a single save
    pub fn merge_general(&mut self, values: Map<String, Value>) -> Result<()> {
        self.state.general.extend(values);
        self.save()
    }

    pub fn is_authorized(&self, caller: &str) -> bool {
        self.state.callers.contains(caller)
    }

    /// Register a caller; returns false if it was already known
    pub fn add_caller(&mut self, caller: &str) -> Result<bool> {
        if !self.state.callers.insert(caller.to_string()) {
            return Ok(false);
        }
        self.logger.info(&format!("Registered caller {}", caller));
        self.save()?;
        Ok(true)
    }

    pub fn callers(&self) -> impl Iterator<Item = &str> {
        self.state.callers.iter().map(String::as_str)
    }
}
