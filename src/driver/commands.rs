use super::{Controller, DriverCommand, status_kw_text, status_text};
use crate::charger::ChargerStatus;
use crate::commands::{self, CommandTarget};
use crate::error::Result;
use crate::logging::{LogContext, get_logger_with_context};
use crate::modbus::RegisterTransport;
use crate::modes::Mode;
use crate::sensor::SensorSource;
use crate::settings::UserSettings;

impl<T: RegisterTransport, S: SensorSource> Controller<T, S> {
    pub(crate) async fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::Text {
                caller,
                text,
                reply,
            } => {
                let result = self.execute_text(&caller, &text).await;
                if reply.send(result).is_err() {
                    self.logger.debug("Command reply receiver dropped");
                }
            }
        }
    }

    /// Parse and run a text command on behalf of `caller`
    pub async fn execute_text(&mut self, caller: &str, text: &str) -> Result<String> {
        let logger = get_logger_with_context(LogContext::new("commands").with_caller(caller));
        logger.debug(&format!("Command: {}", text));
        let result = commands::dispatch(self, caller, text).await;
        if let Err(e) = &result {
            logger.warn(&format!("Command {:?} failed: {}", text, e));
        }
        result
    }
}

#[async_trait::async_trait]
impl<T: RegisterTransport, S: SensorSource> CommandTarget for Controller<T, S> {
    fn is_authorized(&self, caller: &str) -> bool {
        self.store.is_authorized(caller)
    }

    fn password_matches(&self, password: &str) -> bool {
        !self.config.auth.password.is_empty() && self.config.auth.password == password
    }

    fn register_caller(&mut self, caller: &str) -> Result<bool> {
        self.store.add_caller(caller)
    }

    fn status_text(&self, kw: bool) -> String {
        match self.snapshot.borrow().as_ref() {
            Some(snapshot) if kw => status_kw_text(snapshot),
            Some(snapshot) => status_text(snapshot),
            None => "No readings yet".to_string(),
        }
    }

    async fn state_of_charge(&mut self) -> u16 {
        self.charger.state_of_charge().await
    }

    async fn charger_status(&mut self) -> Result<ChargerStatus> {
        self.charger.status().await
    }

    fn mode(&self) -> Mode {
        self.modes.mode()
    }

    async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.modes.set_mode(mode, &mut self.charger).await
    }

    fn settings(&self) -> &UserSettings {
        &self.settings
    }

    fn save_settings(&mut self, settings: UserSettings) -> Result<()> {
        settings.persist(&mut self.store)?;
        self.settings = settings;
        Ok(())
    }

    async fn disconnect(&mut self, seconds: u64) -> Result<()> {
        self.charger.disconnect(seconds).await
    }

    fn add_metadata(&mut self, text: &str) {
        Controller::add_metadata(self, text);
    }

    fn list_files(&self) -> Result<Vec<String>> {
        match &self.datalog {
            Some(datalog) => datalog.list_files(),
            None => Ok(Vec::new()),
        }
    }
}
