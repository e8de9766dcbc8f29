use anyhow::Result;
use hesperus::Config;
use hesperus::driver::{Controller, DriverCommand};
use hesperus::modbus::{MemoryTransport, ModbusClient, RegisterTransport};
use hesperus::notify::StatusBroadcast;
use hesperus::persistence::SettingsStore;
use hesperus::sensor::LineSensor;
use hesperus::tariff::SystemClock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate()?;
    hesperus::logging::init_logging(&config.logging)?;

    info!(
        "Hesperus {} starting up (charger {}:{})",
        env!("APP_VERSION"),
        config.charger.ip,
        config.charger.port
    );

    if config.charger.dry_run {
        warn!("Dry run: register writes go to an in-memory charger");
        run(config, MemoryTransport::new()).await
    } else {
        let client = ModbusClient::new(&config.charger);
        run(config, client).await
    }
}

async fn run<T: RegisterTransport + 'static>(config: Config, transport: T) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<DriverCommand>();

    let store = SettingsStore::load(&config.persistence.settings_file)?;
    let clock = Arc::new(SystemClock::new(config.tz()?));
    let sensor = LineSensor::new(&config.sensor);
    let events = StatusBroadcast::default();

    let mut controller = Controller::new(config.clone(), transport, sensor, store, clock, cmd_rx)?;
    controller.add_sink(Box::new(events.clone()));

    let shutdown = controller.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            shutdown.send(()).ok();
        }
    });

    #[cfg(feature = "web")]
    let web_task = if config.web.enabled {
        let state = hesperus::web::AppState {
            commands: cmd_tx.clone(),
            snapshot: controller.subscribe_snapshot(),
            state: controller.subscribe_state(),
            events,
        };
        let host = config.web.host.clone();
        let port = config.web.port;
        Some(tokio::spawn(async move {
            if let Err(e) = hesperus::web::serve(state, &host, port).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };
    #[cfg(not(feature = "web"))]
    let _ = (&cmd_tx, events);

    let result = controller.run().await;

    #[cfg(feature = "web")]
    if let Some(task) = web_task {
        task.abort();
    }

    match result {
        Ok(()) => {
            info!("Controller shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Controller failed with error: {}", e);
            Err(anyhow::anyhow!("Controller error: {}", e))
        }
    }
}
