use crate::runtime::config::{Command, ConfigError, RuntimeConfig};
use crate::runtime::logging::init_tracing;
use crate::runtime::service::{ServiceError, ServiceManager};
use crate::runtime::telemetry;
use scale_core::{
    AccessSerializer, LinkExchanger, SerializerConfig, SimulatedConnector, SimulatedLoad,
    WeightReading,
};
use scale_io::{HttpConfig, HttpError, HttpFacade, SerialConnector, SerialSettings};
use std::sync::{atomic::AtomicBool, mpsc, Arc};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid arguments: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to start scale access worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("cannot locate own executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("cannot install termination handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub fn run_from_args() -> Result<(), AppError> {
    let config = RuntimeConfig::from_env()?;
    if config.show_help {
        RuntimeConfig::print_help();
        return Ok(());
    }
    run(config)
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    // Kept alive until exit so the file writer flushes.
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    match config.command {
        Command::Run => serve(&config),
        Command::Install => {
            let exe = std::env::current_exe().map_err(AppError::CurrentExe)?;
            let unit = ServiceManager::system()?.install(&exe, &config)?;
            info!(unit = %unit.display(), "Installed; start with `scale-bridge start`");
            Ok(())
        }
        Command::Uninstall => Ok(ServiceManager::system()?.uninstall()?),
        Command::Start => Ok(ServiceManager::system()?.start()?),
        Command::Stop => Ok(ServiceManager::system()?.stop()?),
    }
}

fn spawn_serializer(config: &RuntimeConfig) -> Result<AccessSerializer, AppError> {
    let serializer_config = SerializerConfig {
        staleness: Duration::from_millis(config.staleness_ms),
        ..Default::default()
    };

    let spawned = match config.simulate {
        Some(weight) => {
            info!(weight, "Using simulated scale");
            let load = SimulatedLoad::new(WeightReading::stable(weight));
            AccessSerializer::spawn(
                LinkExchanger::new(SimulatedConnector::new(load)),
                serializer_config,
            )
        }
        None => {
            let settings = SerialSettings {
                port_name: config.serial_port.clone(),
                baud_rate: config.baud_rate,
                ..Default::default()
            };
            info!(
                port = %settings.port_name,
                baud = settings.baud_rate,
                "Using serial scale"
            );
            AccessSerializer::spawn(
                LinkExchanger::new(SerialConnector::new(settings)),
                serializer_config,
            )
        }
    };
    spawned.map_err(AppError::Spawn)
}

fn serve(config: &RuntimeConfig) -> Result<(), AppError> {
    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    // SIGINT/SIGTERM (what `systemctl stop` sends) end the wait below, so
    // the facade and serializer shut down in order.
    let (terminate_tx, terminate) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = terminate_tx.send(());
    })?;

    let serializer = spawn_serializer(config)?;

    let http_config = HttpConfig {
        bind_addr: config.host.clone(),
        ..Default::default()
    };
    let facade = match HttpFacade::start(&http_config, serializer.handle()) {
        Ok(facade) => facade,
        Err(e) => {
            warn!(error = %e, "HTTP facade failed to start");
            serializer.join();
            return Err(e.into());
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let updater = telemetry::start_metrics_updater(serializer.handle(), Arc::clone(&stop));

    info!(addr = %facade.bind_addr(), "Scale bridge running");

    match wait_for_stop(config.run_seconds, terminate) {
        StopReason::Elapsed => info!("Run duration elapsed"),
        StopReason::Terminated => info!("Termination requested"),
    }

    facade.stop();
    let stats = serializer.handle().stats();
    serializer.join();
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = updater.join();

    info!(
        requests_served = stats.requests_served,
        exchanges = stats.exchanges,
        exchange_failures = stats.exchange_failures,
        cache_hits = stats.cache_hits,
        "Run complete"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Elapsed,
    Terminated,
}

/// Block until a termination request arrives or `run_seconds` elapse.
fn wait_for_stop(run_seconds: Option<u64>, terminate: mpsc::Receiver<()>) -> StopReason {
    match run_seconds {
        Some(seconds) => {
            info!(seconds, "Running for limited duration");
            match terminate.recv_timeout(Duration::from_secs(seconds)) {
                Ok(()) => StopReason::Terminated,
                Err(_) => StopReason::Elapsed,
            }
        }
        None => {
            // the sender lives in the handler for the rest of the process
            let _ = terminate.recv();
            StopReason::Terminated
        }
    }
}
