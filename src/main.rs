use std::{process, sync::Arc};

use scalebridge::{
    config::Config,
    core::{
        bridge::{Bridge, Schedule},
        device::SerialDevice,
        publisher::{EventPublisher, NoopPublisher},
        readiness::Readiness,
    },
    logger::LoggerManager,
    print_error, print_info, print_warn,
};
use scalebridge_mqtt::{MqttInstance, MqttManager};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => print_info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => print_warn!("Ignoring .env file: {}", e),
    }
}

fn log_settings(cfg: &Config) {
    info!(
        "Serial: {} @ {} baud, end-of-frame 0x{:02X}",
        cfg.serial.port, cfg.serial.baud_rate, cfg.serial.end_of_frame
    );
    info!(
        "Stability: {} mode, {} settled readings required",
        cfg.stability.mode, cfg.stability.required_stable
    );
    if cfg.dry_run {
        warn!("Dry run: events are logged, not published");
    } else {
        info!(
            "MQTT: broker {}, topic {}",
            cfg.transport.address(),
            cfg.transport.topic
        );
    }
    debug!("{:#?}", cfg);
}

fn start_transport(
    cfg: &Config,
    readiness: &Readiness,
) -> (Arc<dyn EventPublisher>, Option<MqttInstance>) {
    if cfg.dry_run {
        return (Arc::new(NoopPublisher), None);
    }

    let instance = MqttManager::from_config(cfg.transport.clone())
        .and_then(|manager| manager.build_and_start())
        .unwrap_or_else(|e| {
            error!("Failed to start MQTT client: {}", e);
            process::exit(1);
        });
    let _listener = readiness.start_listening(instance.state_receiver(), cfg.transport.address());

    (Arc::new(instance.publisher()), Some(instance))
}

#[tokio::main]
async fn main() {
    load_dotenv();

    let cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting scalebridge version {}...", env!("CARGO_PKG_VERSION"));
    log_settings(&cfg);

    let readiness = Readiness::new();
    let (publisher, instance) = start_transport(&cfg, &readiness);

    let bridge = Bridge::new(
        Box::new(SerialDevice::new(cfg.serial.clone())),
        publisher,
        &cfg.stability,
        Schedule::from(&cfg.schedule),
        readiness,
    )
    .unwrap_or_else(|e| {
        error!("Failed to set up observation loop: {}", e);
        process::exit(1);
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    bridge.run(cancel).await;

    if let Some(instance) = instance {
        instance.shutdown().await;
    }
    info!("Shutdown complete");
}
