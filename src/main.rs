use std::{process, sync::OnceLock};

use mosquitto_harness::{
    config::Config, logger::LoggerManager, print_error, Broker, BrokerError, OutputEvent,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

/// Re-emits broker output as log events, one per line, under the `broker` target.
fn forward_output(mut events: broadcast::Receiver<OutputEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending = [String::new(), String::new()];
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} broker output chunks", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let (slot, stream) = match event {
                OutputEvent::Stdout(_) => (0, "stdout"),
                OutputEvent::Stderr(_) => (1, "stderr"),
            };
            let buffer = &mut pending[slot];
            buffer.push_str(&String::from_utf8_lossy(event.bytes()));
            while let Some(end) = buffer.find('\n') {
                let line: String = buffer.drain(..=end).collect();
                info!(target: "broker", stream, "{}", line.trim_end());
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!(
        "Starting mosquitto-harness version {}...",
        env!("CARGO_PKG_VERSION")
    );
    info!("Log level: {}", cfg.logger.level);

    let mut broker = Broker::new(cfg.broker.clone());
    debug!("{:#?}", broker.config());
    let forwarder = forward_output(broker.subscribe());

    if let Err(e) = broker.start().await {
        error!("Failed to start broker: {}", e);
        if matches!(e, BrokerError::ReadinessTimeout(_)) {
            error!("Captured broker output:\n{}", broker.logs());
        }
        process::exit(1);
    }
    for url in broker.urls() {
        info!("Listening on {}", url);
    }
    if let Some(dir) = broker.working_dir() {
        debug!("Working directory: {}", dir.display());
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, stopping broker...");

    if let Err(e) = broker.stop().await {
        error!("Failed to stop broker cleanly: {}", e);
    }
    drop(broker);
    if let Err(e) = forwarder.await {
        debug!("Output forwarder ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
