use anyhow::{bail, Context, Result};
use device_command::command::{spawn_response_workers, CommandMessage, CommandService, CorrelationRegister};
use device_command::marshal::JsonMarshaller;
use device_command::metadata::StaticRepository;
use device_command::timeseries::StaticTimeSeries;
use device_command::transport::TcpProducer;
use device_command::DispatchConfig;
use device_command_shared::defaults;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "usage: device-command <metadata.json> <commands.json> [timeout]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (metadata_path, commands_path) = match (args.first(), args.get(1)) {
        (Some(m), Some(c)) => (m.clone(), c.clone()),
        _ => bail!(USAGE),
    };
    let timeout = args.get(2).cloned();

    let config = DispatchConfig::from_env();
    info!("Device command dispatcher starting: {}", config.source);
    info!("  connector: {}", config.connector_addr);
    info!("  default timeout: {:?}", config.default_timeout);

    // An unusable repository aborts startup
    let repository = StaticRepository::from_file(&metadata_path)?;
    let timeseries = match std::env::var("DEVICE_COMMAND_LAST_VALUES") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("unable to read last values from {}", path))?;
            StaticTimeSeries::from_json(&json)?
        }
        Err(_) => StaticTimeSeries::default(),
    };

    let commands_json = std::fs::read_to_string(&commands_path)
        .with_context(|| format!("unable to read commands from {}", commands_path))?;
    let commands: Vec<CommandMessage> =
        serde_json::from_str(&commands_json).context("invalid command list")?;

    let shutdown = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(defaults::OUTBOUND_QUEUE);
    let producer = TcpProducer::new(&config, inbound_tx, shutdown.clone());
    let register = Arc::new(CorrelationRegister::new(shutdown.clone()));
    let workers = config.response_workers;
    let token = std::env::var("DEVICE_COMMAND_TOKEN").unwrap_or_default();

    let service = CommandService::new(
        config,
        Arc::new(repository),
        Arc::new(JsonMarshaller),
        Arc::new(timeseries),
        Arc::new(producer),
        register,
    );
    let worker_handles =
        spawn_response_workers(service.response_handler(), workers, inbound_rx, shutdown.clone());
    info!("{} response workers started", worker_handles.len());

    tokio::select! {
        results = service.batch(&token, commands, timeout.as_deref()) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
        }
    }

    shutdown.cancel();
    for result in futures::future::join_all(worker_handles).await {
        if let Err(e) = result {
            error!("response worker failed: {}", e);
        }
    }
    Ok(())
}
