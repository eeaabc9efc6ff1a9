mod session;

use anyhow::{Context, Result};
use device_command_shared::defaults;
use session::SimConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn config_from_env() -> Result<SimConfig> {
    let fail = std::env::var("SIM_FAIL").is_ok_and(|v| v == "1" || v == "true");
    let delay = match std::env::var("SIM_DELAY_MS") {
        Ok(ms) => Duration::from_millis(ms.parse().context("invalid SIM_DELAY_MS")?),
        Err(_) => Duration::ZERO,
    };
    let measurement: HashMap<String, String> = match std::env::var("SIM_OUTPUT") {
        Ok(json) => serde_json::from_str(&json).context("SIM_OUTPUT must map segment names to strings")?,
        Err(_) => HashMap::new(),
    };

    Ok(SimConfig {
        fail,
        delay,
        measurement,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = std::env::var("SIM_ADDR").unwrap_or_else(|_| defaults::CONNECTOR_ADDR.to_string());
    let config = Arc::new(config_from_env()?);

    let listener = TcpListener::bind(&addr).await?;
    info!("Device simulator listening on {}", addr);
    info!("  fail={} delay={:?}", config.fail, config.delay);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Connection from: {}", peer);

        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = session::serve(socket, peer, config).await {
                error!("Session {} ended: {}", peer, e);
            }
        });
    }
}
