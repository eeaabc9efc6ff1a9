//! One dispatcher connection to the simulated connector

use anyhow::Result;
use device_command_shared::{codec, codec::FrameDecoder, envelope, Envelope, TaskRequest};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SOURCE: &str = "device-sim";

/// How the simulated devices behave
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Answer every command with an error message
    pub fail: bool,
    /// Delay before answering
    pub delay: Duration,
    /// Output returned for commands without input (measurements)
    pub measurement: HashMap<String, String>,
}

/// Build the answer for one command
///
/// Commands carrying input are echoed back; measurements get the configured output.
pub fn answer(config: &SimConfig, request: TaskRequest) -> Envelope {
    if config.fail {
        let message = format!("device {} rejected the command", request.device_id);
        return Envelope::error(SOURCE, &request.correlation_id, message);
    }
    let output = if request.input.is_empty() {
        config.measurement.clone()
    } else {
        request.input.clone()
    };
    Envelope::response(SOURCE, request, output)
}

/// Serve one connection until the dispatcher disconnects
pub async fn serve(stream: TcpStream, addr: SocketAddr, config: Arc<SimConfig>) -> Result<()> {
    let (mut reader, writer) = tokio::io::split(stream);
    let writer: Arc<Mutex<WriteHalf<TcpStream>>> = Arc::new(Mutex::new(writer));
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            info!("Dispatcher disconnected: {}", addr);
            return Ok(());
        }
        decoder.extend(&buf[..n]);

        while let Some(envelope) = decoder.decode_next()? {
            let request = match envelope.payload {
                Some(envelope::Payload::Command(request)) => request,
                other => {
                    warn!("[{}] ignoring non-command payload: {:?}", addr, other);
                    continue;
                }
            };
            debug!(
                "[{}] COMMAND {} for {}/{} via {}",
                addr, request.correlation_id, request.device_id, request.service_id, request.protocol_handler
            );

            // answers may leave out of order
            let writer = writer.clone();
            let config = config.clone();
            tokio::spawn(async move {
                if !config.delay.is_zero() {
                    tokio::time::sleep(config.delay).await;
                }
                let reply = answer(&config, request);
                match codec::encode(&reply) {
                    Ok(bytes) => {
                        if let Err(e) = writer.lock().await.write_all(&bytes).await {
                            warn!("Failed to answer {}: {}", addr, e);
                        }
                    }
                    Err(e) => warn!("Failed to encode answer: {}", e),
                }
            });
        }
    }
}
