//! TCP command producer with persistent connection and automatic reconnection

use super::traits::CommandProducer;
use crate::config::DispatchConfig;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use device_command_shared::{codec, codec::FrameDecoder, defaults, Envelope};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct TcpSettings {
    address: String,
    connect_timeout: Duration,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
}

/// Sends framed command envelopes to a device connector
///
/// Inbound frames (responses and errors) are forwarded to the channel the
/// response workers consume.
pub struct TcpProducer {
    outbound_tx: mpsc::Sender<Envelope>,
}

impl TcpProducer {
    /// Create a producer and start its connection loop
    pub fn new(
        config: &DispatchConfig,
        inbound_tx: mpsc::Sender<Envelope>,
        shutdown: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(defaults::OUTBOUND_QUEUE);
        let settings = TcpSettings {
            address: config.connector_addr.clone(),
            connect_timeout: config.connect_timeout,
            reconnect_delay: config.reconnect_delay,
            max_reconnect_delay: config.max_reconnect_delay,
        };

        tokio::spawn(async move {
            connection_loop(settings, outbound_rx, inbound_tx, shutdown).await;
        });

        Self { outbound_tx }
    }
}

#[async_trait]
impl CommandProducer for TcpProducer {
    async fn send_command(&self, envelope: Envelope) -> Result<()> {
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop(
    settings: TcpSettings,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    inbound_tx: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
) {
    let mut reconnect_delay = settings.reconnect_delay;

    loop {
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => break,
            attempt = timeout(settings.connect_timeout, TcpStream::connect(&settings.address)) => attempt,
        };

        match attempt {
            Ok(Ok(stream)) => {
                info!("Connected to connector at {}", settings.address);
                reconnect_delay = settings.reconnect_delay;

                match handle_connection(stream, &mut outbound_rx, &inbound_tx, &shutdown).await {
                    Ok(()) => break,
                    Err(reason) => warn!("Disconnected from connector: {}", reason),
                }
            }
            Ok(Err(e)) => warn!("Connection to {} failed: {}", settings.address, e),
            Err(_) => warn!("Connection to {} timed out", settings.address),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, settings.max_reconnect_delay);
    }

    info!("Connection loop stopped");
}

/// Pump one connection; `Ok` means stop for good, `Err` means reconnect
async fn handle_connection(
    stream: TcpStream,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    inbound_tx: &mpsc::Sender<Envelope>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut read_buf = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),

            outbound = outbound_rx.recv() => {
                let Some(envelope) = outbound else {
                    // every producer handle is gone
                    return Ok(());
                };
                let encoded = codec::encode(&envelope)?;
                writer.write_all(&encoded).await?;
            }

            read = reader.read_buf(&mut read_buf) => {
                if read? == 0 {
                    bail!("Connector closed connection");
                }
                decoder.extend(&read_buf);
                read_buf.clear();

                while let Some(envelope) = decoder.decode_next()? {
                    debug!("inbound frame for {:?}", envelope.correlation_id());
                    if inbound_tx.send(envelope).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_command_shared::{envelope, TaskRequest};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_commands_are_framed_and_responses_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // connector answering every command with an error frame
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                decoder.extend(&buf[..n]);
                while let Some(env) = decoder.decode_next().unwrap() {
                    let id = env.correlation_id().unwrap_or_default().to_string();
                    let reply = codec::encode(&Envelope::error("test", &id, "rejected")).unwrap();
                    socket.write_all(&reply).await.unwrap();
                }
            }
        });

        let config = DispatchConfig {
            connector_addr: addr.to_string(),
            ..Default::default()
        };
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let producer = TcpProducer::new(&config, inbound_tx, shutdown.clone());

        let request = TaskRequest {
            correlation_id: "c-1".into(),
            ..Default::default()
        };
        producer
            .send_command(Envelope::command("test", request))
            .await
            .unwrap();

        let reply = timeout(Duration::from_secs(5), inbound_rx.recv())
            .await
            .expect("no reply in time")
            .expect("channel closed");
        match reply.payload {
            Some(envelope::Payload::Error(err)) => {
                assert_eq!(err.correlation_id, "c-1");
                assert_eq!(err.message, "rejected");
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        shutdown.cancel();
        assert_eq!(producer.name(), "tcp");
    }
}
