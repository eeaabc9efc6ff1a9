//! Transport trait abstraction for pluggable command producers

use anyhow::Result;
use async_trait::async_trait;
use device_command_shared::Envelope;

/// Fire-and-forget submission of commands to device connectors
///
/// Success only means the message was accepted for delivery; the outcome
/// arrives later through the response and error callbacks.
#[async_trait]
pub trait CommandProducer: Send + Sync {
    async fn send_command(&self, envelope: Envelope) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
