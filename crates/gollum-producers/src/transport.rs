//! The abstract delivery endpoint a [`crate::batched::BatchedProducer`]
//! ships batches to. Concrete wire protocols (Scribe Thrift, Kafka,
//! ElasticSearch, ...) are external collaborators; this trait is the
//! seam they plug into.

use async_trait::async_trait;

use gollum_core::{Message, PluginConfig};

/// Outcome of a single delivery attempt, distinguishing the throttling
/// case (`TryLater`) from a hard failure that should force a
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    TryLater,
}

/// A connection to a downstream sink capable of shipping message
/// slices. `open`/`close` bracket the connection's lifetime; `send` is
/// called once per flush attempt with whatever window the adaptive
/// algorithm currently allows.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads `Address`, `ConnectionBufferSizeKB`, and any other
    /// transport-specific options out of the producer's configuration.
    async fn configure(&mut self, _config: &PluginConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn open(&mut self) -> anyhow::Result<()>;

    async fn send(&mut self, category: &str, messages: &[Message]) -> anyhow::Result<SendOutcome>;

    async fn close(&mut self);
}

/// A `Transport` that just prints each batch's size to stdout. Stands in
/// for a real wire protocol (Scribe, Kafka, ...) in wiring and in the
/// supervisor's built-in registrations — it never returns `TryLater` or
/// fails, so it exercises `BatchedProducer`'s happy path without a live
/// downstream service.
#[derive(Default)]
pub struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&mut self, category: &str, messages: &[Message]) -> anyhow::Result<SendOutcome> {
        println!("[{category}] delivered {} message(s)", messages.len());
        Ok(SendOutcome::Ok)
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use gollum_core::{hash_stream_name, SequenceGenerator};

    #[tokio::test]
    async fn stdout_transport_always_accepts() {
        let mut transport = StdoutTransport;
        transport.open().await.unwrap();
        let seq = SequenceGenerator::new();
        let messages = vec![Message::new(b"hi".to_vec(), hash_stream_name("s"), &seq)];
        assert_eq!(transport.send("cat", &messages).await.unwrap(), SendOutcome::Ok);
        transport.close().await;
    }
}
