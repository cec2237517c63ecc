//! Boundary to the relay transport.
//!
//! Socket framing, reconnects and backoff live outside this crate. The core
//! only hands [`ClientMessage`]s to a [`RelaySink`] and is told about inbound
//! text and connection changes through [`crate::RelayService`].

use crate::error::{ClientError, Result};
use crate::message::ClientMessage;
use tokio::sync::mpsc;
use url::Url;

/// Outbound side of the relay transport.
///
/// `send` must not block on the network; implementations queue the message
/// and return. An error means the message was not accepted for delivery.
pub trait RelaySink: Send + Sync + 'static {
    fn send(&self, relay_url: &str, message: ClientMessage) -> Result<()>;
}

/// A [`RelaySink`] that forwards every message over an unbounded channel,
/// for transports that run their own socket tasks.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, ClientMessage)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, ClientMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RelaySink for ChannelSink {
    fn send(&self, relay_url: &str, message: ClientMessage) -> Result<()> {
        self.tx
            .send((relay_url.to_string(), message))
            .map_err(|_| ClientError::PublishFailed(format!("transport for {relay_url} is gone")))
    }
}

/// Canonical relay address: `ws`/`wss` only, lowercase host, no trailing slash.
pub fn normalize_relay_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ClientError::InvalidUrl(format!(
            "relay URL must use ws:// or wss://, got {raw}"
        )));
    }
    if url.host_str().is_none() {
        return Err(ClientError::InvalidUrl(format!("relay URL has no host: {raw}")));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relay_url() {
        assert_eq!(
            normalize_relay_url("wss://Relay.Example.com/").unwrap(),
            "wss://relay.example.com"
        );
        assert_eq!(
            normalize_relay_url(" ws://localhost:7000 ").unwrap(),
            "ws://localhost:7000"
        );
        assert_eq!(
            normalize_relay_url("wss://relay.example.com/nostr/").unwrap(),
            "wss://relay.example.com/nostr"
        );
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert!(matches!(
            normalize_relay_url("https://relay.example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(normalize_relay_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.send(
            "wss://a.example",
            ClientMessage::Close {
                subscription_id: "s".to_string(),
            },
        )
        .unwrap();
        let (relay, message) = rx.recv().await.unwrap();
        assert_eq!(relay, "wss://a.example");
        assert_eq!(message.subscription_id(), Some("s"));

        drop(rx);
        assert!(
            sink.send(
                "wss://a.example",
                ClientMessage::Close {
                    subscription_id: "s".to_string()
                }
            )
            .is_err()
        );
    }
}
