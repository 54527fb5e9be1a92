//! Messaging transport seam.
//!
//! The wire is an external collaborator: the directory only needs
//! request/response round trips, one-way sends, and a way to receive
//! unsolicited messages addressed to it. [`InProcessHub`] wires endpoints
//! together inside one process for embedding tests and simulations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::NodemapError;

/// An unsolicited message delivered to a subscribed topic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Address of the sending endpoint, usable as a reply destination.
    pub sender: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Request/response round trip. No built-in timeout; callers own
    /// cancellation policy.
    async fn request(
        &self,
        topic: &str,
        payload: Vec<u8>,
        destination: &str,
    ) -> Result<Vec<u8>, NodemapError>;

    /// One-way send.
    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        destination: &str,
    ) -> Result<(), NodemapError>;

    /// Receive unsolicited messages addressed to this endpoint on `topic`.
    /// Later subscriptions to the same topic replace earlier ones.
    fn subscribe(&self, topic: &str) -> mpsc::Receiver<InboundMessage>;

    /// The address remote peers use to reach this endpoint.
    fn local_address(&self) -> String;
}

/// Handler answering requests addressed to one (address, topic) pair.
pub type Responder = Arc<dyn Fn(Vec<u8>) -> Result<Vec<u8>, NodemapError> + Send + Sync>;

/// Routes messages between in-process endpoints by (address, topic).
#[derive(Default)]
pub struct InProcessHub {
    responders: Mutex<HashMap<(String, String), Responder>>,
    subscribers: Mutex<HashMap<(String, String), mpsc::Sender<InboundMessage>>>,
}

impl InProcessHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport bound to `address` on this hub.
    pub fn endpoint(self: &Arc<Self>, address: &str) -> InProcessTransport {
        InProcessTransport {
            hub: Arc::clone(self),
            address: address.to_string(),
        }
    }

    /// Register the request handler for `topic` at `address`.
    pub fn respond(&self, address: &str, topic: &str, responder: Responder) {
        self.responders
            .lock()
            .insert((address.to_string(), topic.to_string()), responder);
    }
}

pub struct InProcessTransport {
    hub: Arc<InProcessHub>,
    address: String,
}

#[async_trait]
impl MessagingTransport for InProcessTransport {
    async fn request(
        &self,
        topic: &str,
        payload: Vec<u8>,
        destination: &str,
    ) -> Result<Vec<u8>, NodemapError> {
        let responder = self
            .hub
            .responders
            .lock()
            .get(&(destination.to_string(), topic.to_string()))
            .cloned()
            .ok_or_else(|| {
                NodemapError::Transport(format!("no responder for {} at {}", topic, destination))
            })?;
        responder(payload)
    }

    async fn send(
        &self,
        topic: &str,
        payload: Vec<u8>,
        destination: &str,
    ) -> Result<(), NodemapError> {
        let sender = self
            .hub
            .subscribers
            .lock()
            .get(&(destination.to_string(), topic.to_string()))
            .cloned()
            .ok_or_else(|| {
                NodemapError::Transport(format!("no subscriber for {} at {}", topic, destination))
            })?;
        sender
            .send(InboundMessage {
                sender: self.address.clone(),
                payload,
            })
            .await
            .map_err(|_| NodemapError::ChannelClosed)
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(64);
        self.hub
            .subscribers
            .lock()
            .insert((self.address.clone(), topic.to_string()), tx);
        rx
    }

    fn local_address(&self) -> String {
        self.address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_response() {
        let hub = InProcessHub::new();
        hub.respond(
            "service",
            "echo",
            Arc::new(|payload: Vec<u8>| -> Result<Vec<u8>, NodemapError> {
                let mut reply = b"re:".to_vec();
                reply.extend_from_slice(&payload);
                Ok(reply)
            }),
        );

        let client = hub.endpoint("client");
        let reply = client.request("echo", b"hello".to_vec(), "service").await.unwrap();
        assert_eq!(reply, b"re:hello");
    }

    #[tokio::test]
    async fn test_request_unknown_destination() {
        let hub = InProcessHub::new();
        let client = hub.endpoint("client");
        let result = client.request("echo", vec![], "nowhere").await;
        assert!(matches!(result, Err(NodemapError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_and_subscribe() {
        let hub = InProcessHub::new();
        let receiver_endpoint = hub.endpoint("receiver");
        let mut inbound = receiver_endpoint.subscribe("updates");

        let sender_endpoint = hub.endpoint("sender");
        sender_endpoint
            .send("updates", b"payload".to_vec(), "receiver")
            .await
            .unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.sender, "sender");
        assert_eq!(message.payload, b"payload");
    }

    #[tokio::test]
    async fn test_send_without_subscriber() {
        let hub = InProcessHub::new();
        let sender = hub.endpoint("sender");
        let result = sender.send("updates", vec![], "receiver").await;
        assert!(matches!(result, Err(NodemapError::Transport(_))));
    }

    #[tokio::test]
    async fn test_local_address() {
        let hub = InProcessHub::new();
        assert_eq!(hub.endpoint("node-a:10000").local_address(), "node-a:10000");
    }
}
