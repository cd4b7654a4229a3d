//! Async message bus — bounded inbound/outbound FIFO queues.
//!
//! - Adapters publish to `inbound` (user messages arriving)
//! - The agent loop consumes from `inbound`, processes, publishes to `outbound`
//! - The channel manager consumes from `outbound` and routes to adapters
//!
//! Publishes block when the queue is full; growth on the inbound side is
//! bounded because only adapters and the subagent manager publish there.

use super::types::{InboundMessage, OutboundMessage};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>,
}

impl MessageBus {
    /// Create a new message bus with the given queue capacity.
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
        }
    }

    /// Publish a message from an adapter to the agent (inbound).
    pub async fn publish_inbound(
        &self,
        msg: InboundMessage,
    ) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg).await
    }

    /// Consume the next inbound message (blocks until available).
    /// Returns `None` when all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next inbound message, waiting at most `deadline`.
    ///
    /// `Ok(Some(msg))` = a message arrived, `Ok(None)` = channel closed,
    /// `Err(_)` = deadline elapsed with nothing to consume.
    pub async fn consume_inbound_timeout(
        &self,
        deadline: Duration,
    ) -> Result<Option<InboundMessage>, tokio::time::error::Elapsed> {
        tokio::time::timeout(deadline, self.consume_inbound()).await
    }

    /// Publish a response from the agent to an adapter (outbound).
    pub async fn publish_outbound(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.outbound_tx.send(msg).await
    }

    /// Consume the next outbound message (blocks until available).
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Consume the next outbound message, waiting at most `deadline`.
    pub async fn consume_outbound_timeout(
        &self,
        deadline: Duration,
    ) -> Result<Option<OutboundMessage>, tokio::time::error::Elapsed> {
        tokio::time::timeout(deadline, self.consume_outbound()).await
    }

    /// Clone of the inbound sender, for adapters.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Clone of the outbound sender, for tools that push messages.
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbound_flow() {
        let bus = MessageBus::new(10);
        bus.publish_inbound(InboundMessage::new("cli", "u", "d", "Hello!"))
            .await
            .unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "cli");
        assert_eq!(received.content, "Hello!");
    }

    #[tokio::test]
    async fn test_outbound_flow() {
        let bus = MessageBus::new(10);
        bus.publish_outbound(OutboundMessage::new("discord", "channel_42", "Response"))
            .await
            .unwrap();

        let received = bus.consume_outbound().await.unwrap();
        assert_eq!(received.channel, "discord");
        assert_eq!(received.content, "Response");
    }

    #[tokio::test]
    async fn test_fifo_ordering() {
        let bus = MessageBus::new(10);
        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "u", "d", format!("msg-{i}")))
                .await
                .unwrap();
        }

        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-1");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-2");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "msg-3");
    }

    #[tokio::test]
    async fn test_consume_timeout_elapses() {
        let bus = MessageBus::new(10);
        let result = bus
            .consume_inbound_timeout(Duration::from_millis(20))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_consume_timeout_delivers() {
        let bus = MessageBus::new(10);
        bus.publish_inbound(InboundMessage::new("cli", "u", "d", "quick"))
            .await
            .unwrap();

        let msg = bus
            .consume_inbound_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.content, "quick");
    }

    #[tokio::test]
    async fn test_multiple_producers() {
        let bus = std::sync::Arc::new(MessageBus::new(10));

        let b1 = bus.clone();
        let b2 = bus.clone();
        let h1 = tokio::spawn(async move {
            b1.publish_inbound(InboundMessage::new("a", "u1", "c1", "from a"))
                .await
                .unwrap();
        });
        let h2 = tokio::spawn(async move {
            b2.publish_inbound(InboundMessage::new("b", "u2", "c2", "from b"))
                .await
                .unwrap();
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let r1 = bus.consume_inbound().await.unwrap();
        let r2 = bus.consume_inbound().await.unwrap();
        let channels = [r1.channel.as_str(), r2.channel.as_str()];
        assert!(channels.contains(&"a"));
        assert!(channels.contains(&"b"));
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let bus = MessageBus::new(10);

        bus.publish_inbound(InboundMessage::new("cli", "user_42", "chat_99", "What is 2+2?"))
            .await
            .unwrap();

        let received = bus.consume_inbound().await.unwrap();
        let response = OutboundMessage::reply_to(&received, "The answer is 4.");
        bus.publish_outbound(response).await.unwrap();

        let outbound = bus.consume_outbound().await.unwrap();
        assert_eq!(outbound.channel, "cli");
        assert_eq!(outbound.chat_id, "chat_99");
        assert_eq!(outbound.content, "The answer is 4.");
    }
}
