//! Async message bus — decouples the transport channels from the router
//! and the delivery dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub content: String,
    /// Set when the message is an inline-button tap rather than typed text.
    pub callback: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(channel: &str, sender_id: &str, chat_id: &str, content: String) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content,
            callback: None,
            timestamp: Utc::now(),
        }
    }

    pub fn button_tap(channel: &str, sender_id: &str, chat_id: &str, data: String) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: String::new(),
            callback: Some(data),
            timestamp: Utc::now(),
        }
    }
}

/// One inline button: visible label plus the callback payload sent back on tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    /// Inline keyboard rows; empty for a plain text message.
    #[serde(default)]
    pub keyboard: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn chat(channel: &str, chat_id: &str, content: String) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content,
            keyboard: Vec::new(),
        }
    }

    pub fn with_keyboard(
        channel: &str,
        chat_id: &str,
        content: String,
        keyboard: Vec<Vec<Button>>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content,
            keyboard,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

/// Capacity of the internal channels.
const BUS_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            outbound_tx,
        }
    }

    /// Get a sender handle that channels use to push inbound messages.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Take the inbound receiver (can only be called once — the router owns it).
    pub fn take_inbound_receiver(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.take()
    }

    /// Subscribe to outbound messages (each channel gets its own receiver).
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound_tx.subscribe()
    }

    /// Clone the outbound sender (router and dispatcher both publish).
    pub fn outbound_tx_clone(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
