//! Observer bridge over a tokio channel.
//!
//! The transport that actually reaches the management UI lives outside this
//! crate. `ChannelObserver` hands every outbound request, together with its
//! completion, to whatever task drains the receiver. When that task is gone
//! the message is dropped on the spot, so the completion falls back
//! (failed delivery, abandoned ask) without any extra bookkeeping.

use tokio::sync::mpsc;

use super::{Clock, DeliveryAck, PacketSink, PermissionPrompt, PermissionReply, RulesSink, SystemClock};
use crate::core::model::{Application, PacketBatch, RulesDiff, Timestamp};

/// A request waiting to be forwarded to the observer process.
#[derive(Debug)]
pub enum ObserverMessage {
    RulesDiff { diff: RulesDiff, ack: DeliveryAck },
    PacketBatch { batch: PacketBatch, ack: DeliveryAck },
    AskPermission { application: Application, reply: PermissionReply },
}

impl ObserverMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ObserverMessage::RulesDiff { .. } => "rules-diff",
            ObserverMessage::PacketBatch { .. } => "packet-batch",
            ObserverMessage::AskPermission { .. } => "ask-permission",
        }
    }
}

/// Forwards observer calls into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverMessage>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, message: ObserverMessage) {
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            tracing::debug!("Observer channel closed, dropping {}", message.kind());
        }
    }
}

impl RulesSink for ChannelObserver {
    fn deliver_rules_diff(&self, diff: RulesDiff, ack: DeliveryAck) {
        self.forward(ObserverMessage::RulesDiff { diff, ack });
    }
}

impl PacketSink for ChannelObserver {
    fn deliver_packet_batch(&self, batch: PacketBatch, ack: DeliveryAck) {
        self.forward(ObserverMessage::PacketBatch { batch, ack });
    }
}

impl PermissionPrompt for ChannelObserver {
    fn ask_permission(&self, application: &Application, reply: PermissionReply) {
        self.forward(ObserverMessage::AskPermission {
            application: application.clone(),
            reply,
        });
    }
}

impl Clock for ChannelObserver {
    fn now(&self) -> Timestamp {
        SystemClock.now()
    }
}
