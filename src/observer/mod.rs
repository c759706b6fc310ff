//! Capabilities consumed from the external observer (the management UI).
//!
//! Every call is fire-and-forget: results come back through a
//! [`Completion`] that the observer resolves, or drops, later.
//!
//! - [`RulesSink`] - receives coalesced rule diffs
//! - [`PacketSink`] - receives windowed packet batches
//! - [`PermissionPrompt`] - answers interactive access requests
//! - [`Clock`] - wall-clock time used for rule access stamps and statistics
//! - [`ChannelObserver`] - forwards all of the above into a tokio channel

pub mod channel;
pub mod completion;
#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelObserver, ObserverMessage};
pub use completion::{Completion, DeliveryAck, PermissionReply};

use crate::core::model::{Application, PacketBatch, RulesDiff, Timestamp};

pub trait RulesSink: Send + Sync + 'static {
    fn deliver_rules_diff(&self, diff: RulesDiff, ack: DeliveryAck);
}

pub trait PacketSink: Send + Sync + 'static {
    /// The batcher ignores the acknowledgment value; it only waits for the
    /// ack to be resolved or dropped before the next flush.
    fn deliver_packet_batch(&self, batch: PacketBatch, ack: DeliveryAck);
}

pub trait PermissionPrompt: Send + Sync + 'static {
    fn ask_permission(&self, application: &Application, reply: PermissionReply);
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// Everything the firewall needs from its observer.
pub trait Observer: RulesSink + PacketSink + PermissionPrompt + Clock {}

impl<T> Observer for T where T: RulesSink + PacketSink + PermissionPrompt + Clock {}

/// Wall clock in whole Unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as Timestamp)
            .unwrap_or_default()
    }
}
