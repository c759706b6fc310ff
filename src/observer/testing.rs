//! Recording observer doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use super::{Clock, DeliveryAck, PacketSink, PermissionPrompt, PermissionReply, RulesSink};
use crate::core::model::{Application, PacketBatch, RulesDiff, Timestamp};

pub const HOUR: Timestamp = 3600;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(now: Timestamp) -> Self {
        Self { now: AtomicI64::new(now) }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Keeps every delivery and holds its ack until the test resolves it.
#[derive(Debug, Default)]
pub struct RecordingRulesSink {
    diffs: Mutex<Vec<RulesDiff>>,
    acks: Mutex<VecDeque<DeliveryAck>>,
}

impl RecordingRulesSink {
    pub fn diffs(&self) -> Vec<RulesDiff> {
        self.diffs.lock().unwrap().clone()
    }

    pub fn last_diff(&self) -> Option<RulesDiff> {
        self.diffs.lock().unwrap().last().cloned()
    }

    pub fn in_flight(&self) -> usize {
        self.acks.lock().unwrap().len()
    }

    /// Resolve the oldest outstanding ack. The ack is taken out of the lock
    /// first because resolving it may deliver the next diff re-entrantly.
    pub fn ack(&self, success: bool) {
        let ack = self.acks.lock().unwrap().pop_front().expect("no delivery in flight");
        ack.complete(success);
    }

    /// Drop the oldest outstanding ack without answering.
    pub fn lose(&self) {
        let ack = self.acks.lock().unwrap().pop_front().expect("no delivery in flight");
        drop(ack);
    }
}

impl RulesSink for RecordingRulesSink {
    fn deliver_rules_diff(&self, diff: RulesDiff, ack: DeliveryAck) {
        self.diffs.lock().unwrap().push(diff);
        self.acks.lock().unwrap().push_back(ack);
    }
}

/// Rules sink that acknowledges every diff immediately.
#[derive(Debug, Default)]
pub struct AutoAckRulesSink {
    diffs: Mutex<Vec<RulesDiff>>,
}

impl AutoAckRulesSink {
    pub fn diffs(&self) -> Vec<RulesDiff> {
        self.diffs.lock().unwrap().clone()
    }
}

impl RulesSink for AutoAckRulesSink {
    fn deliver_rules_diff(&self, diff: RulesDiff, ack: DeliveryAck) {
        self.diffs.lock().unwrap().push(diff);
        ack.succeed();
    }
}

#[derive(Debug, Default)]
pub struct RecordingPacketSink {
    batches: Mutex<Vec<PacketBatch>>,
    acks: Mutex<VecDeque<DeliveryAck>>,
}

impl RecordingPacketSink {
    pub fn batches(&self) -> Vec<PacketBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn ack(&self) {
        let ack = self.acks.lock().unwrap().pop_front().expect("no batch in flight");
        ack.succeed();
    }
}

impl PacketSink for RecordingPacketSink {
    fn deliver_packet_batch(&self, batch: PacketBatch, ack: DeliveryAck) {
        self.batches.lock().unwrap().push(batch);
        self.acks.lock().unwrap().push_back(ack);
    }
}

/// Records every question and parks the reply for the test to answer.
#[derive(Debug, Default)]
pub struct RecordingPrompt {
    asked: Mutex<Vec<Application>>,
    replies: Mutex<VecDeque<PermissionReply>>,
}

impl RecordingPrompt {
    pub fn asked(&self) -> Vec<Application> {
        self.asked.lock().unwrap().clone()
    }

    pub fn take_reply(&self) -> PermissionReply {
        self.replies.lock().unwrap().pop_front().expect("no question outstanding")
    }
}

impl PermissionPrompt for RecordingPrompt {
    fn ask_permission(&self, application: &Application, reply: PermissionReply) {
        self.asked.lock().unwrap().push(application.clone());
        self.replies.lock().unwrap().push_back(reply);
    }
}
