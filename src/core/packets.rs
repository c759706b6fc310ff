//! Windowed packet telemetry for the observer.
//!
//! Packets are funneled through a channel into one task, which owns the
//! current window and flushes it on a fixed period. A flush is skipped while
//! the previous batch is still with the observer, so a slow observer makes
//! the next window longer instead of growing a backlog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::model::{PacketBatch, PacketEvent};
use crate::error::AppError;
use crate::observer::{DeliveryAck, PacketSink};

/// Accumulation state for the current window.
#[derive(Debug, Default)]
pub struct PacketWindow {
    batch: PacketBatch,
    in_flight: bool,
}

impl PacketWindow {
    pub fn record(&mut self, event: PacketEvent) {
        if event.size == 0 {
            return;
        }
        let info = event.info();
        self.batch.add(event.application, info);
    }

    /// Swap out the accumulated batch, unless a flush is already in flight
    /// or there is nothing to send.
    pub fn begin_flush(&mut self) -> Option<PacketBatch> {
        if self.in_flight || self.batch.is_empty() {
            return None;
        }
        self.in_flight = true;
        Some(std::mem::take(&mut self.batch))
    }

    pub fn finish_flush(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending_packets(&self) -> usize {
        self.batch.packet_count()
    }
}

enum Command {
    Packet(PacketEvent),
    FlushFinished,
}

/// Handle to the running batcher task. Dropping it stops the task.
pub struct PacketTelemetryBatcher {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl PacketTelemetryBatcher {
    /// Spawn the batcher on the current tokio runtime.
    pub fn start(sink: Arc<dyn PacketSink>, period: Duration) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run(rx, tx.clone(), sink, period));
        tracing::debug!("Packet telemetry batcher started ({period:?} window)");
        Ok(Self { tx, task })
    }

    /// Queue a packet for the current window. Zero-sized packets are dropped.
    pub fn record_packet(&self, event: PacketEvent) {
        if event.size == 0 {
            return;
        }
        if self.tx.send(Command::Packet(event)).is_err() {
            tracing::trace!("Packet batcher stopped, packet dropped");
        }
    }
}

impl Drop for PacketTelemetryBatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    sink: Arc<dyn PacketSink>,
    period: Duration,
) {
    let mut window = PacketWindow::default();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            command = rx.recv() => match command {
                Some(Command::Packet(event)) => window.record(event),
                Some(Command::FlushFinished) => window.finish_flush(),
                None => break,
            },
            _ = ticker.tick() => {
                let Some(batch) = window.begin_flush() else {
                    if window.is_in_flight() {
                        tracing::trace!("Previous packet batch still in flight, skipping flush");
                    }
                    continue;
                };
                tracing::debug!(
                    "Flushing {} packets for {} applications",
                    batch.packet_count(),
                    batch.packets.len()
                );
                let done = tx.clone();
                let ack = DeliveryAck::delivery(move |_| {
                    let _ = done.send(Command::FlushFinished);
                });
                sink.deliver_packet_batch(batch, ack);
            }
        }
    }
}
