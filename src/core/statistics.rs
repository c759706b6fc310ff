//! Per-application traffic statistics over a sliding day.
//!
//! Each application owns a fixed ring of hourly buckets anchored at `from`,
//! the start of the oldest bucket. Expired buckets are evicted lazily on the
//! next write, so no sweeper thread is needed and the ring never holds data
//! older than the retention window.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::{STATISTICS_BUCKET_COUNT, STATISTICS_BUCKET_SECS};
use crate::core::model::{Application, Direction, PacketEvent, Timestamp};
use crate::observer::Clock;

const WINDOW_SECS: i64 = STATISTICS_BUCKET_SECS * STATISTICS_BUCKET_COUNT as i64;

/// Bytes seen during one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficBucket {
    pub incoming_bytes: u64,
    pub outgoing_bytes: u64,
}

impl TrafficBucket {
    pub fn is_empty(&self) -> bool {
        self.incoming_bytes == 0 && self.outgoing_bytes == 0
    }

    fn add(&mut self, direction: Direction, size: u32) {
        let counter = match direction {
            Direction::Incoming => &mut self.incoming_bytes,
            Direction::Outgoing => &mut self.outgoing_bytes,
        };
        *counter = counter.saturating_add(u64::from(size));
    }
}

/// One non-empty bucket in a statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticItem {
    pub bucket_start: Timestamp,
    pub bucket_end: Timestamp,
    pub incoming_bytes: u64,
    pub outgoing_bytes: u64,
}

/// Hourly ring for a single application.
#[derive(Debug, Clone)]
pub struct AppStatistics {
    from: Timestamp,
    buckets: [TrafficBucket; STATISTICS_BUCKET_COUNT],
}

impl AppStatistics {
    fn starting_at(from: Timestamp) -> Self {
        Self {
            from,
            buckets: [TrafficBucket::default(); STATISTICS_BUCKET_COUNT],
        }
    }

    /// Evict whatever has to go for `now` to fit in the ring and return the
    /// index of the bucket covering `now`.
    fn slot_for(&mut self, now: Timestamp) -> usize {
        let offset = now - self.from;
        if offset < 0 {
            // Clock stepped back. Less than a bucket counts into the first
            // bucket; anything further restarts the window at `now`.
            if offset > -STATISTICS_BUCKET_SECS {
                return 0;
            }
            tracing::debug!("Clock moved before traffic statistics window, restarting at {now}");
            self.reset(now);
            return 0;
        }
        let index = usize::try_from(offset / STATISTICS_BUCKET_SECS).unwrap_or(usize::MAX);
        let shift = index.saturating_sub(STATISTICS_BUCKET_COUNT - 1);
        if shift == 0 {
            return index;
        }

        let survivors_empty = shift >= STATISTICS_BUCKET_COUNT
            || self.buckets[shift..].iter().all(TrafficBucket::is_empty);
        if survivors_empty {
            tracing::debug!("Traffic statistics expired, restarting window at {now}");
            self.reset(now);
            return 0;
        }

        self.buckets.rotate_left(shift);
        self.buckets[STATISTICS_BUCKET_COUNT - shift..].fill(TrafficBucket::default());
        self.from += shift as i64 * STATISTICS_BUCKET_SECS;
        index - shift
    }

    fn reset(&mut self, from: Timestamp) {
        self.from = from;
        self.buckets = [TrafficBucket::default(); STATISTICS_BUCKET_COUNT];
    }

    fn record(&mut self, now: Timestamp, direction: Direction, size: u32) {
        let slot = self.slot_for(now);
        self.buckets[slot].add(direction, size);
    }

    /// Non-empty buckets that have not fully expired at `now`, oldest first.
    fn items(&self, now: Timestamp) -> Vec<StatisticItem> {
        let horizon = now - WINDOW_SECS;
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(hour, bucket)| {
                let bucket_start = self.from + hour as i64 * STATISTICS_BUCKET_SECS;
                StatisticItem {
                    bucket_start,
                    bucket_end: bucket_start + STATISTICS_BUCKET_SECS,
                    incoming_bytes: bucket.incoming_bytes,
                    outgoing_bytes: bucket.outgoing_bytes,
                }
            })
            .filter(|item| item.bucket_end > horizon)
            .collect()
    }
}

/// Thread-safe statistics store, keyed by application.
pub struct TrafficStatisticsStore {
    statistics: DashMap<Application, AppStatistics>,
    clock: Arc<dyn Clock>,
}

impl TrafficStatisticsStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            statistics: DashMap::new(),
            clock,
        }
    }

    /// Account one packet. Zero-sized packets are ignored.
    pub fn handle_packet(&self, event: &PacketEvent) {
        if event.size == 0 {
            return;
        }

        let now = self.clock.now();
        self.statistics
            .entry(event.application.clone())
            .or_insert_with(|| AppStatistics::starting_at(now))
            .record(now, event.direction, event.size);
    }

    /// Point-in-time copy of the non-empty buckets for `application`.
    pub fn copy_statistic(&self, application: &Application) -> Option<Vec<StatisticItem>> {
        let now = self.clock.now();
        self.statistics
            .get(application)
            .map(|statistics| statistics.items(now))
    }

    /// Applications with recorded traffic, sorted by path.
    pub fn applications(&self) -> Vec<Application> {
        let mut applications: Vec<Application> =
            self.statistics.iter().map(|entry| entry.key().clone()).collect();
        applications.sort();
        applications
    }

    pub fn len(&self) -> usize {
        self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::testing::{ManualClock, HOUR};

    const DAY_ONE: Timestamp = 1_700_000_000;

    fn make_store() -> (TrafficStatisticsStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(DAY_ONE));
        let store = TrafficStatisticsStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        (store, clock)
    }

    fn packet(path: &str, size: u32, direction: Direction) -> PacketEvent {
        PacketEvent {
            size,
            direction,
            application: Application::new(path),
            timestamp: DAY_ONE,
        }
    }

    fn record_at(store: &TrafficStatisticsStore, clock: &ManualClock, at: Timestamp, size: u32) {
        clock.set(at);
        store.handle_packet(&packet("/bin/app", size, Direction::Outgoing));
    }

    fn items(store: &TrafficStatisticsStore) -> Vec<StatisticItem> {
        store.copy_statistic(&Application::new("/bin/app")).unwrap()
    }

    #[test]
    fn test_zero_sized_packet_is_ignored() {
        let (store, _) = make_store();
        store.handle_packet(&packet("/bin/app", 0, Direction::Incoming));
        assert!(store.is_empty());
        assert!(store.copy_statistic(&Application::new("/bin/app")).is_none());
    }

    #[test]
    fn test_directions_accumulate_separately() {
        let (store, _) = make_store();
        store.handle_packet(&packet("/bin/app", 100, Direction::Incoming));
        store.handle_packet(&packet("/bin/app", 40, Direction::Outgoing));
        store.handle_packet(&packet("/bin/app", 60, Direction::Incoming));

        let items = items(&store);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].incoming_bytes, 160);
        assert_eq!(items[0].outgoing_bytes, 40);
        assert_eq!(items[0].bucket_start, DAY_ONE);
        assert_eq!(items[0].bucket_end, DAY_ONE + HOUR);
    }

    #[test]
    fn test_consecutive_hours_keep_separate_buckets() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 10);
        record_at(&store, &clock, DAY_ONE + HOUR, 20);

        let items = items(&store);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].outgoing_bytes, 10);
        assert_eq!(items[1].outgoing_bytes, 20);
        assert_eq!(items[1].bucket_start, DAY_ONE + HOUR);
    }

    #[test]
    fn test_gap_beyond_window_resets() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 10);
        record_at(&store, &clock, DAY_ONE + 25 * HOUR, 20);

        let items = items(&store);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].bucket_start, DAY_ONE + 25 * HOUR);
        assert_eq!(items[0].outgoing_bytes, 20);
    }

    #[test]
    fn test_long_gap_resets() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 10);
        record_at(&store, &clock, DAY_ONE + 400 * HOUR, 5);
        assert_eq!(items(&store).len(), 1);
        assert_eq!(items(&store)[0].bucket_start, DAY_ONE + 400 * HOUR);
    }

    #[test]
    fn test_partial_expiry_shifts_ring() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 1);
        record_at(&store, &clock, DAY_ONE + 10 * HOUR, 2);
        record_at(&store, &clock, DAY_ONE + 30 * HOUR, 3);

        let items = items(&store);
        let starts: Vec<Timestamp> = items.iter().map(|i| i.bucket_start).collect();
        assert_eq!(starts, vec![DAY_ONE + 10 * HOUR, DAY_ONE + 30 * HOUR]);
        assert_eq!(items[0].outgoing_bytes, 2);
        assert_eq!(items[1].outgoing_bytes, 3);
        assert!(items.iter().all(|i| i.bucket_start >= DAY_ONE + 30 * HOUR - 24 * HOUR));
    }

    #[test]
    fn test_last_slot_of_window_is_used_without_shift() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 1);
        record_at(&store, &clock, DAY_ONE + 23 * HOUR + 59 * 60, 2);
        let items = items(&store);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].bucket_start, DAY_ONE);
        assert_eq!(items[1].bucket_start, DAY_ONE + 23 * HOUR);
    }

    #[test]
    fn test_small_clock_step_back_stays_in_first_bucket() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 1);
        record_at(&store, &clock, DAY_ONE - 10 * 60, 2);
        let items = items(&store);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].bucket_start, DAY_ONE);
        assert_eq!(items[0].outgoing_bytes, 3);
    }

    #[test]
    fn test_large_clock_step_back_restarts_window() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 1);
        record_at(&store, &clock, DAY_ONE - 5 * HOUR, 2);

        let items = items(&store);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].bucket_start, DAY_ONE - 5 * HOUR);
        assert_eq!(items[0].outgoing_bytes, 2);
        assert!(items[0].bucket_start <= clock.now());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 10);
        let snapshot = items(&store);

        record_at(&store, &clock, DAY_ONE, 90);
        record_at(&store, &clock, DAY_ONE + 2 * HOUR, 5);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].outgoing_bytes, 10);
        assert_eq!(items(&store).len(), 2);
    }

    #[test]
    fn test_copy_hides_fully_expired_buckets() {
        let (store, clock) = make_store();
        record_at(&store, &clock, DAY_ONE, 10);
        clock.set(DAY_ONE + 30 * HOUR);
        assert_eq!(store.copy_statistic(&Application::new("/bin/app")), Some(Vec::new()));
    }

    #[test]
    fn test_applications_are_listed_sorted() {
        let (store, _) = make_store();
        store.handle_packet(&packet("/bin/zsh", 1, Direction::Incoming));
        store.handle_packet(&packet("/bin/bash", 1, Direction::Incoming));
        assert_eq!(
            store.applications(),
            vec![Application::new("/bin/bash"), Application::new("/bin/zsh")]
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_packets_are_all_counted() {
        let (store, _) = make_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.handle_packet(&packet("/bin/app", 1, Direction::Incoming));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(items(&store)[0].incoming_bytes, 4000);
    }
}
