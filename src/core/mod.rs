//! Core logic: access decisions, rule sync, packet telemetry, statistics.
//!
//! - [`AccessDecisionEngine`] - mode + rule evaluation, interactive asks
//! - [`RuleStore`] / [`RuleFilter`] - rule set with coalesced diff sync
//! - [`PacketTelemetryBatcher`] - windowed packet batches for the observer
//! - [`TrafficStatisticsStore`] - per-application hourly byte counters
//! - [`model`] - shared domain types

pub mod access;
pub mod model;
pub mod packets;
pub mod rules;
pub mod statistics;

pub use access::{AccessCallback, AccessDecisionEngine};
pub use packets::PacketTelemetryBatcher;
pub use rules::{RuleFilter, RuleStore};
pub use statistics::{StatisticItem, TrafficStatisticsStore};
