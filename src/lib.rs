//! Control plane of a per-application firewall.
//!
//! The packet interception layer asks [`Firewall::check_access`] whether an
//! application may connect and reports every packet it sees through
//! [`Firewall::record_packet`]. A management UI, reached through the
//! [`observer`] traits, answers interactive permission questions and receives
//! rule diffs and packet telemetry.

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod observer;
pub mod services;

pub use crate::client::RuleMirror;
pub use crate::config::FilterConfig;
pub use crate::core::model::{
    rule_permission_for_mode, AccessStatus, Application, Direction, FilterMode, PacketBatch,
    PacketEvent, PacketInfo, Rule, RuleId, RulePermission, RulesDiff, Timestamp,
};
pub use crate::core::{
    AccessDecisionEngine, PacketTelemetryBatcher, RuleFilter, RuleStore, StatisticItem,
    TrafficStatisticsStore,
};
pub use crate::error::AppError;
pub use crate::observer::{ChannelObserver, Observer, ObserverMessage};
pub use crate::services::Firewall;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falling back to `appwall=info`. Does nothing if a
/// subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appwall=info".into()),
        )
        .try_init();
}
