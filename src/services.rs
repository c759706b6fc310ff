//! Firewall component wiring.
//!
//! `Firewall` owns every core component, built in dependency order against a
//! single observer:
//! 1. Rule store (pushes diffs to the observer)
//! 2. Access engine (reads and writes the rule store, asks the observer)
//! 3. Packet batcher (tokio task flushing telemetry to the observer)
//! 4. Statistics store (fed from the same packet stream as the batcher)

use std::sync::Arc;

use crate::config::FilterConfig;
use crate::core::model::{AccessStatus, Application, FilterMode, PacketEvent, Rule, RuleId};
use crate::core::{
    AccessDecisionEngine, PacketTelemetryBatcher, RuleFilter, RuleStore, StatisticItem,
    TrafficStatisticsStore,
};
use crate::error::AppError;
use crate::observer::{Clock, Observer, PacketSink, PermissionPrompt, RulesSink};

pub struct Firewall {
    rules: Arc<RuleStore>,
    engine: AccessDecisionEngine,
    batcher: PacketTelemetryBatcher,
    statistics: TrafficStatisticsStore,
}

impl Firewall {
    /// Start with an empty rule set. Must be called inside a tokio runtime.
    pub fn start<O: Observer>(config: FilterConfig, observer: Arc<O>) -> Result<Self, AppError> {
        Self::start_with_rules(config, observer, Vec::new())
    }

    /// Start with previously persisted rules loaded into the store.
    pub fn start_with_rules<O: Observer>(
        config: FilterConfig,
        observer: Arc<O>,
        initial_rules: Vec<Rule>,
    ) -> Result<Self, AppError> {
        config.validate()?;

        // 1. Rule store
        let rules = RuleStore::new(Arc::clone(&observer) as Arc<dyn RulesSink>);

        // 2. Access engine
        let clock = Arc::clone(&observer) as Arc<dyn Clock>;
        let engine = AccessDecisionEngine::new(
            config.initial_mode,
            initial_rules,
            Arc::clone(&rules),
            Arc::clone(&observer) as Arc<dyn PermissionPrompt>,
            Arc::clone(&clock),
            config.abandoned_ask_permission,
        );

        // 3. Packet batcher
        let batcher = PacketTelemetryBatcher::start(
            Arc::clone(&observer) as Arc<dyn PacketSink>,
            config.packet_flush_interval,
        )?;

        // 4. Statistics store
        let statistics = TrafficStatisticsStore::new(clock);

        tracing::info!("Firewall core started");
        Ok(Self {
            rules,
            engine,
            batcher,
            statistics,
        })
    }

    /// See [`AccessDecisionEngine::check_access`].
    pub fn check_access<F>(&self, application: &Application, on_result: F) -> AccessStatus
    where
        F: FnOnce(AccessStatus) + Send + 'static,
    {
        self.engine.check_access(application, on_result)
    }

    pub fn set_mode(&self, mode: FilterMode) {
        self.engine.set_mode(mode);
    }

    pub fn mode(&self) -> FilterMode {
        self.engine.mode()
    }

    pub fn update_rule(&self, rule: Rule) -> Option<Rule> {
        self.engine.update_rule(rule)
    }

    pub fn remove_rule(&self, id: RuleId) -> Option<Rule> {
        self.engine.remove_rule(id)
    }

    pub fn rule_for_application(&self, application: &Application) -> Option<Rule> {
        self.engine.rule_for_application(application)
    }

    pub fn rules(&self, filter: RuleFilter) -> Vec<Rule> {
        self.rules.rules(filter)
    }

    /// The observer attached; it will receive a full rule snapshot.
    pub fn client_connected(&self) {
        self.rules.client_connected();
    }

    /// Feed a captured packet to both telemetry and statistics.
    pub fn record_packet(&self, event: PacketEvent) {
        self.statistics.handle_packet(&event);
        self.batcher.record_packet(event);
    }

    pub fn copy_statistic(&self, application: &Application) -> Option<Vec<StatisticItem>> {
        self.statistics.copy_statistic(application)
    }

    pub fn applications(&self) -> Vec<Application> {
        self.statistics.applications()
    }
}
