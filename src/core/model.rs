//! Shared data model: applications, rules, modes, packets and rule diffs.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Identifier of a stored rule. `0` means "not assigned yet".
pub type RuleId = u64;

/// Sentinel id for rules that have not been stored yet.
pub const UNASSIGNED_RULE_ID: RuleId = 0;

/// An application identified by its filesystem path.
///
/// Cloning shares the path allocation; equality and hashing use the path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Application(Arc<str>);

impl Application {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    pub fn path(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Application").field(&self.path()).finish()
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl From<&str> for Application {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Whether a rule lets its application through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePermission {
    Allow,
    Deny,
}

impl RulePermission {
    pub fn access_status(self) -> AccessStatus {
        match self {
            RulePermission::Allow => AccessStatus::Allow,
            RulePermission::Deny => AccessStatus::Deny,
        }
    }
}

impl FromStr for RulePermission {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(RulePermission::Allow),
            "deny" => Ok(RulePermission::Deny),
            other => bail!("unknown rule permission: {other}"),
        }
    }
}

/// Verdict returned for a single access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Allow,
    Deny,
    /// Decision pending; the answer arrives through the check's callback.
    Wait,
}

/// Global filtering policy set by the administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum FilterMode {
    AllAllow = 0,
    AllDeny = 1,
    UnknownAllow = 2,
    UnknownDeny = 3,
    Wait = 4,
}

impl FilterMode {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => FilterMode::AllAllow,
            1 => FilterMode::AllDeny,
            2 => FilterMode::UnknownAllow,
            3 => FilterMode::UnknownDeny,
            _ => FilterMode::Wait,
        }
    }
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all-allow" => Ok(FilterMode::AllAllow),
            "all-deny" => Ok(FilterMode::AllDeny),
            "unknown-allow" => Ok(FilterMode::UnknownAllow),
            "unknown-deny" => Ok(FilterMode::UnknownDeny),
            "wait" => Ok(FilterMode::Wait),
            other => bail!("unknown filter mode: {other}"),
        }
    }
}

/// Permission given to an application that has no rule yet, for every
/// non-interactive mode. `Wait` has no static answer and maps to `Deny`.
pub fn rule_permission_for_mode(mode: FilterMode) -> RulePermission {
    match mode {
        FilterMode::AllAllow | FilterMode::UnknownAllow => RulePermission::Allow,
        FilterMode::AllDeny | FilterMode::UnknownDeny | FilterMode::Wait => RulePermission::Deny,
    }
}

/// A durable access decision for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub permission: RulePermission,
    pub application: Application,
    pub last_access: Option<Timestamp>,
    /// Set to 1 when a rule is created by an allowed access; existing rules
    /// only get `last_access` refreshed.
    pub access_count: u64,
}

impl Rule {
    /// A rule with no access history, not yet stored.
    pub fn new(permission: RulePermission, application: Application) -> Self {
        Self {
            id: UNASSIGNED_RULE_ID,
            permission,
            application,
            last_access: None,
            access_count: 0,
        }
    }

    pub fn with_id(mut self, id: RuleId) -> Self {
        self.id = id;
        self
    }

    pub fn with_access(mut self, time: Timestamp, count: u64) -> Self {
        self.last_access = Some(time);
        self.access_count = count;
        self
    }
}

/// Change set pushed to the observer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesDiff {
    /// A full diff replaces everything the observer knew.
    pub is_full: bool,
    pub updated: Vec<Rule>,
    pub removed: Vec<RuleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// A single observed packet attributed to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketEvent {
    pub size: u32,
    pub direction: Direction,
    pub application: Application,
    pub timestamp: Timestamp,
}

impl PacketEvent {
    pub fn info(&self) -> PacketInfo {
        PacketInfo {
            size: self.size,
            direction: self.direction,
            timestamp: self.timestamp,
        }
    }
}

/// Packet entry as carried in a batch (the application is the map key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub size: u32,
    pub direction: Direction,
    pub timestamp: Timestamp,
}

/// Packets accumulated during one telemetry window, per application, in
/// arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketBatch {
    pub packets: HashMap<Application, Vec<PacketInfo>>,
}

impl PacketBatch {
    pub fn add(&mut self, application: Application, info: PacketInfo) {
        self.packets.entry(application).or_default().push(info);
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn get(&self, application: &Application) -> Option<&[PacketInfo]> {
        self.packets.get(application).map(Vec::as_slice)
    }

    pub fn packet_count(&self) -> usize {
        self.packets.values().map(Vec::len).sum()
    }
}
