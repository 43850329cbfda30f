use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// What caused a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Requested through the control plane
    Manual,
    /// Fired by the table's interval timer
    Interval(Duration),
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Manual => TriggerKind::Manual,
            Trigger::Interval(_) => TriggerKind::Scheduled,
        }
    }
}

/// The trigger as recorded in refresh history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerKind::Manual),
            "scheduled" => Ok(TriggerKind::Scheduled),
            other => Err(format!("unknown trigger type '{other}'")),
        }
    }
}

/// An event delivered to the scheduler.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Which table to refresh
    pub table: String,
    pub trigger: Trigger,
}
