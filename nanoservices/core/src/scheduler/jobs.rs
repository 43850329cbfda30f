use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::interval::spawn_interval_trigger;
use crate::events::trigger::TriggerEvent;
use crate::schema::types::TableDefinition;

/// What [`JobManager::sync_table`] did to a table's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobChange {
    Started,
    Restarted,
    Stopped,
    Unchanged,
}

struct Job {
    interval: Duration,
    handle: JoinHandle<()>,
}

/// One interval timer per schedulable table.
///
/// Stopping a timer only prevents future ticks; a refresh it already
/// triggered runs to completion.
pub struct JobManager {
    sender: mpsc::Sender<TriggerEvent>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobManager {
    pub fn new(sender: mpsc::Sender<TriggerEvent>) -> Self {
        Self { sender, jobs: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the table's timer in line with its current definition.
    pub fn sync_table(&self, def: &TableDefinition) -> JobChange {
        let wanted = def
            .refresh_interval
            .filter(|_| def.is_schedulable())
            .map(Duration::from_secs);
        let mut jobs = self.lock();

        let change = match (jobs.get(&def.name).map(|job| job.interval), wanted) {
            (None, None) => JobChange::Unchanged,
            (Some(current), Some(interval)) if current == interval => JobChange::Unchanged,
            (Some(_), None) => {
                if let Some(job) = jobs.remove(&def.name) {
                    job.handle.abort();
                }
                JobChange::Stopped
            }
            (current, Some(interval)) => {
                let handle = spawn_interval_trigger(def.name.clone(), interval, self.sender.clone());
                if let Some(old) = jobs.insert(def.name.clone(), Job { interval, handle }) {
                    old.handle.abort();
                }
                if current.is_some() { JobChange::Restarted } else { JobChange::Started }
            }
        };

        if change != JobChange::Unchanged {
            tracing::info!(table = %def.name, interval = ?wanted, change = ?change, "refresh job updated");
        }
        change
    }

    /// Sync every definition and stop timers of tables that are gone.
    pub fn sync(&self, defs: &[TableDefinition]) {
        let stale: Vec<String> = self
            .lock()
            .keys()
            .filter(|name| !defs.iter().any(|def| &def.name == *name))
            .cloned()
            .collect();
        for name in stale {
            self.remove(&name);
        }
        for def in defs {
            self.sync_table(def);
        }
    }

    pub fn remove(&self, table: &str) -> bool {
        match self.lock().remove(table) {
            Some(job) => {
                job.handle.abort();
                tracing::info!(table = %table, "refresh job stopped");
                true
            }
            None => false,
        }
    }

    /// Tables with a running timer and their intervals, sorted by name.
    pub fn scheduled(&self) -> Vec<(String, Duration)> {
        let mut scheduled: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, job)| (name.clone(), job.interval))
            .collect();
        scheduled.sort();
        scheduled
    }

    pub fn stop_all(&self) {
        for (_, job) in self.lock().drain() {
            job.handle.abort();
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
