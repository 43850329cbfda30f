use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::store::history::AttemptStatus;

/// Refresh state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Running,
}

#[derive(Debug, Default)]
struct Slot {
    running: bool,
    last: Option<AttemptStatus>,
}

/// Per-table exclusion shared by scheduled ticks and manual triggers.
///
/// State is process-local; after a restart every table starts out idle.
#[derive(Clone, Default)]
pub struct TableSlots {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    idle: Arc<Notify>,
}

impl TableSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `table` from idle to running. `None` when a refresh already holds it.
    pub fn try_acquire(&self, table: &str) -> Option<RunGuard> {
        let mut slots = self.lock();
        let slot = slots.entry(table.to_string()).or_default();
        if slot.running {
            return None;
        }
        slot.running = true;
        Some(RunGuard {
            table: table.to_string(),
            slots: self.clone(),
            outcome: None,
        })
    }

    pub fn state(&self, table: &str) -> RefreshState {
        match self.lock().get(table) {
            Some(slot) if slot.running => RefreshState::Running,
            _ => RefreshState::Idle,
        }
    }

    /// Outcome of the last refresh finished in this process.
    pub fn last_outcome(&self, table: &str) -> Option<AttemptStatus> {
        self.lock().get(table).and_then(|slot| slot.last)
    }

    pub fn running(&self) -> usize {
        self.lock().values().filter(|slot| slot.running).count()
    }

    /// Drop an idle table's slot. A running slot is kept until its guard goes.
    pub fn forget(&self, table: &str) {
        let mut slots = self.lock();
        if slots.get(table).is_some_and(|slot| !slot.running) {
            slots.remove(table);
        }
    }

    /// Resolve once no table is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.running() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Proof that a table is running. Dropping it returns the table to idle,
/// also when the refresh task panics.
pub struct RunGuard {
    table: String,
    slots: TableSlots,
    outcome: Option<AttemptStatus>,
}

impl RunGuard {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Release the slot, remembering how the run ended.
    pub fn finish(mut self, status: AttemptStatus) {
        self.outcome = Some(status);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        {
            let mut slots = self.slots.lock();
            let slot = slots.entry(self.table.clone()).or_default();
            slot.running = false;
            if let Some(status) = self.outcome {
                slot.last = Some(status);
            }
        }
        self.slots.idle.notify_waiters();
    }
}
