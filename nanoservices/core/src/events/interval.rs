use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use crate::events::trigger::{Trigger, TriggerEvent};

/// Spawn a timer that emits a refresh trigger for `table` every `interval`.
///
/// The first event fires one full interval after spawning. Ticks missed while
/// the dispatcher is backed up are delayed rather than bunched. Abort the
/// returned handle to stop the timer; a refresh already dispatched is not
/// affected.
pub fn spawn_interval_trigger(
    table: String,
    interval: Duration,
    sender: mpsc::Sender<TriggerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::debug!(table = %table, "interval elapsed");
            let event = TriggerEvent {
                table: table.clone(),
                trigger: Trigger::Interval(interval),
            };
            if sender.send(event).await.is_err() {
                break;
            }
        }
    })
}
