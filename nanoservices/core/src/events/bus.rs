use tokio::sync::mpsc;
use crate::events::trigger::TriggerEvent;

/// Channel carrying trigger events from interval timers to the dispatcher.
pub struct EventBus {
    sender: mpsc::Sender<TriggerEvent>,
    receiver: mpsc::Receiver<TriggerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver }
    }

    /// Sender handle for trigger producers.
    pub fn sender(&self) -> mpsc::Sender<TriggerEvent> {
        self.sender.clone()
    }

    /// Next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<TriggerEvent> {
        self.receiver.recv().await
    }

    pub fn split(self) -> (mpsc::Sender<TriggerEvent>, mpsc::Receiver<TriggerEvent>) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::trigger::Trigger;
    use std::time::Duration;

    #[tokio::test]
    async fn events_from_several_timers_arrive_in_send_order() {
        let mut bus = EventBus::new(16);
        let weather = bus.sender();
        let prices = bus.sender();

        weather.send(TriggerEvent {
            table: "weather_data".to_string(),
            trigger: Trigger::Interval(Duration::from_secs(60)),
        }).await.unwrap();
        prices.send(TriggerEvent {
            table: "prices".to_string(),
            trigger: Trigger::Interval(Duration::from_secs(5)),
        }).await.unwrap();

        let first = bus.recv().await.unwrap();
        let second = bus.recv().await.unwrap();
        assert_eq!(first.table, "weather_data");
        assert_eq!(second.table, "prices");
        assert_eq!(second.trigger.kind(), crate::events::trigger::TriggerKind::Scheduled);
    }

    #[tokio::test]
    async fn recv_ends_when_senders_drop() {
        let (tx, mut rx) = EventBus::new(4).split();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
