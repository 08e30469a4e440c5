//! Delivery dispatcher — consumes fire events, sends the reminder and
//! applies the post-fire policy: prune one-off dates, leave weekly tasks
//! alone (their timers rearm themselves in the scheduler).

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::bus::OutboundMessage;
use crate::error::ReminderError;
use crate::scheduler::FireEvent;
use crate::store::TaskStore;

pub struct DeliveryDispatcher {
    store: Arc<TaskStore>,
    channel: String,
    outbound_tx: broadcast::Sender<OutboundMessage>,
    fire_rx: mpsc::Receiver<FireEvent>,
}

impl DeliveryDispatcher {
    pub fn new(
        store: Arc<TaskStore>,
        channel: &str,
        outbound_tx: broadcast::Sender<OutboundMessage>,
        fire_rx: mpsc::Receiver<FireEvent>,
    ) -> Self {
        Self {
            store,
            channel: channel.to_string(),
            outbound_tx,
            fire_rx,
        }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.fire_rx.recv().await {
            self.deliver(event).await;
        }
    }

    async fn deliver(&self, event: FireEvent) {
        info!(task = event.task_id, owner = %event.owner, "delivering reminder");
        let msg = OutboundMessage::chat(&self.channel, &event.owner, format!("🔔 {}", event.text));
        // A failed send is logged and swallowed: it must not cancel future
        // weekly recurrences, and a one-off is pruned regardless because
        // re-sending after the instant has passed is not meaningful.
        if let Err(e) = self.outbound_tx.send(msg) {
            let err = ReminderError::DeliveryFailure(e.to_string());
            warn!(task = event.task_id, "{err}");
        }

        if let Some(date) = event.fired_date {
            if let Err(e) = self.store.prune_date(event.task_id, date).await {
                warn!(task = event.task_id, %date, "post-fire prune failed: {e}");
            }
        }
    }
}
