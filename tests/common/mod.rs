//! Shared test infrastructure: proptest configuration and a harness
//! wiring a router, scheduler and store together over in-memory channels
//! (no network, no Telegram).

use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use remindbot::bus::{InboundMessage, OutboundMessage};
use remindbot::router::CommandRouter;
use remindbot::scheduler::{FireEvent, TriggerScheduler};
use remindbot::store::TaskStore;

pub fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    }
}

pub struct Harness {
    _dir: TempDir,
    pub store: Arc<TaskStore>,
    pub scheduler: Arc<TriggerScheduler>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub outbound_rx: broadcast::Receiver<OutboundMessage>,
    pub fire_rx: mpsc::Receiver<FireEvent>,
}

impl Harness {
    /// Spawn a live router backed by a fresh store. Fire events are left
    /// on `fire_rx` so tests can observe (or ignore) them.
    pub fn spawn() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::open(&dir.path().join("tasks.db")).unwrap());

        let (fire_tx, fire_rx) = mpsc::channel(64);
        let scheduler = Arc::new(TriggerScheduler::new(fire_tx));

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = broadcast::channel(64);

        let router = CommandRouter::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            inbound_rx,
            outbound_tx,
        );
        tokio::spawn(router.run());

        Self {
            _dir: dir,
            store,
            scheduler,
            inbound_tx,
            outbound_rx,
            fire_rx,
        }
    }

    /// Send typed text as the given owner and return the next reply.
    pub async fn say(&mut self, owner: &str, text: &str) -> OutboundMessage {
        self.inbound_tx
            .send(InboundMessage::text("telegram", owner, owner, text.into()))
            .await
            .unwrap();
        self.next_reply().await
    }

    /// Send an inline-button tap as the given owner and return the reply.
    pub async fn tap(&mut self, owner: &str, data: &str) -> OutboundMessage {
        self.inbound_tx
            .send(InboundMessage::button_tap("telegram", owner, owner, data.into()))
            .await
            .unwrap();
        self.next_reply().await
    }

    pub async fn next_reply(&mut self) -> OutboundMessage {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.outbound_rx.recv())
            .await
            .expect("router reply timed out")
            .expect("outbound channel closed")
    }
}
