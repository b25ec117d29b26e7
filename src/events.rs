//! Engine event stream consumed by the dashboard/API layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::TradeDirection;

/// Events emitted by the copy engine as it applies reconciliation plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CopyEvent {
    EngineStarted,

    EngineStopped,

    TradeCopied {
        provider: String,
        receiver: String,
        symbol: String,
        direction: TradeDirection,
        volume: Decimal,
        ticket: u64,
    },

    TradeModified {
        receiver: String,
        receiver_ticket: u64,
        provider_ticket: u64,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    },

    TradeClosed {
        receiver_ticket: u64,
        provider_ticket: u64,
        reason: String,
    },

    OrderDeleted {
        receiver_ticket: u64,
        provider_ticket: u64,
        reason: String,
    },

    CopyError {
        message: String,
        provider: String,
        receiver: String,
    },
}

/// Broadcast fan-out for engine events.
///
/// Subscribers may come and go; emitting with no active subscriber is fine
/// and the event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CopyEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CopyEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CopyEvent) {
        // Err only means no subscribers are listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
