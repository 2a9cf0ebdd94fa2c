//! Event bus for engine mutations
//!
//! Services publish a [`ParcelEvent`] after every committed write. Listeners
//! never see events for rolled-back transactions.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::model::{LeaseStatus, Role};

/// Events emitted by services after a successful commit
#[derive(Debug, Clone, PartialEq)]
pub enum ParcelEvent {
    ParcelCreated {
        id: String,
        code: String,
    },
    ParcelUpdated {
        id: String,
    },
    ParcelDeleted {
        id: String,
    },
    LeaseCreated {
        lease_id: String,
        parcel_id: String,
        investor_id: String,
    },
    LeaseClosed {
        lease_id: String,
        parcel_id: String,
        status: LeaseStatus,
        parcel_released: bool,
    },
    TaskRecorded {
        task_id: String,
        parcel_id: String,
    },
    UserProvisioned {
        id: String,
        role: Role,
    },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ParcelEvent);
}

/// Broadcast channel shared by all services
pub struct EventBus {
    sender: broadcast::Sender<ParcelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: ParcelEvent) {
        trace!(event = ?event, "Emitting parcel event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ParcelEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ParcelEvent) {
        match event {
            ParcelEvent::ParcelCreated { id, code } => {
                debug!(id = %id, code = %code, "Parcel created");
            }
            ParcelEvent::ParcelDeleted { id } => {
                debug!(id = %id, "Parcel deleted");
            }
            ParcelEvent::LeaseCreated {
                lease_id,
                parcel_id,
                investor_id,
            } => {
                debug!(
                    lease = %lease_id,
                    parcel = %parcel_id,
                    investor = %investor_id,
                    "Lease created"
                );
            }
            ParcelEvent::LeaseClosed {
                lease_id,
                status,
                parcel_released,
                ..
            } => {
                debug!(lease = %lease_id, status = %status, parcel_released, "Lease closed");
            }
            _ => {
                trace!(event = ?event, "Parcel event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
