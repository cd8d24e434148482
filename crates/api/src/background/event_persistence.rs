//! Durable analytics event persistence.
//!
//! Subscribes to the [`EventBus`](waypoint_events::EventBus) and writes every
//! [`GatewayEvent`] through the [`BizStore`]. The loop ends when the bus is
//! dropped or `cancel` fires.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use waypoint_events::GatewayEvent;

use crate::store::BizStore;

/// Run the persistence loop.
///
/// Failed writes are logged and skipped; a lagging receiver logs how many
/// events were lost.
pub async fn run(
    biz: Arc<dyn BizStore>,
    mut receiver: broadcast::Receiver<GatewayEvent>,
    cancel: CancellationToken,
) {
    tracing::info!("Event persistence started");
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Event persistence stopping");
                break;
            }
            received = receiver.recv() => received,
        };
        match received {
            Ok(event) => {
                if let Err(e) = biz.record_event(&event).await {
                    tracing::error!(
                        error = %e,
                        code = event.code(),
                        environment_id = %event.environment_id,
                        "Failed to persist event",
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event persistence lagged, some events were not persisted");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event bus closed, persistence shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use waypoint_events::{EventBus, GatewayEventKind};

    #[tokio::test]
    async fn persists_published_events_until_bus_closes() {
        let store = Arc::new(MemoryStore::default());
        let bus = EventBus::new(16);
        let receiver = bus.subscribe();
        let handle = tokio::spawn(run(store.clone(), receiver, CancellationToken::new()));

        bus.publish(
            GatewayEvent::new(GatewayEventKind::EventTracked, "env-1")
                .with_user(Some("u1".into()))
                .with_event_name("signed_up"),
        );
        drop(bus);
        handle.await.expect("persistence task");

        let recorded = store.recorded_events().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].event_name.as_deref(), Some("signed_up"));
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let store = Arc::new(MemoryStore::default());
        let bus = EventBus::new(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(store, bus.subscribe(), cancel.clone()));

        cancel.cancel();
        handle.await.expect("persistence task");
    }
}
