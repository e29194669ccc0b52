use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Status event pushed to clients waiting on an order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderEvent {
    pub order_id: i64,
    pub status: String,
}

const SUBSCRIBER_BUFFER: usize = 16;

/// Process-local fan-out registry keyed by order id. At-most-once delivery:
/// events are never buffered for absent subscribers, so a client that connects
/// after the event fired must fall back to polling.
///
/// In a multi-process deployment each process has its own hub; webhook events
/// would need a shared pub/sub to reach subscribers on other processes.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<DashMap<i64, HashMap<Uuid, mpsc::Sender<OrderEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for an order. The returned stream removes itself
    /// from the registry when dropped, so disconnected clients never leak.
    pub fn subscribe(&self, order_id: i64) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let token = Uuid::new_v4();
        self.inner.entry(order_id).or_default().insert(token, tx);
        Subscription {
            hub: self.clone(),
            order_id,
            token,
            rx,
        }
    }

    /// Send an event to every current subscriber for the order. No-op when
    /// nobody is listening. Subscribers whose channel is closed or full are
    /// dropped rather than awaited; a slow client falls back to polling.
    pub fn publish(&self, order_id: i64, event: OrderEvent) {
        if let Some(mut subs) = self.inner.get_mut(&order_id) {
            subs.retain(|_, tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(order_id, "dropping slow order-event subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    pub fn subscriber_count(&self, order_id: i64) -> usize {
        self.inner.get(&order_id).map(|s| s.len()).unwrap_or(0)
    }

    fn remove(&self, order_id: i64, token: Uuid) {
        if let Some(mut subs) = self.inner.get_mut(&order_id) {
            subs.remove(&token);
        }
        self.inner.remove_if(&order_id, |_, subs| subs.is_empty());
    }
}

pub struct Subscription {
    hub: EventHub,
    order_id: i64,
    token: Uuid,
    rx: mpsc::Receiver<OrderEvent>,
}

impl Stream for Subscription {
    type Item = OrderEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<OrderEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.remove(self.order_id, self.token);
    }
}
