use crate::order::{Order, OrderStatus, RecordId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Which kitchen column an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Open,
    Preparing,
    Dropped,
}

pub fn classify(status: OrderStatus) -> Lane {
    match status {
        OrderStatus::Pending => Lane::Open,
        OrderStatus::Preparing => Lane::Preparing,
        _ => Lane::Dropped,
    }
}

/// Server-to-client frames on the kitchen channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum FeedEvent {
    #[serde(rename = "orders:snapshot")]
    Snapshot(Vec<Order>),
    #[serde(rename = "order:created")]
    Created(Order),
    #[serde(rename = "order:updated")]
    Updated(Order),
}

/// Client-to-server frames on the kitchen channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum FeedCommand {
    #[serde(rename = "order:status", rename_all = "camelCase")]
    StatusChange {
        order_id: RecordId,
        status: OrderStatus,
    },
}

/// The two tracked columns, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    open: Vec<Order>,
    preparing: Vec<Order>,
}

impl FeedState {
    pub fn open_orders(&self) -> &[Order] {
        &self.open
    }

    pub fn preparing_orders(&self) -> &[Order] {
        &self.preparing
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.preparing.is_empty()
    }

    pub fn lane_of(&self, id: &RecordId) -> Lane {
        if self.open.iter().any(|order| &order.id == id) {
            Lane::Open
        } else if self.preparing.iter().any(|order| &order.id == id) {
            Lane::Preparing
        } else {
            Lane::Dropped
        }
    }

    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot(orders) => {
                self.open.clear();
                self.preparing.clear();
                for order in orders {
                    match classify(order.status) {
                        Lane::Open => self.open.push(order),
                        Lane::Preparing => self.preparing.push(order),
                        Lane::Dropped => {}
                    }
                }
            }
            FeedEvent::Created(order) => {
                self.remove(&order.id);
                self.open.insert(0, order);
            }
            FeedEvent::Updated(order) => {
                self.remove(&order.id);
                match classify(order.status) {
                    Lane::Open => self.open.insert(0, order),
                    Lane::Preparing => self.preparing.insert(0, order),
                    Lane::Dropped => debug!(order_id = %order.id, status = %order.status, "order left the kitchen feed"),
                }
            }
        }
    }

    fn remove(&mut self, id: &RecordId) {
        self.open.retain(|order| &order.id != id);
        self.preparing.retain(|order| &order.id != id);
    }
}

/// Connection state of the push subscription, observable alongside the orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Connecting,
    Live,
    Failed(String),
    Closed,
}

/// Observable order store. Every mutation is published to all subscribers.
#[derive(Clone)]
pub struct OrderFeed {
    state: Arc<watch::Sender<FeedState>>,
    status: Arc<watch::Sender<FeedStatus>>,
}

impl OrderFeed {
    pub fn new() -> Self {
        let (state, _) = watch::channel(FeedState::default());
        let (status, _) = watch::channel(FeedStatus::Idle);
        Self {
            state: Arc::new(state),
            status: Arc::new(status),
        }
    }

    pub fn apply(&self, event: FeedEvent) {
        self.state.send_modify(|state| state.apply(event));
    }

    pub fn current(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: FeedStatus) {
        self.status.send_replace(status);
    }
}

impl Default for OrderFeed {
    fn default() -> Self {
        Self::new()
    }
}
