use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event type names published on the bus.
pub mod types {
    pub const PROJECT_STARTED: &str = "project.started";
    pub const PROJECT_COMPLETED: &str = "project.completed";
    pub const PROJECT_PAUSED: &str = "project.paused";
    pub const PHASE_STARTED: &str = "phase.started";
    pub const PHASE_COMPLETED: &str = "phase.completed";
    pub const AGENT_ERROR: &str = "agent.error";
    pub const HITL_REQUESTED: &str = "agent.hitl.requested";
    pub const HITL_RESOLVED: &str = "agent.hitl.resolved";
    pub const NODE_ENTER: &str = "agent.node.enter";
    pub const NODE_EXIT: &str = "agent.node.exit";
}

/// A pipeline event. Ephemeral: never persisted by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: &str, project_id: &str, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            project_id: project_id.to_string(),
            execution_id: None,
            agent_name: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }
}

/// Anything that accepts published events.
///
/// Publishing is fire-and-forget: implementations must never fail the caller.
pub trait EventSink: Send + Sync + 'static {
    fn publish_event(&self, event: Event);

    fn publish(&self, event_type: &str, data: serde_json::Value, project_id: &str) {
        self.publish_event(Event::new(event_type, project_id, data));
    }
}

struct BusInner {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Event>>>,
    global: broadcast::Sender<Event>,
}

/// Pub/sub keyed by project id, backed by one tokio broadcast channel per
/// project plus a wildcard channel that sees everything.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                capacity,
                channels: Mutex::new(HashMap::new()),
                global,
            }),
        }
    }

    /// Subscribe to a single project's events.
    pub fn subscribe(&self, project_id: &str) -> Subscription {
        let rx = match self.inner.channels.lock() {
            Ok(mut channels) => channels
                .entry(project_id.to_string())
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .subscribe(),
            Err(e) => {
                warn!(error = %e, "Event bus channel map poisoned");
                e.into_inner()
                    .entry(project_id.to_string())
                    .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                    .subscribe()
            }
        };
        debug!(project_id, "Subscribed to project channel");
        Subscription {
            rx,
            project_id: Some(project_id.to_string()),
            bus: Arc::clone(&self.inner),
        }
    }

    /// Subscribe to every project's events.
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            rx: self.inner.global.subscribe(),
            project_id: None,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Number of live project channels.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn publish_event(&self, event: Event) {
        let project_tx = match self.inner.channels.lock() {
            Ok(channels) => channels.get(&event.project_id).cloned(),
            Err(e) => {
                debug!(error = %e, "Event bus channel map poisoned, skipping project channel");
                None
            }
        };
        if let Some(tx) = project_tx {
            if let Err(e) = tx.send(event.clone()) {
                debug!(event_type = %e.0.event_type, "No live subscribers on project channel");
            }
        }
        if let Err(e) = self.inner.global.send(event) {
            debug!(event_type = %e.0.event_type, "No live subscribers on wildcard channel");
        }
    }
}

/// A live view of a bus channel. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    project_id: Option<String>,
    bus: Arc<BusInner>,
}

impl Subscription {
    /// Next event, or `None` once the bus is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        project_id = self.project_id.as_deref().unwrap_or("*"),
                        skipped = n,
                        "Event subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Explicit unsubscribe; equivalent to dropping.
    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> BoxStream<'static, Event> {
        Box::pin(futures::stream::unfold(self, |mut sub| async move {
            let next = sub.recv().await;
            next.map(|event| (event, sub))
        }))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(project_id) = self.project_id.take() else {
            return;
        };
        let Ok(mut channels) = self.bus.channels.lock() else {
            return;
        };
        // Our own receiver is still alive here.
        let last = channels
            .get(&project_id)
            .map(|tx| tx.receiver_count() <= 1)
            .unwrap_or(false);
        if last {
            channels.remove(&project_id);
            debug!(project_id = %project_id, "Released project channel");
        }
    }
}
