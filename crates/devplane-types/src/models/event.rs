//! Event bus payloads: resource-change notifications for live UI updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Container,
    App,
    Collaborator,
    Route,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ContainerCreated,
    ContainerStateChanged,
    ContainerLabelsChanged,
    ContainerDeleted,
    AppDeployed,
    AppStateChanged,
    AppDeleted,
    CollaboratorAdded,
    CollaboratorRemoved,
    RouteAdded,
    RouteDeleted,
    /// Synthetic pseudo-event emitted to a subscriber whose buffer overflowed;
    /// not assigned a bus-wide sequence number of its own.
    ResubscribeHint,
}

/// A single event bus message. `sequence` is monotonically increasing and
/// global across all resource types — the publisher assigns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

/// A subscriber's filter over the event stream.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub resource_types: HashSet<ResourceType>,
}

impl Subscription {
    pub fn matches(&self, event: &Event) -> bool {
        self.resource_types.is_empty() || self.resource_types.contains(&event.resource_type)
    }
}
