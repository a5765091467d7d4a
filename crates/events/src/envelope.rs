use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sketchforge_core::OwnerId;

/// Kind of entity a change event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Account,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::Account => "account",
        }
    }
}

/// Envelope for a change notification, scoped to one owner.
///
/// `version` is the mutated row's `updated_at` and is monotonically
/// comparable per entity; consumers only replace local state when an
/// incoming version is not older than what they already hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    event_id: Uuid,
    owner_id: OwnerId,
    entity: EntityKind,
    entity_id: Uuid,
    /// New status of the entity (e.g. "completed"), if it has one.
    status: Option<String>,
    version: DateTime<Utc>,
    payload: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(
        owner_id: OwnerId,
        entity: EntityKind,
        entity_id: Uuid,
        status: Option<String>,
        version: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            owner_id,
            entity,
            entity_id,
            status,
            version,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn version(&self) -> DateTime<Utc> {
        self.version
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// SSE/wire topic, e.g. `job.completed` or `account.updated`.
    pub fn topic(&self) -> String {
        match &self.status {
            Some(s) => format!("{}.{}", self.entity.as_str(), s),
            None => format!("{}.updated", self.entity.as_str()),
        }
    }
}
