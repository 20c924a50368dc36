//! Change model — the immutable proposal record.
//!
//! A change is either the creation of an entity (`attr_key = None`) or a
//! proposed attribute value. Rows are append-only: after insert the only
//! writes are the acknowledgement/judgment metadata and, on acceptance, an
//! optional accepted-replacement value. Ownership rewrites are reserved for
//! the merge engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Moderation state of a change, derived from its metadata columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    /// Proposed, not yet acknowledged by a moderator.
    Unacknowledged,
    /// Acknowledged but not yet judged.
    Pending,
    /// Judged and approved. Terminal.
    Accepted,
    /// Judged and declined. Terminal.
    Rejected,
}

/// A single proposal against the change log.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Change {
    pub id: Uuid,
    /// Owning entity. Rewritten only by the merge engine.
    pub entity_id: Uuid,
    /// `None` marks the entity's creation change.
    pub attr_key: Option<String>,
    /// Serialized proposed value (tagged JSON). `None` for creation changes
    /// and proposed deletions.
    pub value: Option<serde_json::Value>,
    /// Replacement value substituted by the judge on acceptance.
    pub accepted_value: Option<serde_json::Value>,
    pub proposed_by: Uuid,
    pub proposed_at: DateTime<Utc>,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub judged_by: Option<Uuid>,
    pub judged_at: Option<DateTime<Utc>>,
    /// Meaningful only once judged.
    pub accepted: bool,
    /// Proposed-deletion sentinel: the value to adopt is "remove".
    pub deleted: bool,
    pub perms_read: Vec<String>,
    pub perms_write: Vec<String>,
}

impl Change {
    /// Whether this is the owning entity's creation change.
    pub fn is_creation(&self) -> bool {
        self.attr_key.is_none()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    pub fn is_judged(&self) -> bool {
        self.judged_at.is_some()
    }

    /// The serialized value a reader should see: the judge's replacement if
    /// one was recorded, otherwise the proposed value.
    pub fn effective_value(&self) -> Option<&serde_json::Value> {
        self.accepted_value.as_ref().or(self.value.as_ref())
    }

    pub fn state(&self) -> ModerationState {
        if self.is_judged() {
            if self.accepted {
                ModerationState::Accepted
            } else {
                ModerationState::Rejected
            }
        } else if self.is_acknowledged() {
            ModerationState::Pending
        } else {
            ModerationState::Unacknowledged
        }
    }

    /// Read-permission filter used by the web layer. A change with no read
    /// tags is public; otherwise the reader needs at least one matching tag.
    pub fn readable_by(&self, tags: &[String]) -> bool {
        self.perms_read.is_empty() || self.perms_read.iter().any(|t| tags.contains(t))
    }
}
