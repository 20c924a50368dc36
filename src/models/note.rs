//! Note model — free-text annotations attached to changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A free-text annotation on a change.
///
/// Discussion notes are internal moderator chatter and are excluded from any
/// public-facing listing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub change_id: Uuid,
    /// Authoring person. Rewritten only by the merge engine.
    pub author_id: Uuid,
    pub body: String,
    pub action: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub discussion: bool,
    pub created_at: DateTime<Utc>,
}
