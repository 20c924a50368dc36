//! Entity model and the closed set of concrete entity kinds.
//!
//! Every entity row lives in the shared `entities` table with a lowercase
//! discriminator string; each kind additionally owns one cache table holding
//! its fast-path columns. Reload is polymorphic over the discriminator and
//! matches exhaustively, so adding a kind is a compile-time event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The concrete entity kinds known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cruise,
    Person,
    Institution,
    Country,
    Ship,
    Collection,
    Parameter,
    Unit,
    ParameterGroup,
    ArgoFile,
    OldSubmission,
    Submission,
}

impl EntityKind {
    /// All kinds, in registration order.
    pub const ALL: [EntityKind; 12] = [
        EntityKind::Cruise,
        EntityKind::Person,
        EntityKind::Institution,
        EntityKind::Country,
        EntityKind::Ship,
        EntityKind::Collection,
        EntityKind::Parameter,
        EntityKind::Unit,
        EntityKind::ParameterGroup,
        EntityKind::ArgoFile,
        EntityKind::OldSubmission,
        EntityKind::Submission,
    ];

    /// The discriminator string persisted in `entities.kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Cruise => "cruise",
            EntityKind::Person => "person",
            EntityKind::Institution => "institution",
            EntityKind::Country => "country",
            EntityKind::Ship => "ship",
            EntityKind::Collection => "collection",
            EntityKind::Parameter => "parameter",
            EntityKind::Unit => "unit",
            EntityKind::ParameterGroup => "parameter_group",
            EntityKind::ArgoFile => "argo_file",
            EntityKind::OldSubmission => "old_submission",
            EntityKind::Submission => "submission",
        }
    }

    /// Parse a stored discriminator. Returns `None` for unknown tags so the
    /// caller can surface a proper error with row context.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cruise" => Some(EntityKind::Cruise),
            "person" => Some(EntityKind::Person),
            "institution" => Some(EntityKind::Institution),
            "country" => Some(EntityKind::Country),
            "ship" => Some(EntityKind::Ship),
            "collection" => Some(EntityKind::Collection),
            "parameter" => Some(EntityKind::Parameter),
            "unit" => Some(EntityKind::Unit),
            "parameter_group" => Some(EntityKind::ParameterGroup),
            "argo_file" => Some(EntityKind::ArgoFile),
            "old_submission" => Some(EntityKind::OldSubmission),
            "submission" => Some(EntityKind::Submission),
            _ => None,
        }
    }

    /// The cache table owned by this kind.
    pub fn cache_table(&self) -> &'static str {
        match self {
            EntityKind::Cruise => "cruises",
            EntityKind::Person => "people",
            EntityKind::Institution => "institutions",
            EntityKind::Country => "countries",
            EntityKind::Ship => "ships",
            EntityKind::Collection => "collections",
            EntityKind::Parameter => "parameters",
            EntityKind::Unit => "units",
            EntityKind::ParameterGroup => "parameter_groups",
            EntityKind::ArgoFile => "argo_files",
            EntityKind::OldSubmission => "old_submissions",
            EntityKind::Submission => "submissions",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw `entities` row as stored. Converted to [`Entity`] after the
/// discriminator is validated.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct EntityRow {
    pub id: Uuid,
    pub kind: String,
    pub accepted: bool,
    pub judged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A top-level versioned record.
///
/// `accepted` is true only once the entity's creation change has been judged
/// and approved; `judged_at` records that judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub accepted: bool,
    pub judged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EntityRow> for Entity {
    type Error = crate::error::StoreError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let kind = EntityKind::parse(&row.kind).ok_or_else(|| {
            crate::error::StoreError::NotFound {
                what: "entity kind",
                id: row.kind.clone(),
            }
        })?;
        Ok(Entity {
            id: row.id,
            kind,
            accepted: row.accepted,
            judged_at: row.judged_at,
            created_at: row.created_at,
        })
    }
}
