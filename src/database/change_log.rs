//! Append-only change log operations.
//!
//! Rows are only ever inserted, or have their acknowledgement/judgment
//! metadata set once. The two exceptions are the merge engine's ownership
//! re-point and its in-place rewrite of serialized entity references, both of
//! which run inside the merge transaction.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::blob::BlobHandle;
use crate::codec::{self, AttrValue};
use crate::error::{StoreError, StoreResult};
use crate::models::Change;

/// Moderation-state filter for history reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    /// Not yet judged (acknowledged or not).
    Unjudged,
    /// Not yet acknowledged.
    Unacknowledged,
    /// Acknowledged but not judged.
    Pending,
    /// Judged and accepted.
    Accepted,
}

impl StateFilter {
    fn sql_clause(&self) -> &'static str {
        match self {
            StateFilter::Unjudged => " AND judged_at IS NULL",
            StateFilter::Unacknowledged => " AND acknowledged_at IS NULL AND judged_at IS NULL",
            StateFilter::Pending => " AND acknowledged_at IS NOT NULL AND judged_at IS NULL",
            StateFilter::Accepted => " AND judged_at IS NOT NULL AND accepted",
        }
    }
}

/// Filter for [`crate::Store::history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub key: Option<String>,
    pub state: Option<StateFilter>,
}

impl HistoryFilter {
    pub fn key(key: impl Into<String>) -> Self {
        HistoryFilter {
            key: Some(key.into()),
            state: None,
        }
    }

    pub fn state(state: StateFilter) -> Self {
        HistoryFilter {
            key: None,
            state: Some(state),
        }
    }

    pub fn with_state(mut self, state: StateFilter) -> Self {
        self.state = Some(state);
        self
    }
}

/// Insert payload for a new change.
#[derive(Default)]
pub(crate) struct NewChange {
    pub entity_id: Uuid,
    pub attr_key: Option<String>,
    pub value: Option<serde_json::Value>,
    pub proposed_by: Uuid,
    pub deleted: bool,
    pub perms_read: Vec<String>,
    pub perms_write: Vec<String>,
}

pub(crate) struct ChangeLog;

impl ChangeLog {
    pub(crate) async fn insert(conn: &mut PgConnection, new: NewChange) -> StoreResult<Change> {
        let change = sqlx::query_as::<_, Change>(
            r#"
            INSERT INTO changes (
                id, entity_id, attr_key, value, proposed_by, deleted,
                perms_read, perms_write
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.entity_id)
        .bind(new.attr_key)
        .bind(new.value)
        .bind(new.proposed_by)
        .bind(new.deleted)
        .bind(new.perms_read)
        .bind(new.perms_write)
        .fetch_one(conn)
        .await?;
        Ok(change)
    }

    /// Insert a change that is already acknowledged and judged-accepted.
    /// Used by the merge engine for its consolidation results.
    pub(crate) async fn insert_accepted(
        conn: &mut PgConnection,
        entity_id: Uuid,
        attr_key: &str,
        value: serde_json::Value,
        judge: Uuid,
    ) -> StoreResult<Change> {
        let change = sqlx::query_as::<_, Change>(
            r#"
            INSERT INTO changes (
                id, entity_id, attr_key, value, proposed_by,
                acknowledged_by, acknowledged_at, judged_by, judged_at, accepted
            )
            VALUES ($1, $2, $3, $4, $5, $5, now(), $5, now(), TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entity_id)
        .bind(attr_key)
        .bind(value)
        .bind(judge)
        .fetch_one(conn)
        .await?;
        Ok(change)
    }

    pub(crate) async fn get(conn: &mut PgConnection, id: Uuid) -> StoreResult<Change> {
        sqlx::query_as::<_, Change>("SELECT * FROM changes WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::not_found("change", id))
    }

    /// Row-locked read used by judgment so two concurrent judges serialize;
    /// the loser observes the winner's metadata and fails `AlreadyJudged`.
    pub(crate) async fn get_for_update(conn: &mut PgConnection, id: Uuid) -> StoreResult<Change> {
        sqlx::query_as::<_, Change>("SELECT * FROM changes WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::not_found("change", id))
    }

    /// Set acknowledgement metadata once. Returns false if the change was
    /// already acknowledged (idempotent no-op).
    pub(crate) async fn acknowledge(
        conn: &mut PgConnection,
        id: Uuid,
        acknowledger: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE changes
            SET acknowledged_by = $2, acknowledged_at = now()
            WHERE id = $1 AND acknowledged_at IS NULL
            "#,
        )
        .bind(id)
        .bind(acknowledger)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn set_judgment(
        conn: &mut PgConnection,
        id: Uuid,
        judge: Uuid,
        accepted: bool,
        accepted_value: Option<serde_json::Value>,
    ) -> StoreResult<Change> {
        let change = sqlx::query_as::<_, Change>(
            r#"
            UPDATE changes
            SET judged_by = $2, judged_at = now(), accepted = $3, accepted_value = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(judge)
        .bind(accepted)
        .bind(accepted_value)
        .fetch_one(conn)
        .await?;
        Ok(change)
    }

    pub(crate) async fn creation_change(
        conn: &mut PgConnection,
        entity_id: Uuid,
    ) -> StoreResult<Change> {
        sqlx::query_as::<_, Change>(
            "SELECT * FROM changes WHERE entity_id = $1 AND attr_key IS NULL",
        )
        .bind(entity_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::not_found("creation change for entity", entity_id))
    }

    /// The most-recently-judged accepted change for (entity, key), or `None`.
    /// The caller decides what a `deleted` result means.
    pub(crate) async fn latest_accepted(
        conn: &mut PgConnection,
        entity_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<Change>> {
        let change = sqlx::query_as::<_, Change>(
            r#"
            SELECT * FROM changes
            WHERE entity_id = $1 AND attr_key = $2 AND judged_at IS NOT NULL AND accepted
            ORDER BY judged_at DESC, proposed_at DESC
            LIMIT 1
            "#,
        )
        .bind(entity_id)
        .bind(key)
        .fetch_optional(conn)
        .await?;
        Ok(change)
    }

    /// Current value for (entity, key) recomputed from the log alone.
    pub(crate) async fn current_value_from_log(
        conn: &mut PgConnection,
        entity_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<AttrValue>> {
        match Self::latest_accepted(conn, entity_id, key).await? {
            Some(change) if change.deleted => Ok(None),
            Some(change) => match change.effective_value() {
                Some(raw) => Ok(Some(codec::deserialize(raw)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub(crate) async fn history(
        conn: &mut PgConnection,
        entity_id: Uuid,
        filter: &HistoryFilter,
    ) -> StoreResult<Vec<Change>> {
        let mut sql = String::from("SELECT * FROM changes WHERE entity_id = $1");
        if filter.key.is_some() {
            sql.push_str(" AND attr_key = $2");
        }
        if let Some(state) = filter.state {
            sql.push_str(state.sql_clause());
        }
        sql.push_str(" ORDER BY proposed_at ASC");

        let mut query = sqlx::query_as::<_, Change>(&sql).bind(entity_id);
        if let Some(key) = &filter.key {
            query = query.bind(key.clone());
        }
        Ok(query.fetch_all(conn).await?)
    }

    pub(crate) async fn proposed_by(
        conn: &mut PgConnection,
        person_id: Uuid,
    ) -> StoreResult<Vec<Change>> {
        Ok(sqlx::query_as::<_, Change>(
            "SELECT * FROM changes WHERE proposed_by = $1 ORDER BY proposed_at ASC",
        )
        .bind(person_id)
        .fetch_all(conn)
        .await?)
    }

    // ── Merge-engine writes ───────────────────────────────────

    /// Re-point attribute-change ownership from the mergees to the survivor.
    /// Creation changes are each mergee's identity and stay behind for the
    /// cascade delete.
    pub(crate) async fn repoint_ownership(
        conn: &mut PgConnection,
        from: Vec<Uuid>,
        to: Uuid,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE changes SET entity_id = $2 WHERE entity_id = ANY($1) AND attr_key IS NOT NULL",
        )
        .bind(from)
        .bind(to)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Re-point proposer/acknowledger/judge person references.
    pub(crate) async fn repoint_people(
        conn: &mut PgConnection,
        from: Vec<Uuid>,
        to: Uuid,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE changes SET proposed_by = $2 WHERE proposed_by = ANY($1)")
            .bind(from.clone())
            .bind(to)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE changes SET acknowledged_by = $2 WHERE acknowledged_by = ANY($1)")
            .bind(from.clone())
            .bind(to)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE changes SET judged_by = $2 WHERE judged_by = ANY($1)")
            .bind(from)
            .bind(to)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Changes whose serialized value (or replacement) may embed an entity
    /// reference: tagged refs, ref lists, and participants.
    pub(crate) async fn reference_valued(conn: &mut PgConnection) -> StoreResult<Vec<Change>> {
        Ok(sqlx::query_as::<_, Change>(
            r#"
            SELECT * FROM changes
            WHERE (value ->> 't') IN ('entity_ref', 'entity_ref_list', 'participants')
               OR (accepted_value ->> 't') IN ('entity_ref', 'entity_ref_list', 'participants')
            "#,
        )
        .fetch_all(conn)
        .await?)
    }

    /// In-place rewrite of a change's serialized values. Reserved for the
    /// merge engine so history is not polluted by the merge itself.
    pub(crate) async fn rewrite_values(
        conn: &mut PgConnection,
        id: Uuid,
        value: Option<serde_json::Value>,
        accepted_value: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE changes SET value = $2, accepted_value = $3 WHERE id = $1")
            .bind(id)
            .bind(value)
            .bind(accepted_value)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Blob handles referenced by any of the entity's change values, for
    /// cascade cleanup on entity removal.
    pub(crate) async fn file_handles_for_entity(
        conn: &mut PgConnection,
        entity_id: Uuid,
    ) -> StoreResult<Vec<BlobHandle>> {
        let changes = sqlx::query_as::<_, Change>(
            r#"
            SELECT * FROM changes
            WHERE entity_id = $1
              AND ((value ->> 't') = 'file' OR (accepted_value ->> 't') = 'file')
            "#,
        )
        .bind(entity_id)
        .fetch_all(conn)
        .await?;

        let mut handles = Vec::new();
        for change in &changes {
            for raw in [change.value.as_ref(), change.accepted_value.as_ref()]
                .into_iter()
                .flatten()
            {
                if let Ok(AttrValue::File { handle }) = codec::deserialize(raw) {
                    if !handles.contains(&handle) {
                        handles.push(handle);
                    }
                }
            }
        }
        Ok(handles)
    }
}
