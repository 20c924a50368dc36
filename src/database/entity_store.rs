//! Entity rows and their fast-path cache columns.
//!
//! Every kind owns one cache table; the registry decides which attribute
//! lands in which column. Cache writes happen on judgment and during merge,
//! and a value whose concrete type cannot live in the column's static shape
//! clears the column so reads fall back to the change log instead of going
//! stale.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::attributes::{AttributeDef, CacheShape};
use crate::codec::AttrValue;
use crate::error::{StoreError, StoreResult};
use crate::models::{Entity, EntityKind, EntityRow, Participant, Participants};

#[derive(FromRow)]
struct ParticipantRow {
    role: String,
    person_id: Uuid,
    institution_id: Option<Uuid>,
}

pub(crate) struct EntityStore;

impl EntityStore {
    /// Insert the shared discriminator row plus the kind's cache row.
    pub(crate) async fn insert(conn: &mut PgConnection, kind: EntityKind) -> StoreResult<Entity> {
        let row = sqlx::query_as::<_, EntityRow>(
            "INSERT INTO entities (id, kind) VALUES ($1, $2) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(kind.as_str())
        .fetch_one(&mut *conn)
        .await?;

        let sql = format!(
            "INSERT INTO {} (entity_id) VALUES ($1)",
            kind.cache_table()
        );
        sqlx::query(&sql).bind(row.id).execute(&mut *conn).await?;

        Entity::try_from(row)
    }

    pub(crate) async fn try_get(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> StoreResult<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.map(Entity::try_from).transpose()
    }

    pub(crate) async fn get(conn: &mut PgConnection, id: Uuid) -> StoreResult<Entity> {
        Self::try_get(conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("entity", id))
    }

    pub(crate) async fn by_kind(
        conn: &mut PgConnection,
        kind: EntityKind,
        accepted_only: bool,
    ) -> StoreResult<Vec<Entity>> {
        let mut sql = String::from("SELECT * FROM entities WHERE kind = $1");
        if accepted_only {
            sql.push_str(" AND accepted");
        }
        sql.push_str(" ORDER BY created_at ASC");

        let rows = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(kind.as_str())
            .fetch_all(conn)
            .await?;
        rows.into_iter().map(Entity::try_from).collect()
    }

    /// Flip the accepted flag when the creation change is judged.
    pub(crate) async fn set_creation_judgment(
        conn: &mut PgConnection,
        id: Uuid,
        accepted: bool,
        judged_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE entities SET accepted = $2, judged_at = $3 WHERE id = $1")
            .bind(id)
            .bind(accepted)
            .bind(judged_at)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Cascade delete: the kind row, changes, notes, and participants go
    /// with the entities row via foreign keys.
    pub(crate) async fn delete(conn: &mut PgConnection, id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    // ── Cache columns ─────────────────────────────────────────

    /// Write an attribute's current value into its cache column. `None` (or
    /// a value that does not fit the column's shape) clears the column.
    pub(crate) async fn write_cache(
        conn: &mut PgConnection,
        entity: &Entity,
        def: &AttributeDef,
        current: Option<&AttrValue>,
    ) -> StoreResult<()> {
        let Some(cache) = &def.cache else {
            return Ok(());
        };
        let sql = format!(
            "UPDATE {} SET {} = $2 WHERE entity_id = $1",
            entity.kind.cache_table(),
            cache.column
        );

        match cache.shape {
            CacheShape::Text => {
                let cached = current.and_then(|v| v.as_text().map(str::to_owned));
                sqlx::query(&sql).bind(entity.id).bind(cached).execute(conn).await?;
            }
            CacheShape::TextList => {
                let cached = current.and_then(|v| v.as_text_list().map(<[String]>::to_vec));
                sqlx::query(&sql).bind(entity.id).bind(cached).execute(conn).await?;
            }
            CacheShape::Timestamp => {
                let cached = current.and_then(AttrValue::as_datetime);
                sqlx::query(&sql).bind(entity.id).bind(cached).execute(conn).await?;
            }
        }
        Ok(())
    }

    /// Read an attribute from its cache column. `None` is a miss: either the
    /// attribute is absent or the column was cleared for a union-typed value,
    /// and the caller falls back to the change log either way.
    pub(crate) async fn read_cache(
        conn: &mut PgConnection,
        entity: &Entity,
        def: &AttributeDef,
    ) -> StoreResult<Option<AttrValue>> {
        let Some(cache) = &def.cache else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE entity_id = $1",
            cache.column,
            entity.kind.cache_table()
        );

        let value = match cache.shape {
            CacheShape::Text => sqlx::query_scalar::<_, Option<String>>(&sql)
                .bind(entity.id)
                .fetch_optional(conn)
                .await?
                .flatten()
                .map(AttrValue::text),
            CacheShape::TextList => sqlx::query_scalar::<_, Option<Vec<String>>>(&sql)
                .bind(entity.id)
                .fetch_optional(conn)
                .await?
                .flatten()
                .map(AttrValue::text_list),
            CacheShape::Timestamp => sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql)
                .bind(entity.id)
                .fetch_optional(conn)
                .await?
                .flatten()
                .map(AttrValue::datetime),
        };
        Ok(value)
    }

    // ── Participants mirror ───────────────────────────────────

    /// Rewrite the join-table mirror of the participants attribute.
    pub(crate) async fn write_participants(
        conn: &mut PgConnection,
        entity_id: Uuid,
        participants: &Participants,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM participants WHERE entity_id = $1")
            .bind(entity_id)
            .execute(&mut *conn)
            .await?;

        for (position, p) in participants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO participants (entity_id, position, role, person_id, institution_id)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(entity_id)
            .bind(position as i32)
            .bind(&p.role)
            .bind(p.person_id)
            .bind(p.institution_id)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub(crate) async fn read_participants(
        conn: &mut PgConnection,
        entity_id: Uuid,
    ) -> StoreResult<Participants> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT role, person_id, institution_id
            FROM participants
            WHERE entity_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(entity_id)
        .fetch_all(conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Participant {
                role: r.role,
                person_id: r.person_id,
                institution_id: r.institution_id,
            })
            .collect())
    }

    /// Re-point person/institution references in the join table (merge).
    pub(crate) async fn repoint_participants(
        conn: &mut PgConnection,
        from: Vec<Uuid>,
        to: Uuid,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE participants SET person_id = $2 WHERE person_id = ANY($1)")
            .bind(from.clone())
            .bind(to)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE participants SET institution_id = $2 WHERE institution_id = ANY($1)")
            .bind(from)
            .bind(to)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    // ── Lookups ───────────────────────────────────────────────

    /// Fast-path cruise lookup by cached expocode.
    pub(crate) async fn find_cruise_by_expocode(
        conn: &mut PgConnection,
        expocode: &str,
    ) -> StoreResult<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT e.id, e.kind, e.accepted, e.judged_at, e.created_at
            FROM entities e
            JOIN cruises c ON c.entity_id = e.id
            WHERE c.expocode = $1
            ORDER BY e.created_at ASC
            LIMIT 1
            "#,
        )
        .bind(expocode)
        .fetch_optional(conn)
        .await?;
        row.map(Entity::try_from).transpose()
    }
}
