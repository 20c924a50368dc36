//! Persisted layout.
//!
//! One shared `entities` table with a kind discriminator, one cache table per
//! concrete kind, the append-only `changes` table, `notes`, and the
//! `participants` join table. [`apply_schema`] is idempotent and is what the
//! integration tests (and first-run setup) call before touching the store.
//!
//! Cache-column names must stay in sync with
//! [`crate::attributes::default_registry`].

use sqlx::PgPool;
use tracing::debug;

use crate::error::StoreResult;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        accepted BOOLEAN NOT NULL DEFAULT FALSE,
        judged_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities (kind)",
    r#"
    CREATE TABLE IF NOT EXISTS changes (
        id UUID PRIMARY KEY,
        entity_id UUID NOT NULL REFERENCES entities (id) ON DELETE CASCADE,
        attr_key TEXT,
        value JSONB,
        accepted_value JSONB,
        proposed_by UUID NOT NULL,
        proposed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        acknowledged_by UUID,
        acknowledged_at TIMESTAMPTZ,
        judged_by UUID,
        judged_at TIMESTAMPTZ,
        accepted BOOLEAN NOT NULL DEFAULT FALSE,
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        perms_read TEXT[] NOT NULL DEFAULT '{}',
        perms_write TEXT[] NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_changes_entity_attr ON changes (entity_id, attr_key)",
    "CREATE INDEX IF NOT EXISTS idx_changes_judged_at ON changes (judged_at)",
    "CREATE INDEX IF NOT EXISTS idx_changes_proposed_by ON changes (proposed_by)",
    // Exactly-one-creation, enforced at the storage layer as well.
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_changes_creation ON changes (entity_id) WHERE attr_key IS NULL",
    r#"
    CREATE TABLE IF NOT EXISTS notes (
        id UUID PRIMARY KEY,
        change_id UUID NOT NULL REFERENCES changes (id) ON DELETE CASCADE,
        author_id UUID NOT NULL,
        body TEXT NOT NULL,
        action TEXT,
        subject TEXT,
        category TEXT,
        discussion BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notes_change ON notes (change_id)",
    r#"
    CREATE TABLE IF NOT EXISTS participants (
        entity_id UUID NOT NULL REFERENCES entities (id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        role TEXT NOT NULL,
        person_id UUID NOT NULL,
        institution_id UUID,
        PRIMARY KEY (entity_id, position)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_participants_person ON participants (person_id)",
    // Per-kind cache tables.
    r#"
    CREATE TABLE IF NOT EXISTS cruises (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        expocode TEXT,
        date_start TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cruises_expocode ON cruises (expocode)",
    r#"
    CREATE TABLE IF NOT EXISTS people (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT,
        email TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS institutions (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS countries (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT,
        iso_code TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ships (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        names TEXT[],
        collection_type TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parameters (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS units (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT,
        mnemonic TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parameter_groups (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        name TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS argo_files (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS old_submissions (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        entity_id UUID PRIMARY KEY REFERENCES entities (id) ON DELETE CASCADE,
        expocode TEXT
    )
    "#,
];

/// Advisory-lock key guarding concurrent schema application.
const SCHEMA_LOCK_KEY: i64 = 0x6372_7569_7365;

/// Create all tables and indexes if they do not exist. Safe to call from
/// concurrent processes: an advisory lock serializes the DDL.
pub async fn apply_schema(pool: &PgPool) -> StoreResult<()> {
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    let result: StoreResult<()> = async {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok(())
    }
    .await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    debug!("schema applied ({} statements)", SCHEMA.len());
    result
}
