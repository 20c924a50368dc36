//! Note rows.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::Note;

/// Insert payload for a new note.
#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub body: String,
    pub action: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    /// Discussion notes are moderator-internal and excluded from public
    /// listings.
    pub discussion: bool,
}

impl NewNote {
    pub fn new(body: impl Into<String>) -> Self {
        NewNote {
            body: body.into(),
            ..NewNote::default()
        }
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn discussion(mut self) -> Self {
        self.discussion = true;
        self
    }
}

pub(crate) struct NoteStore;

impl NoteStore {
    pub(crate) async fn insert(
        conn: &mut PgConnection,
        change_id: Uuid,
        author_id: Uuid,
        new: NewNote,
    ) -> StoreResult<Note> {
        let note = sqlx::query_as::<_, Note>(
            r#"
            INSERT INTO notes (id, change_id, author_id, body, action, subject, category, discussion)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(change_id)
        .bind(author_id)
        .bind(new.body)
        .bind(new.action)
        .bind(new.subject)
        .bind(new.category)
        .bind(new.discussion)
        .fetch_one(conn)
        .await?;
        Ok(note)
    }

    pub(crate) async fn get(conn: &mut PgConnection, id: Uuid) -> StoreResult<Note> {
        sqlx::query_as::<_, Note>("SELECT * FROM notes WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::not_found("note", id))
    }

    pub(crate) async fn update_body(
        conn: &mut PgConnection,
        id: Uuid,
        body: &str,
    ) -> StoreResult<Note> {
        sqlx::query_as::<_, Note>("UPDATE notes SET body = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(body)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::not_found("note", id))
    }

    pub(crate) async fn delete(conn: &mut PgConnection, id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub(crate) async fn for_change(
        conn: &mut PgConnection,
        change_id: Uuid,
        include_discussion: bool,
    ) -> StoreResult<Vec<Note>> {
        let mut sql = String::from("SELECT * FROM notes WHERE change_id = $1");
        if !include_discussion {
            sql.push_str(" AND NOT discussion");
        }
        sql.push_str(" ORDER BY created_at ASC");

        Ok(sqlx::query_as::<_, Note>(&sql)
            .bind(change_id)
            .fetch_all(conn)
            .await?)
    }

    /// Re-point note authorship during a merge.
    pub(crate) async fn repoint_authors(
        conn: &mut PgConnection,
        from: Vec<Uuid>,
        to: Uuid,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE notes SET author_id = $2 WHERE author_id = ANY($1)")
            .bind(from)
            .bind(to)
            .execute(conn)
            .await?;
        Ok(())
    }
}
