//! The store façade.
//!
//! A [`Store`] owns the connection pool, the frozen attribute registry, the
//! observer set, and the blob store, and is passed by reference into every
//! operation — there is no ambient global. Each state-mutating operation
//! runs inside one transaction; notification hooks fire synchronously after
//! commit and never affect the outcome of the triggering operation.

use std::sync::Arc;

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attributes::AttributeRegistry;
use crate::blob::{BlobHandle, BlobStore};
use crate::codec::{self, AttrType, AttrValue};
use crate::database::change_log::{ChangeLog, HistoryFilter, NewChange, StateFilter};
use crate::database::entity_store::EntityStore;
use crate::database::merge::MergeEngine;
use crate::database::note_store::{NewNote, NoteStore};
use crate::error::{StoreError, StoreResult};
use crate::events::ObserverSet;
use crate::models::{Change, Entity, EntityKind, Note, Participant, Participants};

/// The versioned, moderated object store.
pub struct Store {
    pool: PgPool,
    registry: Arc<AttributeRegistry>,
    observers: ObserverSet,
    blobs: Arc<dyn BlobStore>,
}

impl Store {
    /// Compose a store. The registry and observer set are fixed for the
    /// lifetime of the store.
    pub fn new(
        pool: PgPool,
        registry: AttributeRegistry,
        observers: ObserverSet,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Store {
            pool,
            registry: Arc::new(registry),
            observers,
            blobs,
        }
    }

    pub fn registry(&self) -> &AttributeRegistry {
        &self.registry
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    async fn conn(&self) -> StoreResult<PoolConnection<Postgres>> {
        Ok(self.pool.acquire().await?)
    }

    // ── Entities ──────────────────────────────────────────────

    /// Create an entity of the given kind along with its (unjudged) creation
    /// change.
    pub async fn create_entity(
        &self,
        kind: EntityKind,
        proposer: Uuid,
    ) -> StoreResult<(Entity, Change)> {
        let mut tx = self.pool.begin().await?;
        let entity = EntityStore::insert(&mut tx, kind).await?;
        let creation = ChangeLog::insert(
            &mut tx,
            NewChange {
                entity_id: entity.id,
                proposed_by: proposer,
                ..NewChange::default()
            },
        )
        .await?;
        tx.commit().await?;

        info!(entity_id = %entity.id, %kind, "entity created");
        self.observers.entity_saved(&entity);
        Ok((entity, creation))
    }

    pub async fn get_entity(&self, id: Uuid) -> StoreResult<Entity> {
        let mut conn = self.conn().await?;
        EntityStore::get(&mut conn, id).await
    }

    /// List entities of one kind, optionally only those whose creation
    /// change has been accepted.
    pub async fn entities_by_kind(
        &self,
        kind: EntityKind,
        accepted_only: bool,
    ) -> StoreResult<Vec<Entity>> {
        let mut conn = self.conn().await?;
        EntityStore::by_kind(&mut conn, kind, accepted_only).await
    }

    /// Fast-path cruise lookup on the cached expocode column.
    pub async fn find_cruise_by_expocode(&self, expocode: &str) -> StoreResult<Option<Entity>> {
        let mut conn = self.conn().await?;
        EntityStore::find_cruise_by_expocode(&mut conn, expocode).await
    }

    /// Remove an entity, its changes, their notes and participant rows, and
    /// any file blobs its change values reference.
    pub async fn delete_entity(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let entity = EntityStore::get(&mut tx, id).await?;
        let handles = ChangeLog::file_handles_for_entity(&mut tx, id).await?;
        EntityStore::delete(&mut tx, id).await?;
        tx.commit().await?;

        self.delete_blobs(&handles).await;
        info!(entity_id = %entity.id, kind = %entity.kind, "entity deleted");
        self.observers.entity_deleted(&entity);
        Ok(())
    }

    /// Blob cleanup runs after commit; the blob store is external and
    /// eventually reconcilable, so failures are logged and swallowed.
    async fn delete_blobs(&self, handles: &[BlobHandle]) {
        for handle in handles {
            if let Err(err) = self.blobs.delete(handle).await {
                warn!(key = %handle.key, error = %err, "blob delete failed");
            }
        }
    }

    // ── Proposals ─────────────────────────────────────────────

    /// Propose a new value for a registered attribute. The change starts
    /// unjudged and unacknowledged.
    pub async fn propose(
        &self,
        entity_id: Uuid,
        proposer: Uuid,
        key: &str,
        value: &AttrValue,
    ) -> StoreResult<Change> {
        self.propose_restricted(entity_id, proposer, key, value, &[], &[])
            .await
    }

    /// [`Store::propose`] with read/write permission tags. A change with no
    /// read tags is public; otherwise a reader needs a matching tag (see
    /// [`Change::readable_by`]).
    pub async fn propose_restricted(
        &self,
        entity_id: Uuid,
        proposer: Uuid,
        key: &str,
        value: &AttrValue,
        perms_read: &[String],
        perms_write: &[String],
    ) -> StoreResult<Change> {
        let mut tx = self.pool.begin().await?;
        let entity = EntityStore::get(&mut tx, entity_id).await?;
        let def = self.registry.require(entity.kind, key)?;
        let raw = codec::serialize(def, value)?;

        let change = ChangeLog::insert(
            &mut tx,
            NewChange {
                entity_id,
                attr_key: Some(key.to_string()),
                value: Some(raw),
                proposed_by: proposer,
                perms_read: perms_read.to_vec(),
                perms_write: perms_write.to_vec(),
                ..NewChange::default()
            },
        )
        .await?;
        tx.commit().await?;

        debug!(change_id = %change.id, %entity_id, key, "change proposed");
        Ok(change)
    }

    /// Propose removing an attribute. Deletion rides the same moderation
    /// pipeline as any other value and can itself be rejected.
    pub async fn propose_deletion(
        &self,
        entity_id: Uuid,
        proposer: Uuid,
        key: &str,
    ) -> StoreResult<Change> {
        let mut tx = self.pool.begin().await?;
        let entity = EntityStore::get(&mut tx, entity_id).await?;
        self.registry.require(entity.kind, key)?;

        let change = ChangeLog::insert(
            &mut tx,
            NewChange {
                entity_id,
                attr_key: Some(key.to_string()),
                proposed_by: proposer,
                deleted: true,
                ..NewChange::default()
            },
        )
        .await?;
        tx.commit().await?;

        debug!(change_id = %change.id, %entity_id, key, "deletion proposed");
        Ok(change)
    }

    /// Store bytes in the blob store and propose the resulting handle as a
    /// file-typed attribute value.
    pub async fn propose_file(
        &self,
        entity_id: Uuid,
        proposer: Uuid,
        key: &str,
        bytes: &[u8],
        name: &str,
        mime: &str,
    ) -> StoreResult<Change> {
        let handle = self.blobs.put(bytes, name, mime).await?;
        self.propose(entity_id, proposer, key, &AttrValue::file(handle))
            .await
    }

    // ── Moderation ────────────────────────────────────────────

    /// Record acknowledgement once. Returns false (and changes nothing) if
    /// the change was already acknowledged.
    pub async fn acknowledge(&self, change_id: Uuid, acknowledger: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        ChangeLog::get(&mut tx, change_id).await?;
        let acknowledged = ChangeLog::acknowledge(&mut tx, change_id, acknowledger).await?;
        tx.commit().await?;

        debug!(%change_id, acknowledged, "acknowledge");
        Ok(acknowledged)
    }

    /// Accept a change, optionally substituting a replacement value. For a
    /// creation change this flips the owning entity's accepted flag; for an
    /// attribute change it refreshes the cache column.
    pub async fn accept(
        &self,
        change_id: Uuid,
        judge: Uuid,
        replacement: Option<&AttrValue>,
    ) -> StoreResult<Change> {
        let mut tx = self.pool.begin().await?;
        let change = ChangeLog::get_for_update(&mut tx, change_id).await?;
        if change.is_judged() {
            return Err(StoreError::AlreadyJudged { change_id });
        }
        let entity = EntityStore::get(&mut tx, change.entity_id).await?;

        let accepted_value = match (replacement, change.attr_key.as_deref()) {
            (None, _) => None,
            (Some(_), None) => {
                return Err(StoreError::UnserializableValue {
                    reason: "a creation change cannot carry a replacement value".into(),
                })
            }
            (Some(value), Some(key)) => {
                let def = self.registry.require(entity.kind, key)?;
                Some(codec::serialize(def, value)?)
            }
        };

        let change = ChangeLog::set_judgment(&mut tx, change_id, judge, true, accepted_value).await?;
        if change.is_creation() {
            EntityStore::set_creation_judgment(&mut tx, entity.id, true, change.judged_at).await?;
        } else if let Some(key) = change.attr_key.as_deref() {
            refresh_cache_for_key(&mut tx, &self.registry, &entity, key).await?;
        }
        tx.commit().await?;

        info!(%change_id, entity_id = %entity.id, "change accepted");
        let entity = self.get_entity(entity.id).await?;
        self.observers.entity_saved(&entity);
        Ok(change)
    }

    /// Reject a change. For a creation change this clears the owning
    /// entity's accepted flag.
    pub async fn reject(&self, change_id: Uuid, judge: Uuid) -> StoreResult<Change> {
        let mut tx = self.pool.begin().await?;
        let change = ChangeLog::get_for_update(&mut tx, change_id).await?;
        if change.is_judged() {
            return Err(StoreError::AlreadyJudged { change_id });
        }
        let entity = EntityStore::get(&mut tx, change.entity_id).await?;

        let change = ChangeLog::set_judgment(&mut tx, change_id, judge, false, None).await?;
        if change.is_creation() {
            EntityStore::set_creation_judgment(&mut tx, entity.id, false, change.judged_at).await?;
        } else if let Some(key) = change.attr_key.as_deref() {
            refresh_cache_for_key(&mut tx, &self.registry, &entity, key).await?;
        }
        tx.commit().await?;

        info!(%change_id, entity_id = %entity.id, "change rejected");
        let entity = self.get_entity(entity.id).await?;
        self.observers.entity_saved(&entity);
        Ok(change)
    }

    // ── Reads ─────────────────────────────────────────────────

    pub async fn get_change(&self, change_id: Uuid) -> StoreResult<Change> {
        let mut conn = self.conn().await?;
        ChangeLog::get(&mut conn, change_id).await
    }

    /// Current value for (entity, key): cache-first, falling back to a scan
    /// of judged-accepted changes. Absent when the latest accepted change
    /// is a deletion or none exists.
    pub async fn current_value(&self, entity_id: Uuid, key: &str) -> StoreResult<Option<AttrValue>> {
        let mut conn = self.conn().await?;
        let entity = EntityStore::get(&mut conn, entity_id).await?;
        let def = self.registry.require(entity.kind, key)?;

        if def.types.contains(&AttrType::Participants) {
            let mirrored = EntityStore::read_participants(&mut conn, entity_id).await?;
            if !mirrored.is_empty() {
                return Ok(Some(AttrValue::participants(mirrored)));
            }
            return ChangeLog::current_value_from_log(&mut conn, entity_id, key).await;
        }

        if let Some(cached) = EntityStore::read_cache(&mut conn, &entity, def).await? {
            return Ok(Some(cached));
        }
        ChangeLog::current_value_from_log(&mut conn, entity_id, key).await
    }

    /// Current value recomputed from the change log alone, bypassing the
    /// cache. The cache/log agreement property says this always equals
    /// [`Store::current_value`].
    pub async fn current_value_uncached(
        &self,
        entity_id: Uuid,
        key: &str,
    ) -> StoreResult<Option<AttrValue>> {
        let mut conn = self.conn().await?;
        ChangeLog::current_value_from_log(&mut conn, entity_id, key).await
    }

    /// Change history for an entity, proposal-time ascending, optionally
    /// filtered by attribute key and moderation state.
    pub async fn history(
        &self,
        entity_id: Uuid,
        filter: &HistoryFilter,
    ) -> StoreResult<Vec<Change>> {
        let mut conn = self.conn().await?;
        ChangeLog::history(&mut conn, entity_id, filter).await
    }

    /// Changes awaiting acknowledgement or judgment.
    pub async fn unjudged_changes(&self, entity_id: Uuid) -> StoreResult<Vec<Change>> {
        self.history(entity_id, &HistoryFilter::state(StateFilter::Unjudged))
            .await
    }

    /// Acknowledged-but-unjudged changes — the moderation queue.
    pub async fn pending_changes(&self, entity_id: Uuid) -> StoreResult<Vec<Change>> {
        self.history(entity_id, &HistoryFilter::state(StateFilter::Pending))
            .await
    }

    pub async fn changes_proposed_by(&self, person_id: Uuid) -> StoreResult<Vec<Change>> {
        let mut conn = self.conn().await?;
        ChangeLog::proposed_by(&mut conn, person_id).await
    }

    /// The entity's creation change.
    pub async fn creation_change(&self, entity_id: Uuid) -> StoreResult<Change> {
        let mut conn = self.conn().await?;
        ChangeLog::creation_change(&mut conn, entity_id).await
    }

    // ── Participants ──────────────────────────────────────────

    /// Propose the participant list with one more entry, folding duplicate
    /// (role, person) pairs.
    pub async fn add_participant(
        &self,
        entity_id: Uuid,
        proposer: Uuid,
        participant: Participant,
    ) -> StoreResult<Change> {
        let mut participants = self
            .current_value(entity_id, "participants")
            .await?
            .and_then(|v| match v {
                AttrValue::Participants { v } => Some(v),
                _ => None,
            })
            .unwrap_or_default();
        participants.insert(participant);
        self.propose(
            entity_id,
            proposer,
            "participants",
            &AttrValue::participants(participants),
        )
        .await
    }

    /// Propose the participant list with every (role, person) match removed.
    pub async fn remove_participant(
        &self,
        entity_id: Uuid,
        proposer: Uuid,
        role: &str,
        person_id: Uuid,
    ) -> StoreResult<Change> {
        let mut participants = self
            .current_value(entity_id, "participants")
            .await?
            .and_then(|v| match v {
                AttrValue::Participants { v } => Some(v),
                _ => None,
            })
            .unwrap_or_default();

        if !participants.remove(role, person_id) {
            return Err(StoreError::NotFound {
                what: "participant",
                id: format!("{role}@{person_id}"),
            });
        }
        self.propose(
            entity_id,
            proposer,
            "participants",
            &AttrValue::participants(participants),
        )
        .await
    }

    // ── Notes ─────────────────────────────────────────────────

    pub async fn add_note(
        &self,
        change_id: Uuid,
        author_id: Uuid,
        new: NewNote,
    ) -> StoreResult<Note> {
        let mut tx = self.pool.begin().await?;
        ChangeLog::get(&mut tx, change_id).await?;
        let note = NoteStore::insert(&mut tx, change_id, author_id, new).await?;
        tx.commit().await?;

        self.observers.note_saved(&note);
        Ok(note)
    }

    pub async fn update_note(&self, note_id: Uuid, body: &str) -> StoreResult<Note> {
        let mut conn = self.conn().await?;
        let note = NoteStore::update_body(&mut conn, note_id, body).await?;
        self.observers.note_saved(&note);
        Ok(note)
    }

    pub async fn delete_note(&self, note_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let note = NoteStore::get(&mut tx, note_id).await?;
        NoteStore::delete(&mut tx, note_id).await?;
        tx.commit().await?;

        self.observers.note_deleted(&note);
        Ok(())
    }

    /// Notes on a change, oldest first. Discussion notes are included only
    /// when asked for (moderator views).
    pub async fn notes(&self, change_id: Uuid, include_discussion: bool) -> StoreResult<Vec<Note>> {
        let mut conn = self.conn().await?;
        NoteStore::for_change(&mut conn, change_id, include_discussion).await
    }

    // ── Merge ─────────────────────────────────────────────────

    /// Consolidate duplicate entities of the same kind into `survivor_id`.
    /// Atomic: either every pointer is rewritten and every mergee deleted,
    /// or nothing happened.
    pub async fn merge(
        &self,
        survivor_id: Uuid,
        judge: Uuid,
        mergee_ids: &[Uuid],
    ) -> StoreResult<Entity> {
        let mut tx = self.pool.begin().await?;
        let survivor = EntityStore::get(&mut tx, survivor_id).await?;
        let mut mergees = Vec::with_capacity(mergee_ids.len());
        for &id in mergee_ids {
            mergees.push(EntityStore::get(&mut tx, id).await?);
        }

        MergeEngine::merge(&mut tx, &self.registry, &survivor, judge, &mergees).await?;
        tx.commit().await?;

        info!(survivor = %survivor_id, mergees = mergees.len(), "entities merged");
        let survivor = self.get_entity(survivor_id).await?;
        self.observers.entity_saved(&survivor);
        for mergee in &mergees {
            self.observers.entity_deleted(mergee);
        }
        Ok(survivor)
    }
}

/// Recompute (entity, key)'s current value from the log and write it through
/// to the cache column and/or participants mirror.
async fn refresh_cache_for_key(
    conn: &mut PgConnection,
    registry: &AttributeRegistry,
    entity: &Entity,
    key: &str,
) -> StoreResult<()> {
    let Some(def) = registry.get(entity.kind, key) else {
        return Ok(());
    };

    if def.types.contains(&AttrType::Participants) {
        let participants = match ChangeLog::current_value_from_log(conn, entity.id, key).await? {
            Some(AttrValue::Participants { v }) => v,
            _ => Participants::new(),
        };
        EntityStore::write_participants(conn, entity.id, &participants).await?;
    }

    if def.cache.is_some() {
        let current = ChangeLog::current_value_from_log(conn, entity.id, key).await?;
        EntityStore::write_cache(conn, entity, def, current.as_ref()).await?;
    }
    Ok(())
}
