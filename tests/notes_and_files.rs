//! Notes, file attributes, cascade deletion, and notification hooks.
//!
//! Requires a running PostgreSQL database; see tests/helpers/mod.rs.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cruise_store::{
    AttrValue, Entity, EntityKind, MemoryBlobStore, NewNote, Note, ObserverSet, StoreError,
    StoreObserver,
};
use uuid::Uuid;

#[tokio::test]
async fn note_crud_and_discussion_filter() {
    let Some(store) = helpers::try_store().await else { return; };
    let proposer = Uuid::new_v4();
    let author = Uuid::new_v4();

    let (_cruise, creation) = store
        .create_entity(EntityKind::Cruise, proposer)
        .await
        .unwrap();

    let public = store
        .add_note(
            creation.id,
            author,
            NewNote::new("submitted by the PI").action("create").subject("cruise"),
        )
        .await
        .unwrap();
    let internal = store
        .add_note(
            creation.id,
            author,
            NewNote::new("double-check the ship name").discussion(),
        )
        .await
        .unwrap();

    // Public view excludes discussion notes.
    let visible = store.notes(creation.id, false).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, public.id);
    assert_eq!(visible[0].action.as_deref(), Some("create"));

    let all = store.notes(creation.id, true).await.unwrap();
    assert_eq!(all.len(), 2);

    let updated = store
        .update_note(internal.id, "ship name confirmed")
        .await
        .unwrap();
    assert_eq!(updated.body, "ship name confirmed");

    store.delete_note(internal.id).await.unwrap();
    assert_eq!(store.notes(creation.id, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn file_attribute_round_trips_through_blob_store() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let Some(store) = helpers::try_store_with(ObserverSet::new(), blobs.clone()).await else {
        return;
    };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let (cruise, _) = store
        .create_entity(EntityKind::Cruise, proposer)
        .await
        .unwrap();
    let change = store
        .propose_file(
            cruise.id,
            proposer,
            "data_suggestion",
            b"EXPOCODE,DATE\nAB1,19940712\n",
            "ab1_bottle.csv",
            "text/csv",
        )
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    let handle = match store
        .current_value(cruise.id, "data_suggestion")
        .await
        .unwrap()
    {
        Some(AttrValue::File { handle }) => handle,
        other => panic!("expected a file value, got {other:?}"),
    };
    assert_eq!(handle.name, "ab1_bottle.csv");
    assert_eq!(handle.mime, "text/csv");

    let bytes = store.blob_store().get(&handle).await.unwrap();
    assert_eq!(bytes, b"EXPOCODE,DATE\nAB1,19940712\n");
}

/// Deleting an entity removes exactly its changes, their notes, and the file
/// blobs its values reference — and nothing belonging to anyone else.
#[tokio::test]
async fn entity_delete_cascades_changes_notes_and_blobs() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let Some(store) = helpers::try_store_with(ObserverSet::new(), blobs.clone()).await else {
        return;
    };
    let proposer = Uuid::new_v4();
    let author = Uuid::new_v4();

    let (doomed, doomed_creation) = store
        .create_entity(EntityKind::ArgoFile, proposer)
        .await
        .unwrap();
    let file_change = store
        .propose_file(
            doomed.id,
            proposer,
            "file",
            b"argo profile bytes",
            "argo.nc",
            "application/netcdf",
        )
        .await
        .unwrap();
    store
        .add_note(doomed_creation.id, author, NewNote::new("imported from ftp"))
        .await
        .unwrap();

    // A bystander with its own note, to prove the cascade is scoped.
    let (bystander, bystander_creation) = store
        .create_entity(EntityKind::ArgoFile, proposer)
        .await
        .unwrap();
    let bystander_note = store
        .add_note(bystander_creation.id, author, NewNote::new("unrelated"))
        .await
        .unwrap();

    assert_eq!(blobs.len(), 1);
    store.delete_entity(doomed.id).await.unwrap();

    assert!(matches!(
        store.get_entity(doomed.id).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.get_change(file_change.id).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(blobs.is_empty());

    // The bystander is untouched.
    store.get_entity(bystander.id).await.unwrap();
    let notes = store.notes(bystander_creation.id, true).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, bystander_note.id);
}

#[derive(Default)]
struct Recorder {
    saved: AtomicUsize,
    deleted: AtomicUsize,
    notes_saved: AtomicUsize,
    notes_deleted: AtomicUsize,
}

impl StoreObserver for Recorder {
    fn on_entity_saved(&self, _entity: &Entity) -> anyhow::Result<()> {
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_entity_deleted(&self, _entity: &Entity) -> anyhow::Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_note_saved(&self, _note: &Note) -> anyhow::Result<()> {
        self.notes_saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_note_deleted(&self, _note: &Note) -> anyhow::Result<()> {
        self.notes_deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A failing observer never affects the operation, and the working observer
/// still sees every event.
struct Flaky;

impl StoreObserver for Flaky {
    fn on_entity_saved(&self, _entity: &Entity) -> anyhow::Result<()> {
        anyhow::bail!("search index down")
    }
}

#[tokio::test]
async fn hooks_fire_after_commit_and_failures_are_swallowed() {
    let recorder = Arc::new(Recorder::default());
    let observers = ObserverSet::new()
        .register(Arc::new(Flaky))
        .register(recorder.clone());
    let Some(store) =
        helpers::try_store_with(observers, Arc::new(MemoryBlobStore::new())).await
    else {
        return;
    };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let (ship, creation) = store
        .create_entity(EntityKind::Ship, proposer)
        .await
        .unwrap();
    assert_eq!(recorder.saved.load(Ordering::SeqCst), 1);

    store.accept(creation.id, judge, None).await.unwrap();
    assert_eq!(recorder.saved.load(Ordering::SeqCst), 2);

    let note = store
        .add_note(creation.id, proposer, NewNote::new("new ship"))
        .await
        .unwrap();
    assert_eq!(recorder.notes_saved.load(Ordering::SeqCst), 1);

    store.delete_note(note.id).await.unwrap();
    assert_eq!(recorder.notes_deleted.load(Ordering::SeqCst), 1);

    store.delete_entity(ship.id).await.unwrap();
    assert_eq!(recorder.deleted.load(Ordering::SeqCst), 1);
}
