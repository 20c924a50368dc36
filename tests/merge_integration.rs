//! Merge engine integration tests.
//!
//! Requires a running PostgreSQL database; see tests/helpers/mod.rs.

mod helpers;

use cruise_store::{
    AttrValue, EntityKind, HistoryFilter, Participant, StoreError,
};
use uuid::Uuid;

/// Merging two institutions: a cruise referencing the mergee follows the
/// merge, the survivor keeps its own name, the mergee's name stays in
/// history, and the mergee stops resolving.
#[tokio::test]
async fn institution_merge_rewrites_references() {
    let Some(store) = helpers::try_store().await else { return; };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let (alpha, alpha_creation) = store
        .create_entity(EntityKind::Institution, proposer)
        .await
        .unwrap();
    store.accept(alpha_creation.id, judge, None).await.unwrap();
    let change = store
        .propose(alpha.id, proposer, "name", &AttrValue::text("Alpha"))
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    let (beta, beta_creation) = store
        .create_entity(EntityKind::Institution, proposer)
        .await
        .unwrap();
    store.accept(beta_creation.id, judge, None).await.unwrap();
    let change = store
        .propose(beta.id, proposer, "name", &AttrValue::text("Beta"))
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    // A cruise referencing Beta as its institution.
    let (cruise, _) = store
        .create_entity(EntityKind::Cruise, proposer)
        .await
        .unwrap();
    let change = store
        .propose(
            cruise.id,
            proposer,
            "institutions",
            &AttrValue::reference_list(EntityKind::Institution, [beta.id]),
        )
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    store.merge(alpha.id, judge, &[beta.id]).await.unwrap();

    // The cruise's institution reference now resolves to Alpha.
    assert_eq!(
        store.current_value(cruise.id, "institutions").await.unwrap(),
        Some(AttrValue::reference_list(
            EntityKind::Institution,
            [alpha.id]
        ))
    );

    // Alpha's name history contains both names; its current name is still
    // its own.
    let names = store
        .history(alpha.id, &HistoryFilter::key("name"))
        .await
        .unwrap();
    let texts: Vec<_> = names
        .iter()
        .filter_map(|ch| ch.effective_value())
        .filter_map(|raw| raw.get("v").and_then(|v| v.as_str()).map(str::to_owned))
        .collect();
    assert!(texts.contains(&"Alpha".to_string()));
    assert!(texts.contains(&"Beta".to_string()));
    assert_eq!(
        store.current_value(alpha.id, "name").await.unwrap(),
        Some(AttrValue::text("Alpha"))
    );
    assert_eq!(
        store.current_value(alpha.id, "name").await.unwrap(),
        store.current_value_uncached(alpha.id, "name").await.unwrap()
    );

    // Beta no longer exists.
    assert!(matches!(
        store.get_entity(beta.id).await,
        Err(StoreError::NotFound { .. })
    ));
}

/// Collection names union: survivor's names first, then unseen mergee names,
/// in order; the first non-empty type wins.
#[tokio::test]
async fn collection_merge_unions_names_and_keeps_first_type() {
    let Some(store) = helpers::try_store().await else { return; };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let (a, _) = store
        .create_entity(EntityKind::Collection, proposer)
        .await
        .unwrap();
    let change = store
        .propose(
            a.id,
            proposer,
            "names",
            &AttrValue::text_list(["WOCE", "CLIVAR"]),
        )
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    let (b, _) = store
        .create_entity(EntityKind::Collection, proposer)
        .await
        .unwrap();
    let change = store
        .propose(
            b.id,
            proposer,
            "names",
            &AttrValue::text_list(["CLIVAR", "A10"]),
        )
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();
    let change = store
        .propose(b.id, proposer, "type", &AttrValue::text("group"))
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    store.merge(a.id, judge, &[b.id]).await.unwrap();

    assert_eq!(
        store.current_value(a.id, "names").await.unwrap(),
        Some(AttrValue::text_list(["WOCE", "CLIVAR", "A10"]))
    );
    // The survivor had no type; the mergee's non-empty type is adopted.
    assert_eq!(
        store.current_value(a.id, "type").await.unwrap(),
        Some(AttrValue::text("group"))
    );
    assert_eq!(
        store.current_value(a.id, "names").await.unwrap(),
        store.current_value_uncached(a.id, "names").await.unwrap()
    );
}

#[tokio::test]
async fn merge_across_kinds_is_rejected_atomically() {
    let Some(store) = helpers::try_store().await else { return; };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let (cruise, _) = store
        .create_entity(EntityKind::Cruise, proposer)
        .await
        .unwrap();
    let (ship, _) = store.create_entity(EntityKind::Ship, proposer).await.unwrap();
    let change = store
        .propose(ship.id, proposer, "name", &AttrValue::text("Knorr"))
        .await
        .unwrap();
    store.accept(change.id, judge, None).await.unwrap();

    assert!(matches!(
        store.merge(cruise.id, judge, &[ship.id]).await,
        Err(StoreError::KindMismatch { .. })
    ));

    // Nothing was applied: the ship still exists with its name.
    assert_eq!(
        store.current_value(ship.id, "name").await.unwrap(),
        Some(AttrValue::text("Knorr"))
    );
}

/// Merging people re-points attribution (proposer/judge), note authorship,
/// and participant rows.
#[tokio::test]
async fn person_merge_repoints_attribution_and_participants() {
    let Some(store) = helpers::try_store().await else { return; };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let (keeper, _) = store
        .create_entity(EntityKind::Person, proposer)
        .await
        .unwrap();
    let (duplicate, _) = store
        .create_entity(EntityKind::Person, proposer)
        .await
        .unwrap();

    // The duplicate proposed a change on a cruise and annotated it.
    let (cruise, _) = store
        .create_entity(EntityKind::Cruise, proposer)
        .await
        .unwrap();
    let proposed = store
        .propose(cruise.id, duplicate.id, "expocode", &AttrValue::text("PM1"))
        .await
        .unwrap();
    let note = store
        .add_note(
            proposed.id,
            duplicate.id,
            cruise_store::NewNote::new("needs a second look"),
        )
        .await
        .unwrap();

    // The duplicate also sails on the cruise.
    let participants = store
        .add_participant(
            cruise.id,
            proposer,
            Participant::new("chief_scientist", duplicate.id),
        )
        .await
        .unwrap();
    store.accept(participants.id, judge, None).await.unwrap();

    store.merge(keeper.id, judge, &[duplicate.id]).await.unwrap();

    let proposed = store.get_change(proposed.id).await.unwrap();
    assert_eq!(proposed.proposed_by, keeper.id);

    let notes = store.notes(proposed.id, true).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, note.id);
    assert_eq!(notes[0].author_id, keeper.id);

    match store.current_value(cruise.id, "participants").await.unwrap() {
        Some(AttrValue::Participants { v }) => {
            let entry = v.iter().next().expect("participant survived the merge");
            assert_eq!(entry.person_id, keeper.id);
            assert_eq!(entry.role, "chief_scientist");
        }
        other => panic!("expected participants, got {other:?}"),
    }

    assert!(matches!(
        store.get_entity(duplicate.id).await,
        Err(StoreError::NotFound { .. })
    ));
}

/// Merging more than one mergee at once applies the same rules to each, in
/// order.
#[tokio::test]
async fn multi_mergee_union_keeps_order() {
    let Some(store) = helpers::try_store().await else { return; };
    let proposer = Uuid::new_v4();
    let judge = Uuid::new_v4();

    let mut collections = Vec::new();
    for names in [vec!["S1"], vec!["M1", "S1"], vec!["M2"]] {
        let (c, _) = store
            .create_entity(EntityKind::Collection, proposer)
            .await
            .unwrap();
        let change = store
            .propose(c.id, proposer, "names", &AttrValue::text_list(names))
            .await
            .unwrap();
        store.accept(change.id, judge, None).await.unwrap();
        collections.push(c);
    }

    let survivor = &collections[0];
    store
        .merge(
            survivor.id,
            judge,
            &[collections[1].id, collections[2].id],
        )
        .await
        .unwrap();

    assert_eq!(
        store.current_value(survivor.id, "names").await.unwrap(),
        Some(AttrValue::text_list(["S1", "M1", "M2"]))
    );
}
