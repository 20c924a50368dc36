//! Merge engine — consolidation of duplicate entities.
//!
//! All effects run inside the caller's transaction: re-point changes, notes,
//! serialized entity references and participant rows from the mergees onto
//! the survivor, apply the registry's consolidation policies, delete the
//! mergees, and rebuild the survivor's cache columns. Partial application is
//! never observable outside the transaction.

use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

use crate::attributes::{AttributeRegistry, MergePolicy};
use crate::codec::{self, AttrValue};
use crate::database::change_log::ChangeLog;
use crate::database::entity_store::EntityStore;
use crate::database::note_store::NoteStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{Entity, Participants};

pub(crate) struct MergeEngine;

impl MergeEngine {
    pub(crate) async fn merge(
        conn: &mut PgConnection,
        registry: &AttributeRegistry,
        survivor: &Entity,
        judge: Uuid,
        mergees: &[Entity],
    ) -> StoreResult<()> {
        for mergee in mergees {
            if mergee.kind != survivor.kind {
                return Err(StoreError::KindMismatch {
                    expected: survivor.kind,
                    found: mergee.kind,
                });
            }
        }
        let mergee_ids: Vec<Uuid> = mergees.iter().map(|m| m.id).collect();

        // Consolidation values are computed from pre-merge currents; after
        // re-pointing, "newest judgment wins" would otherwise let a mergee's
        // later judgment shadow the survivor.
        let mut consolidations = Vec::new();
        for def in registry.merge_defs(survivor.kind) {
            let survivor_current =
                ChangeLog::current_value_from_log(&mut *conn, survivor.id, def.key).await?;
            let mut mergee_currents = Vec::with_capacity(mergees.len());
            for mergee in mergees {
                mergee_currents
                    .push(ChangeLog::current_value_from_log(&mut *conn, mergee.id, def.key).await?);
            }

            let merged = match def.merge {
                MergePolicy::UnionList => union_lists(&survivor_current, &mergee_currents),
                MergePolicy::FirstNonEmpty => first_non_empty(&survivor_current, &mergee_currents),
                MergePolicy::None => None,
            };
            if let Some(value) = merged {
                consolidations.push((def, value));
            }
        }

        // Re-point everything that referenced a mergee. Attribute changes
        // move to the survivor; each mergee's creation change is its
        // identity and dies with it below.
        let moved =
            ChangeLog::repoint_ownership(&mut *conn, mergee_ids.clone(), survivor.id).await?;
        ChangeLog::repoint_people(&mut *conn, mergee_ids.clone(), survivor.id).await?;
        NoteStore::repoint_authors(&mut *conn, mergee_ids.clone(), survivor.id).await?;
        EntityStore::repoint_participants(&mut *conn, mergee_ids.clone(), survivor.id).await?;

        // Serialized references held by other entities are rewritten in
        // place so history is not polluted by the merge itself.
        let candidates = ChangeLog::reference_valued(&mut *conn).await?;
        for change in candidates {
            let value = rewrite_refs(change.value.as_ref(), &mergee_ids, survivor.id)?;
            let accepted_value =
                rewrite_refs(change.accepted_value.as_ref(), &mergee_ids, survivor.id)?;
            if value.is_some() || accepted_value.is_some() {
                ChangeLog::rewrite_values(
                    &mut *conn,
                    change.id,
                    value.or(change.value),
                    accepted_value.or(change.accepted_value),
                )
                .await?;
            }
        }

        for (def, value) in consolidations {
            let raw = codec::serialize(def, &value)?;
            ChangeLog::insert_accepted(&mut *conn, survivor.id, def.key, raw, judge).await?;
        }

        for mergee in mergees {
            EntityStore::delete(&mut *conn, mergee.id).await?;
        }

        // Re-pointed history can change any current value; rebuild every
        // cache column from the log.
        for def in registry.cached_defs(survivor.kind) {
            let current =
                ChangeLog::current_value_from_log(&mut *conn, survivor.id, def.key).await?;
            EntityStore::write_cache(&mut *conn, survivor, def, current.as_ref()).await?;
        }
        if registry.get(survivor.kind, "participants").is_some() {
            let participants =
                match ChangeLog::current_value_from_log(&mut *conn, survivor.id, "participants")
                    .await?
                {
                    Some(AttrValue::Participants { v }) => v,
                    _ => Participants::new(),
                };
            EntityStore::write_participants(&mut *conn, survivor.id, &participants).await?;
        }

        debug!(
            survivor = %survivor.id,
            mergees = mergees.len(),
            changes_moved = moved,
            "merge applied"
        );
        Ok(())
    }
}

/// Rewrite mergee ids inside a serialized reference value. Returns `None`
/// when nothing changed.
fn rewrite_refs(
    raw: Option<&serde_json::Value>,
    mergee_ids: &[Uuid],
    survivor_id: Uuid,
) -> StoreResult<Option<serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let rewritten = match codec::deserialize(raw)? {
        AttrValue::EntityRef { kind, id } if mergee_ids.contains(&id) => {
            Some(AttrValue::EntityRef {
                kind,
                id: survivor_id,
            })
        }
        AttrValue::EntityRefList { kind, ids } if ids.iter().any(|id| mergee_ids.contains(id)) => {
            let mut seen = Vec::with_capacity(ids.len());
            for id in ids {
                let id = if mergee_ids.contains(&id) {
                    survivor_id
                } else {
                    id
                };
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
            Some(AttrValue::EntityRefList { kind, ids: seen })
        }
        AttrValue::Participants { mut v } => {
            let mut touched = false;
            for mergee in mergee_ids {
                touched |= v.repoint(*mergee, survivor_id);
            }
            touched.then_some(AttrValue::Participants { v })
        }
        _ => None,
    };
    rewritten
        .map(|value| serde_json::to_value(value).map_err(StoreError::from))
        .transpose()
}

/// Survivor's values first, then unseen mergee values, in order.
fn union_lists(
    survivor: &Option<AttrValue>,
    mergees: &[Option<AttrValue>],
) -> Option<AttrValue> {
    let base: Vec<String> = survivor
        .as_ref()
        .and_then(|v| v.as_text_list())
        .map(<[String]>::to_vec)
        .unwrap_or_default();

    let mut merged = base.clone();
    for current in mergees.iter().flatten() {
        for item in current.as_text_list().unwrap_or(&[]) {
            if !merged.contains(item) {
                merged.push(item.clone());
            }
        }
    }

    if merged.is_empty() || merged == base && survivor.is_some() {
        return None;
    }
    Some(AttrValue::text_list(merged))
}

/// First non-empty value in (survivor, mergees…) order.
fn first_non_empty(
    survivor: &Option<AttrValue>,
    mergees: &[Option<AttrValue>],
) -> Option<AttrValue> {
    let non_empty = |v: &&AttrValue| match v {
        AttrValue::Text { v } => !v.is_empty(),
        AttrValue::TextList { v } => !v.is_empty(),
        _ => true,
    };

    let chosen = std::iter::once(survivor.as_ref())
        .chain(mergees.iter().map(Option::as_ref))
        .flatten()
        .find(non_empty)?
        .clone();

    // No contest: the survivor keeps its own value and no mergee brought
    // one, so there is nothing to re-assert.
    let contested = mergees.iter().any(Option::is_some);
    if !contested && Some(&chosen) == survivor.as_ref() {
        return None;
    }
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_preserves_survivor_order_then_appends() {
        let survivor = Some(AttrValue::text_list(["WOCE", "CLIVAR"]));
        let mergees = vec![
            Some(AttrValue::text_list(["CLIVAR", "GO-SHIP"])),
            Some(AttrValue::text_list(["WOCE", "A10"])),
        ];

        let merged = union_lists(&survivor, &mergees).unwrap();
        assert_eq!(
            merged.as_text_list().unwrap(),
            &["WOCE", "CLIVAR", "GO-SHIP", "A10"]
        );
    }

    #[test]
    fn union_with_nothing_new_is_a_noop() {
        let survivor = Some(AttrValue::text_list(["WOCE"]));
        let mergees = vec![Some(AttrValue::text_list(["WOCE"])), None];
        assert_eq!(union_lists(&survivor, &mergees), None);
    }

    #[test]
    fn union_adopts_mergee_list_when_survivor_has_none() {
        let mergees = vec![Some(AttrValue::text_list(["A10"]))];
        let merged = union_lists(&None, &mergees).unwrap();
        assert_eq!(merged.as_text_list().unwrap(), &["A10"]);
    }

    #[test]
    fn first_non_empty_prefers_survivor() {
        let survivor = Some(AttrValue::text("group"));
        let mergees = vec![Some(AttrValue::text("spatial_group"))];
        assert_eq!(
            first_non_empty(&survivor, &mergees),
            Some(AttrValue::text("group"))
        );
    }

    #[test]
    fn first_non_empty_skips_empty_survivor_value() {
        let survivor = Some(AttrValue::text(""));
        let mergees = vec![None, Some(AttrValue::text("group"))];
        assert_eq!(
            first_non_empty(&survivor, &mergees),
            Some(AttrValue::text("group"))
        );
    }

    #[test]
    fn first_non_empty_uncontested_is_a_noop() {
        let survivor = Some(AttrValue::text("group"));
        assert_eq!(first_non_empty(&survivor, &[None, None]), None);
    }

    #[test]
    fn rewrite_single_ref() {
        use crate::models::EntityKind;
        let mergee = Uuid::new_v4();
        let survivor = Uuid::new_v4();
        let raw =
            serde_json::to_value(AttrValue::reference(EntityKind::Institution, mergee)).unwrap();

        let rewritten = rewrite_refs(Some(&raw), &[mergee], survivor).unwrap().unwrap();
        assert_eq!(
            codec::deserialize(&rewritten).unwrap(),
            AttrValue::reference(EntityKind::Institution, survivor)
        );
    }

    #[test]
    fn rewrite_ref_list_dedups_collisions() {
        use crate::models::EntityKind;
        let mergee = Uuid::new_v4();
        let survivor = Uuid::new_v4();
        let raw = serde_json::to_value(AttrValue::reference_list(
            EntityKind::Institution,
            [survivor, mergee],
        ))
        .unwrap();

        let rewritten = rewrite_refs(Some(&raw), &[mergee], survivor).unwrap().unwrap();
        assert_eq!(
            codec::deserialize(&rewritten).unwrap(),
            AttrValue::reference_list(EntityKind::Institution, [survivor])
        );
    }

    #[test]
    fn unrelated_refs_are_left_alone() {
        use crate::models::EntityKind;
        let raw =
            serde_json::to_value(AttrValue::reference(EntityKind::Ship, Uuid::new_v4())).unwrap();
        assert_eq!(
            rewrite_refs(Some(&raw), &[Uuid::new_v4()], Uuid::new_v4()).unwrap(),
            None
        );
    }
}
