//! Value codec for attribute payloads.
//!
//! Every attribute value is persisted as a tagged JSON document inside the
//! owning change row. The tag (`"t"`) names the concrete shape, so stored
//! values are self-describing and `deserialize(serialize(v)) == v` holds for
//! every value a codec accepts. Unsupported shapes fail loudly with
//! [`StoreError::TypeMismatch`] / [`StoreError::UnserializableValue`] rather
//! than silently truncating.
//!
//! Union-typed attributes (e.g. "timestamp or free text" for legacy cruise
//! dates) are expressed as a *set* of accepted [`AttrType`]s on the attribute
//! definition; the tag distinguishes a parsed timestamp from raw text at read
//! time, so both round-trip without loss.

mod track;

pub use track::{LineString, Point, Track};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::AttributeDef;
use crate::blob::BlobHandle;
use crate::error::{StoreError, StoreResult};
use crate::models::{EntityKind, Participants};

/// Semantic type of an attribute value.
///
/// References carry the referenced kind so a `ship` attribute cannot be
/// pointed at, say, a parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Text,
    Integer,
    Float,
    Bool,
    TextList,
    IdList,
    DateTime,
    Ref(EntityKind),
    RefList(EntityKind),
    File,
    Track,
    Participants,
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrType::Text => f.write_str("text"),
            AttrType::Integer => f.write_str("integer"),
            AttrType::Float => f.write_str("float"),
            AttrType::Bool => f.write_str("bool"),
            AttrType::TextList => f.write_str("text_list"),
            AttrType::IdList => f.write_str("id_list"),
            AttrType::DateTime => f.write_str("datetime"),
            AttrType::Ref(kind) => write!(f, "ref({kind})"),
            AttrType::RefList(kind) => write!(f, "ref_list({kind})"),
            AttrType::File => f.write_str("file"),
            AttrType::Track => f.write_str("track"),
            AttrType::Participants => f.write_str("participants"),
        }
    }
}

/// A decoded attribute value.
///
/// The serialized form is the internally tagged JSON of this enum, e.g.
/// `{"t":"text","v":"AB1"}` or `{"t":"entity_ref","kind":"ship","id":"…"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum AttrValue {
    Text { v: String },
    Integer { v: i64 },
    Float { v: f64 },
    Bool { v: bool },
    TextList { v: Vec<String> },
    IdList { v: Vec<Uuid> },
    DateTime { v: DateTime<Utc> },
    EntityRef { kind: EntityKind, id: Uuid },
    EntityRefList { kind: EntityKind, ids: Vec<Uuid> },
    File { handle: BlobHandle },
    Track { track: Track },
    Participants { v: Participants },
}

impl AttrValue {
    pub fn text(v: impl Into<String>) -> Self {
        AttrValue::Text { v: v.into() }
    }

    pub fn integer(v: i64) -> Self {
        AttrValue::Integer { v }
    }

    pub fn float(v: f64) -> Self {
        AttrValue::Float { v }
    }

    pub fn boolean(v: bool) -> Self {
        AttrValue::Bool { v }
    }

    pub fn text_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttrValue::TextList {
            v: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id_list(ids: impl IntoIterator<Item = Uuid>) -> Self {
        AttrValue::IdList {
            v: ids.into_iter().collect(),
        }
    }

    pub fn datetime(v: DateTime<Utc>) -> Self {
        AttrValue::DateTime { v }
    }

    pub fn reference(kind: EntityKind, id: Uuid) -> Self {
        AttrValue::EntityRef { kind, id }
    }

    pub fn reference_list(kind: EntityKind, ids: impl IntoIterator<Item = Uuid>) -> Self {
        AttrValue::EntityRefList {
            kind,
            ids: ids.into_iter().collect(),
        }
    }

    pub fn file(handle: BlobHandle) -> Self {
        AttrValue::File { handle }
    }

    pub fn track(track: Track) -> Self {
        AttrValue::Track { track }
    }

    pub fn participants(v: Participants) -> Self {
        AttrValue::Participants { v }
    }

    /// The semantic type of this value.
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Text { .. } => AttrType::Text,
            AttrValue::Integer { .. } => AttrType::Integer,
            AttrValue::Float { .. } => AttrType::Float,
            AttrValue::Bool { .. } => AttrType::Bool,
            AttrValue::TextList { .. } => AttrType::TextList,
            AttrValue::IdList { .. } => AttrType::IdList,
            AttrValue::DateTime { .. } => AttrType::DateTime,
            AttrValue::EntityRef { kind, .. } => AttrType::Ref(*kind),
            AttrValue::EntityRefList { kind, .. } => AttrType::RefList(*kind),
            AttrValue::File { .. } => AttrType::File,
            AttrValue::Track { .. } => AttrType::Track,
            AttrValue::Participants { .. } => AttrType::Participants,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text { v } => Some(v),
            _ => None,
        }
    }

    pub fn as_text_list(&self) -> Option<&[String]> {
        match self {
            AttrValue::TextList { v } => Some(v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttrValue::DateTime { v } => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob_handle(&self) -> Option<&BlobHandle> {
        match self {
            AttrValue::File { handle } => Some(handle),
            _ => None,
        }
    }
}

/// Serialize a value for storage against a specific attribute definition.
///
/// The value's type must be one of the definition's accepted types.
pub fn serialize(def: &AttributeDef, value: &AttrValue) -> StoreResult<serde_json::Value> {
    if !def.accepts(value.attr_type()) {
        return Err(StoreError::TypeMismatch {
            key: def.key.to_string(),
            expected: def.types_display(),
            found: value.attr_type().to_string(),
        });
    }
    Ok(serde_json::to_value(value)?)
}

/// Decode a stored value. Stored values are self-describing.
pub fn deserialize(raw: &serde_json::Value) -> StoreResult<AttrValue> {
    Ok(serde_json::from_value(raw.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::default_registry;
    use proptest::prelude::*;

    fn round_trip(value: AttrValue) {
        let raw = serde_json::to_value(&value).unwrap();
        assert_eq!(deserialize(&raw).unwrap(), value);
    }

    #[test]
    fn scalar_values_round_trip() {
        round_trip(AttrValue::text("AB1"));
        round_trip(AttrValue::integer(-3));
        round_trip(AttrValue::float(12.75));
        round_trip(AttrValue::boolean(true));
        round_trip(AttrValue::datetime(Utc::now()));
    }

    #[test]
    fn composite_values_round_trip() {
        round_trip(AttrValue::text_list(["a", "b", "a"]));
        round_trip(AttrValue::id_list([Uuid::new_v4(), Uuid::new_v4()]));
        round_trip(AttrValue::reference(EntityKind::Ship, Uuid::new_v4()));
        round_trip(AttrValue::reference_list(
            EntityKind::Institution,
            [Uuid::new_v4()],
        ));
        round_trip(AttrValue::file(BlobHandle {
            key: "ab".into(),
            name: "ctd.zip".into(),
            mime: "application/zip".into(),
        }));
        round_trip(AttrValue::track(Track::from_points([(1.0, 2.0), (3.0, 4.0)])));

        let mut participants = Participants::new();
        participants.insert(crate::models::Participant::new(
            "chief_scientist",
            Uuid::new_v4(),
        ));
        round_trip(AttrValue::participants(participants));
    }

    #[test]
    fn tags_are_stable() {
        let raw = serde_json::to_value(AttrValue::text("x")).unwrap();
        assert_eq!(raw["t"], "text");

        let raw = serde_json::to_value(AttrValue::reference(EntityKind::Ship, Uuid::nil())).unwrap();
        assert_eq!(raw["t"], "entity_ref");
        assert_eq!(raw["kind"], "ship");
    }

    #[test]
    fn union_typed_attribute_accepts_both_shapes() {
        let registry = default_registry();
        let def = registry.get(EntityKind::Cruise, "date_start").unwrap();

        assert!(serialize(def, &AttrValue::datetime(Utc::now())).is_ok());
        assert!(serialize(def, &AttrValue::text("mid-July 1994")).is_ok());
        assert!(serialize(def, &AttrValue::integer(1994)).is_err());
    }

    #[test]
    fn mismatched_type_reports_expected_set() {
        let registry = default_registry();
        let def = registry.get(EntityKind::Cruise, "expocode").unwrap();

        let err = serialize(def, &AttrValue::integer(1)).unwrap_err();
        match err {
            StoreError::TypeMismatch { key, found, .. } => {
                assert_eq!(key, "expocode");
                assert_eq!(found, "integer");
            }
            other => panic!("expected TypeMismatch, got {other}"),
        }
    }

    #[test]
    fn reference_kind_is_enforced() {
        let registry = default_registry();
        let def = registry.get(EntityKind::Cruise, "ship").unwrap();

        assert!(serialize(def, &AttrValue::reference(EntityKind::Ship, Uuid::new_v4())).is_ok());
        assert!(serialize(def, &AttrValue::reference(EntityKind::Country, Uuid::new_v4())).is_err());
    }

    proptest! {
        #[test]
        fn text_round_trips(s in ".*") {
            round_trip(AttrValue::text(s));
        }

        #[test]
        fn integers_round_trip(v in any::<i64>()) {
            round_trip(AttrValue::integer(v));
        }

        #[test]
        fn finite_floats_round_trip(v in -1.0e15f64..1.0e15f64) {
            round_trip(AttrValue::float(v));
        }

        #[test]
        fn text_lists_round_trip(v in proptest::collection::vec(".*", 0..8)) {
            round_trip(AttrValue::text_list(v));
        }

        #[test]
        fn tracks_round_trip(points in proptest::collection::vec(
            (-180.0f64..180.0, -90.0f64..90.0), 0..16))
        {
            let track = Track::from_points(points);
            prop_assert_eq!(Track::from_wkt(&track.to_wkt()).unwrap(), track.clone());
            round_trip(AttrValue::track(track));
        }
    }
}
