//! Per-kind attribute definitions.
//!
//! The registry maps `(EntityKind, key)` to an [`AttributeDef`]: the set of
//! accepted value types (possibly a union), a human label, an optional
//! cache-column binding, and the policy the merge engine applies to the
//! attribute. It is populated once at startup through [`RegistryBuilder`] and
//! frozen — the built registry exposes no mutation API, so proposing a change
//! for an unregistered key is always an [`InvalidAttribute`] error.
//!
//! [`InvalidAttribute`]: crate::error::StoreError::InvalidAttribute

use std::collections::HashMap;

use crate::codec::AttrType;
use crate::error::{StoreError, StoreResult};
use crate::models::EntityKind;

/// SQL shape of a cache column. A value whose concrete type cannot live in
/// the column's shape (union-typed attributes) clears the column instead of
/// leaving it stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheShape {
    Text,
    TextList,
    Timestamp,
}

/// Binding of an attribute to a fast-path column on the kind's cache table.
#[derive(Debug, Clone, Copy)]
pub struct CacheColumn {
    pub column: &'static str,
    pub shape: CacheShape,
}

/// How the merge engine consolidates this attribute across survivor and
/// mergees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// No special handling; newest judged-accepted change wins as usual.
    None,
    /// Survivor's values first, then unseen mergee values, deduplicated.
    UnionList,
    /// First non-empty value in (survivor, mergees…) order wins.
    FirstNonEmpty,
}

/// Definition of one legal attribute for one entity kind.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub key: &'static str,
    pub label: &'static str,
    /// Accepted value types. More than one entry makes this a union-typed
    /// attribute (e.g. "timestamp or free text").
    pub types: Vec<AttrType>,
    pub cache: Option<CacheColumn>,
    pub merge: MergePolicy,
}

impl AttributeDef {
    pub fn new(key: &'static str, label: &'static str, ty: AttrType) -> Self {
        AttributeDef {
            key,
            label,
            types: vec![ty],
            cache: None,
            merge: MergePolicy::None,
        }
    }

    pub fn with_types(key: &'static str, label: &'static str, types: Vec<AttrType>) -> Self {
        AttributeDef {
            key,
            label,
            types,
            cache: None,
            merge: MergePolicy::None,
        }
    }

    /// Bind this attribute to a cache column on the kind's table.
    pub fn cached(mut self, column: &'static str, shape: CacheShape) -> Self {
        self.cache = Some(CacheColumn { column, shape });
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge = policy;
        self
    }

    /// Whether a value of the given type is acceptable here.
    pub fn accepts(&self, ty: AttrType) -> bool {
        self.types.contains(&ty)
    }

    /// Human-readable accepted-type set, for error messages.
    pub fn types_display(&self) -> String {
        self.types
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Frozen `(kind, key) → definition` table.
#[derive(Debug)]
pub struct AttributeRegistry {
    defs: HashMap<EntityKind, Vec<AttributeDef>>,
}

impl AttributeRegistry {
    pub fn get(&self, kind: EntityKind, key: &str) -> Option<&AttributeDef> {
        self.defs.get(&kind)?.iter().find(|d| d.key == key)
    }

    /// Look up a definition, failing with [`StoreError::InvalidAttribute`].
    pub fn require(&self, kind: EntityKind, key: &str) -> StoreResult<&AttributeDef> {
        self.get(kind, key).ok_or_else(|| StoreError::InvalidAttribute {
            kind,
            key: key.to_string(),
        })
    }

    /// All definitions for a kind, in registration order.
    pub fn defs(&self, kind: EntityKind) -> &[AttributeDef] {
        self.defs.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Definitions with a cache-column binding.
    pub fn cached_defs(&self, kind: EntityKind) -> impl Iterator<Item = &AttributeDef> {
        self.defs(kind).iter().filter(|d| d.cache.is_some())
    }

    /// Definitions the merge engine consolidates explicitly.
    pub fn merge_defs(&self, kind: EntityKind) -> impl Iterator<Item = &AttributeDef> {
        self.defs(kind)
            .iter()
            .filter(|d| d.merge != MergePolicy::None)
    }
}

/// Builder used exactly once at composition time.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    defs: HashMap<EntityKind, Vec<AttributeDef>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        RegistryBuilder::default()
    }

    pub fn attribute(mut self, kind: EntityKind, def: AttributeDef) -> Self {
        self.defs.entry(kind).or_default().push(def);
        self
    }

    pub fn build(self) -> AttributeRegistry {
        AttributeRegistry { defs: self.defs }
    }
}

/// The attribute table for the standard entity kinds.
///
/// Cache-column names here must stay in sync with the DDL in
/// [`crate::database::schema`].
pub fn default_registry() -> AttributeRegistry {
    use AttrType::*;
    use EntityKind::*;

    RegistryBuilder::new()
        // Cruise
        .attribute(
            Cruise,
            AttributeDef::new("expocode", "ExpoCode", Text).cached("expocode", CacheShape::Text),
        )
        .attribute(Cruise, AttributeDef::new("link", "Info link", Text))
        .attribute(Cruise, AttributeDef::new("frequency", "Frequency", Text))
        .attribute(
            Cruise,
            AttributeDef::with_types("date_start", "Start date", vec![DateTime, Text])
                .cached("date_start", CacheShape::Timestamp),
        )
        .attribute(
            Cruise,
            AttributeDef::with_types("date_end", "End date", vec![DateTime, Text]),
        )
        .attribute(Cruise, AttributeDef::new("statuses", "Statuses", TextList))
        .attribute(
            Cruise,
            AttributeDef::new("aliases", "Aliases", TextList).merge_policy(MergePolicy::UnionList),
        )
        .attribute(Cruise, AttributeDef::new("ports", "Ports", TextList))
        .attribute(Cruise, AttributeDef::new("ship", "Ship", Ref(Ship)))
        .attribute(Cruise, AttributeDef::new("country", "Country", Ref(Country)))
        .attribute(
            Cruise,
            AttributeDef::new("institutions", "Institutions", RefList(Institution)),
        )
        .attribute(
            Cruise,
            AttributeDef::new("collections", "Collections", RefList(Collection)),
        )
        .attribute(Cruise, AttributeDef::new("track", "Track", Track))
        .attribute(
            Cruise,
            AttributeDef::new("participants", "Participants", Participants),
        )
        .attribute(Cruise, AttributeDef::new("data_suggestion", "Data suggestion", File))
        .attribute(Cruise, AttributeDef::new("data_dir", "Data directory", Text))
        .attribute(Cruise, AttributeDef::new("archive", "Archive", File))
        // Person
        .attribute(
            Person,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            Person,
            AttributeDef::new("email", "Email", Text)
                .cached("email", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            Person,
            AttributeDef::new("institution", "Institution", Ref(Institution)),
        )
        .attribute(Person, AttributeDef::new("country", "Country", Ref(Country)))
        .attribute(Person, AttributeDef::new("permissions", "Permissions", TextList))
        // Institution
        .attribute(
            Institution,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(Institution, AttributeDef::new("phone", "Phone", Text))
        .attribute(Institution, AttributeDef::new("address", "Address", Text))
        .attribute(Institution, AttributeDef::new("url", "URL", Text))
        .attribute(
            Institution,
            AttributeDef::new("country", "Country", Ref(Country)),
        )
        // Country
        .attribute(
            Country,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            Country,
            AttributeDef::new("iso_code", "ISO 3166-1 alpha-2", Text)
                .cached("iso_code", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            Country,
            AttributeDef::new("codes", "Alternate codes", TextList)
                .merge_policy(MergePolicy::UnionList),
        )
        // Ship
        .attribute(
            Ship,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            Ship,
            AttributeDef::new("nodc_platform_code", "NODC platform code", Text),
        )
        .attribute(Ship, AttributeDef::new("url", "URL", Text))
        .attribute(Ship, AttributeDef::new("country", "Country", Ref(Country)))
        // Collection
        .attribute(
            Collection,
            AttributeDef::new("names", "Names", TextList)
                .cached("names", CacheShape::TextList)
                .merge_policy(MergePolicy::UnionList),
        )
        .attribute(
            Collection,
            AttributeDef::new("type", "Type", Text)
                .cached("collection_type", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(Collection, AttributeDef::new("basins", "Basins", TextList))
        .attribute(Collection, AttributeDef::new("oceans", "Oceans", TextList))
        .attribute(
            Collection,
            AttributeDef::new("institution", "Institution", Ref(Institution)),
        )
        .attribute(
            Collection,
            AttributeDef::new("country", "Country", Ref(Country)),
        )
        // Parameter
        .attribute(
            Parameter,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(Parameter, AttributeDef::new("full_name", "Full name", Text))
        .attribute(
            Parameter,
            AttributeDef::new("name_netcdf", "netCDF name", Text),
        )
        .attribute(Parameter, AttributeDef::new("format", "Format", Text))
        .attribute(Parameter, AttributeDef::new("bounds", "Bounds", TextList))
        .attribute(Parameter, AttributeDef::new("units", "Units", Ref(Unit)))
        .attribute(
            Parameter,
            AttributeDef::new("in_groups", "Parameter groups", RefList(ParameterGroup)),
        )
        // Unit
        .attribute(
            Unit,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            Unit,
            AttributeDef::new("mnemonic", "Mnemonic", Text).cached("mnemonic", CacheShape::Text),
        )
        // ParameterGroup
        .attribute(
            ParameterGroup,
            AttributeDef::new("name", "Name", Text)
                .cached("name", CacheShape::Text)
                .merge_policy(MergePolicy::FirstNonEmpty),
        )
        .attribute(
            ParameterGroup,
            AttributeDef::new("order", "Parameter order", TextList),
        )
        // ArgoFile
        .attribute(
            ArgoFile,
            AttributeDef::new("text_identifier", "Identifier", Text),
        )
        .attribute(ArgoFile, AttributeDef::new("file", "File", File))
        .attribute(ArgoFile, AttributeDef::new("description", "Description", Text))
        .attribute(ArgoFile, AttributeDef::new("display", "Display", Bool))
        // OldSubmission
        .attribute(OldSubmission, AttributeDef::new("date", "Date", DateTime))
        .attribute(OldSubmission, AttributeDef::new("stamp", "Stamp", Text))
        .attribute(OldSubmission, AttributeDef::new("submitter", "Submitter", Text))
        .attribute(OldSubmission, AttributeDef::new("line", "Line", Text))
        .attribute(OldSubmission, AttributeDef::new("folder", "Folder", Text))
        .attribute(OldSubmission, AttributeDef::new("file", "File", File))
        // Submission
        .attribute(
            Submission,
            AttributeDef::new("expocode", "ExpoCode", Text).cached("expocode", CacheShape::Text),
        )
        .attribute(Submission, AttributeDef::new("ship_name", "Ship name", Text))
        .attribute(Submission, AttributeDef::new("line", "Line", Text))
        .attribute(Submission, AttributeDef::new("action", "Action", Text))
        .attribute(Submission, AttributeDef::new("type", "Type", Text))
        .attribute(
            Submission,
            AttributeDef::with_types("cruise_date", "Cruise date", vec![DateTime, Text]),
        )
        .attribute(Submission, AttributeDef::new("file", "File", File))
        .build()
}
