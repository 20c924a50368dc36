//! cruise-store — versioned, moderated object store for oceanographic
//! cruise metadata.
//!
//! Any entity (a cruise, a person, a ship, an institution, …) is created and
//! has its attributes proposed, acknowledged, accepted, rejected, or
//! accepted-with-a-different-value, with full history preserved in an
//! append-only change log, fast current-value lookups through per-kind cache
//! columns, and consolidation of duplicate entities through the merge
//! engine.
//!
//! The crate is a library: the surrounding web layer, search indexer and
//! import tooling compose a [`Store`] once at startup (pool, attribute
//! registry, observers, blob store) and call its operations. See
//! [`attributes::default_registry`] for the standard attribute table and
//! [`database::schema::apply_schema`] for the persisted layout.

pub mod attributes;
pub mod blob;
pub mod codec;
pub mod database;
pub mod error;
pub mod events;
pub mod models;
pub mod store;

pub use attributes::{default_registry, AttributeDef, AttributeRegistry, RegistryBuilder};
pub use blob::{BlobHandle, BlobStore, FsBlobStore, MemoryBlobStore};
pub use codec::{AttrType, AttrValue, Track};
pub use database::{DatabaseConfig, DatabaseManager, HistoryFilter, NewNote, StateFilter};
pub use error::{StoreError, StoreResult};
pub use events::{ObserverSet, StoreObserver};
pub use models::{Change, Entity, EntityKind, ModerationState, Note, Participant, Participants};
pub use store::Store;
