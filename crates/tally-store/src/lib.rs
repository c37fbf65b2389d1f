//! Integrity metadata persistence layer wrapping Fjall.
//!
//! [`MetadataStore`] keeps one [`FileRecord`](tally_types::FileRecord) per
//! (collection, file, pillar) and the per-pillar resumption cursors used by
//! incremental collection. Two Fjall keyspaces back it:
//!
//! - `records`: `collection \0 file \0 pillar` → serialized `FileRecord`
//! - `progress`: `collection \0 pillar` → serialized [`CollectionProgress`](tally_types::CollectionProgress)
//!
//! Record keys sort by collection, then file, then pillar, so a prefix scan
//! over a collection yields every file's records contiguously. The query
//! methods return lazy iterators built on that property.

mod error;
mod store;

pub use error::StoreError;
pub use store::{CollectionStats, MetadataStore, PillarStats};
