//! External metadata store used to fill header documents.
//!
//! A store maps an edition key (the canonical file stem) to one record of
//! named text fields. `BaserowClient` reads them from a Baserow table; tests
//! use `testing::MockMetadataStore`.

mod baserow;
mod types;

pub use baserow::BaserowClient;
pub use types::*;

use async_trait::async_trait;

/// Read access to descriptive metadata keyed by edition.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    fn name(&self) -> &str;

    /// Prepares credentials (and anything else lookups need).
    async fn authenticate(&self) -> Result<(), MetadataError>;

    /// Record for `key`, or `None` when the store has no such row.
    async fn lookup(&self, key: &str) -> Result<Option<MetadataRecord>, MetadataError>;
}
