//! Remote document platform abstraction.
//!
//! The fetch stage only needs four calls: authenticate, list a collection,
//! read a document overview and download its METS. `TranskribusClient` talks
//! to the Transkribus REST API; tests use `testing::MockPlatform`.

mod transkribus;
mod types;

pub use transkribus::TranskribusClient;
pub use types::*;

use async_trait::async_trait;

/// A remote platform hosting collections of transcribed documents.
#[async_trait]
pub trait DocumentPlatform: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Establishes a session. Rejected or missing credentials surface as
    /// [`PlatformError::Auth`].
    async fn authenticate(&self) -> Result<(), PlatformError>;

    async fn list_documents(&self, collection: u64) -> Result<Vec<DocumentSummary>, PlatformError>;

    async fn document_overview(
        &self,
        collection: u64,
        doc_id: &str,
    ) -> Result<DocumentOverview, PlatformError>;

    /// Raw METS export of a document.
    async fn fetch_mets(&self, collection: u64, doc_id: &str) -> Result<String, PlatformError>;
}
