//! Mock document platform for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::fixtures;
use crate::auth::AuthError;
use crate::platform::{DocumentOverview, DocumentPlatform, DocumentSummary, PlatformError};

/// Mock implementation of [`DocumentPlatform`].
///
/// Documents are registered per collection; their METS is generated from
/// the overview unless a custom export is set. Failures are persistent so
/// retry loops see the same error on every attempt.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    collections: Arc<RwLock<BTreeMap<u64, Vec<DocumentOverview>>>>,
    mets: Arc<RwLock<HashMap<String, String>>>,
    mets_failures: Arc<RwLock<HashMap<String, u16>>>,
    rejected: Arc<RwLock<bool>>,
    auth_calls: Arc<RwLock<usize>>,
    list_calls: Arc<RwLock<usize>>,
    fetched: Arc<RwLock<Vec<String>>>,
}

fn status_error(status: u16, resource: String) -> PlatformError {
    match status {
        404 => PlatformError::not_found(resource),
        429 => PlatformError::RateLimited { retry_after: None },
        _ => PlatformError::Http {
            status,
            url: format!("mock://{}", resource),
        },
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document in a collection.
    pub async fn add_document(&self, collection: u64, overview: DocumentOverview) {
        self.collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .push(overview);
    }

    /// Overrides the METS export of a document.
    pub async fn set_mets(&self, doc_id: &str, mets: impl Into<String>) {
        self.mets.write().await.insert(doc_id.to_string(), mets.into());
    }

    /// Makes every METS download of `doc_id` fail with `status`.
    pub async fn fail_mets(&self, doc_id: &str, status: u16) {
        self.mets_failures
            .write()
            .await
            .insert(doc_id.to_string(), status);
    }

    /// Makes authentication fail.
    pub async fn reject_credentials(&self) {
        *self.rejected.write().await = true;
    }

    pub async fn auth_calls(&self) -> usize {
        *self.auth_calls.read().await
    }

    pub async fn list_calls(&self) -> usize {
        *self.list_calls.read().await
    }

    /// Document ids whose METS was downloaded, in call order.
    pub async fn fetched(&self) -> Vec<String> {
        self.fetched.read().await.clone()
    }

    async fn find(&self, collection: u64, doc_id: &str) -> Option<DocumentOverview> {
        self.collections
            .read()
            .await
            .get(&collection)?
            .iter()
            .find(|doc| doc.doc_id == doc_id)
            .cloned()
    }
}

#[async_trait]
impl DocumentPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authenticate(&self) -> Result<(), PlatformError> {
        *self.auth_calls.write().await += 1;
        if *self.rejected.read().await {
            return Err(AuthError::rejected("transkribus", "invalid credentials").into());
        }
        Ok(())
    }

    async fn list_documents(&self, collection: u64) -> Result<Vec<DocumentSummary>, PlatformError> {
        *self.list_calls.write().await += 1;
        let collections = self.collections.read().await;
        let docs = collections
            .get(&collection)
            .ok_or_else(|| PlatformError::not_found(format!("collection {}", collection)))?;
        Ok(docs
            .iter()
            .map(|doc| DocumentSummary {
                doc_id: doc.doc_id.clone(),
                title: doc.title.clone(),
            })
            .collect())
    }

    async fn document_overview(
        &self,
        collection: u64,
        doc_id: &str,
    ) -> Result<DocumentOverview, PlatformError> {
        self.find(collection, doc_id)
            .await
            .ok_or_else(|| PlatformError::not_found(format!("document {}/{}", collection, doc_id)))
    }

    async fn fetch_mets(&self, collection: u64, doc_id: &str) -> Result<String, PlatformError> {
        if let Some(&status) = self.mets_failures.read().await.get(doc_id) {
            return Err(status_error(status, format!("mets {}/{}", collection, doc_id)));
        }
        let overview = self
            .find(collection, doc_id)
            .await
            .ok_or_else(|| PlatformError::not_found(format!("mets {}/{}", collection, doc_id)))?;

        self.fetched.write().await.push(doc_id.to_string());
        if let Some(mets) = self.mets.read().await.get(doc_id) {
            return Ok(mets.clone());
        }
        Ok(fixtures::transkribus_mets(
            doc_id,
            &overview.title,
            overview.pages.len(),
        ))
    }
}
