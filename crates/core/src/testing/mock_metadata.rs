//! Mock metadata store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::auth::AuthError;
use crate::metadata::{MetadataError, MetadataRecord, MetadataStore};

/// Mock implementation of [`MetadataStore`] that records every lookup.
#[derive(Debug, Clone, Default)]
pub struct MockMetadataStore {
    records: Arc<RwLock<HashMap<String, MetadataRecord>>>,
    failures: Arc<RwLock<HashMap<String, u16>>>,
    rejected: Arc<RwLock<bool>>,
    lookups: Arc<RwLock<Vec<String>>>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_record(&self, record: MetadataRecord) {
        self.records
            .write()
            .await
            .insert(record.key.clone(), record);
    }

    /// Makes every lookup of `key` fail with `status`.
    pub async fn fail_lookup(&self, key: &str, status: u16) {
        self.failures.write().await.insert(key.to_string(), status);
    }

    pub async fn reject_credentials(&self) {
        *self.rejected.write().await = true;
    }

    /// Keys looked up so far, in call order.
    pub async fn lookups(&self) -> Vec<String> {
        self.lookups.read().await.clone()
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authenticate(&self) -> Result<(), MetadataError> {
        if *self.rejected.read().await {
            return Err(AuthError::rejected("baserow", "invalid token").into());
        }
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<MetadataRecord>, MetadataError> {
        self.lookups.write().await.push(key.to_string());
        if let Some(&status) = self.failures.read().await.get(key) {
            return Err(match status {
                429 => MetadataError::RateLimited { retry_after: None },
                _ => MetadataError::Http {
                    status,
                    url: format!("mock://rows/{}", key),
                },
            });
        }
        Ok(self.records.read().await.get(key).cloned())
    }
}
