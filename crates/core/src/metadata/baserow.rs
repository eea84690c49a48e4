//! Baserow metadata store.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::{AuthError, Credentials};
use crate::config::MetadataConfig;
use crate::metrics;
use crate::retry::{retry_after_header, RetryPolicy};

use super::{MetadataError, MetadataRecord, MetadataStore};

const SERVICE: &str = "baserow";

/// Baserow REST client reading one table by a key column.
pub struct BaserowClient {
    client: Client,
    config: MetadataConfig,
    credentials: Credentials,
    retry: RetryPolicy,
    jwt: RwLock<Option<String>>,
    table_id: RwLock<Option<u64>>,
}

impl BaserowClient {
    pub fn new(
        config: MetadataConfig,
        credentials: Credentials,
        retry: RetryPolicy,
    ) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("okar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MetadataError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            table_id: RwLock::new(config.table_id),
            config,
            credentials,
            retry,
            jwt: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Token(token) => request.header("Authorization", format!("Token {}", token)),
            Credentials::Password { .. } => match self.jwt.read().await.as_deref() {
                Some(jwt) => request.header("Authorization", format!("JWT {}", jwt)),
                None => request,
            },
        }
    }

    /// Maps non-success statuses onto errors.
    async fn check(&self, response: Response, url: &str) -> Result<Response, MetadataError> {
        let status = response.status();
        metrics::record_request(SERVICE, status.as_u16());
        match status.as_u16() {
            _ if status.is_success() => Ok(response),
            401 | 403 => Err(AuthError::rejected(SERVICE, format!("HTTP {} for {}", status, url)).into()),
            429 => Err(MetadataError::RateLimited {
                retry_after: retry_after_header(response.headers()),
            }),
            code => Err(MetadataError::Http {
                status: code,
                url: url.to_string(),
            }),
        }
    }

    async fn obtain_jwt_once(&self, username: &str, password: &str) -> Result<String, MetadataError> {
        let url = self.url("/api/user/token-auth/");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": username, "password": password }))
            .send()
            .await
            .map_err(MetadataError::from_reqwest)?;

        // Baserow answers bad credentials with 400.
        if response.status().as_u16() == 400 {
            metrics::record_request(SERVICE, 400);
            return Err(AuthError::rejected(SERVICE, "invalid email or password").into());
        }
        let response = self.check(response, &url).await?;

        let body: TokenResponse = response.json().await.map_err(MetadataError::from_reqwest)?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| MetadataError::InvalidResponse("token-auth returned no token".into()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, MetadataError> {
        let request = self.authorized(self.client.get(url)).await;
        let response = request.send().await.map_err(MetadataError::from_reqwest)?;
        let response = self.check(response, url).await?;
        response.json().await.map_err(MetadataError::from_reqwest)
    }

    async fn resolve_table(&self) -> Result<u64, MetadataError> {
        if let Some(id) = *self.table_id.read().await {
            return Ok(id);
        }

        let database = self.config.database_id.ok_or_else(|| {
            MetadataError::Configuration(
                "either metadata.table_id or metadata.database_id must be set".to_string(),
            )
        })?;
        if matches!(self.credentials, Credentials::Token(_)) {
            return Err(MetadataError::Configuration(
                "resolving a table by name needs username/password; set metadata.table_id to use a token"
                    .to_string(),
            ));
        }

        let url = self.url(&format!("/api/database/tables/database/{}/", database));
        let tables: Vec<TableInfo> = self
            .retry
            .run(SERVICE, "tables", || self.get_json(&url))
            .await?;
        let table = tables
            .into_iter()
            .find(|t| t.name == self.config.table_name)
            .ok_or_else(|| {
                MetadataError::Configuration(format!(
                    "no table named '{}' in database {}",
                    self.config.table_name, database
                ))
            })?;

        debug!(table_id = table.id, name = %table.name, "Resolved Baserow table");
        *self.table_id.write().await = Some(table.id);
        Ok(table.id)
    }
}

#[async_trait]
impl MetadataStore for BaserowClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn authenticate(&self) -> Result<(), MetadataError> {
        if let Credentials::Password { username, password } = &self.credentials {
            let jwt = self
                .retry
                .run(SERVICE, "token-auth", || self.obtain_jwt_once(username, password))
                .await?;
            *self.jwt.write().await = Some(jwt);
        }
        self.resolve_table().await?;
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<MetadataRecord>, MetadataError> {
        let table = self.resolve_table().await?;
        let url = self.url(&format!(
            "/api/database/rows/table/{}/?user_field_names=true&filter__{}__equal={}",
            table,
            urlencoding::encode(&self.config.key_field),
            urlencoding::encode(key)
        ));

        let page: RowsPage = self.retry.run(SERVICE, "rows", || self.get_json(&url)).await?;
        Ok(page
            .results
            .into_iter()
            .next()
            .map(|row| MetadataRecord {
                key: key.to_string(),
                fields: flatten_row(&row),
            }))
    }
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableInfo {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
}

fn flatten_row(row: &Map<String, Value>) -> BTreeMap<String, String> {
    row.iter()
        .map(|(column, value)| (column.clone(), cell_text(value)))
        .collect()
}

/// Text of a cell. Select and link cells contribute their `value` members.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(obj) => obj.get("value").map(cell_text).unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .map(cell_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_text_flattens_baserow_values() {
        assert_eq!(cell_text(&json!("  WSTLA-OKA-B1-1-095-1 ")), "WSTLA-OKA-B1-1-095-1");
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!(412)), "412");
        assert_eq!(cell_text(&json!({"id": 3, "value": "Oberkämmerer", "color": "blue"})), "Oberkämmerer");
        assert_eq!(
            cell_text(&json!([{"id": 1, "value": "A"}, {"id": 2, "value": "B"}])),
            "A, B"
        );
    }

    #[test]
    fn test_rows_page_first_row_flattened() {
        let page: RowsPage = serde_json::from_value(json!({
            "count": 1,
            "results": [{"id": 9, "Filename": "WSTLA-OKA-B1-1-095-1", "Pages": 412, "Note": null}]
        }))
        .unwrap();
        let fields = flatten_row(&page.results[0]);
        assert_eq!(fields["Filename"], "WSTLA-OKA-B1-1-095-1");
        assert_eq!(fields["Pages"], "412");
        assert_eq!(fields["Note"], "");
    }

    #[tokio::test]
    async fn test_token_without_table_id_is_configuration_error() {
        let config = MetadataConfig {
            database_id: Some(7),
            table_id: None,
            ..MetadataConfig::default()
        };
        let client = BaserowClient::new(
            config,
            Credentials::Token("t".to_string()),
            RetryPolicy::immediate(1),
        )
        .unwrap();
        let err = client.authenticate().await.unwrap_err();
        assert!(matches!(err, MetadataError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_configured_table_id_needs_no_request() {
        let config = MetadataConfig {
            table_id: Some(42),
            ..MetadataConfig::default()
        };
        let client = BaserowClient::new(
            config,
            Credentials::Token("t".to_string()),
            RetryPolicy::immediate(1),
        )
        .unwrap();
        assert_eq!(client.resolve_table().await.unwrap(), 42);
    }
}
