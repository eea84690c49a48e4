//! Transkribus REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::{AuthError, Credentials};
use crate::config::PlatformConfig;
use crate::metrics;
use crate::retry::{retry_after_header, RetryPolicy};

use super::{DocumentOverview, DocumentPlatform, DocumentSummary, PageInfo, PlatformError};

const SERVICE: &str = "transkribus";

/// Transkribus client with a cookie-backed session.
pub struct TranskribusClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    retry: RetryPolicy,
    /// Set once a login succeeded; cleared when the session expires.
    session: Arc<RwLock<bool>>,
}

impl TranskribusClient {
    pub fn new(
        config: &PlatformConfig,
        credentials: Credentials,
        retry: RetryPolicy,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .user_agent(concat!("okar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            retry,
            session: Arc::new(RwLock::new(false)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn doc_path(collection: u64, doc_id: &str, suffix: &str) -> String {
        format!(
            "/collections/{}/{}/{}",
            collection,
            urlencoding::encode(doc_id),
            suffix
        )
    }

    async fn login_once(&self) -> Result<(), PlatformError> {
        let Credentials::Password { username, password } = &self.credentials else {
            return Ok(());
        };

        let response = self
            .client
            .post(self.url("/auth/login"))
            .form(&[("user", username.as_str()), ("pw", password.as_str())])
            .send()
            .await
            .map_err(PlatformError::from_reqwest)?;

        let status = response.status();
        metrics::record_request(SERVICE, status.as_u16());
        match status.as_u16() {
            _ if status.is_success() => Ok(()),
            401 | 403 => Err(AuthError::rejected(SERVICE, format!("HTTP {}", status)).into()),
            429 => Err(PlatformError::RateLimited {
                retry_after: retry_after_header(response.headers()),
            }),
            code => Err(PlatformError::Http {
                status: code,
                url: self.url("/auth/login"),
            }),
        }
    }

    async fn login(&self) -> Result<(), PlatformError> {
        self.retry.run(SERVICE, "login", || self.login_once()).await?;
        *self.session.write().await = true;
        debug!(method = self.credentials.method(), "Transkribus session established");
        Ok(())
    }

    async fn ensure_authenticated(&self) -> Result<(), PlatformError> {
        if *self.session.read().await {
            return Ok(());
        }
        self.login().await
    }

    async fn get_once(&self, url: &str) -> Result<String, PlatformError> {
        let mut request = self.client.get(url);
        if let Credentials::Token(token) = &self.credentials {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(PlatformError::from_reqwest)?;

        let status = response.status();
        metrics::record_request(SERVICE, status.as_u16());
        match status.as_u16() {
            _ if status.is_success() => response.text().await.map_err(PlatformError::from_reqwest),
            401 | 403 => Err(AuthError::rejected(SERVICE, format!("HTTP {} for {}", status, url)).into()),
            404 => Err(PlatformError::not_found(url)),
            429 => Err(PlatformError::RateLimited {
                retry_after: retry_after_header(response.headers()),
            }),
            code => Err(PlatformError::Http {
                status: code,
                url: url.to_string(),
            }),
        }
    }

    /// Authenticated GET with retries. An expired password session is
    /// renewed once.
    async fn get(&self, what: &str, path: &str) -> Result<String, PlatformError> {
        self.ensure_authenticated().await?;
        let url = self.url(path);

        match self.retry.run(SERVICE, what, || self.get_once(&url)).await {
            Err(PlatformError::Auth(_)) if matches!(self.credentials, Credentials::Password { .. }) => {
                warn!("Transkribus session expired, re-authenticating");
                *self.session.write().await = false;
                self.login().await?;
                self.retry.run(SERVICE, what, || self.get_once(&url)).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl DocumentPlatform for TranskribusClient {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn authenticate(&self) -> Result<(), PlatformError> {
        self.login().await
    }

    async fn list_documents(&self, collection: u64) -> Result<Vec<DocumentSummary>, PlatformError> {
        let body = self
            .get("list", &format!("/collections/{}/list", collection))
            .await?;
        parse_document_list(&body)
    }

    async fn document_overview(
        &self,
        collection: u64,
        doc_id: &str,
    ) -> Result<DocumentOverview, PlatformError> {
        let body = self
            .get("fulldoc", &Self::doc_path(collection, doc_id, "fulldoc"))
            .await?;
        parse_overview(&body, doc_id)
    }

    async fn fetch_mets(&self, collection: u64, doc_id: &str) -> Result<String, PlatformError> {
        self.get("mets", &Self::doc_path(collection, doc_id, "mets"))
            .await
    }
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrpDocMetadata {
    #[serde(default)]
    doc_id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    nr_of_transcribed_lines: Value,
    #[serde(default)]
    nr_of_transcribed_pages: Value,
}

#[derive(Debug, Deserialize)]
struct TrpFullDoc {
    md: TrpDocMetadata,
    #[serde(rename = "pageList", default)]
    page_list: TrpPageList,
}

#[derive(Debug, Default, Deserialize)]
struct TrpPageList {
    #[serde(default)]
    pages: Vec<TrpPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrpPage {
    #[serde(default)]
    page_nr: Value,
    #[serde(default)]
    img_file_name: Option<String>,
    /// Status of the current transcript, when the server reports it directly.
    #[serde(default)]
    ct_status: Option<String>,
    #[serde(default)]
    ts_list: TrpTranscriptList,
}

#[derive(Debug, Default, Deserialize)]
struct TrpTranscriptList {
    #[serde(default)]
    transcripts: Vec<TrpTranscript>,
}

#[derive(Debug, Deserialize)]
struct TrpTranscript {
    #[serde(default)]
    status: Option<String>,
}

/// Integers arrive as numbers or numeric strings depending on the endpoint.
fn as_count(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(0)
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn parse_document_list(body: &str) -> Result<Vec<DocumentSummary>, PlatformError> {
    let docs: Vec<TrpDocMetadata> =
        serde_json::from_str(body).map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;
    Ok(docs
        .into_iter()
        .filter_map(|doc| {
            Some(DocumentSummary {
                doc_id: as_id(&doc.doc_id)?,
                title: doc.title.unwrap_or_default(),
            })
        })
        .collect())
}

fn parse_overview(body: &str, doc_id: &str) -> Result<DocumentOverview, PlatformError> {
    let full: TrpFullDoc =
        serde_json::from_str(body).map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;

    let pages = full
        .page_list
        .pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| {
            // Transcripts are listed newest first.
            let latest = page.ts_list.transcripts.first().and_then(|t| t.status.clone());
            PageInfo {
                number: match as_count(&page.page_nr) {
                    0 => i as u32 + 1,
                    n => n as u32,
                },
                image_file_name: page.img_file_name.unwrap_or_default(),
                status: page.ct_status.or(latest),
                transcript_count: page.ts_list.transcripts.len(),
            }
        })
        .collect();

    Ok(DocumentOverview {
        doc_id: as_id(&full.md.doc_id).unwrap_or_else(|| doc_id.to_string()),
        title: full.md.title.unwrap_or_default(),
        transcribed_lines: as_count(&full.md.nr_of_transcribed_lines),
        transcribed_pages: as_count(&full.md.nr_of_transcribed_pages),
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_list() {
        let body = r#"[
            {"docId": 6981834, "title": "1750_WSTLA-OKA-B1-1-095-1", "nrOfPages": 3},
            {"docId": "10651984", "title": "WSTLA-OKA-B1-1-096-1"},
            {"title": "no id"}
        ]"#;
        let docs = parse_document_list(body).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, "6981834");
        assert_eq!(docs[1].doc_id, "10651984");
    }

    #[test]
    fn test_parse_overview() {
        let body = r#"{
            "md": {"docId": 6981834, "title": "1750_WSTLA-OKA-B1-1-095-1",
                   "nrOfTranscribedLines": "12", "nrOfTranscribedPages": 0},
            "pageList": {"pages": [
                {"pageNr": 2, "imgFileName": "WSTLA_OKA_B1_1_095_1_2.jpg",
                 "tsList": {"transcripts": [{"status": "GT"}, {"status": "NEW"}]}},
                {"pageNr": 1, "imgFileName": "WSTLA_OKA_B1_1_095_1_1.jpg",
                 "tsList": {"transcripts": []}}
            ]}
        }"#;
        let overview = parse_overview(body, "6981834").unwrap();
        assert_eq!(overview.transcribed_lines, 12);
        assert_eq!(overview.pages[0].status.as_deref(), Some("GT"));
        assert_eq!(overview.pages[0].transcript_count, 2);
        assert!(overview.has_ground_truth());
        assert_eq!(
            overview.image_names(),
            vec!["WSTLA_OKA_B1_1_095_1_1.jpg", "WSTLA_OKA_B1_1_095_1_2.jpg"]
        );
    }

    #[test]
    fn test_parse_overview_rejects_garbage() {
        assert!(matches!(
            parse_overview("<html/>", "1"),
            Err(PlatformError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_doc_path_encodes_id() {
        assert_eq!(
            TranskribusClient::doc_path(258178, "6981834", "mets"),
            "/collections/258178/6981834/mets"
        );
        assert_eq!(
            TranskribusClient::doc_path(1, "a b", "fulldoc"),
            "/collections/1/a%20b/fulldoc"
        );
    }
}
