use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::retry::RetryConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub renamer: RenamerConfig,
    #[serde(default)]
    pub fixer: FixerConfig,
    #[serde(default)]
    pub initial_page: InitialPageConfig,
    #[serde(default)]
    pub headers: HeadersConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// On-disk layout of the pipeline.
///
/// Every directory is resolved against `root`, so a run can be pointed at a
/// scratch tree without touching the relative defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_mets_dir")]
    pub mets_dir: PathBuf,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_editions_dir")]
    pub editions_dir: PathBuf,
    #[serde(default = "default_headers_dir")]
    pub headers_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            mets_dir: default_mets_dir(),
            staging_dir: default_staging_dir(),
            editions_dir: default_editions_dir(),
            headers_dir: default_headers_dir(),
        }
    }
}

impl PathsConfig {
    /// Layout rooted at `root` with the default relative directories.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.root.join(dir)
        }
    }

    pub fn mets(&self) -> PathBuf {
        self.resolve(&self.mets_dir)
    }

    pub fn staging(&self) -> PathBuf {
        self.resolve(&self.staging_dir)
    }

    pub fn editions(&self) -> PathBuf {
        self.resolve(&self.editions_dir)
    }

    pub fn headers(&self) -> PathBuf {
        self.resolve(&self.headers_dir)
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_mets_dir() -> PathBuf {
    PathBuf::from("data/mets")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_editions_dir() -> PathBuf {
    PathBuf::from("data/editions")
}

fn default_headers_dir() -> PathBuf {
    PathBuf::from("tei_headers")
}

/// Which documents a full (non explicit) fetch selects.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Selection {
    /// Title matches the edition pattern and the document has transcriptions.
    #[default]
    Eligible,
    /// Every document listed in the collection.
    All,
    /// Eligible documents with at least one ground truth page.
    GroundTruth,
}

/// Transkribus platform configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token: Option<String>,
    /// Collections to fetch. Falls back to `default_collection` when empty.
    #[serde(default)]
    pub collections: Vec<u64>,
    #[serde(default = "default_collection")]
    pub default_collection: u64,
    /// Optional file listing one collection id per line.
    #[serde(default)]
    pub collections_file: Option<PathBuf>,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default = "default_title_pattern")]
    pub title_pattern: String,
    #[serde(default = "default_target_pattern")]
    pub target_pattern: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            username: None,
            password: None,
            token: None,
            collections: Vec::new(),
            default_collection: default_collection(),
            collections_file: None,
            selection: Selection::default(),
            title_pattern: default_title_pattern(),
            target_pattern: default_target_pattern(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl PlatformConfig {
    /// Collections this run operates on, in configured order.
    pub fn effective_collections(&self) -> Vec<u64> {
        if self.collections.is_empty() {
            vec![self.default_collection]
        } else {
            self.collections.clone()
        }
    }
}

fn default_platform_url() -> String {
    "https://transkribus.eu/TrpServer/rest".to_string()
}

fn default_collection() -> u64 {
    258178
}

fn default_title_pattern() -> String {
    r"^\d{4}_(WSTLA-OKA-.*)$".to_string()
}

fn default_target_pattern() -> String {
    r"^WSTLA-OKA-B\d+-\d+-\d{3}-\d+$".to_string()
}

fn default_http_timeout() -> u64 {
    60
}

/// Transformation engine.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformEngine {
    #[default]
    Native,
    Saxon,
}

/// Transformer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub engine: TransformEngine,
    #[serde(default = "default_java_path")]
    pub java_path: PathBuf,
    /// Classpath holding Saxon-HE (and xmlresolver).
    #[serde(default, deserialize_with = "lenient_string")]
    pub saxon_classpath: Option<String>,
    /// Extra JVM options, whitespace separated.
    #[serde(default)]
    pub java_opts: String,
    #[serde(default = "default_stylesheet")]
    pub stylesheet: PathBuf,
    #[serde(default = "default_transform_timeout")]
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            engine: TransformEngine::default(),
            java_path: default_java_path(),
            saxon_classpath: None,
            java_opts: String::new(),
            stylesheet: default_stylesheet(),
            timeout_secs: default_transform_timeout(),
        }
    }
}

fn default_java_path() -> PathBuf {
    PathBuf::from("java")
}

fn default_stylesheet() -> PathBuf {
    PathBuf::from("page2tei-0.xsl")
}

fn default_transform_timeout() -> u64 {
    600
}

/// Renamer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenamerConfig {
    /// Pattern applied to the main title; matches are replaced by group 1.
    #[serde(default = "default_canonical_pattern")]
    pub title_pattern: String,
}

impl Default for RenamerConfig {
    fn default() -> Self {
        Self {
            title_pattern: default_canonical_pattern(),
        }
    }
}

fn default_canonical_pattern() -> String {
    r"\d{4}_(WSTLA-OKA.*)".to_string()
}

/// XML fixer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixerConfig {
    #[serde(default = "default_xml_base")]
    pub xml_base: String,
    #[serde(default = "default_volume_pattern")]
    pub volume_pattern: String,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            xml_base: default_xml_base(),
            volume_pattern: default_volume_pattern(),
        }
    }
}

fn default_xml_base() -> String {
    "/".to_string()
}

fn default_volume_pattern() -> String {
    r"(WSTLA-OKA-B1-\d+-\d+-\d)".to_string()
}

/// Optional leading-page stage
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InitialPageConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Header generation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeadersConfig {
    /// Template overriding the built-in header skeleton.
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            template: None,
            placeholder: default_placeholder(),
        }
    }
}

fn default_placeholder() -> String {
    "[tbd]".to_string()
}

/// What the filler does when a required column is empty.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    #[default]
    Ignore,
    Fatal,
}

/// Baserow metadata store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_url")]
    pub base_url: String,
    #[serde(default)]
    pub database_id: Option<u64>,
    #[serde(default)]
    pub table_id: Option<u64>,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub on_missing_required: MissingFieldPolicy,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: default_metadata_url(),
            database_id: None,
            table_id: None,
            table_name: default_table_name(),
            key_field: default_key_field(),
            username: None,
            password: None,
            token: None,
            required_fields: Vec::new(),
            on_missing_required: MissingFieldPolicy::default(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_metadata_url() -> String {
    "https://baserow.acdh-dev.oeaw.ac.at".to_string()
}

fn default_table_name() -> String {
    "Metadata".to_string()
}

fn default_key_field() -> String {
    "Filename".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of each run.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Accepts strings as well as numbers, since env providers parse `12345`
/// as an integer before it reaches serde.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Uint(u64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Bool(b) => b.to_string(),
    }))
}

/// Sanitized config for the startup log (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub paths: PathsConfig,
    pub platform: SanitizedPlatformConfig,
    pub transform: TransformConfig,
    pub initial_page_enabled: bool,
    pub metadata: SanitizedMetadataConfig,
    pub retry: RetryConfig,
}

/// Platform config with credentials hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedPlatformConfig {
    pub base_url: String,
    pub collections: Vec<u64>,
    pub selection: Selection,
    pub username_configured: bool,
    pub password_configured: bool,
    pub token_configured: bool,
}

/// Metadata store config with credentials hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedMetadataConfig {
    pub base_url: String,
    pub database_id: Option<u64>,
    pub table_id: Option<u64>,
    pub table_name: String,
    pub username_configured: bool,
    pub password_configured: bool,
    pub token_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            paths: config.paths.clone(),
            platform: SanitizedPlatformConfig {
                base_url: config.platform.base_url.clone(),
                collections: config.platform.effective_collections(),
                selection: config.platform.selection,
                username_configured: config.platform.username.is_some(),
                password_configured: config.platform.password.is_some(),
                token_configured: config.platform.token.is_some(),
            },
            transform: config.transform.clone(),
            initial_page_enabled: config.initial_page.enabled,
            metadata: SanitizedMetadataConfig {
                base_url: config.metadata.base_url.clone(),
                database_id: config.metadata.database_id,
                table_id: config.metadata.table_id,
                table_name: config.metadata.table_name.clone(),
                username_configured: config.metadata.username.is_some(),
                password_configured: config.metadata.password.is_some(),
                token_configured: config.metadata.token.is_some(),
            },
            retry: config.retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_match_fixed_layout() {
        let paths = PathsConfig::default();
        assert_eq!(paths.mets(), PathBuf::from("./data/mets"));
        assert_eq!(paths.editions(), PathBuf::from("./data/editions"));
        assert_eq!(paths.headers(), PathBuf::from("./tei_headers"));
    }

    #[test]
    fn test_rooted_paths() {
        let paths = PathsConfig::rooted("/srv/okar");
        assert_eq!(paths.staging(), PathBuf::from("/srv/okar/data/staging"));
    }

    #[test]
    fn test_effective_collections_fallback() {
        let mut platform = PlatformConfig::default();
        assert_eq!(platform.effective_collections(), vec![258178]);

        platform.collections = vec![1, 2];
        assert_eq!(platform.effective_collections(), vec![1, 2]);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::default();
        config.platform.password = Some("hunter2".to_string());
        config.metadata.token = Some("db-token".to_string());

        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();

        assert!(sanitized.platform.password_configured);
        assert!(sanitized.metadata.token_configured);
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("db-token"));
    }

    #[test]
    fn test_lenient_string_accepts_numbers() {
        let platform: PlatformConfig = toml::from_str("password = 12345").unwrap();
        assert_eq!(platform.password.as_deref(), Some("12345"));
    }
}
