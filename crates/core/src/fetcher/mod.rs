//! Fetch stage: downloads METS exports and page image names.
//!
//! Files land in `<mets>/<collection>/<docId>_mets.xml` and
//! `<mets>/<collection>/<docId>_image_name.xml`. With an explicit id list
//! each id is requested directly; otherwise every configured collection is
//! listed and filtered by the selection mode. After a full run, raw files of
//! documents that are no longer selected are removed.

mod selection;

pub use selection::{expected_edition_name, TitleRules};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::{PlatformConfig, Selection};
use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::platform::{DocumentOverview, DocumentPlatform, PlatformError};
use crate::retry::{ExhaustionPolicy, Retryable};
use crate::xml::{self, Document, Element, XmlError};

const METS_SUFFIX: &str = "_mets.xml";
const IMAGE_NAME_SUFFIX: &str = "_image_name.xml";

/// Path of the raw METS file of a document.
pub fn mets_path(dir: &Path, collection: u64, doc_id: &str) -> PathBuf {
    dir.join(collection.to_string())
        .join(format!("{}{}", doc_id, METS_SUFFIX))
}

/// Path of the image-name list of a document.
pub fn image_names_path(dir: &Path, collection: u64, doc_id: &str) -> PathBuf {
    dir.join(collection.to_string())
        .join(format!("{}{}", doc_id, IMAGE_NAME_SUFFIX))
}

/// Document id of a raw file name, if it is one of ours.
pub fn raw_doc_id(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(METS_SUFFIX)
        .or_else(|| file_name.strip_suffix(IMAGE_NAME_SUFFIX))
        .filter(|id| !id.is_empty())
}

/// Serializes the image-name list in page order.
pub fn image_names_xml(names: &[String]) -> String {
    let mut root = Element::new("imageNames");
    for name in names {
        root.push(Element::new("item").with_text(name.clone()));
    }
    Document::new(root).to_xml()
}

/// Reads an image-name list back. Blank items are skipped.
pub fn parse_image_names(text: &str) -> Result<Vec<String>, XmlError> {
    let doc = xml::parse(text)?;
    Ok(doc
        .root
        .find_all("//item")
        .into_iter()
        .map(|item| item.text().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Image-name lists anywhere below `dir`, by document id.
///
/// When a document appears in more than one collection the first path in
/// sorted order wins.
pub async fn image_name_files(dir: &Path) -> std::io::Result<BTreeMap<String, PathBuf>> {
    let mut found = BTreeMap::new();
    for path in fsutil::list_xml_files(dir, true).await? {
        let name = fsutil::file_name(&path);
        if let Some(doc_id) = name.strip_suffix(IMAGE_NAME_SUFFIX).filter(|id| !id.is_empty()) {
            found.entry(doc_id.to_string()).or_insert(path);
        }
    }
    Ok(found)
}

/// The fetch stage.
pub struct Fetcher {
    platform: Arc<dyn DocumentPlatform>,
    config: PlatformConfig,
    rules: TitleRules,
    on_exhausted: ExhaustionPolicy,
}

impl Fetcher {
    pub fn new(
        platform: Arc<dyn DocumentPlatform>,
        config: PlatformConfig,
        on_exhausted: ExhaustionPolicy,
    ) -> Result<Self, StageError> {
        let rules = TitleRules::new(&config.title_pattern, &config.target_pattern)
            .map_err(StageError::Config)?;
        Ok(Self {
            platform,
            config,
            rules,
            on_exhausted,
        })
    }

    /// Configured collections, from the collections file when one is set.
    async fn collections(&self) -> Result<Vec<u64>, StageError> {
        let Some(path) = &self.config.collections_file else {
            return Ok(self.config.effective_collections());
        };
        let text = fs::read_to_string(path).await.map_err(StageError::io(path))?;
        let mut collections = Vec::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let id = line.parse::<u64>().map_err(|_| {
                StageError::Config(format!(
                    "invalid collection id '{}' in {}",
                    line,
                    path.display()
                ))
            })?;
            collections.push(id);
        }
        if collections.is_empty() {
            return Ok(self.config.effective_collections());
        }
        Ok(collections)
    }

    /// Decides what an item-level platform error means for the stage.
    fn item_failed(
        &self,
        report: &mut StageReport,
        doc_id: &str,
        err: PlatformError,
    ) -> Result<(), StageError> {
        if err.is_auth() {
            return Err(err.into());
        }
        if err.is_retryable() && self.on_exhausted == ExhaustionPolicy::Abort {
            return Err(err.into());
        }
        report.skip(doc_id, err.to_string());
        Ok(())
    }

    fn selected(&self, overview: &DocumentOverview) -> bool {
        match self.config.selection {
            Selection::All => true,
            Selection::Eligible => self.rules.is_eligible(&overview.title) && overview.has_transcription(),
            Selection::GroundTruth => {
                self.rules.is_eligible(&overview.title)
                    && overview.has_transcription()
                    && overview.has_ground_truth()
            }
        }
    }

    /// Downloads the METS and writes both raw files.
    async fn download(
        &self,
        out: &Path,
        collection: u64,
        overview: &DocumentOverview,
    ) -> Result<bool, FetchFailure> {
        let mets = self
            .platform
            .fetch_mets(collection, &overview.doc_id)
            .await
            .map_err(FetchFailure::Platform)?;

        let mets_file = mets_path(out, collection, &overview.doc_id);
        let names_file = image_names_path(out, collection, &overview.doc_id);
        let names = image_names_xml(&overview.image_names());

        let wrote_mets = fsutil::write_if_changed(&mets_file, mets.as_bytes())
            .await
            .map_err(|e| FetchFailure::Io(mets_file.clone(), e))?;
        let wrote_names = fsutil::write_if_changed(&names_file, names.as_bytes())
            .await
            .map_err(|e| FetchFailure::Io(names_file.clone(), e))?;

        debug!(
            doc_id = %overview.doc_id,
            collection,
            path = %mets_file.display(),
            "Fetched METS"
        );
        Ok(wrote_mets || wrote_names)
    }

    async fn fetch_one(
        &self,
        report: &mut StageReport,
        out: &Path,
        collection: u64,
        overview: &DocumentOverview,
    ) -> Result<(), StageError> {
        match self.download(out, collection, overview).await {
            Ok(changed) => {
                report.record(changed);
                Ok(())
            }
            Err(FetchFailure::Platform(e)) => self.item_failed(report, &overview.doc_id, e),
            Err(FetchFailure::Io(path, source)) => Err(StageError::Io { path, source }),
        }
    }

    /// Fetches explicitly requested ids. The first collection that knows a
    /// document owns it.
    async fn run_explicit(
        &self,
        ctx: &StageContext,
        ids: &BTreeSet<String>,
        collections: &[u64],
        report: &mut StageReport,
    ) -> Result<(), StageError> {
        info!(ids = ids.len(), ?collections, "Fetching requested documents");

        'ids: for doc_id in ids {
            for &collection in collections {
                match self.platform.document_overview(collection, doc_id).await {
                    Ok(overview) => {
                        self.fetch_one(report, &ctx.output_dir, collection, &overview)
                            .await?;
                        continue 'ids;
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(doc_id = %doc_id, collection, "Not in collection");
                    }
                    Err(e) => {
                        self.item_failed(report, doc_id, e)?;
                        continue 'ids;
                    }
                }
            }
            report.skip(
                doc_id.clone(),
                format!("not found in collections {:?}", collections),
            );
        }
        Ok(())
    }

    /// Lists and filters every collection, then prunes stale files.
    async fn run_full(
        &self,
        ctx: &StageContext,
        collections: &[u64],
        report: &mut StageReport,
    ) -> Result<(), StageError> {
        for &collection in collections {
            let docs = self
                .platform
                .list_documents(collection)
                .await
                .map_err(StageError::from)?;
            info!(collection, documents = docs.len(), selection = ?self.config.selection, "Listed collection");

            let mut targets = BTreeSet::new();
            let mut ignored = 0usize;
            for summary in docs {
                if self.config.selection != Selection::All
                    && !summary.title.is_empty()
                    && !self.rules.is_eligible(&summary.title)
                {
                    ignored += 1;
                    continue;
                }

                let overview = match self.platform.document_overview(collection, &summary.doc_id).await {
                    Ok(overview) => overview,
                    Err(e) => {
                        // Unknown eligibility: keep whatever was fetched before.
                        targets.insert(summary.doc_id.clone());
                        self.item_failed(report, &summary.doc_id, e)?;
                        continue;
                    }
                };
                if !self.selected(&overview) {
                    ignored += 1;
                    continue;
                }

                targets.insert(overview.doc_id.clone());
                self.fetch_one(report, &ctx.output_dir, collection, &overview)
                    .await?;
            }

            info!(collection, selected = targets.len(), ignored, "Collection fetched");
            prune_stale(&ctx.output_dir.join(collection.to_string()), &targets).await?;
        }
        prune_unconfigured(&ctx.output_dir, collections).await?;
        Ok(())
    }
}

enum FetchFailure {
    Platform(PlatformError),
    Io(PathBuf, std::io::Error),
}

/// Removes raw files of documents outside `targets`.
async fn prune_stale(dir: &Path, targets: &BTreeSet<String>) -> Result<usize, StageError> {
    let mut removed = 0;
    for path in fsutil::list_xml_files(dir, false)
        .await
        .map_err(StageError::io(dir))?
    {
        let name = fsutil::file_name(&path);
        let Some(doc_id) = raw_doc_id(&name) else {
            continue;
        };
        if targets.contains(doc_id) {
            continue;
        }
        fs::remove_file(&path).await.map_err(StageError::io(&path))?;
        info!(path = %path.display(), "Removed stale raw file");
        removed += 1;
    }
    Ok(removed)
}

/// Removes raw files that no configured collection owns: loose files in the
/// raw root and everything under other collection directories.
async fn prune_unconfigured(out: &Path, collections: &[u64]) -> Result<usize, StageError> {
    let empty = BTreeSet::new();
    let mut removed = prune_stale(out, &empty).await?;

    let mut entries = match fs::read_dir(out).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(StageError::Io { path: out.to_path_buf(), source: e }),
    };
    let mut others = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(StageError::io(out))? {
        let path = entry.path();
        let is_dir = entry.file_type().await.map_err(StageError::io(&path))?.is_dir();
        let configured = fsutil::file_name(&path)
            .parse::<u64>()
            .map(|id| collections.contains(&id))
            .unwrap_or(false);
        if is_dir && !configured {
            others.push(path);
        }
    }
    others.sort();

    for dir in others {
        removed += prune_stale(&dir, &empty).await?;
        // Only succeeds once the directory holds nothing else.
        if fs::remove_dir(&dir).await.is_ok() {
            debug!(path = %dir.display(), "Removed empty collection directory");
        }
    }
    Ok(removed)
}

#[async_trait]
impl Stage for Fetcher {
    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::Fetch);
        let collections = self.collections().await?;

        if let Err(e) = self.platform.authenticate().await {
            warn!(platform = self.platform.name(), "Authentication failed");
            return Err(e.into());
        }

        match &ctx.doc_ids {
            Some(ids) => {
                self.run_explicit(ctx, ids, &collections, &mut report)
                    .await?
            }
            None => self.run_full(ctx, &collections, &mut report).await?,
        }
        Ok(report)
    }
}
