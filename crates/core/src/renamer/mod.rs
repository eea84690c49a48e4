//! Rename stage: staged editions to their canonical names.
//!
//! The canonical name comes from the edition's main title, never from the
//! staging file name. The whole batch is planned first; collisions abort the
//! stage before anything moves.

mod mover;

pub use mover::{copy_verified, move_file, sha256_file, BatchMover, PlannedMove, RenameError, RollbackPlan};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex_lite::Regex;
use tokio::fs;
use tracing::{debug, info};

use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::xml::{self, Element};

const MAIN_TITLE: &str = "teiHeader//title[@type='main']";
const TRANSKRIBUS_IDNO: &str = "teiHeader//sourceDesc//idno[@type='Transkribus']";

/// Document id embedded in an edition.
pub fn embedded_doc_id(root: &Element) -> Option<String> {
    root.find_text(TRANSKRIBUS_IDNO).filter(|id| !id.is_empty())
}

/// Derives canonical file names from main titles.
#[derive(Debug, Clone)]
pub struct CanonicalNamer {
    pattern: Regex,
}

impl CanonicalNamer {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let pattern =
            Regex::new(pattern).map_err(|e| format!("invalid rename pattern '{}': {}", pattern, e))?;
        Ok(Self { pattern })
    }

    /// `1750_WSTLA-OKA-B1-1-095-1` becomes `WSTLA-OKA-B1-1-095-1.xml`.
    pub fn canonical(&self, title: &str) -> Result<String, String> {
        let replaced = if self.pattern.captures_len() > 1 {
            self.pattern.replace_all(title, "${1}")
        } else {
            self.pattern.replace_all(title, "")
        };
        let stem: String = replaced.chars().filter(|c| !c.is_whitespace()).collect();

        if stem.is_empty() || stem == "." || stem == ".." {
            return Err(format!("title '{}' yields an empty file name", title));
        }
        if stem.contains(['/', '\\']) {
            return Err(format!("title '{}' yields a path, not a file name", title));
        }
        Ok(format!("{}.xml", stem))
    }
}

/// A staged edition ready to move.
#[derive(Debug, Clone)]
struct Staged {
    path: PathBuf,
    canonical: String,
    doc_id: Option<String>,
}

/// The rename stage.
#[derive(Debug, Clone)]
pub struct Renamer {
    namer: CanonicalNamer,
}

impl Renamer {
    pub fn new(namer: CanonicalNamer) -> Self {
        Self { namer }
    }

    async fn read_staged(&self, path: &Path) -> Result<Staged, StageError> {
        let text = fs::read_to_string(path).await.map_err(StageError::io(path))?;
        let doc = xml::parse(&text).map_err(|e| StageError::structural(path, e.to_string()))?;
        let title = doc
            .root
            .find_text(MAIN_TITLE)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StageError::structural(path, "no teiHeader title[@type='main']"))?;
        let canonical = self
            .namer
            .canonical(&title)
            .map_err(|reason| StageError::structural(path, reason))?;

        Ok(Staged {
            path: path.to_path_buf(),
            canonical,
            doc_id: embedded_doc_id(&doc.root),
        })
    }

    /// Document id of an existing edition, if it declares one.
    async fn existing_doc_id(&self, path: &Path) -> Result<Option<String>, StageError> {
        let text = fs::read_to_string(path).await.map_err(StageError::io(path))?;
        Ok(xml::parse_lenient(&text)
            .ok()
            .and_then(|doc| embedded_doc_id(&doc.root)))
    }

    /// Plans all moves, failing on any collision.
    async fn plan(&self, ctx: &StageContext) -> Result<Vec<PlannedMove>, StageError> {
        let dir = ctx.input();
        let mut by_name: BTreeMap<String, Staged> = BTreeMap::new();

        for path in fsutil::list_xml_files(dir, false)
            .await
            .map_err(StageError::io(dir))?
        {
            let staged = self.read_staged(&path).await?;
            let selected = match &staged.doc_id {
                Some(id) => ctx.includes(id),
                None => ctx.includes_unknown(),
            };
            if !selected {
                continue;
            }
            if let Some(first) = by_name.get(&staged.canonical) {
                return Err(StageError::Collision {
                    canonical: staged.canonical.clone(),
                    first: first.path.display().to_string(),
                    second: staged.path.display().to_string(),
                });
            }
            by_name.insert(staged.canonical.clone(), staged);
        }

        let mut moves = Vec::with_capacity(by_name.len());
        for (canonical, staged) in by_name {
            let destination = ctx.output_dir.join(&canonical);
            if fs::metadata(&destination).await.is_ok() {
                let existing = self.existing_doc_id(&destination).await?;
                if let (Some(existing), Some(incoming)) = (&existing, &staged.doc_id) {
                    if existing != incoming {
                        return Err(StageError::Collision {
                            canonical,
                            first: format!("{} (document {})", destination.display(), existing),
                            second: format!("{} (document {})", staged.path.display(), incoming),
                        });
                    }
                }
            }
            moves.push(PlannedMove {
                doc_id: staged.doc_id,
                source: staged.path,
                destination,
            });
        }
        Ok(moves)
    }
}

#[async_trait]
impl Stage for Renamer {
    fn kind(&self) -> StageKind {
        StageKind::Rename
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::Rename);
        let moves = self.plan(ctx).await?;
        if moves.is_empty() {
            info!("Nothing staged");
            return Ok(report);
        }

        for planned in &moves {
            debug!(
                doc_id = planned.doc_id.as_deref().unwrap_or("-"),
                from = %planned.source.display(),
                to = %planned.destination.display(),
                "Planned move"
            );
        }

        let moved = BatchMover::new(ctx.run_id.simple().to_string())
            .execute(&moves)
            .await?;
        for _ in 0..moved {
            report.record(true);
        }
        Ok(report)
    }
}
