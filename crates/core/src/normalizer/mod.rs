//! Normalize stage: repairs raw METS files in place.
//!
//! Text repairs run first (encoding, control characters, entities). Text
//! that still does not parse is re-read in recovery mode and re-serialized.
//! Image-name lists additionally get their item names normalized. Files
//! that need nothing are left byte for byte as they are.

mod entities;
mod repair;

pub use repair::image_name;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::fetcher::raw_doc_id;
use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::xml::{self, Document, Element};

const IMAGE_NAME_SUFFIX: &str = "_image_name.xml";

/// Result of normalizing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Repaired { text: String, recovered: bool },
    /// Not even recovery mode could read it.
    Unrecoverable(String),
}

/// Repairs the raw bytes of one file.
pub fn normalize(bytes: &[u8], image_names: bool) -> Outcome {
    let (decoded, latin1) = repair::decode(bytes);
    let declared = if latin1 {
        repair::declare_utf8(&decoded).into_owned()
    } else {
        decoded.into_owned()
    };
    let text = repair::repair_text(&declared);

    let (text, recovered) = match xml::parse(&text) {
        Ok(mut doc) => {
            if image_names && fix_image_names(&mut doc) {
                (doc.to_xml(), false)
            } else {
                (text, false)
            }
        }
        Err(strict) => match xml::parse_lenient(&text) {
            Ok(mut doc) => {
                debug!(error = %strict, "Recovered malformed document");
                if image_names {
                    fix_image_names(&mut doc);
                }
                (doc.to_xml(), true)
            }
            Err(e) => return Outcome::Unrecoverable(e.to_string()),
        },
    };

    if text.as_bytes() == bytes {
        Outcome::Unchanged
    } else {
        Outcome::Repaired { text, recovered }
    }
}

/// Normalizes every `<item>` of an image-name list. Returns true on change.
fn fix_image_names(doc: &mut Document) -> bool {
    let mut changed = false;
    doc.root.visit_mut(&mut |el: &mut Element| {
        if !el.is("item") {
            return;
        }
        let current = el.text();
        let fixed = image_name(current.trim());
        if fixed != current {
            el.set_text(fixed.into_owned());
            changed = true;
        }
    });
    changed
}

/// The normalize stage.
#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for Normalizer {
    fn kind(&self) -> StageKind {
        StageKind::Normalize
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::Normalize);
        let dir = ctx.input();

        for path in fsutil::list_xml_files(dir, true)
            .await
            .map_err(StageError::io(dir))?
        {
            let name = fsutil::file_name(&path);
            let selected = match raw_doc_id(&name) {
                Some(doc_id) => ctx.includes(doc_id),
                None => ctx.includes_unknown(),
            };
            if !selected {
                continue;
            }

            let bytes = fs::read(&path).await.map_err(StageError::io(&path))?;
            match normalize(&bytes, name.ends_with(IMAGE_NAME_SUFFIX)) {
                Outcome::Unchanged => report.record(false),
                Outcome::Repaired { text, recovered } => {
                    fsutil::write_atomic(&path, text.as_bytes())
                        .await
                        .map_err(StageError::io(&path))?;
                    info!(path = %path.display(), recovered, "Repaired raw file");
                    report.record(true);
                }
                Outcome::Unrecoverable(reason) => {
                    report.skip(path.display().to_string(), format!("unrecoverable XML: {}", reason));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use std::collections::BTreeSet;
    use std::path::Path;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn context(root: &Path, ids: Option<BTreeSet<String>>) -> StageContext {
        StageContext::new(
            StageKind::Normalize,
            &PathsConfig::rooted(root),
            ids,
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_well_formed_input_is_unchanged() {
        let input = b"<?xml version=\"1.0\"?>\n<mets>\n  <title>ok</title>\n</mets>\n";
        assert_eq!(normalize(input, false), Outcome::Unchanged);
    }

    #[test]
    fn test_entity_repair_keeps_layout() {
        let Outcome::Repaired { text, recovered } =
            normalize(b"<mets>\n  <title>M&auml;rz & April</title>\n</mets>", false)
        else {
            panic!("expected a repair");
        };
        assert!(!recovered);
        assert_eq!(text, "<mets>\n  <title>M&#228;rz &amp; April</title>\n</mets>");
    }

    #[test]
    fn test_recovery_of_broken_nesting() {
        let Outcome::Repaired { text, recovered } = normalize(b"<mets><a><b>x</a></mets>", false)
        else {
            panic!("expected a repair");
        };
        assert!(recovered);
        assert!(xml::parse(&text).is_ok());
        assert_eq!(normalize(text.as_bytes(), false), Outcome::Unchanged);
    }

    #[test]
    fn test_unrecoverable_input() {
        assert!(matches!(
            normalize(b"not xml at all", false),
            Outcome::Unrecoverable(_)
        ));
    }

    #[test]
    fn test_image_names_fixed() {
        let input = b"<imageNames>\n  <item>WSTLA_OKA_B1_1_095_1_56.jpg</item>\n</imageNames>\n";
        let Outcome::Repaired { text, .. } = normalize(input, true) else {
            panic!("expected a repair");
        };
        assert!(text.contains("<item>WSTLA-OKA-B1-1-095-1_00056.jpg</item>"));
        assert_eq!(normalize(text.as_bytes(), true), Outcome::Unchanged);
    }

    #[tokio::test]
    async fn test_stage_is_idempotent_and_skips_broken_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data/mets/258178");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("1_mets.xml"), "<mets><title>A &uuml;</title></mets>").unwrap();
        std::fs::write(dir.join("2_mets.xml"), "<mets><title>fine</title></mets>").unwrap();
        std::fs::write(dir.join("3_mets.xml"), "garbage").unwrap();

        let normalizer = Normalizer::new();
        let first = normalizer.run(&context(temp.path(), None)).await.unwrap();
        assert_eq!(first.processed, 1);
        assert_eq!(first.unchanged, 1);
        assert_eq!(first.skipped.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.join("3_mets.xml")).unwrap(), "garbage");

        let second = normalizer.run(&context(temp.path(), None)).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.unchanged, 2);
    }

    #[tokio::test]
    async fn test_stage_honours_doc_filter() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data/mets/258178");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("1_mets.xml"), "<mets>&nbsp;</mets>").unwrap();
        std::fs::write(dir.join("2_mets.xml"), "<mets>&nbsp;</mets>").unwrap();

        let ids = BTreeSet::from(["2".to_string()]);
        let report = Normalizer::new()
            .run(&context(temp.path(), Some(ids)))
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(std::fs::read_to_string(dir.join("1_mets.xml")).unwrap(), "<mets>&nbsp;</mets>");
    }
}
