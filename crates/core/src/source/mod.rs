//! Known shapes of raw METS documents.
//!
//! Fetched METS comes in two flavours: Transkribus exports embed their own
//! `trpDocMetadata` record, DFG-style exports carry a MODS record in the
//! descriptive section. Anything else is rejected instead of being searched
//! field by field.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;

use crate::xml::{Document, Element};

static YEAR_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})_").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").unwrap());

/// Year of a title: a `YYYY_` prefix, otherwise the first standalone
/// four-digit number.
pub fn year_of(title: &str) -> Option<String> {
    YEAR_PREFIX
        .captures(title.trim())
        .or_else(|| YEAR.captures(title))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Errors raised while classifying a raw METS document.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Unrecognized source document (root <{root}>): {detail}")]
    Unrecognized { root: String, detail: String },

    #[error("{shape} document is missing {field}")]
    MissingField { shape: &'static str, field: &'static str },

    #[error("{shape} document references no page images")]
    NoImages { shape: &'static str },
}

/// One page image referenced by the METS file section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub id: String,
    pub href: String,
}

/// Fields shared by every recognized shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub doc_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub date: Option<String>,
    pub images: Vec<SourceImage>,
}

/// A classified raw METS document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDocument {
    /// METS exported by Transkribus with an embedded `trpDocMetadata`.
    Transkribus(SourceRecord),
    /// METS with a MODS descriptive record.
    Mods(SourceRecord),
}

impl SourceDocument {
    /// Classifies a parsed document, failing on any unknown shape.
    pub fn classify(doc: &Document) -> Result<Self, SourceError> {
        let root = &doc.root;
        if !root.is("mets") {
            return Err(SourceError::Unrecognized {
                root: root.name.clone(),
                detail: "root element is not METS".to_string(),
            });
        }

        if let Some(trp) = root.find("//trpDocMetadata") {
            return transkribus(root, trp).map(Self::Transkribus);
        }
        if let Some(mods) = root.find("//dmdSec//mods") {
            return mods_record(root, mods).map(Self::Mods);
        }

        Err(SourceError::Unrecognized {
            root: root.name.clone(),
            detail: "neither trpDocMetadata nor a MODS record found".to_string(),
        })
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Self::Transkribus(_) => "transkribus",
            Self::Mods(_) => "mods",
        }
    }

    pub fn record(&self) -> &SourceRecord {
        match self {
            Self::Transkribus(record) | Self::Mods(record) => record,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn transkribus(root: &Element, trp: &Element) -> Result<SourceRecord, SourceError> {
    const SHAPE: &str = "Transkribus";

    let title = non_empty(trp.find_text("title")).ok_or(SourceError::MissingField {
        shape: SHAPE,
        field: "trpDocMetadata/title",
    })?;

    let images = images_in(root, &["fileGrp[@ID='IMG']", "fileGrp[@USE='IMG']"]);
    if images.is_empty() {
        return Err(SourceError::NoImages { shape: SHAPE });
    }

    Ok(SourceRecord {
        doc_id: non_empty(trp.find_text("docId")),
        title,
        description: non_empty(trp.find_text("desc")),
        date: None,
        images,
    })
}

fn mods_record(root: &Element, mods: &Element) -> Result<SourceRecord, SourceError> {
    const SHAPE: &str = "MODS";

    let title = non_empty(mods.find_text("titleInfo/title")).ok_or(SourceError::MissingField {
        shape: SHAPE,
        field: "mods/titleInfo/title",
    })?;

    let images = images_in(
        root,
        &["fileGrp[@USE='DEFAULT']", "fileGrp[@USE='MASTER']", "fileGrp[@USE='IMG']"],
    );
    if images.is_empty() {
        return Err(SourceError::NoImages { shape: SHAPE });
    }

    let date = non_empty(mods.find_text("originInfo/dateIssued"))
        .or_else(|| non_empty(mods.find_text("originInfo/dateCreated")));
    let doc_id = non_empty(mods.find_text("recordInfo/recordIdentifier"))
        .or_else(|| non_empty(mods.find_text("identifier")));

    Ok(SourceRecord {
        doc_id,
        title,
        description: non_empty(mods.find_text("abstract")),
        date,
        images,
    })
}

/// Files of the first matching file group, in document order.
fn images_in(root: &Element, groups: &[&str]) -> Vec<SourceImage> {
    for group in groups {
        let Some(group) = root.find(&format!("//{}", group)) else {
            continue;
        };
        let images: Vec<SourceImage> = group
            .find_all("file")
            .into_iter()
            .filter_map(|file| {
                let href = file.find("FLocat")?.attr_local("href")?;
                Some(SourceImage {
                    id: file.attr("ID").unwrap_or_default().to_string(),
                    href: href.to_string(),
                })
            })
            .collect();
        if !images.is_empty() {
            return images;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::xml::parse;

    #[test]
    fn test_year_of() {
        assert_eq!(year_of("1750_WSTLA-OKA-B1-1-095-1").as_deref(), Some("1750"));
        assert_eq!(year_of("Rechnung 1751 bis 1752").as_deref(), Some("1751"));
        assert_eq!(year_of("WSTLA-OKA-B1-1-095-1"), None);
    }

    #[test]
    fn test_classify_transkribus() {
        let xml = fixtures::transkribus_mets("6981834", "1750_WSTLA-OKA-B1-1-095-1", 3);
        let doc = parse(&xml).unwrap();

        let source = SourceDocument::classify(&doc).unwrap();
        assert_eq!(source.shape(), "transkribus");
        let record = source.record();
        assert_eq!(record.doc_id.as_deref(), Some("6981834"));
        assert_eq!(record.title, "1750_WSTLA-OKA-B1-1-095-1");
        assert_eq!(record.images.len(), 3);
        assert_eq!(record.images[0].id, "IMG_1");
    }

    #[test]
    fn test_classify_mods() {
        let xml = r#"<mets:mets xmlns:mets="http://www.loc.gov/METS/" xmlns:mods="http://www.loc.gov/mods/v3" xmlns:xlink="http://www.w3.org/1999/xlink">
  <mets:dmdSec ID="DMD1"><mets:mdWrap MDTYPE="MODS"><mets:xmlData>
    <mods:mods>
      <mods:titleInfo><mods:title>Rechnung 1750</mods:title></mods:titleInfo>
      <mods:originInfo><mods:dateIssued>1750</mods:dateIssued></mods:originInfo>
      <mods:recordInfo><mods:recordIdentifier>abc-1</mods:recordIdentifier></mods:recordInfo>
    </mods:mods>
  </mets:xmlData></mets:mdWrap></mets:dmdSec>
  <mets:fileSec><mets:fileGrp USE="DEFAULT">
    <mets:file ID="F1"><mets:FLocat LOCTYPE="URL" xlink:href="https://img.example/1.jpg"/></mets:file>
  </mets:fileGrp></mets:fileSec>
</mets:mets>"#;
        let source = SourceDocument::classify(&parse(xml).unwrap()).unwrap();
        assert_eq!(source.shape(), "mods");
        assert_eq!(source.record().date.as_deref(), Some("1750"));
        assert_eq!(source.record().doc_id.as_deref(), Some("abc-1"));
        assert_eq!(source.record().images[0].href, "https://img.example/1.jpg");
    }

    #[test]
    fn test_unrecognized_root() {
        let doc = parse("<PcGts><Page/></PcGts>").unwrap();
        assert!(matches!(
            SourceDocument::classify(&doc),
            Err(SourceError::Unrecognized { .. })
        ));
    }

    #[test]
    fn test_mets_without_known_record() {
        let doc = parse("<mets><fileSec/></mets>").unwrap();
        assert!(matches!(
            SourceDocument::classify(&doc),
            Err(SourceError::Unrecognized { .. })
        ));
    }

    #[test]
    fn test_transkribus_without_images() {
        let doc = parse("<mets><amdSec><trpDocMetadata><title>x</title></trpDocMetadata></amdSec></mets>")
            .unwrap();
        assert!(matches!(
            SourceDocument::classify(&doc),
            Err(SourceError::NoImages { .. })
        ));
    }
}
