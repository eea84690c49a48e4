//! Header skeleton and the identifying fields copied from an edition.

use std::path::Path;

use quick_xml::escape::escape;
use tokio::fs;

use crate::pipeline::StageError;
use crate::renamer::embedded_doc_id;
use crate::source::year_of;
use crate::xml::{self, Document, Element};

/// Placeholder token of the built-in template.
const TOKEN: &str = "[tbd]";

const BUILTIN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc>
      <titleStmt>
        <title level="a" type="main">[tbd]</title>
        <title level="a" type="alt">[tbd]</title>
        <title level="a" type="desc">[tbd]</title>
        <respStmt>
          <resp>Archivalische Quelle</resp>
          <orgName>Wiener Stadt- und Landesarchiv</orgName>
        </respStmt>
      </titleStmt>
      <publicationStmt>
        <publisher>Wiener Stadt- und Landesarchiv</publisher>
        <pubPlace>Wien</pubPlace>
        <date type="modified" when="[tbd]">[tbd]</date>
        <availability>
          <licence target="https://creativecommons.org/licenses/by/4.0/">CC BY 4.0</licence>
        </availability>
      </publicationStmt>
      <notesStmt>
        <note>[tbd]</note>
      </notesStmt>
      <sourceDesc>
        <bibl>
          <title type="main">[tbd]</title>
          <date>[tbd]</date>
          <idno type="Transkribus">[tbd]</idno>
        </bibl>
        <msDesc>
          <msIdentifier>
            <settlement>Wien</settlement>
            <repository>Wiener Stadt- und Landesarchiv</repository>
            <idno type="shelfmark">[tbd]</idno>
          </msIdentifier>
          <msContents>
            <summary>[tbd]</summary>
            <msItem>
              <note type="toc">[tbd]</note>
            </msItem>
            <p>
              <origDate>[tbd]</origDate>
            </p>
          </msContents>
          <physDesc>
            <objectDesc>
              <supportDesc>
                <extent>[tbd]</extent>
              </supportDesc>
            </objectDesc>
            <accMat>
              <p>[tbd]</p>
            </accMat>
          </physDesc>
        </msDesc>
      </sourceDesc>
    </fileDesc>
  </teiHeader>
  <standOff>
    <listPerson/>
  </standOff>
</TEI>
"#;

pub(crate) const TITLE_STMT: &str = "teiHeader/fileDesc/titleStmt";
pub(crate) const PUBLICATION_STMT: &str = "teiHeader/fileDesc/publicationStmt";
pub(crate) const BIBL: &str = "teiHeader/fileDesc/sourceDesc/bibl";
pub(crate) const LIST_PERSON: &str = "standOff/listPerson";
pub(crate) const DESC_TITLE: &str = "teiHeader/fileDesc/titleStmt/title[@type='desc']";
pub(crate) const MODIFIED: &str = "teiHeader/fileDesc/publicationStmt/date[@type='modified']";

/// Elements every template must contain.
const ANCHORS: [&str; 5] = [TITLE_STMT, PUBLICATION_STMT, BIBL, LIST_PERSON, DESC_TITLE];

/// Identifying fields of an edition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditionInfo {
    /// Canonical key: the edition file stem.
    pub key: String,
    pub title: String,
    pub year: Option<String>,
    pub doc_id: Option<String>,
}

impl EditionInfo {
    pub fn from_edition(key: impl Into<String>, root: &Element) -> Self {
        let title = root
            .find_text("teiHeader/fileDesc/sourceDesc/bibl/title")
            .filter(|t| !t.is_empty())
            .or_else(|| root.find_text("teiHeader/fileDesc/titleStmt/title"))
            .unwrap_or_default();
        let year = year_of(&title).or_else(|| {
            root.find_text("teiHeader/fileDesc/sourceDesc/bibl/date")
                .as_deref()
                .and_then(year_of)
        });

        Self {
            key: key.into(),
            title,
            year,
            doc_id: embedded_doc_id(root),
        }
    }
}

/// A validated header skeleton.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    doc: Document,
}

impl HeaderTemplate {
    /// The built-in skeleton with `placeholder` in every descriptive field.
    pub fn builtin(placeholder: &str) -> Result<Self, StageError> {
        let source = BUILTIN.replace(TOKEN, &escape(placeholder));
        Self::parse_source(&source)
    }

    /// Loads a custom skeleton. Its placeholders are written as is.
    pub async fn load(path: &Path) -> Result<Self, StageError> {
        let source = fs::read_to_string(path)
            .await
            .map_err(|e| StageError::Config(format!("cannot read template {}: {}", path.display(), e)))?;
        Self::parse_source(&source)
    }

    fn parse_source(source: &str) -> Result<Self, StageError> {
        let doc = xml::parse(source)
            .map_err(|e| StageError::Config(format!("header template is not well-formed: {}", e)))?;
        if !doc.root.is("TEI") {
            return Err(StageError::Config(format!(
                "header template root is <{}>, expected <TEI>",
                doc.root.name
            )));
        }
        let missing: Vec<&str> = ANCHORS
            .iter()
            .copied()
            .filter(|anchor| doc.root.find(anchor).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(StageError::Config(format!(
                "header template lacks {}",
                missing.join(", ")
            )));
        }
        Ok(Self { doc })
    }

    /// A new header for `info`, stamped with `today`.
    pub fn instantiate(&self, info: &EditionInfo, today: &str) -> Document {
        let mut doc = self.doc.clone();
        let root = &mut doc.root;

        if let Some(desc) = root.find_mut(DESC_TITLE) {
            desc.set_text(info.key.as_str());
        }
        if let Some(bibl) = root.find_mut(BIBL) {
            set_child(bibl, "title[@type='main']", &info.title);
            set_child(bibl, "date", info.year.as_deref().unwrap_or_default());
            set_child(bibl, "idno[@type='Transkribus']", info.doc_id.as_deref().unwrap_or_default());
        }
        stamp_modified(root, today);
        doc
    }
}

/// Sets the text of the first child matching `step`, creating it when absent.
fn set_child(parent: &mut Element, step: &str, text: &str) {
    if let Some(child) = parent.elements_mut().find(|el| el.matches(step)) {
        child.set_text(text);
        return;
    }
    let mut child = match step.split_once('[') {
        Some((name, _)) => Element::new(name),
        None => Element::new(step),
    };
    if let Some(("type", value)) = step
        .split_once("[@")
        .and_then(|(_, rest)| rest.trim_end_matches(']').split_once('='))
    {
        child.set_attr("type", value.trim_matches('\''));
    }
    child.set_text(text);
    parent.push(child);
}

/// Sets the `modified` date, creating it in the publication statement.
pub(crate) fn stamp_modified(root: &mut Element, today: &str) {
    if root.find(MODIFIED).is_none() {
        if let Some(stmt) = root.find_mut(PUBLICATION_STMT) {
            stmt.push(Element::new("date").with_attr("type", "modified"));
        }
    }
    if let Some(date) = root.find_mut(MODIFIED) {
        date.set_attr("when", today);
        date.set_text(today);
    }
}
