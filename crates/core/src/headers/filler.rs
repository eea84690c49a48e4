//! Header filler stage: merges store records into header placeholders.
//!
//! The merge is field-level. Only elements still holding the placeholder are
//! written, and persons are only added to an empty `listPerson`, so values
//! filled earlier (by a previous run or by hand) are never reset.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::MissingFieldPolicy;
use crate::fsutil;
use crate::metadata::{MetadataRecord, MetadataStore};
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::renamer::embedded_doc_id;
use crate::retry::{ExhaustionPolicy, Retryable};
use crate::xml::{self, Element, XML_ID};

use super::template::{stamp_modified, DESC_TITLE, LIST_PERSON, TITLE_STMT};
use super::today;

/// Simple text fields: column and target element.
const TEXT_FIELDS: [(&str, &str); 7] = [
    ("Title", "teiHeader/fileDesc/titleStmt/title[@type='main']"),
    ("AlternativeTitle", "teiHeader/fileDesc/titleStmt/title[@type='alt']"),
    ("NonLinkedIdentifier", "teiHeader//msDesc/msIdentifier/idno[@type='shelfmark']"),
    ("Description", "teiHeader//msDesc/msContents/summary"),
    ("TableOfContents", "teiHeader//msDesc/msContents/msItem/note[@type='toc']"),
    ("Pages", "teiHeader//msDesc/physDesc/objectDesc/supportDesc/extent"),
    ("Description II", "teiHeader//msDesc/physDesc/accMat/p"),
];
const NOTE: (&str, &str) = ("Note", "teiHeader/fileDesc/notesStmt/note");
const ORIG_DATE: &str = "teiHeader//msDesc/msContents/p/origDate";
const CREATOR_SLOTS: usize = 5;

/// A creator column group of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    pub title: String,
    pub forename: String,
    pub surname: String,
    pub role: String,
    pub identifier: Option<String>,
    pub note: Option<String>,
}

impl Creator {
    /// Creators `1..=5` present in a record, in slot order.
    pub fn from_record(record: &MetadataRecord) -> Vec<Creator> {
        (1..=CREATOR_SLOTS)
            .filter_map(|slot| {
                let column = |field: &str| record.get(&format!("Creator{}/{}", slot, field));
                let title = column("Title")?;
                let surname = [column("LastName"), column("LastName2")]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(Creator {
                    title: title.to_string(),
                    forename: column("FirstName").unwrap_or_default().to_string(),
                    surname,
                    role: column("PersonalName").unwrap_or_default().to_string(),
                    identifier: column("Identifier").map(String::from),
                    note: column("Note").map(String::from),
                })
            })
            .collect()
    }

    /// `xml:id` base: the first surname word, lowercased.
    fn id_base(&self) -> String {
        self.surname
            .split_whitespace()
            .next()
            .map(str::to_lowercase)
            .unwrap_or_else(|| "person".to_string())
    }
}

fn unique_id(base: String, used: &mut BTreeSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Merges `record` into a header. Returns true on change.
pub fn merge(root: &mut Element, record: &MetadataRecord, placeholder: &str) -> bool {
    let mut changed = false;
    for (column, target) in TEXT_FIELDS.iter().chain(std::iter::once(&NOTE)) {
        let Some(value) = record.get(column) else {
            continue;
        };
        match root.find_mut(target) {
            Some(el) if el.text().trim() == placeholder => {
                el.set_text(value);
                changed = true;
            }
            Some(_) => {}
            None => debug!(column, target, "Header has no element for column"),
        }
    }

    changed |= fill_orig_date(root, record, placeholder);
    changed |= add_creators(root, &Creator::from_record(record));
    changed
}

fn fill_orig_date(root: &mut Element, record: &MetadataRecord, placeholder: &str) -> bool {
    let Some(start) = record.get("CoverageStartDate") else {
        return false;
    };
    let Some(date) = root.find_mut(ORIG_DATE) else {
        return false;
    };
    let untouched = date.text().trim() == placeholder
        && ["when", "from", "to"].iter().all(|attr| date.attr(attr).is_none());
    if !untouched {
        return false;
    }

    match record.get("CoverageEndDate") {
        Some(end) if end != start => {
            date.set_attr("from", start);
            date.set_attr("to", end);
        }
        _ => {
            date.set_attr("when", start);
        }
    }
    date.set_text("");
    true
}

fn person(creator: &Creator, id: &str) -> Element {
    let mut person = Element::new("person").with_attr(XML_ID, id);
    if !creator.role.is_empty() {
        person.set_attr("role", creator.role.as_str());
    }
    person.push(
        Element::new("persName")
            .with_attr("type", "norm")
            .with_child(Element::new("forename").with_text(creator.forename.as_str()))
            .with_child(Element::new("surname").with_text(creator.surname.as_str())),
    );
    person.push(
        Element::new("persName")
            .with_attr("type", "orig")
            .with_text(creator.title.as_str()),
    );
    person.push(Element::new("occupation").with_text(creator.role.as_str()));
    if let Some(identifier) = &creator.identifier {
        person.push(
            Element::new("idno")
                .with_attr("type", "URI")
                .with_attr("subtype", "WienGeschichteWiki")
                .with_text(identifier.as_str()),
        );
    }
    if let Some(note) = &creator.note {
        person.push(Element::new("note").with_text(note.as_str()));
    }
    person
}

fn resp_stmt(creator: &Creator, id: &str) -> Element {
    let mut name = Element::new("persName").with_attr("ref", format!("#{}", id));
    if !creator.role.is_empty() {
        name.set_attr("role", creator.role.as_str());
    }
    Element::new("respStmt")
        .with_child(Element::new("resp").with_text(creator.role.as_str()))
        .with_child(name.with_text(creator.title.as_str()))
}

/// Adds persons and their `respStmt`s when `listPerson` is still empty.
fn add_creators(root: &mut Element, creators: &[Creator]) -> bool {
    if creators.is_empty() {
        return false;
    }
    match root.find(LIST_PERSON) {
        Some(list) if list.elements().next().is_none() => {}
        _ => return false,
    }

    let mut used: BTreeSet<String> = root
        .descendants()
        .iter()
        .filter_map(|el| el.attr(XML_ID).map(String::from))
        .collect();
    let ids: Vec<String> = creators
        .iter()
        .map(|c| unique_id(c.id_base(), &mut used))
        .collect();

    if let Some(list) = root.find_mut(LIST_PERSON) {
        for (creator, id) in creators.iter().zip(&ids) {
            list.push(person(creator, id));
        }
    }
    if let Some(stmt) = root.find_mut(TITLE_STMT) {
        let mut position = stmt
            .children
            .iter()
            .rposition(|node| node.as_element().map(|el| el.is("respStmt")).unwrap_or(false))
            .map(|i| i + 1)
            .unwrap_or(stmt.children.len());
        for (creator, id) in creators.iter().zip(&ids) {
            stmt.children
                .insert(position, xml::Node::Element(resp_stmt(creator, id)));
            position += 1;
        }
    }
    true
}

/// Fills header placeholders from a metadata store.
pub struct HeaderFiller {
    store: Arc<dyn MetadataStore>,
    placeholder: String,
    required: Vec<String>,
    on_missing_required: MissingFieldPolicy,
    on_exhausted: ExhaustionPolicy,
}

impl HeaderFiller {
    pub fn new(store: Arc<dyn MetadataStore>, placeholder: impl Into<String>) -> Self {
        Self {
            store,
            placeholder: placeholder.into(),
            required: Vec::new(),
            on_missing_required: MissingFieldPolicy::Ignore,
            on_exhausted: ExhaustionPolicy::SkipItem,
        }
    }

    pub fn with_required(mut self, fields: Vec<String>, policy: MissingFieldPolicy) -> Self {
        self.required = fields;
        self.on_missing_required = policy;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }

    fn check_required(&self, record: &MetadataRecord) -> Result<(), StageError> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .map(String::as_str)
            .filter(|field| record.get(field).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        match self.on_missing_required {
            MissingFieldPolicy::Ignore => {
                warn!(key = %record.key, fields = ?missing, "Required metadata missing");
                Ok(())
            }
            MissingFieldPolicy::Fatal => Err(StageError::MissingRequired {
                key: record.key.clone(),
                fields: missing.join(", "),
            }),
        }
    }
}

#[async_trait]
impl Stage for HeaderFiller {
    fn kind(&self) -> StageKind {
        StageKind::FillHeaders
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::FillHeaders);
        let dir = ctx.input();
        let files = fsutil::list_xml_files(dir, false)
            .await
            .map_err(StageError::io(dir))?;
        if files.is_empty() {
            return Ok(report);
        }

        if let Err(e) = self.store.authenticate().await {
            warn!(store = self.store.name(), "Authentication failed");
            return Err(e.into());
        }

        for path in files {
            let name = fsutil::file_name(&path);
            let text = fs::read_to_string(&path).await.map_err(StageError::io(&path))?;
            let mut doc = xml::parse(&text)
                .map_err(|e| StageError::structural(&path, e.to_string()))?;

            let selected = match embedded_doc_id(&doc.root) {
                Some(id) => ctx.includes(&id),
                None => ctx.includes_unknown(),
            };
            if !selected {
                continue;
            }
            let Some(key) = doc.root.find_text(DESC_TITLE).filter(|k| !k.is_empty()) else {
                report.skip(name, "header has no key title");
                continue;
            };

            let record = match self.store.lookup(&key).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    report.skip(name, format!("no metadata record for '{}'", key));
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) if e.is_retryable() && self.on_exhausted == ExhaustionPolicy::Abort => {
                    return Err(e.into())
                }
                Err(e) => {
                    report.skip(name, e.to_string());
                    continue;
                }
            };
            self.check_required(&record)?;

            if !merge(&mut doc.root, &record, &self.placeholder) {
                report.record(false);
                continue;
            }
            stamp_modified(&mut doc.root, &today());
            fsutil::write_atomic(&path, doc.to_xml().as_bytes())
                .await
                .map_err(StageError::io(&path))?;
            debug!(path = %path.display(), key = %key, "Filled header");
            report.record(true);
        }
        Ok(report)
    }
}
