//! Fix stage: narrow, idempotent structural repairs of the editions.
//!
//! Every edition gets its root `xml:id`/`xml:base`, `prev`/`next` links in
//! file-name order, local graphic URLs aligned with its volume, empty `type`
//! attributes removed and the TEI root children in schema order. All
//! documents are checked before any file is written.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio::fs;
use tracing::debug;

use crate::config::FixerConfig;
use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::xml::{self, Document, Element, Node, XML_ID};

static LOCAL_TIF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\d+\.tif$").unwrap());
static COUNTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)(\.[^.]+)$").unwrap());

const SCHEMA_ORDER: [&str; 4] = ["teiHeader", "standOff", "facsimile", "text"];

fn schema_rank(el: &Element) -> usize {
    SCHEMA_ORDER
        .iter()
        .position(|name| el.is(name))
        .unwrap_or(SCHEMA_ORDER.len())
}

/// Sorts the element children of `root` by schema rank, keeping comments
/// and other nodes where they are. Returns true on change.
pub fn order_children(root: &mut Element) -> bool {
    let slots: Vec<usize> = root
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| matches!(node, Node::Element(_)))
        .map(|(i, _)| i)
        .collect();

    let mut elements: Vec<Node> = slots.iter().map(|&i| root.children[i].clone()).collect();
    let before = elements.clone();
    elements.sort_by_key(|node| node.as_element().map(schema_rank).unwrap_or(SCHEMA_ORDER.len()));
    if elements == before {
        return false;
    }
    for (slot, node) in slots.into_iter().zip(elements) {
        root.children[slot] = node;
    }
    true
}

/// Removes every `type=""` attribute. Returns true on change.
pub fn strip_empty_types(root: &mut Element) -> bool {
    let mut changed = false;
    root.visit_mut(&mut |el: &mut Element| {
        if el.attr("type") == Some("") {
            el.remove_attr("type");
            changed = true;
        }
    });
    changed
}

/// Aligns non-HTTP graphic URLs with a volume name.
#[derive(Debug, Clone)]
pub struct GraphicAligner {
    volume: Regex,
}

impl GraphicAligner {
    pub fn new(volume_pattern: &str) -> Result<Self, String> {
        let volume = Regex::new(volume_pattern)
            .map_err(|e| format!("invalid volume pattern '{}': {}", volume_pattern, e))?;
        Ok(Self { volume })
    }

    /// The configured volume match in a file name, or the file stem.
    pub fn volume_name(&self, file_name: &str) -> String {
        let found = self.volume.captures(file_name).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        });
        found.unwrap_or_else(|| {
            Path::new(file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    /// New URL for a graphic, if it needs one.
    pub fn aligned_url(url: &str, surface_id: Option<&str>, volume: &str) -> Option<String> {
        if url.is_empty() || url.to_ascii_lowercase().starts_with("http") {
            return None;
        }

        if LOCAL_TIF.is_match(url) {
            let id = surface_id?;
            let suffix = id.split('_').nth(1).unwrap_or(id);
            let target = format!("{}_{}.tif", volume, suffix);
            return (target != url).then_some(target);
        }

        let caps = COUNTER.captures(url)?;
        let target = format!("{}_{}.tif", volume, caps.get(1)?.as_str());
        (target != url).then_some(target)
    }

    /// Rewrites every graphic URL under `root`. Returns true on change.
    pub fn align(&self, root: &mut Element, volume: &str) -> bool {
        let mut changed = false;
        root.visit_mut(&mut |el: &mut Element| {
            if !el.is("surface") {
                return;
            }
            let surface_id = el.attr(XML_ID).map(String::from);
            for graphic in el.elements_mut().filter(|g| g.is("graphic")) {
                let url = graphic.attr("url").unwrap_or_default().to_string();
                if let Some(target) = Self::aligned_url(&url, surface_id.as_deref(), volume) {
                    graphic.set_attr("url", target);
                    changed = true;
                }
            }
        });
        changed
    }
}

/// The fix stage.
#[derive(Debug, Clone)]
pub struct Fixer {
    xml_base: String,
    aligner: GraphicAligner,
}

impl Fixer {
    pub fn new(config: &FixerConfig) -> Result<Self, StageError> {
        Ok(Self {
            xml_base: config.xml_base.clone(),
            aligner: GraphicAligner::new(&config.volume_pattern).map_err(StageError::Config)?,
        })
    }

    fn load(path: &Path, text: &str) -> Result<Document, StageError> {
        let doc = xml::parse(text).map_err(|e| StageError::structural(path, e.to_string()))?;
        if !doc.root.is("TEI") {
            return Err(StageError::structural(
                path,
                format!("root element is <{}>, expected <TEI>", doc.root.name),
            ));
        }
        for required in ["teiHeader", "text"] {
            if doc.root.child(required).is_none() {
                return Err(StageError::structural(path, format!("missing <{}>", required)));
            }
        }
        Ok(doc)
    }

    /// Applies all repairs to one document.
    pub fn fix(&self, doc: &mut Document, name: &str, prev: Option<&str>, next: Option<&str>) {
        let root = &mut doc.root;
        root.set_attr(XML_ID, name);
        root.set_attr("xml:base", self.xml_base.as_str());
        match prev {
            Some(prev) => {
                root.set_attr("prev", prev);
            }
            None => {
                root.remove_attr("prev");
            }
        }
        match next {
            Some(next) => {
                root.set_attr("next", next);
            }
            None => {
                root.remove_attr("next");
            }
        }

        let volume = self.aligner.volume_name(name);
        self.aligner.align(root, &volume);
        strip_empty_types(root);
        order_children(root);
    }
}

#[async_trait]
impl Stage for Fixer {
    fn kind(&self) -> StageKind {
        StageKind::Fix
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::Fix);
        let dir = ctx.input();
        let files = fsutil::list_xml_files(dir, false)
            .await
            .map_err(StageError::io(dir))?;
        let names: Vec<String> = files.iter().map(|p| fsutil::file_name(p)).collect();

        let mut results: Vec<(PathBuf, bool, String)> = Vec::with_capacity(files.len());
        for (i, path) in files.iter().enumerate() {
            let original = fs::read_to_string(path).await.map_err(StageError::io(path))?;
            let mut doc = Self::load(path, &original)?;

            let prev = i.checked_sub(1).map(|p| names[p].as_str());
            let next = names.get(i + 1).map(String::as_str);
            self.fix(&mut doc, &names[i], prev, next);

            let fixed = doc.to_xml();
            let changed = fixed != original;
            results.push((path.clone(), changed, fixed));
        }

        for (path, changed, fixed) in results {
            if changed {
                fsutil::write_atomic(&path, fixed.as_bytes())
                    .await
                    .map_err(StageError::io(&path))?;
                debug!(path = %path.display(), "Fixed edition");
            }
            report.record(changed);
        }
        Ok(report)
    }
}
