//! Initial-page stage: restores a missing leading page image.
//!
//! Each edition first gets the image names fetched with its METS export, its
//! surfaces ordered and renumbered by image counter, and its page breaks
//! pointed at those surfaces. Then, when the first local graphic ends in a
//! counter above one (an export starting at `…_00002`), a placeholder surface
//! `facs_0` for the previous image and a matching page break are inserted in
//! front. A placeholder that no longer applies is removed again.

mod surfaces;

pub use surfaces::{
    apply_image_names, normalise_surface_ids, reorder_page_breaks, surface_ref,
    synchronise_page_breaks,
};

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio::fs;
use tracing::{debug, warn};

use crate::fetcher::{image_name_files, parse_image_names};
use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::renamer::embedded_doc_id;
use crate::xml::{self, Element, Node, XML_ID};

const PLACEHOLDER_ID: &str = "facs_0";
const PLACEHOLDER_REF: &str = "#facs_0";

static NUMERIC_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*_)(\d+)(\.[^.]+)$").unwrap());
static FALLBACK_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?)(\d+)(\.[^.]+)$").unwrap());
static TRAILING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?)(\d+)$").unwrap());

/// The numbered tail of an image file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericSuffix {
    pub prefix: String,
    pub value: u64,
    pub width: usize,
    pub extension: String,
}

impl NumericSuffix {
    pub fn parse(url: &str) -> Option<Self> {
        let caps = NUMERIC_SUFFIX
            .captures(url)
            .or_else(|| FALLBACK_SUFFIX.captures(url))?;
        let digits = caps.get(2)?.as_str();
        Some(Self {
            prefix: caps.get(1)?.as_str().to_string(),
            value: digits.parse().ok()?,
            width: digits.len(),
            extension: caps.get(3)?.as_str().to_string(),
        })
    }

    /// The same name with another counter, keeping the width.
    pub fn with_value(&self, value: u64) -> String {
        format!(
            "{}{:0width$}{}",
            self.prefix,
            value,
            self.extension,
            width = self.width
        )
    }
}

fn is_local(url: &str) -> bool {
    !url.is_empty() && !url.to_ascii_lowercase().starts_with("http")
}

fn is_local_graphic(el: &Element) -> bool {
    el.is("graphic") && el.attr("url").map(is_local).unwrap_or(false)
}

fn first_local_graphic(surface: &Element) -> Option<&Element> {
    surface.elements().find(|g| is_local_graphic(g))
}

fn first_local_graphic_mut(surface: &mut Element) -> Option<&mut Element> {
    surface.elements_mut().find(|g| is_local_graphic(g))
}

fn is_placeholder(surface: &Element) -> bool {
    surface.attr(XML_ID) == Some(PLACEHOLDER_ID)
}

/// Counters of the real (non placeholder) surfaces.
fn surface_counters(facsimile: &Element) -> Vec<u64> {
    facsimile
        .elements()
        .filter(|s| s.is("surface") && !is_placeholder(s))
        .filter_map(first_local_graphic)
        .filter_map(|g| NumericSuffix::parse(g.attr("url")?))
        .map(|suffix| suffix.value)
        .collect()
}

/// `n` of the inserted page break: one less than the first, same width.
pub fn leading_n(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()) => match v.parse::<u64>() {
            Ok(n) if n > 0 => format!("{:0width$}", n - 1, width = v.len()),
            _ => "0".to_string(),
        },
        _ => "0".to_string(),
    }
}

/// `xml:id` of the inserted page break: the first id decremented, or a
/// fresh `img_0000`.
pub fn leading_id(existing: Option<&str>, used: &mut BTreeSet<String>) -> String {
    if let Some(caps) = existing.and_then(|id| TRAILING_DIGITS.captures(id)) {
        let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let digits = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(n) = digits.parse::<u64>() {
            if n > 0 {
                let candidate = format!("{}{:0width$}", prefix, n - 1, width = digits.len());
                if used.insert(candidate.clone()) {
                    return candidate;
                }
            }
        }
    }

    let base = "img_0000";
    let mut candidate = base.to_string();
    let mut counter = 1;
    while used.contains(&candidate) {
        candidate = format!("{}-{}", base, counter);
        counter += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Removes every page break pointing at the placeholder.
fn remove_placeholder_breaks(el: &mut Element) {
    el.children.retain(|node| match node {
        Node::Element(child) => !(child.is("pb") && child.attr("facs") == Some(PLACEHOLDER_REF)),
        _ => true,
    });
    for child in el.elements_mut() {
        remove_placeholder_breaks(child);
    }
}

/// Drops a placeholder once the real first page is present. Returns true on change.
pub fn remove_redundant_placeholder(root: &mut Element) -> bool {
    let Some(facsimile) = root.child_mut("facsimile") else {
        return false;
    };
    let Some(position) = facsimile.children.iter().position(|node| {
        node.as_element()
            .map(|s| s.is("surface") && is_placeholder(s))
            .unwrap_or(false)
    }) else {
        return false;
    };
    let counters = surface_counters(facsimile);
    match counters.iter().min() {
        Some(&min) if min <= 1 => {}
        _ => return false,
    }

    facsimile.children.remove(position);
    remove_placeholder_breaks(root);
    true
}

/// Inserts the placeholder surface and page break when the first image is
/// missing. Returns true on change.
pub fn ensure_placeholder(root: &mut Element) -> bool {
    let mut changed = remove_redundant_placeholder(root);

    let Some(facsimile) = root.child("facsimile") else {
        return changed;
    };
    if surface_counters(facsimile).iter().min().map(|&m| m <= 1).unwrap_or(true) {
        return changed;
    }
    let Some(first_surface) = facsimile
        .elements()
        .find(|s| s.is("surface") && !is_placeholder(s))
    else {
        return changed;
    };
    let Some(local) = first_local_graphic(first_surface) else {
        return changed;
    };
    let Some(suffix) = local.attr("url").and_then(NumericSuffix::parse) else {
        return changed;
    };
    if suffix.value <= 1 {
        return changed;
    }

    let placeholder_url = suffix.with_value(suffix.value - 1);
    let first_id = first_surface.attr(XML_ID).unwrap_or_default().to_string();
    let surface_attrs: Vec<(String, String)> = first_surface
        .attributes
        .iter()
        .filter(|(key, _)| key != XML_ID)
        .cloned()
        .collect();
    let graphic_attrs: Vec<(String, String)> = ["width", "height", "n"]
        .iter()
        .filter_map(|attr| Some((attr.to_string(), local.attr(attr)?.to_string())))
        .collect();
    let has_placeholder = facsimile.elements().any(|s| s.is("surface") && is_placeholder(s));
    let url_taken = root
        .find_all("//graphic")
        .iter()
        .any(|g| g.attr("url") == Some(placeholder_url.as_str()));

    let breaks = root.locate_all("//body//pb");
    let Some(first_break) = breaks
        .iter()
        .find(|index| {
            root.at(index)
                .and_then(|pb| pb.attr("facs"))
                .map(|facs| facs == format!("#{}", first_id))
                .unwrap_or(false)
        })
        .or_else(|| breaks.first())
        .cloned()
    else {
        return changed;
    };
    let Some(first_pb) = root.at(&first_break) else {
        return changed;
    };
    if first_pb.attr("n") == Some("0") {
        return changed;
    }
    if !has_placeholder && url_taken {
        return changed;
    }

    let first_n = first_pb.attr("n").map(String::from);
    let first_pb_id = first_pb.attr(XML_ID).map(String::from);
    let mut used: BTreeSet<String> = breaks
        .iter()
        .filter_map(|index| root.at(index)?.attr(XML_ID).map(String::from))
        .collect();
    let has_placeholder_break = breaks
        .iter()
        .any(|index| root.at(index).and_then(|pb| pb.attr("facs")) == Some(PLACEHOLDER_REF));

    // Surface.
    let Some(facsimile) = root.child_mut("facsimile") else {
        return changed;
    };
    if !has_placeholder {
        let mut surface = Element::new("surface");
        surface.attributes = surface_attrs;
        surface.set_attr(XML_ID, PLACEHOLDER_ID);
        facsimile.children.insert(0, Node::Element(surface));
        changed = true;
    }
    if let Some(surface) = facsimile
        .elements_mut()
        .find(|s| s.is("surface") && is_placeholder(s))
    {
        let graphic_pos = surface.children.iter().position(|node| {
            node.as_element()
                .map(|g| g.is("graphic") && g.attr("url").map(is_local).unwrap_or(false))
                .unwrap_or(false)
        });
        let graphic_pos = match graphic_pos {
            Some(pos) => pos,
            None => {
                surface.push(Element::new("graphic"));
                changed = true;
                surface.children.len() - 1
            }
        };
        if let Some(graphic) = surface.children[graphic_pos].as_element_mut() {
            changed |= graphic.set_attr("url", placeholder_url.as_str());
            for (key, value) in graphic_attrs {
                changed |= graphic.set_attr(key, value);
            }
        }
    }

    // Page break.
    if !has_placeholder_break {
        let (parent_index, position) = first_break.split_at(first_break.len() - 1);
        let pb = Element::new("pb")
            .with_attr("facs", PLACEHOLDER_REF)
            .with_attr("n", leading_n(first_n.as_deref()))
            .with_attr(XML_ID, leading_id(first_pb_id.as_deref(), &mut used));
        if let Some(parent) = root.at_mut(parent_index) {
            parent.children.insert(position[0], Node::Element(pb));
            changed = true;
        }
    }
    changed
}

/// Runs every leading-page pass over one edition. Returns true on change.
pub fn align_pages(root: &mut Element, image_names: Option<&[String]>) -> bool {
    let mut changed = false;
    if let (Some(names), Some(facsimile)) = (image_names, root.child_mut("facsimile")) {
        changed |= apply_image_names(facsimile, names);
    }
    changed |= remove_redundant_placeholder(root);
    changed |= normalise_surface_ids(root);
    changed |= synchronise_page_breaks(root);
    changed |= ensure_placeholder(root);
    changed
}

/// The initial-page stage.
#[derive(Debug, Default)]
pub struct InitialPageStage {
    /// Raw directory searched for image-name lists.
    mets_dir: Option<PathBuf>,
}

impl InitialPageStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mets_dir = Some(dir.into());
        self
    }

    async fn image_names(
        &self,
        files: &BTreeMap<String, PathBuf>,
        doc_id: Option<&str>,
    ) -> Result<Option<Vec<String>>, StageError> {
        let Some(path) = doc_id.and_then(|id| files.get(id)) else {
            return Ok(None);
        };
        let text = fs::read_to_string(path).await.map_err(StageError::io(path))?;
        match parse_image_names(&text) {
            Ok(names) if !names.is_empty() => Ok(Some(names)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable image-name list");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Stage for InitialPageStage {
    fn kind(&self) -> StageKind {
        StageKind::InitialPage
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::InitialPage);
        let dir = ctx.input();
        let name_files = match &self.mets_dir {
            Some(mets) => image_name_files(mets).await.map_err(StageError::io(mets))?,
            None => BTreeMap::new(),
        };

        for path in fsutil::list_xml_files(dir, false)
            .await
            .map_err(StageError::io(dir))?
        {
            let text = fs::read_to_string(&path).await.map_err(StageError::io(&path))?;
            let mut doc = match xml::parse(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    report.skip(fsutil::file_name(&path), e.to_string());
                    continue;
                }
            };
            let doc_id = embedded_doc_id(&doc.root);
            let selected = match &doc_id {
                Some(id) => ctx.includes(id),
                None => ctx.includes_unknown(),
            };
            if !selected {
                continue;
            }

            let names = self.image_names(&name_files, doc_id.as_deref()).await?;
            if !align_pages(&mut doc.root, names.as_deref()) {
                report.record(false);
                continue;
            }
            let updated = doc.to_xml();
            let changed = fsutil::write_if_changed(&path, updated.as_bytes())
                .await
                .map_err(StageError::io(&path))?;
            if changed {
                debug!(path = %path.display(), "Updated leading page");
            }
            report.record(changed);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::testing::fixtures;
    use std::path::Path;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn context(root: &Path) -> StageContext {
        StageContext::new(
            StageKind::InitialPage,
            &PathsConfig::rooted(root),
            None,
            Uuid::new_v4(),
        )
    }

    fn write_edition(root: &Path, name: &str, urls: &[&str]) -> PathBuf {
        let path = root.join("data/editions").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, fixtures::edition("1750_WSTLA-OKA-B1-1-095-1", "6981834", urls)).unwrap();
        path
    }

    fn edition(urls: &[&str]) -> Element {
        xml::parse(&fixtures::edition("t", "1", urls)).unwrap().root
    }

    #[test]
    fn test_numeric_suffix() {
        let suffix = NumericSuffix::parse("WSTLA-OKA-B1-1-095-1_00002.tif").unwrap();
        assert_eq!(suffix.prefix, "WSTLA-OKA-B1-1-095-1_");
        assert_eq!(suffix.value, 2);
        assert_eq!(suffix.with_value(1), "WSTLA-OKA-B1-1-095-1_00001.tif");
        assert_eq!(NumericSuffix::parse("page12.jpg").unwrap().prefix, "page");
        assert!(NumericSuffix::parse("cover.tif").is_none());
    }

    #[test]
    fn test_leading_values() {
        assert_eq!(leading_n(Some("1")), "0");
        assert_eq!(leading_n(Some("010")), "009");
        assert_eq!(leading_n(Some("x")), "0");
        assert_eq!(leading_n(None), "0");

        let mut used = BTreeSet::from(["img_0001".to_string()]);
        assert_eq!(leading_id(Some("img_0001"), &mut used), "img_0000");
        assert_eq!(leading_id(Some("img_0001"), &mut used), "img_0000-1");
        assert_eq!(leading_id(None, &mut used), "img_0000-2");
    }

    #[test]
    fn test_inserts_placeholder() {
        let mut root = edition(&["V_00002.tif", "V_00003.tif"]);
        assert!(ensure_placeholder(&mut root));

        let surfaces = root.find_all("facsimile/surface");
        assert_eq!(surfaces.len(), 3);
        assert_eq!(surfaces[0].attr(XML_ID), Some("facs_0"));
        assert_eq!(
            surfaces[0].find("graphic").and_then(|g| g.attr("url")),
            Some("V_00001.tif")
        );

        let pbs = root.find_all("//body//pb");
        assert_eq!(pbs[0].attr("facs"), Some("#facs_0"));
        assert_eq!(pbs[0].attr("n"), Some("0"));
        assert_eq!(pbs[0].attr(XML_ID), Some("img_0000"));
        assert_eq!(pbs[1].attr("facs"), Some("#facs_1"));

        assert!(!ensure_placeholder(&mut root));
    }

    #[test]
    fn test_complete_edition_untouched() {
        let mut root = edition(&["V_00001.tif", "V_00002.tif"]);
        assert!(!ensure_placeholder(&mut root));
    }

    #[test]
    fn test_remote_urls_untouched() {
        let mut root = edition(&["https://files.example/Get?id=2"]);
        assert!(!ensure_placeholder(&mut root));
    }

    #[test]
    fn test_redundant_placeholder_removed() {
        let mut root = edition(&["V_00002.tif"]);
        assert!(ensure_placeholder(&mut root));

        // The real first page showed up later.
        let graphic = root
            .find_mut("facsimile/surface[@xml:id='facs_1']/graphic")
            .unwrap();
        graphic.set_attr("url", "V_00001.tif");

        assert!(remove_redundant_placeholder(&mut root));
        assert!(root.find("facsimile/surface[@xml:id='facs_0']").is_none());
        assert!(root.find("//pb[@facs='#facs_0']").is_none());
    }

    #[tokio::test]
    async fn test_stage_maps_image_names_then_inserts_placeholder() {
        let temp = TempDir::new().unwrap();
        let edition = write_edition(temp.path(), "WSTLA-OKA-B1-1-095-1.xml", &["a.jpg", "b.jpg"]);
        let raw = temp.path().join("data/mets/258178");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::write(
            raw.join("6981834_image_name.xml"),
            "<imageNames><item>V_00002.tif</item><item>V_00003.tif</item></imageNames>",
        )
        .unwrap();

        let stage = InitialPageStage::new().with_mets_dir(temp.path().join("data/mets"));
        let report = stage.run(&context(temp.path())).await.unwrap();
        assert_eq!(report.processed, 1);

        let root = xml::parse(&std::fs::read_to_string(&edition).unwrap()).unwrap().root;
        let surfaces: Vec<(&str, &str)> = root
            .find_all("facsimile/surface")
            .iter()
            .map(|s| {
                (
                    s.attr(XML_ID).unwrap_or_default(),
                    s.find("graphic").and_then(|g| g.attr("url")).unwrap_or_default(),
                )
            })
            .collect();
        assert_eq!(
            surfaces,
            vec![
                ("facs_0", "V_00001.tif"),
                ("facs_1", "V_00002.tif"),
                ("facs_2", "V_00003.tif"),
            ]
        );
        let breaks: Vec<&str> = root
            .find_all("//body//pb")
            .iter()
            .filter_map(|pb| pb.attr("facs"))
            .collect();
        assert_eq!(breaks, vec!["#facs_0", "#facs_1", "#facs_2"]);

        let again = stage.run(&context(temp.path())).await.unwrap();
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn test_stage_without_image_names_keeps_urls() {
        let temp = TempDir::new().unwrap();
        let edition = write_edition(temp.path(), "WSTLA-OKA-B1-1-095-1.xml", &["V_00001.tif", "V_00002.tif"]);
        let before = std::fs::read_to_string(&edition).unwrap();

        let stage = InitialPageStage::new().with_mets_dir(temp.path().join("data/mets"));
        let report = stage.run(&context(temp.path())).await.unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(std::fs::read_to_string(&edition).unwrap(), before);
    }
}
