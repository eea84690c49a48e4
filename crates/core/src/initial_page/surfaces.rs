//! Surface order, surface ids and the page breaks pointing at them.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::xml::{Element, Node, XML_ID};

use super::{first_local_graphic, first_local_graphic_mut, is_placeholder, NumericSuffix, PLACEHOLDER_REF};

static SURFACE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(facs_\d+)").unwrap());

/// Surface id referenced by a `facs` value such as `#facs_12_r1`.
pub fn surface_ref(value: &str) -> Option<&str> {
    SURFACE_REF.captures(value)?.get(1).map(|m| m.as_str())
}

/// Gives the first local graphic of each real surface the listed image
/// name, in order. Returns true on change.
pub fn apply_image_names(facsimile: &mut Element, names: &[String]) -> bool {
    let mut changed = false;
    let surfaces = facsimile
        .elements_mut()
        .filter(|s| s.is("surface") && !is_placeholder(s));
    for (surface, name) in surfaces.zip(names) {
        if let Some(graphic) = first_local_graphic_mut(surface) {
            changed |= graphic.set_attr("url", name.as_str());
        }
    }
    changed
}

/// Sort key: placeholder, then by image counter, then surfaces without one.
fn surface_rank(node: &Node) -> (u8, u64) {
    let Some(surface) = node.as_element() else {
        return (2, 0);
    };
    if is_placeholder(surface) {
        return (0, 0);
    }
    match first_local_graphic(surface).and_then(|g| NumericSuffix::parse(g.attr("url")?)) {
        Some(suffix) => (1, suffix.value),
        None => (2, 0),
    }
}

/// Orders surfaces by image counter and renumbers them `facs_1..N`,
/// rewriting every reference to a renamed id. Returns true on change.
pub fn normalise_surface_ids(root: &mut Element) -> bool {
    let Some(facsimile) = root.child_mut("facsimile") else {
        return false;
    };
    let slots: Vec<usize> = facsimile
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| node.as_element().map(|el| el.is("surface")).unwrap_or(false))
        .map(|(i, _)| i)
        .collect();
    if slots.is_empty() {
        return false;
    }

    let mut changed = false;
    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by_key(|&i| surface_rank(&facsimile.children[slots[i]]));
    if order.iter().enumerate().any(|(pos, &i)| pos != i) {
        // Surfaces move between the slots they occupied; other nodes stay put.
        let mut taken: Vec<Option<Node>> = slots
            .iter()
            .map(|&slot| Some(std::mem::replace(&mut facsimile.children[slot], Node::Text(String::new()))))
            .collect();
        for (&slot, &i) in slots.iter().zip(&order) {
            if let Some(node) = taken[i].take() {
                facsimile.children[slot] = node;
            }
        }
        changed = true;
    }

    let mut renames = Vec::new();
    let mut counter = 1;
    for &slot in &slots {
        let Some(surface) = facsimile.children[slot].as_element_mut() else {
            continue;
        };
        if is_placeholder(surface) {
            continue;
        }
        let new_id = format!("facs_{}", counter);
        counter += 1;

        let old_id = surface.attr(XML_ID).unwrap_or_default().to_string();
        if old_id == new_id {
            continue;
        }
        if !old_id.is_empty() {
            rename_descendants(surface, &old_id, &new_id, &mut renames);
            renames.push((old_id, new_id.clone()));
        }
        surface.set_attr(XML_ID, new_id);
        changed = true;
    }

    if !renames.is_empty() {
        changed |= rewrite_references(root, renames);
    }
    changed
}

/// Renames descendant ids equal to `old_id` or prefixed `<old_id>_`.
fn rename_descendants(
    surface: &mut Element,
    old_id: &str,
    new_id: &str,
    renames: &mut Vec<(String, String)>,
) {
    let prefix = format!("{}_", old_id);
    for child in surface.elements_mut() {
        child.visit_mut(&mut |el: &mut Element| {
            let Some(id) = el.attr(XML_ID).map(String::from) else {
                return;
            };
            let renamed = if id == old_id {
                new_id.to_string()
            } else if let Some(rest) = id.strip_prefix(&prefix) {
                format!("{}_{}", new_id, rest)
            } else {
                return;
            };
            el.set_attr(XML_ID, renamed.as_str());
            renames.push((id, renamed));
        });
    }
}

/// Applies the renames to every attribute except `xml:id`.
fn rewrite_references(root: &mut Element, mut renames: Vec<(String, String)>) -> bool {
    renames.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut changed = false;
    root.visit_mut(&mut |el: &mut Element| {
        for (key, value) in el.attributes.iter_mut() {
            if key.as_str() == XML_ID {
                continue;
            }
            if let Some(updated) = replace_id_tokens(value, &renames) {
                *value = updated;
                changed = true;
            }
        }
    });
    changed
}

/// Replaces whole id tokens in one pass, so `a -> b` and `b -> a` swap.
///
/// A token must start at a word boundary and must not run into further
/// digits (`facs_1` does not match inside `facs_12`).
fn replace_id_tokens(value: &str, renames: &[(String, String)]) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    'scan: while !rest.is_empty() {
        if !out.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
            for (old, new) in renames {
                if let Some(tail) = rest.strip_prefix(old.as_str()) {
                    if !tail.starts_with(|c: char| c.is_ascii_digit()) {
                        out.push_str(new);
                        rest = tail;
                        continue 'scan;
                    }
                }
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    (out != value).then_some(out)
}

/// Points the body's page breaks at the real surfaces in order, then moves
/// breaks that landed in front of their predecessor's text. Breaks pointing
/// at the placeholder are left alone. Returns true on change.
pub fn synchronise_page_breaks(root: &mut Element) -> bool {
    let Some(facsimile) = root.child("facsimile") else {
        return false;
    };
    let surface_ids: Vec<Option<String>> = facsimile
        .elements()
        .filter(|s| s.is("surface") && !is_placeholder(s))
        .map(|s| s.attr(XML_ID).map(String::from))
        .collect();

    let breaks: Vec<Vec<usize>> = root
        .locate_all("//body//pb")
        .into_iter()
        .filter(|index| root.at(index).and_then(|pb| pb.attr("facs")) != Some(PLACEHOLDER_REF))
        .collect();

    let mut changed = false;
    for (index, id) in breaks.iter().zip(&surface_ids) {
        let Some(id) = id else {
            continue;
        };
        if let Some(pb) = root.at_mut(index) {
            changed |= pb.set_attr("facs", format!("#{}", id));
        }
    }
    changed |= reorder_page_breaks(root);
    changed
}

/// Child positions of the direct `pb` children.
fn direct_breaks(container: &Element) -> Vec<usize> {
    container
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| node.as_element().map(|el| el.is("pb")).unwrap_or(false))
        .map(|(i, _)| i)
        .collect()
}

/// For each surface, the child position holding its last `ab[@facs]`.
fn last_blocks(container: &Element) -> BTreeMap<String, usize> {
    let mut blocks = BTreeMap::new();
    for (position, node) in container.children.iter().enumerate() {
        let Some(child) = node.as_element() else {
            continue;
        };
        for ab in std::iter::once(child).chain(child.descendants()) {
            if !ab.is("ab") {
                continue;
            }
            if let Some(surface) = ab.attr("facs").and_then(surface_ref) {
                blocks.insert(surface.to_string(), position);
            }
        }
    }
    blocks
}

/// Moves the breaks following each `pb` but sitting before the last block of
/// that pb's surface to just after that block, keeping their order.
pub fn reorder_page_breaks(root: &mut Element) -> bool {
    let mut containers = root.locate_all("//body");
    containers.extend(root.locate_all("//body//div"));

    let mut changed = false;
    for k in 0..containers.len() {
        // Earlier moves can shift the positions of nested containers.
        let mut current = root.locate_all("//body");
        current.extend(root.locate_all("//body//div"));
        let Some(container) = current.get(k).and_then(|index| root.at_mut(index)) else {
            continue;
        };
        changed |= reorder_in(container);
    }
    changed
}

fn reorder_in(container: &mut Element) -> bool {
    let total = direct_breaks(container).len();
    if total < 2 || last_blocks(container).is_empty() {
        return false;
    }

    let mut changed = false;
    for i in 0..total {
        let breaks = direct_breaks(container);
        let surface = container.children[breaks[i]]
            .as_element()
            .and_then(|pb| pb.attr("facs"))
            .and_then(surface_ref)
            .map(String::from);
        let Some(mut anchor) = surface.and_then(|s| last_blocks(container).get(&s).copied()) else {
            continue;
        };

        // The next break after pb i is the next candidate until one already
        // sits behind the anchor.
        let mut insertion = anchor;
        while let Some(&position) = direct_breaks(container).get(i + 1) {
            if position >= anchor {
                break;
            }
            let node = container.children.remove(position);
            anchor -= 1;
            insertion -= 1;
            container.children.insert(insertion + 1, node);
            insertion += 1;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    const TEI_OPEN: &str = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0">"#;

    fn parse(body: &str) -> Element {
        xml::parse(&format!("{}{}</TEI>", TEI_OPEN, body)).unwrap().root
    }

    fn surface_urls(root: &Element) -> Vec<(String, String)> {
        root.find_all("facsimile/surface")
            .iter()
            .map(|s| {
                (
                    s.attr(XML_ID).unwrap_or_default().to_string(),
                    s.find("graphic").and_then(|g| g.attr("url")).unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    fn break_refs(root: &Element) -> Vec<String> {
        root.find_all("//body//pb")
            .iter()
            .map(|pb| pb.attr("facs").unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_surface_ref() {
        assert_eq!(surface_ref("#facs_12"), Some("facs_12"));
        assert_eq!(surface_ref("#facs_3_r1l2"), Some("facs_3"));
        assert_eq!(surface_ref("facs_3"), None);
    }

    #[test]
    fn test_image_names_skip_placeholder() {
        let mut root = parse(concat!(
            r#"<facsimile>"#,
            r#"<surface xml:id="facs_0"><graphic url="old_0.jpg"/></surface>"#,
            r#"<surface xml:id="facs_1"><graphic url="https://files.example/1"/><graphic url="old_1.jpg"/></surface>"#,
            r#"<surface xml:id="facs_2"><graphic url="old_2.jpg"/></surface>"#,
            r#"<surface xml:id="facs_3"><graphic url="old_3.jpg"/></surface>"#,
            r#"</facsimile>"#,
        ));
        let names = vec!["V_00002.tif".to_string(), "V_00003.tif".to_string()];
        let facsimile = root.child_mut("facsimile").unwrap();

        assert!(apply_image_names(facsimile, &names));
        assert!(!apply_image_names(facsimile, &names));

        let urls: Vec<&str> = root
            .find_all("//graphic")
            .iter()
            .filter_map(|g| g.attr("url"))
            .collect();
        assert_eq!(
            urls,
            vec!["old_0.jpg", "https://files.example/1", "V_00002.tif", "V_00003.tif", "old_3.jpg"]
        );
    }

    #[test]
    fn test_surfaces_sorted_and_renumbered() {
        let mut root = parse(concat!(
            r#"<facsimile>"#,
            r#"<surface xml:id="facs_7"><graphic url="V_00003.tif"/><zone xml:id="facs_7_r1"/></surface>"#,
            r#"<!-- scans -->"#,
            r#"<surface xml:id="facs_5"><graphic url="cover.tif"/></surface>"#,
            r#"<surface xml:id="facs_9"><graphic url="V_00002.tif"/></surface>"#,
            r#"</facsimile>"#,
            r#"<text><body><div>"#,
            r##"<pb facs="#facs_7" n="1"/><ab facs="#facs_7_r1">a</ab>"##,
            r##"<pb facs="#facs_9" n="2"/><ab facs="#facs_9">b</ab>"##,
            r#"</div></body></text>"#,
        ));

        assert!(normalise_surface_ids(&mut root));

        assert_eq!(
            surface_urls(&root),
            vec![
                ("facs_1".to_string(), "V_00002.tif".to_string()),
                ("facs_2".to_string(), "V_00003.tif".to_string()),
                ("facs_3".to_string(), "cover.tif".to_string()),
            ]
        );
        assert!(root.find("facsimile//zone[@xml:id='facs_2_r1']").is_some());
        assert!(matches!(root.child("facsimile").unwrap().children[1], Node::Comment(_)));
        assert_eq!(break_refs(&root), vec!["#facs_2", "#facs_1"]);
        assert!(root.find("//ab[@facs='#facs_2_r1']").is_some());

        assert!(!normalise_surface_ids(&mut root));
    }

    #[test]
    fn test_swapped_ids_do_not_chain() {
        let mut root = parse(concat!(
            r#"<facsimile>"#,
            r#"<surface xml:id="facs_2"><graphic url="V_1.tif"/></surface>"#,
            r#"<surface xml:id="facs_1"><graphic url="V_2.tif"/></surface>"#,
            r#"</facsimile>"#,
            r##"<text><body><pb facs="#facs_2"/><pb facs="#facs_1"/><ptr target="#facs_12 #facs_1"/></body></text>"##,
        ));

        assert!(normalise_surface_ids(&mut root));
        assert_eq!(break_refs(&root), vec!["#facs_1", "#facs_2"]);
        assert_eq!(
            root.find("//ptr").and_then(|p| p.attr("target")),
            Some("#facs_12 #facs_2")
        );
    }

    #[test]
    fn test_page_breaks_follow_surfaces() {
        let mut root = parse(concat!(
            r#"<facsimile>"#,
            r#"<surface xml:id="facs_0"><graphic url="V_1.tif"/></surface>"#,
            r#"<surface xml:id="facs_1"><graphic url="V_2.tif"/></surface>"#,
            r#"<surface xml:id="facs_2"><graphic url="V_3.tif"/></surface>"#,
            r#"</facsimile>"#,
            r#"<text><body><div>"#,
            r##"<pb facs="#facs_0" n="0"/><pb facs="#facs_4" n="1"/><ab>a</ab><pb n="2"/><ab>b</ab><pb n="3"/>"##,
            r#"</div></body></text>"#,
        ));

        assert!(synchronise_page_breaks(&mut root));
        assert_eq!(break_refs(&root), vec!["#facs_0", "#facs_1", "#facs_2", ""]);
        assert!(!synchronise_page_breaks(&mut root));
    }

    #[test]
    fn test_page_break_moved_after_previous_page_text() {
        let mut root = parse(concat!(
            r#"<text><body><div>"#,
            r##"<pb facs="#facs_1"/><pb facs="#facs_2"/><pb facs="#facs_3"/>"##,
            r##"<ab facs="#facs_1_r1">a</ab><p><ab facs="#facs_1_r2">a2</ab></p>"##,
            r##"<ab facs="#facs_2_r1">b</ab><ab facs="#facs_3_r1">c</ab>"##,
            r#"</div></body></text>"#,
        ));

        assert!(reorder_page_breaks(&mut root));

        let order: Vec<String> = root
            .find("//div")
            .unwrap()
            .elements()
            .map(|el| match el.attr("facs") {
                Some(facs) => format!("{}{}", el.local_name(), facs),
                None => el.local_name().to_string(),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "pb#facs_1",
                "ab#facs_1_r1",
                "p",
                "pb#facs_2",
                "ab#facs_2_r1",
                "pb#facs_3",
                "ab#facs_3_r1",
            ]
        );
        assert!(!reorder_page_breaks(&mut root));
    }
}
