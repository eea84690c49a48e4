use super::Element;

/// One step of a location path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Step {
    pub(crate) name: String,
    pub(crate) predicates: Vec<(String, String)>,
    pub(crate) descendant: bool,
}

impl Step {
    pub(crate) fn matches(&self, el: &Element) -> bool {
        (self.name == "*" || el.is(&self.name))
            && self
                .predicates
                .iter()
                .all(|(key, value)| el.attr(key) == Some(value.as_str()))
    }
}

pub(crate) fn parse(path: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut descendant = false;

    for raw in path.split('/') {
        let raw = raw.trim();
        if raw.is_empty() || raw == "." {
            descendant = descendant || raw.is_empty();
            continue;
        }

        let (name, rest) = match raw.find('[') {
            Some(i) => (&raw[..i], &raw[i..]),
            None => (raw, ""),
        };

        let mut predicates = Vec::new();
        for predicate in rest.split('[').filter(|p| !p.is_empty()) {
            let body = predicate.trim_end_matches(']').trim();
            let Some(body) = body.strip_prefix('@') else {
                continue;
            };
            if let Some((key, value)) = body.split_once('=') {
                let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
                predicates.push((key.trim().to_string(), value.to_string()));
            }
        }

        steps.push(Step {
            name: name.to_string(),
            predicates,
            descendant,
        });
        descendant = false;
    }

    steps
}

/// Child-index path of the first match.
pub(crate) fn locate(root: &Element, steps: &[Step]) -> Option<Vec<usize>> {
    let mut found = Vec::new();
    collect(root, steps, &mut Vec::new(), &mut found, true);
    found.into_iter().next()
}

/// Child-index paths of all matches, in document order.
pub(crate) fn locate_all(root: &Element, steps: &[Step]) -> Vec<Vec<usize>> {
    let mut found = Vec::new();
    collect(root, steps, &mut Vec::new(), &mut found, false);
    found
}

fn collect(
    el: &Element,
    steps: &[Step],
    prefix: &mut Vec<usize>,
    found: &mut Vec<Vec<usize>>,
    first_only: bool,
) {
    let Some((step, rest)) = steps.split_first() else {
        if !found.contains(prefix) {
            found.push(prefix.clone());
        }
        return;
    };

    for (i, node) in el.children.iter().enumerate() {
        if first_only && !found.is_empty() {
            return;
        }
        let Some(child) = node.as_element() else {
            continue;
        };
        prefix.push(i);
        if step.matches(child) {
            collect(child, rest, prefix, found, first_only);
        }
        if step.descendant {
            collect(child, steps, prefix, found, first_only);
        }
        prefix.pop();
    }
}
