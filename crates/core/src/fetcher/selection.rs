//! Title rules deciding which platform documents become editions.

use regex_lite::Regex;

const EDITION_PREFIX: &str = "WSTLA-OKA-";

/// Compiled title extraction and target patterns.
#[derive(Debug, Clone)]
pub struct TitleRules {
    extract: Regex,
    target: Regex,
}

impl TitleRules {
    pub fn new(title_pattern: &str, target_pattern: &str) -> Result<Self, String> {
        let extract = Regex::new(title_pattern)
            .map_err(|e| format!("invalid platform.title_pattern: {}", e))?;
        let target = Regex::new(target_pattern)
            .map_err(|e| format!("invalid platform.target_pattern: {}", e))?;
        Ok(Self { extract, target })
    }

    /// Whether a platform title names a document of the edition series.
    pub fn is_eligible(&self, title: &str) -> bool {
        expected_edition_name(&self.extract, title)
            .map(|name| full_match(&self.target, &name))
            .unwrap_or(false)
    }
}

fn full_match(re: &Regex, text: &str) -> bool {
    re.find(text)
        .map(|m| m.start() == 0 && m.end() == text.len())
        .unwrap_or(false)
}

/// Edition name a platform title maps to, before any file suffix.
///
/// Spaces are dropped, then the first capture group of `extract` is used;
/// titles already starting with the edition prefix are taken as they are.
pub fn expected_edition_name(extract: &Regex, title: &str) -> Option<String> {
    let condensed: String = title.chars().filter(|c| *c != ' ').collect();
    let condensed = condensed.trim();
    if condensed.is_empty() {
        return None;
    }
    if let Some(group) = extract.captures(condensed).and_then(|c| c.get(1)) {
        return Some(group.as_str().to_string());
    }
    if condensed.starts_with(EDITION_PREFIX) {
        return Some(condensed.to_string());
    }
    None
}
