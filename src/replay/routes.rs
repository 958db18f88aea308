//! Trackability filter and page labels.
//!
//! Decides from the navigation path alone whether capture may run, and maps
//! paths to the human-readable page label stored alongside each chunk.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::config::RouteConfig;

static PAGE_LABELS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("/", "Landing"),
        ("/consent", "Consent"),
        ("/no-consent", "No Consent"),
        ("/pre-survey", "Pre-Survey"),
        ("/practice", "Practice"),
        ("/call", "Voice Call"),
        ("/post-survey", "Post-Survey"),
        ("/debrief", "Debrief"),
        ("/complete", "Complete"),
    ])
});

/// Pure path predicate over static exclusions
#[derive(Debug, Clone)]
pub struct TrackabilityFilter {
    excluded_paths: Vec<String>,
    excluded_prefixes: Vec<String>,
}

impl TrackabilityFilter {
    pub fn new(config: &RouteConfig) -> Self {
        Self {
            excluded_paths: config.excluded_paths.clone(),
            excluded_prefixes: config.excluded_prefixes.clone(),
        }
    }

    /// `false` for exact exclusions and excluded prefixes, `true` otherwise.
    pub fn is_trackable(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if self.excluded_paths.iter().any(|p| p == path) {
            return false;
        }
        !self
            .excluded_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Default for TrackabilityFilter {
    fn default() -> Self {
        Self::new(&RouteConfig::default())
    }
}

/// Strip query, fragment and trailing slashes (root stays `/`).
pub fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Label for a path: static table first, slug of the path otherwise.
pub fn page_label(path: &str) -> String {
    let path = normalize_path(path);
    match PAGE_LABELS.get(path) {
        Some(label) => (*label).to_string(),
        None => slugify(path),
    }
}

fn slugify(path: &str) -> String {
    let mut slug = String::with_capacity(path.len());
    let mut pending_dash = false;
    for ch in path.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "root".to_string()
    } else {
        slug
    }
}
