// In-preview navigation resolution
// Generated cross-links are not guaranteed to agree on tier suffixes
// with the actual generated file names, so navigation targets resolve
// by exact match first, then by comparing names with their tier suffix
// stripped. Unresolved targets are dropped, never surfaced as errors.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{FileMap, PublishedSite};

/// Filename tier suffixes of the compositional hierarchy
pub const TIER_SUFFIXES: &[&str] = &[".page", ".organism", ".molecule", ".atom"];

static EXTERNAL_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https?:|//|mailto:|tel:|data:|javascript:)").unwrap());

/// Strip `.html` and any tier suffix, leaving the base name
/// (`pricing.organism.html` -> `pricing`).
pub fn strip_tier_suffix(name: &str) -> &str {
    let base = name.strip_suffix(".html").unwrap_or(name);
    for suffix in TIER_SUFFIXES {
        if let Some(stripped) = base.strip_suffix(suffix) {
            return stripped;
        }
    }
    base
}

/// Classify an anchor href as an in-workspace page link.
/// Fragment-only, absolute, mailto, tel, and non-`.html` targets are
/// rejected; the returned name is normalized (leading `./` or `/`
/// removed, query/fragment dropped).
pub fn internal_page_target(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || EXTERNAL_LINK.is_match(href) {
        return None;
    }
    let path = href.split(['#', '?']).next().unwrap_or(href);
    let path = path.trim_start_matches("./").trim_start_matches('/');
    if path.is_empty() || !path.ends_with(".html") {
        return None;
    }
    Some(path.to_string())
}

/// Resolve a requested file name against a set of known names:
/// exact match first, then tier-suffix-stripped comparison.
/// Returns None (caller drops the navigation) when nothing matches.
pub fn resolve_file_name<'a, I>(requested: &str, names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    if names.clone().into_iter().any(|name| name == requested) {
        return Some(requested.to_string());
    }
    let wanted = strip_tier_suffix(requested);
    names
        .into_iter()
        .find(|name| strip_tier_suffix(name) == wanted)
        .map(|name| name.to_string())
}

pub fn resolve_in_file_map(requested: &str, files: &FileMap) -> Option<String> {
    resolve_file_name(requested, files.keys().map(|k| k.as_str()))
}

/// Link interception over a fully static, already-published file set.
/// No editing affordances; unresolved targets are silently ignored.
pub struct ViewerNavigator<'a> {
    site: &'a PublishedSite,
}

impl<'a> ViewerNavigator<'a> {
    pub fn new(site: &'a PublishedSite) -> Self {
        Self { site }
    }

    /// Resolve a viewer navigation intent to a published file name.
    pub fn resolve(&self, requested: &str) -> Option<String> {
        let resolved =
            resolve_file_name(requested, self.site.files.iter().map(|f| f.as_str()))?;
        if self.site.file_contents.contains_key(&resolved) {
            Some(resolved)
        } else {
            None
        }
    }

    /// The file served for `/view/<slug>` with no explicit file
    pub fn main_file(&self) -> &str {
        &self.site.main_file
    }
}
