//! Feed item record.
//!
//! Owned by the item store; the engine only looks at `id`, `locator` and
//! the optional precomputed `cover`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry of the backing collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable identity, unique within a collection
    pub id: String,
    /// Media locator (plain path or `file://` URI)
    pub locator: String,
    /// Duration in milliseconds (0 = unknown)
    #[serde(default)]
    pub duration_ms: u64,
    /// Precomputed cover image, used instead of a generated preview
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            duration_ms: 0,
            cover: None,
            title: None,
        }
    }

    /// Builder-style duration setter
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Builder-style cover setter
    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.cover = Some(cover.into());
        self
    }

    /// True when the locator is non-blank.
    pub fn has_locator(&self) -> bool {
        !self.locator.trim().is_empty()
    }

    /// Cover as a local path, only if it exists on disk.
    pub fn cover_path(&self) -> Option<PathBuf> {
        let cover = self.cover.as_deref()?;
        let path = local_path(cover)?;
        path.is_file().then_some(path)
    }
}

/// Resolve a locator to a local filesystem path.
///
/// Accepts plain paths and `file://` URIs. Returns None for blank locators
/// and for any other URI scheme (network sources are not handled here).
pub fn local_path(locator: &str) -> Option<PathBuf> {
    let locator = locator.trim();
    if locator.is_empty() {
        return None;
    }
    if let Some(rest) = locator.strip_prefix("file://") {
        return (!rest.is_empty()).then(|| PathBuf::from(rest));
    }
    // "scheme://..." that isn't file:// (http, content, rtsp, ...)
    if let Some(idx) = locator.find("://") {
        let scheme = &locator[..idx];
        if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
            return None;
        }
    }
    Some(PathBuf::from(locator))
}
