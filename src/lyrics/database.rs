//! Local lyrics cache.
//!
//! A JSON object mapping track identity (`artist:album:title`) to the last
//! successfully resolved [`LyricsDocument`]. Entries are overwritten, never
//! merged. Without a path the cache lives in memory only.

use crate::lyrics::types::LyricsDocument;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Default)]
pub struct LyricsCache {
    entries: HashMap<String, LyricsDocument>,
    path: Option<PathBuf>,
}

impl LyricsCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the cache from a JSON file.
    ///
    /// Starts empty if the file doesn't exist or is invalid.
    pub async fn load(path: PathBuf) -> Self {
        let entries = match load_entries(&path).await {
            Ok(entries) => {
                if !entries.is_empty() {
                    tracing::info!(
                        path = %path.display(),
                        entries = entries.len(),
                        "Loaded lyrics cache"
                    );
                }
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // First run - file doesn't exist yet
                tracing::info!(path = %path.display(), "Creating new lyrics cache");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load lyrics cache, using empty cache"
                );
                HashMap::new()
            }
        };
        Self {
            entries,
            path: Some(path),
        }
    }

    pub fn get(&self, identity: &str) -> Option<&LyricsDocument> {
        self.entries.get(identity)
    }

    /// Replace the entry for `identity` and persist the whole cache.
    pub async fn put(&mut self, identity: &str, mut doc: LyricsDocument) {
        doc.cached = false;
        self.entries.insert(identity.to_string(), doc);

        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = save_entries(&self.entries, path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to save lyrics cache");
        }
    }
}

async fn load_entries(path: &Path) -> std::io::Result<HashMap<String, LyricsDocument>> {
    let contents = fs::read_to_string(path).await?;
    serde_json::from_str(&contents).map_err(std::io::Error::other)
}

/// Write to a sibling temp file and rename, so readers never see a torn file.
async fn save_entries(
    entries: &HashMap<String, LyricsDocument>,
    path: &Path,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(entries).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await
}
