//! Lyrics providers behind one polymorphic interface, tried in the
//! configured order by the pipeline.

pub mod embedded;
pub mod genius;
pub mod lrclib;
pub mod musixmatch;
pub mod netease;

use crate::lyrics::types::ProviderResult;
use crate::mpris::metadata::Metadata;
use async_trait::async_trait;
use std::sync::Arc;

pub const DEFAULT_ORDER: [&str; 5] = ["embedded", "musixmatch", "netease", "lrclib", "genius"];

#[async_trait]
pub trait LyricsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this provider can ever return synchronized lyrics.
    fn supports_synchronized(&self) -> bool;

    /// Whether this provider works on the current platform.
    fn supports_platform(&self) -> bool {
        true
    }

    /// `Ok(None)` means the provider has nothing for this track.
    async fn search(&self, metadata: &Metadata) -> ProviderResult;
}

#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub musixmatch_token: Option<String>,
}

/// Build providers in the given order, skipping unknown names.
pub fn from_names(names: &[String], settings: &ProviderSettings) -> Vec<Arc<dyn LyricsProvider>> {
    names
        .iter()
        .filter_map(|name| -> Option<Arc<dyn LyricsProvider>> {
            match name.trim().to_lowercase().as_str() {
                "embedded" => Some(Arc::new(embedded::Embedded)),
                "musixmatch" => Some(Arc::new(musixmatch::Musixmatch::new(
                    settings.musixmatch_token.clone(),
                ))),
                "netease" => Some(Arc::new(netease::NetEase)),
                "lrclib" => Some(Arc::new(lrclib::Lrclib)),
                "genius" => Some(Arc::new(genius::Genius)),
                other => {
                    tracing::warn!(provider = other, "Unknown lyrics provider");
                    None
                }
            }
        })
        .collect()
}
