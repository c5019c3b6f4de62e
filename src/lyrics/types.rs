use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lyrics for one track as produced by a provider or read from the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyricsDocument {
    pub provider: String,
    pub synchronized: bool,
    pub lines: Vec<LyricLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    /// Set when the document was served from the cache rather than a provider.
    #[serde(default)]
    pub cached: bool,
}

impl LyricsDocument {
    pub fn new(provider: &str, synchronized: bool, lines: Vec<LyricLine>) -> Self {
        Self {
            provider: provider.to_string(),
            synchronized,
            lines,
            copyright: None,
            cached: false,
        }
    }

    pub fn has_lines(&self) -> bool {
        !self.lines.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub text: String,
    /// Start time in seconds; absent for unsynchronized lyrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Optional per-word timings for karaoke rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

impl LyricLine {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn timed(time: f64, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            time: Some(time),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum LyricsError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Provider timed out")]
    Timeout,
}

pub type ProviderResult = Result<Option<LyricsDocument>, LyricsError>;
