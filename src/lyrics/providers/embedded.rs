use crate::lyrics::parse::{is_synced, parse_plain_lyrics, parse_synced_lyrics};
use crate::lyrics::providers::LyricsProvider;
use crate::lyrics::types::{LyricsDocument, ProviderResult};
use crate::mpris::metadata::Metadata;
use async_trait::async_trait;

/// Lyrics the player publishes itself in `xesam:asText`.
pub struct Embedded;

#[async_trait]
impl LyricsProvider for Embedded {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn supports_synchronized(&self) -> bool {
        true
    }

    async fn search(&self, metadata: &Metadata) -> ProviderResult {
        let Some(text) = metadata.embedded_lyrics.as_deref() else {
            return Ok(None);
        };
        let synchronized = is_synced(text);
        let lines = if synchronized {
            parse_synced_lyrics(text)
        } else {
            parse_plain_lyrics(text)
        };
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(LyricsDocument::new(self.name(), synchronized, lines)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_text(text: Option<&str>) -> Metadata {
        Metadata {
            embedded_lyrics: text.map(str::to_string),
            ..Metadata::default()
        }
    }

    #[tokio::test]
    async fn lrc_text_is_synchronized() {
        let doc = Embedded
            .search(&with_text(Some("[00:01.00]one\n[00:02.00]two")))
            .await
            .unwrap()
            .unwrap();
        assert!(doc.synchronized);
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(doc.provider, "embedded");
    }

    #[tokio::test]
    async fn plain_text_is_unsynchronized() {
        let doc = Embedded.search(&with_text(Some("one\ntwo"))).await.unwrap().unwrap();
        assert!(!doc.synchronized);
    }

    #[tokio::test]
    async fn nothing_embedded_is_absent() {
        assert!(Embedded.search(&with_text(None)).await.unwrap().is_none());
        assert!(Embedded.search(&with_text(Some("   "))).await.unwrap().is_none());
    }
}
