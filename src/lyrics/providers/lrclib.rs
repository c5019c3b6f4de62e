use async_trait::async_trait;
use serde::Deserialize;

use crate::http::http_client;
use crate::lyrics::parse::{parse_plain_lyrics, parse_synced_lyrics};
use crate::lyrics::providers::LyricsProvider;
use crate::lyrics::types::{LyricsDocument, LyricsError, ProviderResult};
use crate::mpris::metadata::Metadata;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrcLibResponse {
    synced_lyrics: Option<String>,
    plain_lyrics: Option<String>,
}

/// Community-sourced lyrics from lrclib.net.
pub struct Lrclib;

#[async_trait]
impl LyricsProvider for Lrclib {
    fn name(&self) -> &'static str {
        "lrclib"
    }

    fn supports_synchronized(&self) -> bool {
        true
    }

    async fn search(&self, metadata: &Metadata) -> ProviderResult {
        let duration = (metadata.length > 0.0).then_some(metadata.length);
        let url = build_lrclib_url(&metadata.artist, &metadata.title, &metadata.album, duration);

        let resp = http_client().get(&url).send().await?;

        // 404 means no lyrics found - not an error
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !resp.status().is_success() {
            return Err(LyricsError::Api(format!("lrclib: HTTP {}", resp.status())));
        }

        let response: LrcLibResponse = resp.json().await?;
        Ok(document_from(self.name(), response))
    }
}

fn document_from(provider: &str, response: LrcLibResponse) -> Option<LyricsDocument> {
    if let Some(synced) = response.synced_lyrics.filter(|s| !s.trim().is_empty()) {
        let lines = parse_synced_lyrics(&synced);
        if !lines.is_empty() {
            return Some(LyricsDocument::new(provider, true, lines));
        }
    }
    let lines = parse_plain_lyrics(response.plain_lyrics.as_deref().unwrap_or_default());
    (!lines.is_empty()).then(|| LyricsDocument::new(provider, false, lines))
}

/// Build lrclib API URL with query parameters.
fn build_lrclib_url(artist: &str, title: &str, album: &str, duration: Option<f64>) -> String {
    let mut params = vec![
        format!("artist_name={}", urlencoding::encode(artist)),
        format!("track_name={}", urlencoding::encode(title)),
    ];

    if !album.is_empty() {
        params.push(format!("album_name={}", urlencoding::encode(album)));
    }

    if let Some(d) = duration {
        // API expects duration in seconds (integer)
        params.push(format!("duration={}", d.round() as i64));
    }

    format!("https://lrclib.net/api/get?{}", params.join("&"))
}
