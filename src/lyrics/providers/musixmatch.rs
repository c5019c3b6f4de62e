use async_trait::async_trait;
use serde_json::Value;

use crate::http::http_client;
use crate::lyrics::parse::{parse_plain_lyrics, parse_richsync_body, parse_subtitle_body};
use crate::lyrics::providers::LyricsProvider;
use crate::lyrics::types::{LyricsDocument, LyricsError, ProviderResult};
use crate::mpris::metadata::Metadata;

const MACRO_URL: &str = "https://apic-desktop.musixmatch.com/ws/1.1/macro.subtitles.get?format=json&namespace=lyrics_richsynched&subtitle_format=mxm&app_id=web-desktop-app-v1.0&";

/// Musixmatch desktop "usertoken" API (apic-desktop.musixmatch.com).
pub struct Musixmatch {
    token: Option<String>,
}

impl Musixmatch {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl LyricsProvider for Musixmatch {
    fn name(&self) -> &'static str {
        "musixmatch"
    }

    fn supports_synchronized(&self) -> bool {
        true
    }

    async fn search(&self, metadata: &Metadata) -> ProviderResult {
        let Some(token) = self.token.as_deref() else {
            tracing::debug!("No musixmatch usertoken configured");
            return Ok(None);
        };

        let duration = if metadata.length > 0.0 {
            format!("{}", metadata.length.round() as i64)
        } else {
            String::new()
        };
        let params = [
            ("q_artist", metadata.artist.as_str()),
            ("q_track", metadata.title.as_str()),
            ("q_album", metadata.album.as_str()),
            ("q_duration", duration.as_str()),
            ("usertoken", token),
            // Ask for `track.richsync.get` too, so word timings come back when present
            ("optional_calls", "track.richsync"),
        ];

        let final_url = MACRO_URL.to_string()
            + &params
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");

        let resp = http_client()
            .get(&final_url)
            .header("Cookie", format!("x-mxm-token-guid={}", token))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LyricsError::Api(format!(
                "musixmatch desktop macro.subtitles.get: {}",
                resp.status()
            )));
        }

        let json: Value = resp.json().await?;
        Ok(document_from_macro(self.name(), &json))
    }
}

fn status_of(call: &Value) -> i64 {
    call.pointer("/message/header/status_code")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

/// Pick the richest lyrics out of a `macro.subtitles.get` reply: richsync,
/// then line subtitles, then plain lyrics.
fn document_from_macro(provider: &str, json: &Value) -> Option<LyricsDocument> {
    let macro_calls = json.pointer("/message/body/macro_calls")?;

    if status_of(macro_calls.get("matcher.track.get")?) != 200 {
        return None;
    }

    if let Some(rich) = macro_calls.get("track.richsync.get")
        && status_of(rich) == 200
        && let Some(body) = rich
            .pointer("/message/body/richsync/richsync_body")
            .and_then(|v| v.as_str())
        && let Some(lines) = parse_richsync_body(body)
        && !lines.is_empty()
    {
        return Some(LyricsDocument::new(provider, true, lines));
    }

    if let Some(subs) = macro_calls.get("track.subtitles.get")
        && status_of(subs) == 200
        && let Some(list) = subs
            .pointer("/message/body/subtitle_list")
            .and_then(|v| v.as_array())
        && let Some(first) = list.first()
        && let Some(sub_body) = first
            .pointer("/subtitle/subtitle_body")
            .and_then(|v| v.as_str())
        && let Some(lines) = parse_subtitle_body(sub_body)
        && !lines.is_empty()
    {
        let mut doc = LyricsDocument::new(provider, true, lines);
        doc.copyright = first
            .pointer("/subtitle/lyrics_copyright")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string());
        return Some(doc);
    }

    let lyrics = macro_calls.get("track.lyrics.get")?;
    if status_of(lyrics) != 200 {
        return None;
    }
    let body = lyrics.pointer("/message/body/lyrics")?;
    let lines = parse_plain_lyrics(body.get("lyrics_body").and_then(|v| v.as_str())?);
    if lines.is_empty() {
        return None;
    }
    let mut doc = LyricsDocument::new(provider, false, lines);
    doc.copyright = body
        .get("lyrics_copyright")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    Some(doc)
}
