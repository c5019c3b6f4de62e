//! NetEase Cloud Music: search for the closest song, then fetch its LRC.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::http::http_client;
use crate::lyrics::parse::{is_synced, parse_plain_lyrics, parse_synced_lyrics};
use crate::lyrics::providers::LyricsProvider;
use crate::lyrics::types::{LyricsDocument, LyricsError, ProviderResult};
use crate::mpris::metadata::Metadata;

const SEARCH_URL: &str = "https://music.163.com/api/search/get/web";
const LYRIC_URL: &str = "https://music.163.com/api/song/lyric";
const REFERER: &str = "https://music.163.com/";
const SEARCH_LIMIT: u32 = 10;
/// Best candidates scoring below this are treated as a miss.
const MIN_SCORE: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    songs: Vec<Song>,
}

#[derive(Debug, Deserialize)]
struct Song {
    id: u64,
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    /// Milliseconds.
    #[serde(default)]
    duration: u64,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LyricResponse {
    lrc: Option<LyricBody>,
}

#[derive(Debug, Deserialize)]
struct LyricBody {
    #[serde(default)]
    lyric: String,
}

pub struct NetEase;

#[async_trait]
impl LyricsProvider for NetEase {
    fn name(&self) -> &'static str {
        "netease"
    }

    fn supports_synchronized(&self) -> bool {
        true
    }

    async fn search(&self, metadata: &Metadata) -> ProviderResult {
        let query = format!("{} {}", metadata.title, metadata.artist);
        let url = format!(
            "{SEARCH_URL}?s={}&type=1&offset=0&limit={SEARCH_LIMIT}",
            urlencoding::encode(query.trim())
        );
        let response: SearchResponse = get_json(&url).await?;
        let songs = response.result.map(|r| r.songs).unwrap_or_default();

        let duration = (metadata.length > 0.0).then_some(metadata.length);
        let Some(song) = best_match(&songs, &metadata.title, &metadata.artist, duration) else {
            tracing::debug!(
                title = %metadata.title,
                candidates = songs.len(),
                "No close match on NetEase"
            );
            return Ok(None);
        };
        tracing::debug!(id = song.id, name = %song.name, "Selected NetEase song");

        let url = format!("{LYRIC_URL}?id={}&lv=1&kv=1&tv=-1", song.id);
        let response: LyricResponse = get_json(&url).await?;
        Ok(response.lrc.and_then(|lrc| document_from(self.name(), &lrc.lyric)))
    }
}

async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T, LyricsError> {
    let resp = http_client()
        .get(url)
        .header(reqwest::header::REFERER, REFERER)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(LyricsError::Api(format!("netease: HTTP {}", resp.status())));
    }
    Ok(resp.json().await?)
}

fn document_from(provider: &str, lyric: &str) -> Option<LyricsDocument> {
    if is_synced(lyric) {
        let lines = parse_synced_lyrics(lyric);
        if !lines.is_empty() {
            return Some(LyricsDocument::new(provider, true, lines));
        }
    }
    let lines = parse_plain_lyrics(lyric);
    (!lines.is_empty()).then(|| LyricsDocument::new(provider, false, lines))
}

fn best_match<'a>(
    songs: &'a [Song],
    title: &str,
    artist: &str,
    duration: Option<f64>,
) -> Option<&'a Song> {
    songs
        .iter()
        .map(|song| (song, score(song, title, artist, duration)))
        .filter(|(_, score)| *score >= MIN_SCORE)
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(song, _)| song)
}

/// Title weighs more than artist; a known duration contributes 30%.
fn score(song: &Song, title: &str, artist: &str, duration: Option<f64>) -> f64 {
    let artists = song
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let text = similarity(title, &song.name) * 0.7 + similarity(artist, &artists) * 0.3;
    match duration {
        Some(target) if song.duration > 0 => {
            let found = song.duration as f64 / 1000.0;
            let closeness = 1.0 - ((found - target).abs() / target).min(1.0);
            text * 0.7 + closeness * 0.3
        }
        _ => text,
    }
}

fn similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.8;
    }
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - levenshtein_distance(&a, &b) as f64 / max_len as f64
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let mut prev: Vec<usize> = (0..=a.len()).collect();
    let mut curr: Vec<usize> = vec![0; a.len() + 1];
    for (j, bj) in b.iter().enumerate() {
        curr[0] = j + 1;
        for (i, ai) in a.iter().enumerate() {
            let cost = usize::from(ai != bj);
            curr[i + 1] = (prev[i + 1] + 1).min(curr[i] + 1).min(prev[i] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[a.len()]
}
