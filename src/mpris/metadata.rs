//! Canonical track metadata and the normalizer that builds it from the raw
//! `Metadata` attribute bag of a player.

use crate::art::ArtData;
use crate::mpris::value::{RawMetadata, RawValue};
use serde::Serialize;

/// Provider-agnostic description of the current song.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub title: String,
    pub artist: String,
    pub artists: Vec<String>,
    pub album: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artists: Option<Vec<String>>,
    /// Track length in seconds.
    pub length: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art_url: Option<String>,
    #[serde(rename = "artData", skip_serializing_if = "Option::is_none")]
    pub art: Option<ArtData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// Lyrics text carried by the player itself (`xesam:asText`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_lyrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Metadata {
    /// Key used to address the lyrics cache: `artist:album:title`.
    ///
    /// Distinct recordings sharing all three fields collapse to one key.
    pub fn track_identity(&self) -> String {
        format!("{}:{}:{}", self.artist, self.album, self.title)
    }
}

/// Split a singular/plural text field into its joined and list forms.
fn text_field(value: Option<&RawValue>) -> Option<(String, Vec<String>)> {
    match value? {
        RawValue::Str(s) => Some((s.clone(), vec![s.clone()])),
        other => {
            let list = other.as_str_list()?;
            Some((list.join("; "), list))
        }
    }
}

fn album_field(value: Option<&RawValue>) -> String {
    match value {
        None => String::new(),
        Some(RawValue::Str(s)) => s.clone(),
        // Non-compliant players send lists or other shapes here.
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn micros_to_seconds(value: Option<&RawValue>) -> f64 {
    value
        .and_then(RawValue::as_f64)
        .map(|us| us / 1_000_000.0)
        .unwrap_or(0.0)
}

fn string_field(raw: &RawMetadata, key: &str) -> Option<String> {
    raw.get(key).and_then(RawValue::as_str).map(str::to_string)
}

/// Build canonical [`Metadata`] from a raw attribute bag. Art bytes are not
/// fetched here; see [`crate::art::ArtResolver`].
pub fn normalize(raw: &RawMetadata) -> Metadata {
    let (artist, artists) = text_field(raw.get("xesam:artist")).unwrap_or_default();
    let album_artist = text_field(raw.get("xesam:albumArtist"));

    Metadata {
        title: string_field(raw, "xesam:title").unwrap_or_default(),
        artist,
        artists,
        album: album_field(raw.get("xesam:album")),
        album_artist: album_artist.as_ref().map(|(joined, _)| joined.clone()),
        album_artists: album_artist.map(|(_, list)| list),
        length: micros_to_seconds(raw.get("mpris:length")),
        art_url: string_field(raw, "mpris:artUrl").filter(|u| !u.is_empty()),
        art: None,
        count: raw.get("xesam:useCount").and_then(RawValue::as_i64),
        embedded_lyrics: string_field(raw, "xesam:asText").filter(|t| !t.trim().is_empty()),
        id: string_field(raw, "mpris:trackid"),
        location: string_field(raw, "xesam:url"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, RawValue)]) -> RawMetadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn s(v: &str) -> RawValue {
        RawValue::Str(v.to_string())
    }

    #[test]
    fn single_artist_string_becomes_one_element_list() {
        let md = normalize(&raw(&[("xesam:artist", s("A"))]));
        assert_eq!(md.artist, "A");
        assert_eq!(md.artists, vec!["A".to_string()]);
    }

    #[test]
    fn artist_list_is_joined() {
        let md = normalize(&raw(&[("xesam:artist", RawValue::List(vec![s("A"), s("B")]))]));
        assert_eq!(md.artist, "A; B");
        assert_eq!(md.artists, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn album_artist_is_optional() {
        let md = normalize(&raw(&[]));
        assert_eq!(md.album_artist, None);
        assert_eq!(md.album_artists, None);

        let md = normalize(&raw(&[("xesam:albumArtist", RawValue::List(vec![s("X")]))]));
        assert_eq!(md.album_artist.as_deref(), Some("X"));
        assert_eq!(md.album_artists, Some(vec!["X".to_string()]));
    }

    #[test]
    fn non_string_album_is_serialized() {
        let md = normalize(&raw(&[("xesam:album", RawValue::List(vec![s("Album")]))]));
        assert_eq!(md.album, r#"["Album"]"#);
    }

    #[test]
    fn length_is_converted_to_seconds() {
        let md = normalize(&raw(&[("mpris:length", RawValue::Int(215_500_000))]));
        assert!((md.length - 215.5).abs() < 1e-9);
        assert_eq!(normalize(&raw(&[])).length, 0.0);
    }

    #[test]
    fn optional_fields_are_carried() {
        let md = normalize(&raw(&[
            ("xesam:title", s("Song")),
            ("mpris:trackid", s("/org/mpris/MediaPlayer2/Track/1")),
            ("xesam:url", s("file:///music/song.flac")),
            ("mpris:artUrl", s("")),
            ("xesam:useCount", RawValue::Int(3)),
        ]));
        assert_eq!(md.title, "Song");
        assert_eq!(md.id.as_deref(), Some("/org/mpris/MediaPlayer2/Track/1"));
        assert_eq!(md.location.as_deref(), Some("file:///music/song.flac"));
        assert_eq!(md.art_url, None);
        assert_eq!(md.count, Some(3));
    }

    #[test]
    fn track_identity_joins_artist_album_title() {
        let md = normalize(&raw(&[
            ("xesam:artist", s("A")),
            ("xesam:album", s("B")),
            ("xesam:title", s("C")),
        ]));
        assert_eq!(md.track_identity(), "A:B:C");
    }
}
