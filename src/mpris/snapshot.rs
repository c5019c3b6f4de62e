//! Raw property snapshot of one player's `org.mpris.MediaPlayer2.Player`
//! interface.

use crate::mpris::value::{RawMetadata, RawValue};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

/// Current playback status of a MPRIS-compliant player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl FromStr for PlaybackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Unknown PlaybackStatus {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LoopStatus {
    #[default]
    None,
    Track,
    Playlist,
}

impl LoopStatus {
    /// None → Track → Playlist → None.
    pub fn next(self) -> Self {
        match self {
            LoopStatus::None => LoopStatus::Track,
            LoopStatus::Track => LoopStatus::Playlist,
            LoopStatus::Playlist => LoopStatus::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoopStatus::None => "None",
            LoopStatus::Track => "Track",
            LoopStatus::Playlist => "Playlist",
        }
    }
}

impl FromStr for LoopStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "track" => Ok(Self::Track),
            "playlist" => Ok(Self::Playlist),
            _ => Err(format!("Unknown LoopStatus {s}")),
        }
    }
}

/// Everything a source reports about itself at one instant. Missing or
/// malformed properties fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    pub can_control: bool,
    pub can_play: bool,
    pub can_pause: bool,
    pub can_go_next: bool,
    pub can_go_previous: bool,
    pub can_seek: bool,
    pub status: PlaybackStatus,
    pub loop_status: LoopStatus,
    pub shuffle: bool,
    pub volume: f64,
    pub metadata: RawMetadata,
}

impl PlayerSnapshot {
    pub fn from_properties(props: &HashMap<String, RawValue>) -> Self {
        let flag = |key: &str| props.get(key).and_then(RawValue::as_bool).unwrap_or(false);
        let parsed = |key: &str| props.get(key).and_then(RawValue::as_str).map(str::to_string);

        Self {
            can_control: flag("CanControl"),
            can_play: flag("CanPlay"),
            can_pause: flag("CanPause"),
            can_go_next: flag("CanGoNext"),
            can_go_previous: flag("CanGoPrevious"),
            can_seek: flag("CanSeek"),
            status: parsed("PlaybackStatus")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            loop_status: parsed("LoopStatus")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            shuffle: flag("Shuffle"),
            volume: props.get("Volume").and_then(RawValue::as_f64).unwrap_or(0.0),
            metadata: match props.get("Metadata") {
                Some(RawValue::Map(m)) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                _ => RawMetadata::new(),
            },
        }
    }

    /// Track id and length (µs) needed for `SetPosition`.
    pub fn track_id(&self) -> Option<&str> {
        self.metadata.get("mpris:trackid").and_then(RawValue::as_str)
    }

    pub fn length_micros(&self) -> Option<i64> {
        self.metadata.get("mpris:length").and_then(RawValue::as_i64)
    }
}

/// Which properties a `PropertiesChanged` signal touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedFields {
    pub metadata: bool,
    pub status: Option<PlaybackStatus>,
}

impl ChangedFields {
    pub fn from_changed(changed: &HashMap<String, RawValue>) -> Self {
        Self {
            metadata: changed.contains_key("Metadata"),
            status: changed
                .get("PlaybackStatus")
                .and_then(RawValue::as_str)
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Whether an inactive source reporting this change deserves arbitration.
    pub fn warrants_recompute(&self) -> bool {
        self.metadata || self.status == Some(PlaybackStatus::Playing)
    }
}
