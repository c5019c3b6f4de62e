// state.rs: canonical now-playing records and the shared displayed-lyrics state

use crate::lyrics::LyricsDocument;
use crate::mpris::metadata::Metadata;
use crate::mpris::snapshot::{LoopStatus, PlaybackStatus, PlayerSnapshot};
use crate::position::Position;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

pub const PROVIDER_TAG: &str = "MPRIS2";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub can_control: bool,
    pub can_play_pause: bool,
    pub can_go_next: bool,
    pub can_go_previous: bool,
    pub can_seek: bool,
}

impl From<&PlayerSnapshot> for Capabilities {
    fn from(snapshot: &PlayerSnapshot) -> Self {
        Self {
            can_control: snapshot.can_control,
            can_play_pause: snapshot.can_pause || snapshot.can_play,
            can_go_next: snapshot.can_go_next,
            can_go_previous: snapshot.can_go_previous,
            can_seek: snapshot.can_seek,
        }
    }
}

/// The canonical now-playing record emitted for the active source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub provider: &'static str,
    pub metadata: Metadata,
    pub capabilities: Capabilities,
    pub status: PlaybackStatus,
    #[serde(rename = "loop")]
    pub loop_status: LoopStatus,
    pub shuffle: bool,
    pub volume: f64,
    pub elapsed: Position,
    /// Bus name of the active source.
    pub app: String,
    /// Display name reported by the source.
    pub app_name: String,
}

/// Lyrics currently on display, tagged with the track they belong to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayedLyrics {
    /// Incremented on every active-track change.
    pub generation: u64,
    pub identity: Option<String>,
    pub lyrics: Option<LyricsDocument>,
}

/// Single-writer handle over [`DisplayedLyrics`]. The arbiter advances the
/// generation, the lyrics pipeline applies results; readers subscribe.
#[derive(Clone)]
pub struct NowPlaying {
    tx: Arc<watch::Sender<DisplayedLyrics>>,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self::new()
    }
}

impl NowPlaying {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DisplayedLyrics::default());
        Self { tx: Arc::new(tx) }
    }

    /// Record the identity of the track now on display. A different identity
    /// starts a new generation and clears the displayed lyrics.
    pub fn observe_track(&self, identity: Option<String>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.identity == identity {
                return false;
            }
            state.generation += 1;
            state.identity = identity;
            state.lyrics = None;
            true
        })
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    /// Show `lyrics` if the display is still on `identity` in `generation`.
    /// Returns whether they were applied.
    pub fn apply(&self, generation: u64, identity: &str, lyrics: LyricsDocument) -> bool {
        self.tx.send_if_modified(|state| {
            if state.generation != generation || state.identity.as_deref() != Some(identity) {
                return false;
            }
            state.lyrics = Some(lyrics);
            true
        })
    }

    #[cfg(test)]
    pub fn current(&self) -> DisplayedLyrics {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayedLyrics> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lyrics::types::LyricLine;

    fn doc(text: &str) -> LyricsDocument {
        LyricsDocument::new("test", false, vec![LyricLine::plain(text)])
    }

    #[test]
    fn can_play_pause_is_either_flag() {
        let snap = PlayerSnapshot {
            can_play: true,
            ..PlayerSnapshot::default()
        };
        assert!(Capabilities::from(&snap).can_play_pause);
        assert!(!Capabilities::from(&PlayerSnapshot::default()).can_play_pause);
    }

    #[test]
    fn track_change_bumps_generation_and_clears() {
        let np = NowPlaying::new();
        assert!(np.observe_track(Some("a:b:c".into())));
        let g1 = np.generation();
        assert!(np.apply(g1, "a:b:c", doc("hello")));
        assert!(!np.observe_track(Some("a:b:c".into())));
        assert!(np.current().lyrics.is_some());

        assert!(np.observe_track(Some("x:y:z".into())));
        assert_eq!(np.generation(), g1 + 1);
        assert_eq!(np.current().lyrics, None);
    }

    #[test]
    fn stale_generation_is_rejected() {
        let np = NowPlaying::new();
        np.observe_track(Some("k1".into()));
        let stale = np.generation();
        np.observe_track(Some("k2".into()));
        assert!(!np.apply(stale, "k1", doc("old")));
        // Coming back to the same identity is still a new generation.
        np.observe_track(Some("k1".into()));
        assert!(!np.apply(stale, "k1", doc("old")));
        assert_eq!(np.current().lyrics, None);
    }

    #[tokio::test]
    async fn subscribers_see_applied_lyrics() {
        let np = NowPlaying::new();
        let mut rx = np.subscribe();
        np.observe_track(Some("k".into()));
        np.apply(np.generation(), "k", doc("line"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().lyrics.as_ref().unwrap().lines[0].text, "line");
    }

    #[test]
    fn update_serializes_loop_key() {
        let update = Update {
            provider: PROVIDER_TAG,
            metadata: Metadata::default(),
            capabilities: Capabilities::default(),
            status: PlaybackStatus::Playing,
            loop_status: LoopStatus::Track,
            shuffle: false,
            volume: 1.0,
            elapsed: Position { how_much: 1.0, when: 0 },
            app: "org.mpris.MediaPlayer2.vlc".into(),
            app_name: "VLC".into(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["loop"], "Track");
        assert_eq!(json["appName"], "VLC");
        assert_eq!(json["elapsed"]["howMuch"], 1.0);
    }
}
