//! Playback position sampling.
//!
//! The active source is normally asked for its native position. A relay
//! player without a usable position query (an AirPlay receiver, for
//! instance) is instead tracked by polling an external status command and
//! extrapolating between polls with a [`RelayClock`].

use crate::mpris::connection::MPRIS_PREFIX;
use crate::mpris::source::PlayerEndpoint;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

static RELAY_OUTPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)variant.*?(\d+)\s*/\s*(\d+)").unwrap());

/// A point-in-time position sample. Consumers extrapolate from `when`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Seconds into the track.
    pub how_much: f64,
    /// Milliseconds since the Unix epoch at which the sample was taken.
    pub when: u64,
}

impl Position {
    pub fn now(how_much: f64) -> Self {
        let when = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            how_much: sanitize_position(how_much),
            when,
        }
    }
}

pub fn sanitize_position(p: f64) -> f64 {
    if !p.is_finite() || p < 0.0 { 0.0 } else { p }
}

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("Failed to run relay status command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Relay status command exited with {0}")]
    Status(std::process::ExitStatus),
    #[error("Unparsable relay status output: {0:?}")]
    Parse(String),
}

/// Extract `current - reference` in seconds from `... variant <ref>/<cur> ...`.
pub fn parse_relay_output(output: &str, sample_rate: f64) -> Result<f64, RelayError> {
    let caps = RELAY_OUTPUT_RE
        .captures(output)
        .ok_or_else(|| RelayError::Parse(output.trim().to_string()))?;
    let sample = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| RelayError::Parse(output.trim().to_string()))
    };
    let reference = sample(1)? as f64 / sample_rate;
    let current = sample(2)? as f64 / sample_rate;
    Ok(current - reference)
}

/// Turns coarse `delta` polls into a smooth position estimate.
#[derive(Debug, Default, PartialEq)]
pub struct RelayClock {
    baseline: f64,
    anchor: Option<Instant>,
}

impl RelayClock {
    /// Record a polled delta. The anchor only moves when the delta changes.
    pub fn observe(&mut self, delta: f64, now: Instant) {
        if self.anchor.is_none() || delta != self.baseline {
            self.baseline = delta;
            self.anchor = Some(now);
        }
    }

    pub fn estimate(&self, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => self.baseline + now.saturating_duration_since(anchor).as_secs_f64(),
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Player name, either the full bus name or the part after the MPRIS prefix.
    pub player: String,
    pub command: String,
    pub sample_rate: f64,
    pub interval: Duration,
}

impl RelaySettings {
    fn applies_to(&self, bus_name: &str) -> bool {
        bus_name == self.player || bus_name.strip_prefix(MPRIS_PREFIX) == Some(self.player.as_str())
    }
}

async fn poll_once(command: &str, sample_rate: f64) -> Result<f64, RelayError> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await?;
    if !output.status.success() {
        return Err(RelayError::Status(output.status));
    }
    parse_relay_output(&String::from_utf8_lossy(&output.stdout), sample_rate)
}

/// Background poller feeding a shared [`RelayClock`].
pub struct RelayPosition {
    settings: RelaySettings,
    clock: Arc<Mutex<RelayClock>>,
    task: JoinHandle<()>,
}

impl RelayPosition {
    pub fn spawn(settings: RelaySettings) -> Self {
        let clock = Arc::new(Mutex::new(RelayClock::default()));
        let task = tokio::spawn(poll_loop(settings.clone(), Arc::clone(&clock)));
        Self { settings, clock, task }
    }

    pub fn applies_to(&self, bus_name: &str) -> bool {
        self.settings.applies_to(bus_name)
    }

    pub async fn estimate(&self) -> f64 {
        self.clock.lock().await.estimate(Instant::now())
    }
}

impl Drop for RelayPosition {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_loop(settings: RelaySettings, clock: Arc<Mutex<RelayClock>>) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match poll_once(&settings.command, settings.sample_rate).await {
            Ok(delta) => clock.lock().await.observe(delta, Instant::now()),
            // Keep extrapolating from the last good sample.
            Err(e) => {
                tracing::debug!(player = %settings.player, error = %e, "Relay position poll failed")
            }
        }
    }
}

/// Produces [`Position`] samples for the active source.
#[derive(Default)]
pub struct PositionReconciler {
    relay: Option<RelayPosition>,
}

impl PositionReconciler {
    pub fn new(relay: Option<RelayPosition>) -> Self {
        Self { relay }
    }

    pub async fn position(&self, endpoint: &dyn PlayerEndpoint) -> Position {
        if let Some(relay) = &self.relay
            && relay.applies_to(endpoint.name())
        {
            return Position::now(relay.estimate().await);
        }
        Position::now(endpoint.position().await.unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpris::snapshot::PlayerSnapshot;
    use crate::mpris::source::ControlOp;
    use async_trait::async_trait;

    #[test]
    fn extrapolates_between_unchanged_polls() {
        let t0 = Instant::now();
        let mut clock = RelayClock::default();
        clock.observe(10.0, t0);
        clock.observe(10.0, t0 + Duration::from_secs(1));
        let predicted = clock.estimate(t0 + Duration::from_millis(1500));
        assert!((predicted - 11.5).abs() < 1e-9);
    }

    #[test]
    fn changed_delta_resets_anchor() {
        let t0 = Instant::now();
        let mut clock = RelayClock::default();
        clock.observe(10.0, t0);
        clock.observe(4.0, t0 + Duration::from_secs(2));
        let predicted = clock.estimate(t0 + Duration::from_secs(3));
        assert!((predicted - 5.0).abs() < 1e-9);
    }

    #[test]
    fn no_sample_means_zero() {
        assert_eq!(RelayClock::default().estimate(Instant::now()), 0.0);
    }

    #[test]
    fn parses_variant_output() {
        let out = "method return time=1.2 sender=:1.5\n   variant       uint64 44100/176400\n";
        assert_eq!(parse_relay_output(out, 44100.0).unwrap(), 3.0);
    }

    #[test]
    fn malformed_output_is_a_poll_failure() {
        assert!(matches!(
            parse_relay_output("no variant here", 44100.0),
            Err(RelayError::Parse(_))
        ));
        assert!(parse_relay_output("", 44100.0).is_err());
    }

    #[test]
    fn relay_matches_short_and_full_names() {
        let settings = RelaySettings {
            player: "ShairportSync".into(),
            command: String::new(),
            sample_rate: 44100.0,
            interval: Duration::from_secs(1),
        };
        assert!(settings.applies_to("org.mpris.MediaPlayer2.ShairportSync"));
        assert!(settings.applies_to("ShairportSync"));
        assert!(!settings.applies_to("org.mpris.MediaPlayer2.vlc"));
    }

    #[tokio::test]
    async fn polls_shell_command() {
        let delta = poll_once("echo 'variant 88200/176400'", 44100.0).await.unwrap();
        assert_eq!(delta, 2.0);
        assert!(matches!(poll_once("exit 3", 44100.0).await, Err(RelayError::Status(_))));
    }

    struct FixedEndpoint(Option<f64>);

    #[async_trait]
    impl PlayerEndpoint for FixedEndpoint {
        fn name(&self) -> &str {
            "org.mpris.MediaPlayer2.fixed"
        }
        fn identity(&self) -> &str {
            "Fixed"
        }
        async fn snapshot(&self) -> Option<PlayerSnapshot> {
            None
        }
        async fn position(&self) -> Option<f64> {
            self.0
        }
        async fn control(&self, _op: ControlOp, _snapshot: &PlayerSnapshot) {}
        fn teardown(&mut self) {}
    }

    #[tokio::test]
    async fn native_position_is_used_without_relay() {
        let reconciler = PositionReconciler::default();
        assert_eq!(reconciler.position(&FixedEndpoint(Some(42.5))).await.how_much, 42.5);
        assert_eq!(reconciler.position(&FixedEndpoint(None)).await.how_much, 0.0);
    }
}
