//! Source adapter: one discovered MPRIS endpoint behind the
//! [`PlayerEndpoint`] seam the registry works against.

use crate::mpris::connection::{MPRIS_PATH, MprisError, PLAYER_INTERFACE};
use crate::mpris::snapshot::{ChangedFields, PlayerSnapshot};
use crate::mpris::value::raw_metadata;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zbus::proxy;
use zvariant::{ObjectPath, OwnedValue, Value};

/// Canonical control operations. Offsets and positions are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlOp {
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
    Seek(f64),
    SetPosition(f64),
    /// Jump to a fraction (`0.0..=1.0`) of the track length.
    SeekFraction(f64),
    ToggleShuffle,
    CycleLoop,
}

/// What adapters report back to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Appeared(String),
    Disappeared(String),
    PropertiesChanged {
        name: String,
        changed: ChangedFields,
        snapshot: PlayerSnapshot,
    },
    Seeked(String),
}

/// A live player endpoint. None of these methods fail: a vanished endpoint
/// yields `None` or silently ignores the call.
#[async_trait]
pub trait PlayerEndpoint: Send + Sync {
    fn name(&self) -> &str;
    /// Human readable player name.
    fn identity(&self) -> &str;
    async fn snapshot(&self) -> Option<PlayerSnapshot>;
    /// Native playback position in seconds.
    async fn position(&self) -> Option<f64>;
    async fn control(&self, op: ControlOp, snapshot: &PlayerSnapshot);
    /// Drop event subscriptions and release the endpoint.
    fn teardown(&mut self);
}

/// Builds initialized, subscribed endpoints for bus names.
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<Box<dyn PlayerEndpoint>, MprisError>;
}

/// MPRIS MediaPlayer2.Player interface proxy
#[proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2"
)]
trait MediaPlayer2Player {
    fn play(&self) -> zbus::Result<()>;
    fn pause(&self) -> zbus::Result<()>;
    fn play_pause(&self) -> zbus::Result<()>;
    fn stop(&self) -> zbus::Result<()>;
    fn next(&self) -> zbus::Result<()>;
    fn previous(&self) -> zbus::Result<()>;
    fn seek(&self, offset: i64) -> zbus::Result<()>;
    fn set_position(&self, track_id: &ObjectPath<'_>, position: i64) -> zbus::Result<()>;

    #[zbus(signal)]
    fn seeked(&self, position: i64) -> zbus::Result<()>;
}

fn parse_position_from_owned(val: &OwnedValue) -> Option<f64> {
    // Try direct integer types
    if let Ok(i) = i64::try_from(val.clone()) {
        return Some(i as f64 / 1_000_000.0);
    }
    if let Ok(u) = u64::try_from(val.clone()) {
        return Some(u as f64 / 1_000_000.0);
    }
    None
}

fn seconds_to_micros(seconds: f64) -> i64 {
    let micros = (seconds * 1_000_000.0).round();
    if micros.is_finite() { micros as i64 } else { 0 }
}

/// Connects [`MprisSource`]s over a shared session connection.
pub struct MprisConnector {
    conn: zbus::Connection,
}

impl MprisConnector {
    pub fn new(conn: zbus::Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EndpointConnector for MprisConnector {
    async fn connect(
        &self,
        name: &str,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<Box<dyn PlayerEndpoint>, MprisError> {
        let mut source = MprisSource::new(&self.conn, name).await?;
        source.subscribe(events).await?;
        Ok(Box::new(source))
    }
}

pub struct MprisSource {
    name: String,
    identity: String,
    player: MediaPlayer2PlayerProxy<'static>,
    properties: zbus::Proxy<'static>,
    listener: Option<JoinHandle<()>>,
}

impl MprisSource {
    /// Create proxies and make sure the endpoint actually answers.
    pub async fn new(conn: &zbus::Connection, name: &str) -> Result<Self, MprisError> {
        let player = MediaPlayer2PlayerProxy::builder(conn)
            .destination(name.to_string())?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;
        let properties = zbus::Proxy::new(
            conn,
            name.to_string(),
            MPRIS_PATH,
            "org.freedesktop.DBus.Properties",
        )
        .await?;
        let root =
            zbus::Proxy::new(conn, name.to_string(), MPRIS_PATH, "org.mpris.MediaPlayer2").await?;
        let identity = root.get_property::<String>("Identity").await.unwrap_or_default();

        let source = Self {
            name: name.to_string(),
            identity,
            player,
            properties,
            listener: None,
        };
        if let Err(e) = source.fetch_snapshot().await {
            tracing::debug!(player = %name, error = %e, "Player does not answer GetAll");
            return Err(MprisError::Unavailable(name.to_string()));
        }
        Ok(source)
    }

    /// Forward `PropertiesChanged` and `Seeked` signals as [`SourceEvent`]s.
    pub async fn subscribe(
        &mut self,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<(), MprisError> {
        let mut changed_stream = self.properties.receive_signal("PropertiesChanged").await?;
        let mut seeked_stream = self.player.receive_seeked().await?;
        let properties = self.properties.clone();
        let name = self.name.clone();

        let listener = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(msg) = changed_stream.next() => {
                        let Ok((iface, changed, _)) = msg
                            .body()
                            .deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()
                        else {
                            tracing::warn!(player = %name, "Malformed PropertiesChanged signal");
                            continue;
                        };
                        if iface != PLAYER_INTERFACE {
                            continue;
                        }
                        let changed = ChangedFields::from_changed(&raw_metadata(&changed));
                        match snapshot_via(&properties).await {
                            Ok(snapshot) => SourceEvent::PropertiesChanged {
                                name: name.clone(),
                                changed,
                                snapshot,
                            },
                            Err(e) => {
                                tracing::debug!(
                                    player = %name,
                                    error = %e,
                                    "Snapshot after PropertiesChanged failed"
                                );
                                continue;
                            }
                        }
                    }
                    Some(_) = seeked_stream.next() => SourceEvent::Seeked(name.clone()),
                    else => break,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            tracing::debug!(player = %name, "Signal listener finished");
        });
        self.listener = Some(listener);
        Ok(())
    }

    async fn fetch_snapshot(&self) -> Result<PlayerSnapshot, MprisError> {
        snapshot_via(&self.properties).await
    }

    async fn set_property(&self, property: &str, value: Value<'_>) -> Result<(), MprisError> {
        self.properties
            .call_method("Set", &(PLAYER_INTERFACE, property, value))
            .await?;
        Ok(())
    }

    async fn try_control(
        &self,
        op: ControlOp,
        snapshot: &PlayerSnapshot,
    ) -> Result<(), MprisError> {
        match op {
            ControlOp::Play => self.player.play().await?,
            ControlOp::Pause => self.player.pause().await?,
            ControlOp::PlayPause => self.player.play_pause().await?,
            ControlOp::Stop => self.player.stop().await?,
            ControlOp::Next => self.player.next().await?,
            ControlOp::Previous => self.player.previous().await?,
            ControlOp::Seek(offset) => self.player.seek(seconds_to_micros(offset)).await?,
            ControlOp::SetPosition(seconds) => {
                self.set_position_micros(snapshot, seconds_to_micros(seconds))
                    .await?
            }
            ControlOp::SeekFraction(fraction) => {
                let Some(length) = snapshot.length_micros() else {
                    return Ok(());
                };
                let target = (length as f64 * fraction.clamp(0.0, 1.0)).floor() as i64;
                self.set_position_micros(snapshot, target).await?
            }
            ControlOp::ToggleShuffle => {
                self.set_property("Shuffle", Value::from(!snapshot.shuffle))
                    .await?
            }
            ControlOp::CycleLoop => {
                self.set_property("LoopStatus", Value::from(snapshot.loop_status.next().as_str()))
                    .await?
            }
        }
        Ok(())
    }

    async fn set_position_micros(
        &self,
        snapshot: &PlayerSnapshot,
        micros: i64,
    ) -> Result<(), MprisError> {
        let Some(track_id) = snapshot.track_id().and_then(|id| ObjectPath::try_from(id).ok()) else {
            tracing::debug!(player = %self.name, "SetPosition needs a valid track id");
            return Ok(());
        };
        self.player.set_position(&track_id, micros).await?;
        Ok(())
    }
}

async fn snapshot_via(properties: &zbus::Proxy<'_>) -> Result<PlayerSnapshot, MprisError> {
    let reply = properties.call_method("GetAll", &PLAYER_INTERFACE).await?;
    let props = reply.body().deserialize::<HashMap<String, OwnedValue>>()?;
    Ok(PlayerSnapshot::from_properties(&raw_metadata(&props)))
}

#[async_trait]
impl PlayerEndpoint for MprisSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn snapshot(&self) -> Option<PlayerSnapshot> {
        self.fetch_snapshot()
            .await
            .inspect_err(|e| tracing::debug!(player = %self.name, error = %e, "Snapshot failed"))
            .ok()
    }

    async fn position(&self) -> Option<f64> {
        // Targeted Get: Position never emits change signals, so no cache.
        let reply = self
            .properties
            .call_method("Get", &(PLAYER_INTERFACE, "Position"))
            .await
            .inspect_err(|e| tracing::debug!(player = %self.name, error = %e, "GetPosition failed"))
            .ok()?;
        let val = reply.body().deserialize::<OwnedValue>().ok()?;
        parse_position_from_owned(&val)
    }

    async fn control(&self, op: ControlOp, snapshot: &PlayerSnapshot) {
        // The endpoint may have vanished between discovery and this call.
        if let Err(e) = self.try_control(op, snapshot).await {
            tracing::debug!(player = %self.name, ?op, error = %e, "Control call failed");
        }
    }

    fn teardown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for MprisSource {
    fn drop(&mut self) {
        self.teardown();
    }
}
