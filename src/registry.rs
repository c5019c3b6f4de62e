//! Source registry and active-source arbiter.
//!
//! One [`Aggregator`] task owns every live source and the active id. Bus
//! changes, adapter signals and control commands all arrive over channels,
//! so arbitration never interleaves with itself.

use crate::art::ArtResolver;
use crate::mpris::connection::is_blocked;
use crate::mpris::metadata::normalize;
use crate::mpris::snapshot::{PlaybackStatus, PlayerSnapshot};
use crate::mpris::source::{ControlOp, EndpointConnector, PlayerEndpoint, SourceEvent};
use crate::position::PositionReconciler;
use crate::state::{Capabilities, NowPlaying, PROVIDER_TAG, Update};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct SourceEntry {
    endpoint: Box<dyn PlayerEndpoint>,
    snapshot: PlayerSnapshot,
}

pub struct Aggregator {
    connector: Arc<dyn EndpointConnector>,
    denylist: Vec<String>,
    seek_settle: Duration,
    /// Registration order is arbitration order.
    sources: Vec<SourceEntry>,
    active: Option<String>,
    reconciler: PositionReconciler,
    art: ArtResolver,
    now_playing: NowPlaying,
    events_tx: mpsc::Sender<SourceEvent>,
    settle_tx: mpsc::Sender<String>,
    settled: Option<mpsc::Receiver<String>>,
    update_tx: mpsc::Sender<Option<Update>>,
}

impl Aggregator {
    /// `events_tx` must feed the receiver later passed to [`Aggregator::run`];
    /// adapters publish their signals through it.
    pub fn new(
        connector: Arc<dyn EndpointConnector>,
        denylist: Vec<String>,
        seek_settle: Duration,
        reconciler: PositionReconciler,
        now_playing: NowPlaying,
        events_tx: mpsc::Sender<SourceEvent>,
        update_tx: mpsc::Sender<Option<Update>>,
    ) -> Self {
        let (settle_tx, settled) = mpsc::channel(8);
        Self {
            connector,
            denylist,
            seek_settle,
            sources: Vec::new(),
            active: None,
            reconciler,
            art: ArtResolver::new(),
            now_playing,
            events_tx,
            settle_tx,
            settled: Some(settled),
            update_tx,
        }
    }

    /// Process events and commands until `shutdown_rx` fires or its sender is
    /// dropped, then tear every source down. A closed command channel only
    /// stops command handling.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SourceEvent>,
        mut commands: mpsc::Receiver<ControlOp>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let Some(mut settled) = self.settled.take() else {
            return;
        };
        let mut commands_open = true;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(name) = settled.recv() => self.handle_settled(&name).await,
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(op) => self.control(op).await,
                    None => {
                        tracing::debug!("Command channel closed");
                        commands_open = false;
                    }
                },
            }
        }
        self.shutdown();
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.endpoint.name() == name)
    }

    fn is_active(&self, name: &str) -> bool {
        self.active.as_deref() == Some(name)
    }

    pub async fn handle_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Appeared(name) => self.on_appeared(name).await,
            SourceEvent::Disappeared(name) => self.on_disappeared(&name).await,
            SourceEvent::PropertiesChanged { name, changed, snapshot } => {
                let Some(idx) = self.position_of(&name) else {
                    return;
                };
                self.sources[idx].snapshot = snapshot;
                if self.is_active(&name) {
                    self.emit().await;
                } else if changed.warrants_recompute() {
                    self.recompute(Some(&name)).await;
                }
            }
            SourceEvent::Seeked(name) => {
                if self.is_active(&name) {
                    let tx = self.settle_tx.clone();
                    let delay = self.seek_settle;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(name).await;
                    });
                } else if self.position_of(&name).is_some() {
                    self.recompute(Some(&name)).await;
                }
            }
        }
    }

    async fn on_appeared(&mut self, name: String) {
        if is_blocked(&name, &self.denylist) {
            tracing::debug!(player = %name, "Ignoring blocked player");
            return;
        }
        if self.position_of(&name).is_some() {
            return;
        }
        let mut endpoint = match self.connector.connect(&name, self.events_tx.clone()).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(player = %name, error = %e, "Failed to initialize player");
                return;
            }
        };
        let Some(snapshot) = endpoint.snapshot().await else {
            tracing::warn!(player = %name, "Player vanished during initialization");
            endpoint.teardown();
            return;
        };
        tracing::debug!(player = %name, identity = endpoint.identity(), "Registered player");
        self.sources.push(SourceEntry { endpoint, snapshot });
        self.recompute(Some(&name)).await;
    }

    async fn on_disappeared(&mut self, name: &str) {
        let Some(idx) = self.position_of(name) else {
            return;
        };
        let mut entry = self.sources.remove(idx);
        entry.endpoint.teardown();
        tracing::debug!(player = %name, "Unregistered player");
        self.recompute(None).await;
    }

    async fn handle_settled(&mut self, name: &str) {
        if !self.is_active(name) {
            return;
        }
        if let Some(idx) = self.position_of(name)
            && let Some(fresh) = self.sources[idx].endpoint.snapshot().await
        {
            self.sources[idx].snapshot = fresh;
        }
        self.emit().await;
    }

    fn select(&self, preferred: Option<&str>) -> Option<String> {
        let registered = |name: &str| self.position_of(name).is_some();
        self.sources
            .iter()
            .find(|s| s.snapshot.status == PlaybackStatus::Playing)
            .map(|s| s.endpoint.name())
            .or_else(|| preferred.filter(|p| registered(p)))
            .or_else(|| self.active.as_deref().filter(|a| registered(a)))
            .or_else(|| self.sources.first().map(|s| s.endpoint.name()))
            .map(str::to_string)
    }

    async fn recompute(&mut self, preferred: Option<&str>) {
        let next = self.select(preferred);
        if next != self.active {
            tracing::debug!(from = ?self.active, to = ?next, "Active player changed");
        }
        self.active = next;
        self.emit().await;
    }

    async fn emit(&mut self) {
        let update = self.build_update().await;
        self.now_playing
            .observe_track(update.as_ref().map(|u| u.metadata.track_identity()));
        if self.update_tx.send(update).await.is_err() {
            tracing::debug!("Update consumer is gone");
        }
    }

    async fn build_update(&self) -> Option<Update> {
        let idx = self.position_of(self.active.as_deref()?)?;
        let SourceEntry { endpoint, snapshot } = &self.sources[idx];
        let metadata = self.art.attach(normalize(&snapshot.metadata)).await;
        let elapsed = self.reconciler.position(endpoint.as_ref()).await;
        Some(Update {
            provider: PROVIDER_TAG,
            metadata,
            capabilities: Capabilities::from(snapshot),
            status: snapshot.status,
            loop_status: snapshot.loop_status,
            shuffle: snapshot.shuffle,
            volume: snapshot.volume,
            elapsed,
            app: endpoint.name().to_string(),
            app_name: endpoint.identity().to_string(),
        })
    }

    /// Route a control operation to the active source.
    pub async fn control(&self, op: ControlOp) {
        let Some(idx) = self.active.as_deref().and_then(|a| self.position_of(a)) else {
            tracing::debug!(?op, "No active player to control");
            return;
        };
        let SourceEntry { endpoint, snapshot } = &self.sources[idx];
        endpoint.control(op, snapshot).await;
    }

    fn shutdown(&mut self) {
        for mut entry in self.sources.drain(..) {
            entry.endpoint.teardown();
        }
        self.active = None;
    }
}

#[cfg(test)]
impl Aggregator {
    fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    fn registered(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.endpoint.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpris::connection::MprisError;
    use crate::mpris::snapshot::ChangedFields;
    use crate::mpris::value::RawValue;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct World {
        players: HashMap<String, PlayerSnapshot>,
        broken: Vec<String>,
        controls: Vec<(String, ControlOp)>,
        torn_down: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct FakeWorld(Arc<Mutex<World>>);

    impl FakeWorld {
        fn set(&self, name: &str, snapshot: PlayerSnapshot) {
            self.0.lock().unwrap().players.insert(name.to_string(), snapshot);
        }
        fn controls(&self) -> Vec<(String, ControlOp)> {
            self.0.lock().unwrap().controls.clone()
        }
    }

    struct FakeConnector(FakeWorld);

    #[async_trait]
    impl EndpointConnector for FakeConnector {
        async fn connect(
            &self,
            name: &str,
            _events: mpsc::Sender<SourceEvent>,
        ) -> Result<Box<dyn PlayerEndpoint>, MprisError> {
            let world = self.0.0.lock().unwrap();
            if world.broken.iter().any(|b| b == name) || !world.players.contains_key(name) {
                return Err(MprisError::Unavailable(name.to_string()));
            }
            Ok(Box::new(FakeEndpoint {
                name: name.to_string(),
                identity: format!("Fake {name}"),
                world: self.0.clone(),
            }))
        }
    }

    struct FakeEndpoint {
        name: String,
        identity: String,
        world: FakeWorld,
    }

    #[async_trait]
    impl PlayerEndpoint for FakeEndpoint {
        fn name(&self) -> &str {
            &self.name
        }
        fn identity(&self) -> &str {
            &self.identity
        }
        async fn snapshot(&self) -> Option<PlayerSnapshot> {
            self.world.0.lock().unwrap().players.get(&self.name).cloned()
        }
        async fn position(&self) -> Option<f64> {
            Some(12.0)
        }
        async fn control(&self, op: ControlOp, _snapshot: &PlayerSnapshot) {
            self.world.0.lock().unwrap().controls.push((self.name.clone(), op));
        }
        fn teardown(&mut self) {
            self.world.0.lock().unwrap().torn_down.push(self.name.clone());
        }
    }

    fn snapshot(status: PlaybackStatus, title: &str) -> PlayerSnapshot {
        let mut snap = PlayerSnapshot {
            status,
            can_control: true,
            can_pause: true,
            ..PlayerSnapshot::default()
        };
        snap.metadata.insert("xesam:title".into(), RawValue::Str(title.into()));
        snap.metadata.insert("xesam:artist".into(), RawValue::Str("Artist".into()));
        snap.metadata.insert("mpris:length".into(), RawValue::Int(180_000_000));
        snap
    }

    struct Harness {
        agg: Aggregator,
        updates: mpsc::Receiver<Option<Update>>,
        world: FakeWorld,
        now_playing: NowPlaying,
    }

    impl Harness {
        fn new(denylist: Vec<String>) -> Self {
            let world = FakeWorld::default();
            let (events_tx, _events_rx) = mpsc::channel(8);
            let (update_tx, updates) = mpsc::channel(64);
            let now_playing = NowPlaying::new();
            let agg = Aggregator::new(
                Arc::new(FakeConnector(world.clone())),
                denylist,
                Duration::from_millis(250),
                PositionReconciler::default(),
                now_playing.clone(),
                events_tx,
                update_tx,
            );
            Self { agg, updates, world, now_playing }
        }

        async fn appear(&mut self, name: &str, status: PlaybackStatus) {
            self.world.set(name, snapshot(status, name));
            self.agg.handle_event(SourceEvent::Appeared(name.into())).await;
        }

        fn drain(&mut self) -> Vec<Option<Update>> {
            let mut out = Vec::new();
            while let Ok(u) = self.updates.try_recv() {
                out.push(u);
            }
            out
        }
    }

    /// An arbiter driven through [`Aggregator::run`] on its own task.
    struct Running {
        events: mpsc::Sender<SourceEvent>,
        commands: mpsc::Sender<ControlOp>,
        shutdown: mpsc::Sender<()>,
        updates: mpsc::Receiver<Option<Update>>,
        world: FakeWorld,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_running() -> Running {
        let world = FakeWorld::default();
        let (events, events_rx) = mpsc::channel(8);
        let (update_tx, updates) = mpsc::channel(64);
        let (commands, commands_rx) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let agg = Aggregator::new(
            Arc::new(FakeConnector(world.clone())),
            vec![],
            Duration::from_millis(250),
            PositionReconciler::default(),
            NowPlaying::new(),
            events.clone(),
            update_tx,
        );
        let task = tokio::spawn(agg.run(events_rx, commands_rx, shutdown_rx));
        Running { events, commands, shutdown, updates, world, task }
    }

    fn changed(metadata: bool, status: Option<PlaybackStatus>) -> ChangedFields {
        ChangedFields { metadata, status }
    }

    #[tokio::test]
    async fn first_playing_source_by_registration_wins() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Playing).await;
        h.appear("c", PlaybackStatus::Playing).await;
        assert_eq!(h.agg.active(), Some("b"));
    }

    #[tokio::test]
    async fn preferred_wins_when_nothing_plays() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Stopped).await;
        assert_eq!(h.agg.active(), Some("b"));
        h.agg.handle_event(SourceEvent::Disappeared("b".into())).await;
        assert_eq!(h.agg.active(), Some("a"));
    }

    #[tokio::test]
    async fn current_active_survives_unrelated_removal() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Paused).await;
        h.appear("c", PlaybackStatus::Paused).await;
        assert_eq!(h.agg.active(), Some("c"));
        h.agg.handle_event(SourceEvent::Disappeared("b".into())).await;
        assert_eq!(h.agg.active(), Some("c"));
    }

    #[tokio::test]
    async fn active_is_always_registered() {
        let mut h = Harness::new(vec![]);
        let script: &[(&str, bool)] = &[
            ("a", true),
            ("b", true),
            ("c", true),
            ("b", false),
            ("a", false),
            ("d", true),
            ("c", false),
            ("d", false),
            ("d", false),
        ];
        for (name, appears) in script {
            if *appears {
                h.appear(name, PlaybackStatus::Paused).await;
            } else {
                h.agg.handle_event(SourceEvent::Disappeared(name.to_string())).await;
            }
            if let Some(active) = h.agg.active() {
                assert!(h.agg.registered().any(|n| n == active));
            }
        }
        assert_eq!(h.agg.active(), None);
        assert_eq!(h.drain().last(), Some(&None));
    }

    #[tokio::test]
    async fn blocked_and_broken_players_are_ignored() {
        let mut h = Harness::new(vec!["firefox".into()]);
        h.appear("org.mpris.MediaPlayer2.firefox.instance1", PlaybackStatus::Playing).await;
        h.world.0.lock().unwrap().broken.push("bad".into());
        h.appear("bad", PlaybackStatus::Playing).await;
        assert_eq!(h.agg.registered().count(), 0);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn update_describes_active_source() {
        let mut h = Harness::new(vec![]);
        h.appear("vlc", PlaybackStatus::Playing).await;
        let update = h.drain().pop().flatten().unwrap();
        assert_eq!(update.provider, "MPRIS2");
        assert_eq!(update.app, "vlc");
        assert_eq!(update.app_name, "Fake vlc");
        assert_eq!(update.metadata.title, "vlc");
        assert_eq!(update.metadata.length, 180.0);
        assert!(update.capabilities.can_play_pause);
        assert_eq!(update.elapsed.how_much, 12.0);
        assert_eq!(h.now_playing.current().identity.as_deref(), Some("Artist::vlc"));
    }

    #[tokio::test]
    async fn active_change_takes_cheap_path() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Paused).await;
        h.drain();
        let mut snap = snapshot(PlaybackStatus::Paused, "b");
        snap.volume = 0.3;
        h.agg
            .handle_event(SourceEvent::PropertiesChanged {
                name: "b".into(),
                changed: changed(false, None),
                snapshot: snap,
            })
            .await;
        let updates = h.drain();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].as_ref().unwrap().volume, 0.3);
        assert_eq!(h.agg.active(), Some("b"));
    }

    #[tokio::test]
    async fn idle_inactive_changes_do_not_recompute() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Paused).await;
        h.drain();
        h.agg
            .handle_event(SourceEvent::PropertiesChanged {
                name: "a".into(),
                changed: changed(false, Some(PlaybackStatus::Paused)),
                snapshot: snapshot(PlaybackStatus::Paused, "a"),
            })
            .await;
        assert!(h.drain().is_empty());
        assert_eq!(h.agg.active(), Some("b"));

        h.agg
            .handle_event(SourceEvent::PropertiesChanged {
                name: "a".into(),
                changed: changed(false, Some(PlaybackStatus::Playing)),
                snapshot: snapshot(PlaybackStatus::Playing, "a"),
            })
            .await;
        assert_eq!(h.agg.active(), Some("a"));
        assert_eq!(h.drain().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_on_active_waits_for_settle() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Playing).await;
        h.drain();
        h.agg.handle_event(SourceEvent::Seeked("a".into())).await;
        tokio::task::yield_now().await;
        assert!(h.drain().is_empty());

        let mut settled = h.agg.settled.take().unwrap();
        tokio::time::advance(Duration::from_millis(249)).await;
        assert!(settled.try_recv().is_err());
        tokio::time::advance(Duration::from_millis(2)).await;
        let name = settled.recv().await.unwrap();
        h.agg.handle_settled(&name).await;
        assert_eq!(h.drain().len(), 1);
    }

    #[tokio::test]
    async fn seek_on_inactive_source_prefers_it() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Paused).await;
        h.agg.handle_event(SourceEvent::Seeked("a".into())).await;
        assert_eq!(h.agg.active(), Some("a"));
    }

    #[tokio::test]
    async fn controls_go_to_active_source() {
        let mut h = Harness::new(vec![]);
        h.agg.control(ControlOp::Play).await;
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Playing).await;
        h.agg.control(ControlOp::Next).await;
        h.agg.control(ControlOp::Seek(5.0)).await;
        assert_eq!(
            h.world.controls(),
            vec![("b".to_string(), ControlOp::Next), ("b".to_string(), ControlOp::Seek(5.0))]
        );
    }

    #[tokio::test]
    async fn disappearing_sources_are_torn_down() {
        let mut h = Harness::new(vec![]);
        h.appear("a", PlaybackStatus::Paused).await;
        h.appear("b", PlaybackStatus::Paused).await;
        h.agg.handle_event(SourceEvent::Disappeared("a".into())).await;
        h.agg.shutdown();
        assert_eq!(h.world.0.lock().unwrap().torn_down, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(h.agg.active(), None);
    }

    #[tokio::test]
    async fn closed_command_input_keeps_arbiter_running() {
        let mut r = spawn_running();
        drop(r.commands);
        r.world.set("a", snapshot(PlaybackStatus::Playing, "a"));
        r.events.send(SourceEvent::Appeared("a".into())).await.unwrap();
        let update = r.updates.recv().await.unwrap().unwrap();
        assert_eq!(update.app, "a");
        assert!(!r.task.is_finished());

        r.shutdown.send(()).await.unwrap();
        r.task.await.unwrap();
        assert!(r.updates.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_settles_seeks_and_tears_down_on_shutdown() {
        let mut r = spawn_running();
        r.world.set("a", snapshot(PlaybackStatus::Playing, "a"));
        r.events.send(SourceEvent::Appeared("a".into())).await.unwrap();
        assert!(r.updates.recv().await.unwrap().is_some());

        let seeked_at = tokio::time::Instant::now();
        r.events.send(SourceEvent::Seeked("a".into())).await.unwrap();
        assert!(r.updates.recv().await.unwrap().is_some());
        assert!(seeked_at.elapsed() >= Duration::from_millis(250));

        r.commands.send(ControlOp::Pause).await.unwrap();
        while r.world.controls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(r.world.controls(), vec![("a".to_string(), ControlOp::Pause)]);

        r.shutdown.send(()).await.unwrap();
        r.task.await.unwrap();
        assert_eq!(r.world.0.lock().unwrap().torn_down, vec!["a".to_string()]);
    }
}
