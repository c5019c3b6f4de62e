//! Cache-first lyrics resolution.
//!
//! ```text
//! cache hit, synchronized ──────────────────────────────▶ result
//! otherwise ─▶ providers in order (each timeout-bounded) ─▶ first with lines
//!                 │ none                                      │ store in cache
//!                 ▼                                           ▼
//!          stale cache entry ──────────────────────────▶ result
//! result ─▶ displayed only if the track generation is unchanged
//! ```
//!
//! Concurrent requests for one track identity share a single resolution.

use crate::lyrics::database::LyricsCache;
use crate::lyrics::providers::LyricsProvider;
use crate::lyrics::types::{LyricsDocument, LyricsError};
use crate::mpris::metadata::Metadata;
use crate::state::NowPlaying;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type Resolution = Shared<BoxFuture<'static, Option<LyricsDocument>>>;

pub struct LyricsPipeline {
    cache: Mutex<LyricsCache>,
    providers: Vec<Arc<dyn LyricsProvider>>,
    timeout: Duration,
    now_playing: NowPlaying,
    in_flight: Mutex<HashMap<String, Resolution>>,
}

impl LyricsPipeline {
    pub fn new(
        cache: LyricsCache,
        providers: Vec<Arc<dyn LyricsProvider>>,
        timeout: Duration,
        now_playing: NowPlaying,
    ) -> Self {
        Self {
            cache: Mutex::new(cache),
            providers,
            timeout,
            now_playing,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve lyrics for `metadata` and show them if its track is still the
    /// one on display.
    pub async fn resolve(self: &Arc<Self>, metadata: &Metadata) -> Option<LyricsDocument> {
        let identity = metadata.track_identity();
        let generation = self.now_playing.generation();

        let resolution = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&identity) {
                Some(running) => {
                    tracing::debug!(identity = %identity, "Joining in-flight lyrics resolution");
                    running.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let metadata = metadata.clone();
                    let key = identity.clone();
                    let resolution = async move {
                        let result = this.lookup(&metadata, &key).await;
                        this.in_flight.lock().await.remove(&key);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(identity.clone(), resolution.clone());
                    resolution
                }
            }
        };

        let result = resolution.await;
        if let Some(doc) = &result
            && doc.has_lines()
            && !self.now_playing.apply(generation, &identity, doc.clone())
        {
            tracing::debug!(
                identity = %identity,
                "Discarding lyrics for a track no longer on display"
            );
        }
        result
    }

    async fn lookup(&self, metadata: &Metadata, identity: &str) -> Option<LyricsDocument> {
        let cached = self.cache.lock().await.get(identity).cloned();
        if let Some(doc) = &cached
            && doc.synchronized
            && doc.has_lines()
        {
            return Some(LyricsDocument {
                cached: true,
                ..doc.clone()
            });
        }

        // An unsynchronized entry can only be improved by synchronized output.
        let candidates = self
            .providers
            .iter()
            .filter(|p| p.supports_platform())
            .filter(|p| cached.is_none() || p.supports_synchronized());

        for provider in candidates {
            if let Some(doc) = self.query(provider.as_ref(), metadata).await
                && doc.has_lines()
            {
                tracing::debug!(
                    provider = provider.name(),
                    identity,
                    synchronized = doc.synchronized,
                    "Lyrics found"
                );
                self.cache.lock().await.put(identity, doc.clone()).await;
                return Some(doc);
            }
        }

        cached.map(|doc| LyricsDocument { cached: true, ..doc })
    }

    /// One bounded provider query. Every failure is an absent result.
    async fn query(
        &self,
        provider: &dyn LyricsProvider,
        metadata: &Metadata,
    ) -> Option<LyricsDocument> {
        let result = tokio::time::timeout(self.timeout, provider.search(metadata))
            .await
            .unwrap_or(Err(LyricsError::Timeout));
        match result {
            Ok(doc) => doc,
            Err(e) => {
                tracing::debug!(provider = provider.name(), error = %e, "Lyrics provider failed");
                None
            }
        }
    }
}
