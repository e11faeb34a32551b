use crate::adblock::{FrameObserver, FrameState};
use crate::media::{embed_url, MediaItem};
use crate::tmdb::TmdbApi;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const RECOMMENDATIONS_ERROR: &str = "Failed to load recommendations.";

#[derive(Debug, Clone, Serialize)]
pub struct PlayerState {
    pub open: bool,
    pub media: Option<MediaItem>,
    pub embed_url: Option<String>,
    pub recommendations: Vec<MediaItem>,
    pub loading: bool,
    pub error: Option<String>,
    pub muted: bool,
    pub frame: FrameState,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            open: false,
            media: None,
            embed_url: None,
            recommendations: Vec::new(),
            loading: false,
            error: None,
            muted: true,
            frame: FrameState::Detached,
        }
    }
}

struct Inner {
    state: PlayerState,
    frame: FrameObserver,
    session: u64,
}

impl Inner {
    fn sync_frame_state(&mut self) {
        self.state.frame = self.frame.state();
    }
}

/// The single playback session: the selected title, its recommendations and
/// the ad observer bound to its embed frame.
pub struct Player {
    tmdb: Arc<dyn TmdbApi>,
    embed_base: String,
    inner: Mutex<Inner>,
}

impl Player {
    pub fn new(tmdb: Arc<dyn TmdbApi>, embed_base: impl Into<String>, frame: FrameObserver) -> Self {
        Self {
            tmdb,
            embed_base: embed_base.into(),
            inner: Mutex::new(Inner {
                state: PlayerState::default(),
                frame,
                session: 0,
            }),
        }
    }

    pub async fn snapshot(&self) -> PlayerState {
        self.inner.lock().await.state.clone()
    }

    /// Open `media` for playback and load its recommendations. Replaces any
    /// open session; a response that arrives after the session was replaced
    /// or closed is discarded.
    pub async fn open(&self, media: MediaItem) -> Result<PlayerState> {
        let kind = media
            .kind()
            .ok_or_else(|| anyhow!("'{}' is not playable", media.dedup_key()))?;
        let source = embed_url(&self.embed_base, kind, media.id);

        let session = {
            let mut inner = self.inner.lock().await;
            inner.session += 1;
            inner.frame.attach(&source);
            let muted = inner.state.muted;
            inner.state = PlayerState {
                open: true,
                media: Some(media.clone()),
                embed_url: Some(source),
                loading: true,
                muted,
                ..PlayerState::default()
            };
            inner.sync_frame_state();
            inner.session
        };
        info!("Opening player for '{}' ({})", media.display_title(), media.dedup_key());

        let outcome = self.tmdb.recommendations(kind, media.id).await;
        let mut inner = self.inner.lock().await;
        if inner.session != session {
            debug!("Discarding recommendations for superseded session {}", session);
            return Ok(inner.state.clone());
        }
        match outcome {
            Ok(items) => {
                inner.state.recommendations = items.into_iter().filter(MediaItem::has_poster).collect();
            }
            Err(e) => {
                warn!("Recommendations for {} failed: {:?}", media.dedup_key(), e);
                inner.state.error = Some(RECOMMENDATIONS_ERROR.to_string());
                inner.state.recommendations.clear();
            }
        }
        inner.state.loading = false;
        Ok(inner.state.clone())
    }

    pub async fn close(&self) -> PlayerState {
        let mut inner = self.inner.lock().await;
        inner.session += 1;
        inner.frame.disconnect();
        let muted = inner.state.muted;
        inner.state = PlayerState {
            muted,
            ..PlayerState::default()
        };
        inner.sync_frame_state();
        info!("Player closed");
        inner.state.clone()
    }

    pub async fn toggle_mute(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.state.muted = !inner.state.muted;
        inner.state.muted
    }

    /// Source the embed frame should load, if a session is open.
    pub async fn frame_source(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        if !inner.state.open {
            return None;
        }
        inner.frame.source().map(str::to_string)
    }

    /// Report that `source` finished loading. Returns a copy of the observer
    /// to run over the loaded document, or `None` when the frame has moved on.
    pub async fn frame_loaded(&self, source: &str) -> Option<FrameObserver> {
        let mut inner = self.inner.lock().await;
        let observing = inner.frame.on_load(source);
        inner.sync_frame_state();
        observing.then(|| inner.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adblock::AdStripper;
    use crate::tmdb::testing::{item, FakeTmdb};
    use std::time::Duration;
    use tokio::sync::watch;

    fn player(fake: Arc<FakeTmdb>) -> Player {
        Player::new(
            fake,
            "https://embed.example/embed/",
            FrameObserver::new(AdStripper::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn opening_tv_item_fetches_its_recommendations_once() {
        let fake = Arc::new(FakeTmdb::default().with(
            "tv/42/recommendations",
            vec![
                item(7, Some("tv"), None, Some("/r.jpg")),
                item(8, Some("tv"), None, None),
            ],
        ));
        let player = player(fake.clone());

        let state = player
            .open(item(42, Some("tv"), None, Some("/p.jpg")))
            .await
            .unwrap();

        assert_eq!(fake.calls(), vec!["tv/42/recommendations"]);
        assert!(state.open);
        assert!(!state.loading);
        assert_eq!(state.embed_url.as_deref(), Some("https://embed.example/embed/tv/42"));
        assert_eq!(state.recommendations.len(), 1);
        assert_eq!(state.frame, FrameState::AwaitingLoad);
    }

    #[tokio::test]
    async fn media_type_is_inferred_from_title() {
        let fake = Arc::new(FakeTmdb::default());
        let player = player(fake.clone());
        player
            .open(item(5, None, Some("A Movie"), Some("/p.jpg")))
            .await
            .unwrap();
        assert_eq!(fake.calls(), vec!["movie/5/recommendations"]);
    }

    #[tokio::test]
    async fn reopening_replaces_recommendations() {
        let fake = Arc::new(
            FakeTmdb::default()
                .with("movie/1/recommendations", vec![item(10, Some("movie"), Some("A"), Some("/a"))])
                .with(
                    "tv/2/recommendations",
                    vec![
                        item(20, Some("tv"), None, Some("/b")),
                        item(21, Some("tv"), None, Some("/c")),
                    ],
                ),
        );
        let player = player(fake);

        player.open(item(1, Some("movie"), Some("A"), Some("/p"))).await.unwrap();
        let closed = player.close().await;
        assert!(!closed.open);
        assert!(closed.media.is_none());
        assert!(closed.recommendations.is_empty());
        assert_eq!(closed.frame, FrameState::Detached);

        let state = player.open(item(2, Some("tv"), None, Some("/p"))).await.unwrap();
        let ids: Vec<_> = state.recommendations.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![20, 21]);
    }

    #[tokio::test]
    async fn failed_recommendations_set_error() {
        let fake = Arc::new(FakeTmdb::default().failing("movie/3/recommendations"));
        let player = player(fake);
        let state = player
            .open(item(3, Some("movie"), Some("X"), Some("/p")))
            .await
            .unwrap();
        assert_eq!(state.error.as_deref(), Some(RECOMMENDATIONS_ERROR));
        assert!(state.recommendations.is_empty());
        assert!(!state.loading);
        assert!(state.open);
    }

    #[tokio::test]
    async fn people_cannot_be_played() {
        let fake = Arc::new(FakeTmdb::default());
        let player = player(fake.clone());
        assert!(player.open(item(4, Some("person"), None, None)).await.is_err());
        assert!(fake.calls().is_empty());
        assert!(!player.snapshot().await.open);
    }

    #[tokio::test]
    async fn mute_survives_sessions() {
        let player = player(Arc::new(FakeTmdb::default()));
        assert!(player.snapshot().await.muted);
        assert!(!player.toggle_mute().await);
        player.open(item(1, Some("movie"), Some("A"), Some("/p"))).await.unwrap();
        assert!(!player.close().await.muted);
    }

    #[tokio::test]
    async fn frame_load_is_only_honoured_for_the_current_source() {
        let player = player(Arc::new(FakeTmdb::default()));
        assert!(player.frame_source().await.is_none());

        player.open(item(1, Some("movie"), Some("A"), Some("/p"))).await.unwrap();
        let first = player.frame_source().await.unwrap();
        player.open(item(2, Some("tv"), None, Some("/p"))).await.unwrap();
        let second = player.frame_source().await.unwrap();

        assert!(player.frame_loaded(&first).await.is_none());
        let observer = player.frame_loaded(&second).await.unwrap();
        assert_eq!(observer.state(), FrameState::Observing);
        assert_eq!(player.snapshot().await.frame, FrameState::Observing);

        player.close().await;
        assert!(player.frame_loaded(&second).await.is_none());
    }

    /// Open movie 1 on a spawned task and wait until its recommendations
    /// request is parked on the gate.
    async fn park_first_open(
        player: &Arc<Player>,
        fake: &Arc<FakeTmdb>,
    ) -> tokio::task::JoinHandle<PlayerState> {
        let parked = tokio::spawn({
            let player = player.clone();
            async move {
                player
                    .open(item(1, Some("movie"), Some("A"), Some("/p")))
                    .await
                    .unwrap()
            }
        });
        while fake.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        parked
    }

    #[tokio::test]
    async fn late_recommendations_for_replaced_session_are_discarded() {
        let (gate, open) = watch::channel(false);
        let fake = Arc::new(
            FakeTmdb::default()
                .with("movie/1/recommendations", vec![item(10, Some("movie"), Some("Old"), Some("/a"))])
                .with("tv/2/recommendations", vec![item(20, Some("tv"), None, Some("/b"))])
                .gated("movie/1/recommendations", open),
        );
        let player = Arc::new(player(fake.clone()));

        let parked = park_first_open(&player, &fake).await;
        let current = player.open(item(2, Some("tv"), None, Some("/p"))).await.unwrap();
        assert_eq!(current.recommendations.iter().map(|r| r.id).collect::<Vec<_>>(), vec![20]);

        gate.send(true).unwrap();
        let late = parked.await.unwrap();
        assert_eq!(late.media.as_ref().map(|m| m.id), Some(2));

        let state = player.snapshot().await;
        assert!(state.open);
        assert!(!state.loading);
        assert_eq!(state.media.as_ref().map(|m| m.id), Some(2));
        assert_eq!(state.recommendations.iter().map(|r| r.id).collect::<Vec<_>>(), vec![20]);
        assert_eq!(state.embed_url.as_deref(), Some("https://embed.example/embed/tv/2"));
    }

    #[tokio::test]
    async fn late_recommendations_after_close_are_discarded() {
        let (gate, open) = watch::channel(false);
        let fake = Arc::new(
            FakeTmdb::default()
                .with("movie/1/recommendations", vec![item(10, Some("movie"), Some("Old"), Some("/a"))])
                .gated("movie/1/recommendations", open),
        );
        let player = Arc::new(player(fake.clone()));

        let parked = park_first_open(&player, &fake).await;
        player.close().await;

        gate.send(true).unwrap();
        parked.await.unwrap();

        let state = player.snapshot().await;
        assert!(!state.open);
        assert!(!state.loading);
        assert!(state.media.is_none());
        assert!(state.recommendations.is_empty());
        assert_eq!(state.frame, FrameState::Detached);
    }
}
