use crate::adblock::{AdStripper, FrameObserver, FrameState};
use crate::catalog::{Catalog, CategoryBoard, HeroReel, HERO_INTERVAL};
use crate::config::Config;
use crate::embed::{load_frame, EmbedApi, EmbedClient, FrameLoad};
use crate::error::{ApiError, ApiResult};
use crate::media::{ImageSet, MediaItem};
use crate::player::{Player, PlayerState};
use crate::search::{SearchSession, SearchState};
use crate::tmdb::{TmdbApi, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const PER_IP_LIMIT: u32 = 240; // per minute
const PER_IP_BURST: u32 = 30;
const GLOBAL_LIMIT: u32 = 600; // per minute
const GLOBAL_BURST: u32 = 60;
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub search: Arc<SearchSession>,
    pub player: Arc<Player>,
    pub embed: Arc<dyn EmbedApi>,
    pub image_base: Arc<str>,
    pub rate_limits: Arc<Mutex<HashMap<String, WindowCounter>>>,
    pub global_limit: Arc<Mutex<WindowCounter>>,
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub window: u64,
    pub count: u32,
}

impl AppState {
    pub fn new(config: &Config, tmdb: Arc<dyn TmdbApi>, embed: Arc<dyn EmbedApi>) -> Result<Self> {
        let observer = FrameObserver::new(AdStripper::new()?);
        Ok(Self {
            catalog: Arc::new(Catalog::new(tmdb.clone())),
            search: Arc::new(SearchSession::new(tmdb.clone(), config.debounce)),
            player: Arc::new(Player::new(tmdb, config.embed_base_url.clone(), observer)),
            embed,
            image_base: Arc::from(config.image_base_url.as_str()),
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
            global_limit: Arc::new(Mutex::new(WindowCounter {
                window: 0,
                count: 0,
            })),
        })
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::from_config(&config));
    let embed: Arc<dyn EmbedApi> = Arc::new(EmbedClient::new());
    let state = AppState::new(&config, tmdb, embed)?;

    let catalog = state.catalog.clone();
    tokio::spawn(async move {
        tokio::join!(catalog.load_hero(), catalog.load_categories());
    });
    let rotation = state.catalog.spawn_rotation(HERO_INTERVAL);

    let app = build_router(state);

    info!("Listening on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    rotation.abort();
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/hero", get(hero))
        .route("/api/hero/next", post(hero_next))
        .route("/api/hero/select/:index", post(hero_select))
        .route("/api/categories", get(categories))
        .route(
            "/api/search",
            get(search_state).post(search_submit).delete(search_clear),
        )
        .route("/api/search/query", post(search_query))
        .route(
            "/api/search/suggestions",
            axum::routing::delete(search_hide_suggestions),
        )
        .route(
            "/api/player",
            get(player_state).post(player_open).delete(player_close),
        )
        .route("/api/player/mute", post(player_mute))
        .route("/embed", get(embed_frame))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// A media item as sent to the browser: the catalog fields plus derived
/// display values and image URLs.
#[derive(Debug, Serialize)]
pub struct CardView {
    #[serde(flatten)]
    pub item: MediaItem,
    pub display_title: String,
    pub year: Option<String>,
    pub kind: String,
    pub images: ImageSet,
}

impl CardView {
    fn new(base: &str, item: &MediaItem) -> Self {
        Self {
            display_title: item.display_title().to_string(),
            year: item.year().map(str::to_string),
            kind: item.derived_media_type().to_string(),
            images: ImageSet::for_item(base, item),
            item: item.clone(),
        }
    }
}

fn cards(base: &str, items: &[MediaItem]) -> Vec<CardView> {
    items.iter().map(|i| CardView::new(base, i)).collect()
}

#[derive(Debug, Serialize)]
struct HeroView {
    items: Vec<CardView>,
    index: usize,
    current: Option<CardView>,
    loading: bool,
    error: Option<String>,
}

impl HeroView {
    fn new(base: &str, reel: &HeroReel) -> Self {
        Self {
            items: cards(base, &reel.items),
            index: reel.index,
            current: reel.current().map(|i| CardView::new(base, i)),
            loading: reel.loading,
            error: reel.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RowView {
    title: &'static str,
    icon: &'static str,
    items: Vec<CardView>,
}

#[derive(Debug, Serialize)]
struct CategoriesView {
    rows: Vec<RowView>,
    loading: bool,
    error: Option<String>,
}

impl CategoriesView {
    fn new(base: &str, board: &CategoryBoard) -> Self {
        Self {
            rows: board
                .rows
                .iter()
                .map(|row| RowView {
                    title: row.title,
                    icon: row.icon,
                    items: cards(base, &row.items),
                })
                .collect(),
            loading: board.loading,
            error: board.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchView {
    query: String,
    results: Vec<CardView>,
    suggestions: Vec<CardView>,
    show_suggestions: bool,
    loading: bool,
    error: Option<String>,
}

impl SearchView {
    fn new(base: &str, state: &SearchState) -> Self {
        Self {
            query: state.query.clone(),
            results: cards(base, &state.results),
            suggestions: cards(base, &state.suggestions),
            show_suggestions: state.show_suggestions,
            loading: state.loading,
            error: state.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PlayerView {
    open: bool,
    media: Option<CardView>,
    embed_url: Option<String>,
    frame: FrameState,
    recommendations: Vec<CardView>,
    loading: bool,
    error: Option<String>,
    muted: bool,
}

impl PlayerView {
    fn new(base: &str, state: &PlayerState) -> Self {
        Self {
            open: state.open,
            media: state.media.as_ref().map(|m| CardView::new(base, m)),
            embed_url: state.embed_url.clone(),
            frame: state.frame,
            recommendations: cards(base, &state.recommendations),
            loading: state.loading,
            error: state.error.clone(),
            muted: state.muted,
        }
    }
}

async fn hero(State(state): State<AppState>) -> Json<HeroView> {
    let reel = state.catalog.hero().await;
    Json(HeroView::new(&state.image_base, &reel))
}

async fn hero_next(State(state): State<AppState>) -> Json<HeroView> {
    let reel = state.catalog.advance_hero().await;
    Json(HeroView::new(&state.image_base, &reel))
}

async fn hero_select(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> ApiResult<Json<HeroView>> {
    let reel = state
        .catalog
        .select_hero(index)
        .await
        .ok_or_else(|| ApiError::InvalidInput(format!("no featured title at {}", index)))?;
    Ok(Json(HeroView::new(&state.image_base, &reel)))
}

async fn categories(State(state): State<AppState>) -> Json<CategoriesView> {
    let board = state.catalog.categories().await;
    Json(CategoriesView::new(&state.image_base, &board))
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    query: Option<String>,
}

async fn search_state(State(state): State<AppState>) -> Json<SearchView> {
    let snapshot = state.search.snapshot().await;
    Json(SearchView::new(&state.image_base, &snapshot))
}

async fn search_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> (StatusCode, Json<SearchView>) {
    // The debounced fetch runs in the background; poll GET /api/search.
    let _pending = state.search.set_query(&body.query).await;
    let snapshot = state.search.snapshot().await;
    (
        StatusCode::ACCEPTED,
        Json(SearchView::new(&state.image_base, &snapshot)),
    )
}

async fn search_submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Json<SearchView> {
    state.search.submit(body.query.as_deref()).await;
    let snapshot = state.search.snapshot().await;
    Json(SearchView::new(&state.image_base, &snapshot))
}

async fn search_clear(State(state): State<AppState>) -> Json<SearchView> {
    state.search.clear().await;
    let snapshot = state.search.snapshot().await;
    Json(SearchView::new(&state.image_base, &snapshot))
}

async fn search_hide_suggestions(State(state): State<AppState>) -> Json<SearchView> {
    state.search.hide_suggestions().await;
    let snapshot = state.search.snapshot().await;
    Json(SearchView::new(&state.image_base, &snapshot))
}

async fn player_state(State(state): State<AppState>) -> Json<PlayerView> {
    let snapshot = state.player.snapshot().await;
    Json(PlayerView::new(&state.image_base, &snapshot))
}

async fn player_open(
    State(state): State<AppState>,
    Json(media): Json<MediaItem>,
) -> ApiResult<Json<PlayerView>> {
    let snapshot = state
        .player
        .open(media)
        .await
        .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
    Ok(Json(PlayerView::new(&state.image_base, &snapshot)))
}

async fn player_close(State(state): State<AppState>) -> Json<PlayerView> {
    let snapshot = state.player.close().await;
    Json(PlayerView::new(&state.image_base, &snapshot))
}

async fn player_mute(State(state): State<AppState>) -> Json<serde_json::Value> {
    let muted = state.player.toggle_mute().await;
    Json(serde_json::json!({ "muted": muted }))
}

async fn embed_frame(State(state): State<AppState>) -> ApiResult<Response> {
    match load_frame(&state.player, state.embed.as_ref()).await {
        Ok(FrameLoad::Ready { html, removed, .. }) => {
            Ok(([("x-ads-removed", removed.to_string())], Html(html)).into_response())
        }
        Ok(FrameLoad::NoSession) => Err(ApiError::NotFound("No title is playing.".to_string())),
        Ok(FrameLoad::Superseded) => Err(ApiError::Conflict(
            "The player switched titles while loading.".to_string(),
        )),
        Err(e) => {
            warn!("Embed load failed: {:?}", e);
            Err(ApiError::Upstream("Failed to load the player.".to_string()))
        }
    }
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = extract_ip(req.headers());
    if !check_rate_limit(&state, &ip).await || !check_global_rate_limit(&state).await {
        warn!("Rate limit exceeded for {}", ip);
        return ApiError::TooManyRequests.into_response();
    }
    next.run(req).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

fn extract_ip(headers: &HeaderMap) -> String {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn check_rate_limit(state: &AppState, ip: &str) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guards = state.rate_limits.lock().await;
    if guards.len() > MAX_RATE_LIMIT_ENTRIES {
        guards.retain(|_, v| v.window == window);
    }
    let entry = guards
        .entry(ip.to_string())
        .or_insert(WindowCounter { window, count: 0 });
    if entry.window != window {
        entry.window = window;
        entry.count = 0;
    }
    if entry.count >= PER_IP_LIMIT + PER_IP_BURST {
        return false;
    }
    entry.count += 1;
    true
}

async fn check_global_rate_limit(state: &AppState) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guard = state.global_limit.lock().await;
    if guard.window != window {
        guard.window = window;
        guard.count = 0;
    }
    if guard.count >= GLOBAL_LIMIT + GLOBAL_BURST {
        return false;
    }
    guard.count += 1;
    true
}
