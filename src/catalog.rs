use crate::media::MediaItem;
use crate::tmdb::TmdbApi;
use anyhow::Result;
use futures::future::try_join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const HERO_ENDPOINTS: [&str; 4] = [
    "movie/popular",
    "tv/popular",
    "trending/all/week",
    "movie/upcoming",
];
pub const HERO_LIMIT: usize = 10;
pub const HERO_INTERVAL: Duration = Duration::from_secs(8);
pub const HERO_ERROR: &str = "Failed to load featured content.";
pub const CATEGORIES_ERROR: &str = "Failed to load categories.";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Category {
    pub title: &'static str,
    pub endpoint: &'static str,
    pub icon: &'static str,
}

pub const CATEGORIES: [Category; 12] = [
    Category { title: "Trending Now", endpoint: "trending/all/week", icon: "🔥" },
    Category { title: "Netflix Originals", endpoint: "discover/tv?with_networks=213", icon: "🎬" },
    Category { title: "Top Rated Movies", endpoint: "movie/top_rated", icon: "⭐" },
    Category { title: "Popular TV Shows", endpoint: "tv/popular", icon: "📺" },
    Category { title: "Action & Adventure", endpoint: "discover/movie?with_genres=28,12", icon: "💥" },
    Category { title: "Comedy", endpoint: "discover/movie?with_genres=35", icon: "😂" },
    Category { title: "Horror", endpoint: "discover/movie?with_genres=27", icon: "👻" },
    Category { title: "Romance", endpoint: "discover/movie?with_genres=10749", icon: "💕" },
    Category { title: "Documentaries", endpoint: "discover/movie?with_genres=99", icon: "📖" },
    Category { title: "Sci-Fi & Fantasy", endpoint: "discover/movie?with_genres=878,14", icon: "🚀" },
    Category { title: "Animation", endpoint: "discover/movie?with_genres=16", icon: "🎨" },
    Category { title: "Crime Thrillers", endpoint: "discover/movie?with_genres=80,53", icon: "🕵️" },
];

pub fn pick_hero_endpoint<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    HERO_ENDPOINTS.choose(rng).copied().unwrap_or(HERO_ENDPOINTS[0])
}

/// Featured titles shown in the banner, rotated on a timer.
#[derive(Debug, Clone, Serialize)]
pub struct HeroReel {
    pub items: Vec<MediaItem>,
    pub index: usize,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for HeroReel {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: 0,
            loading: true,
            error: None,
        }
    }
}

impl HeroReel {
    pub fn current(&self) -> Option<&MediaItem> {
        self.items.get(self.index)
    }

    pub fn advance(&mut self) {
        if !self.items.is_empty() {
            self.index = (self.index + 1) % self.items.len();
        }
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        self.index = index;
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRow {
    pub title: &'static str,
    pub icon: &'static str,
    pub items: Vec<MediaItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBoard {
    pub rows: Vec<CategoryRow>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for CategoryBoard {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

pub async fn fetch_hero(tmdb: &dyn TmdbApi, endpoint: &str) -> Result<Vec<MediaItem>> {
    let items = tmdb.fetch_list(endpoint).await?;
    Ok(items
        .into_iter()
        .filter(MediaItem::has_backdrop)
        .take(HERO_LIMIT)
        .collect())
}

/// Fetch every category row concurrently. Rows keep table order.
pub async fn fetch_categories(tmdb: &dyn TmdbApi) -> Result<Vec<CategoryRow>> {
    try_join_all(CATEGORIES.iter().map(|cat| async move {
        let items = tmdb.fetch_list(cat.endpoint).await?;
        Ok::<_, anyhow::Error>(CategoryRow {
            title: cat.title,
            icon: cat.icon,
            items: items.into_iter().filter(MediaItem::has_poster).collect(),
        })
    }))
    .await
}

pub struct Catalog {
    tmdb: Arc<dyn TmdbApi>,
    hero: Mutex<HeroReel>,
    categories: Mutex<CategoryBoard>,
}

impl Catalog {
    pub fn new(tmdb: Arc<dyn TmdbApi>) -> Self {
        Self {
            tmdb,
            hero: Mutex::new(HeroReel::default()),
            categories: Mutex::new(CategoryBoard::default()),
        }
    }

    pub async fn load_hero(&self) {
        let endpoint = pick_hero_endpoint(&mut rand::thread_rng());
        self.load_hero_from(endpoint).await;
    }

    pub async fn load_hero_from(&self, endpoint: &str) {
        {
            let mut hero = self.hero.lock().await;
            hero.loading = true;
            hero.error = None;
        }
        let outcome = fetch_hero(self.tmdb.as_ref(), endpoint).await;
        let mut hero = self.hero.lock().await;
        match outcome {
            Ok(items) => {
                info!("Loaded {} featured titles from {}", items.len(), endpoint);
                hero.items = items;
                hero.index = 0;
            }
            Err(e) => {
                warn!("Featured content from {} failed: {:?}", endpoint, e);
                hero.error = Some(HERO_ERROR.to_string());
            }
        }
        hero.loading = false;
    }

    pub async fn load_categories(&self) {
        {
            let mut board = self.categories.lock().await;
            board.loading = true;
            board.error = None;
        }
        let outcome = fetch_categories(self.tmdb.as_ref()).await;
        let mut board = self.categories.lock().await;
        match outcome {
            Ok(rows) => {
                info!("Loaded {} category rows", rows.len());
                board.rows = rows;
            }
            Err(e) => {
                warn!("Category fetch failed: {:?}", e);
                board.error = Some(CATEGORIES_ERROR.to_string());
            }
        }
        board.loading = false;
    }

    pub async fn hero(&self) -> HeroReel {
        self.hero.lock().await.clone()
    }

    pub async fn categories(&self) -> CategoryBoard {
        self.categories.lock().await.clone()
    }

    pub async fn advance_hero(&self) -> HeroReel {
        let mut hero = self.hero.lock().await;
        hero.advance();
        hero.clone()
    }

    pub async fn select_hero(&self, index: usize) -> Option<HeroReel> {
        let mut hero = self.hero.lock().await;
        hero.select(index).then(|| hero.clone())
    }

    /// Advance the banner every `period` until the task is aborted.
    pub fn spawn_rotation(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut hero = catalog.hero.lock().await;
                hero.advance();
                debug!("Hero rotated to {}", hero.index);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmdb::testing::{item, FakeTmdb};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn with_backdrop(id: i64) -> MediaItem {
        let mut it = item(id, Some("movie"), Some("M"), Some("/p.jpg"));
        it.backdrop_path = Some("/b.jpg".to_string());
        it
    }

    #[test]
    fn hero_index_wraps() {
        let mut reel = HeroReel {
            items: vec![with_backdrop(1), with_backdrop(2), with_backdrop(3)],
            ..HeroReel::default()
        };
        reel.advance();
        reel.advance();
        assert_eq!(reel.current().map(|i| i.id), Some(3));
        reel.advance();
        assert_eq!(reel.index, 0);
        assert!(!reel.select(3));
        assert!(reel.select(1));

        let mut empty = HeroReel::default();
        empty.advance();
        assert_eq!(empty.index, 0);
        assert!(empty.current().is_none());
    }

    #[test]
    fn hero_endpoint_comes_from_the_table() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            assert!(HERO_ENDPOINTS.contains(&pick_hero_endpoint(&mut rng)));
        }
    }

    #[tokio::test]
    async fn hero_keeps_ten_items_with_backdrops() {
        let mut items: Vec<MediaItem> = (1..=14).map(with_backdrop).collect();
        items.insert(0, item(99, Some("movie"), Some("No art"), Some("/p.jpg")));
        let fake = Arc::new(FakeTmdb::default().with("movie/popular", items));
        let catalog = Catalog::new(fake);
        catalog.load_hero_from("movie/popular").await;

        let hero = catalog.hero().await;
        assert!(!hero.loading);
        assert_eq!(hero.items.len(), HERO_LIMIT);
        assert_eq!(hero.items[0].id, 1);
        assert_eq!(hero.index, 0);
    }

    #[tokio::test]
    async fn hero_failure_sets_message() {
        let fake = Arc::new(FakeTmdb::default().failing("tv/popular"));
        let catalog = Catalog::new(fake);
        catalog.load_hero_from("tv/popular").await;
        let hero = catalog.hero().await;
        assert_eq!(hero.error.as_deref(), Some(HERO_ERROR));
        assert!(!hero.loading);
    }

    #[tokio::test]
    async fn categories_keep_table_order_and_require_posters() {
        let fake = Arc::new(FakeTmdb::default().with(
            "movie/top_rated",
            vec![
                item(1, None, Some("A"), Some("/a.jpg")),
                item(2, None, Some("B"), None),
            ],
        ));
        let catalog = Catalog::new(fake.clone());
        catalog.load_categories().await;

        let board = catalog.categories().await;
        assert!(!board.loading);
        let titles: Vec<_> = board.rows.iter().map(|r| r.title).collect();
        let expected: Vec<_> = CATEGORIES.iter().map(|c| c.title).collect();
        assert_eq!(titles, expected);
        assert_eq!(board.rows[2].items.len(), 1);
        assert_eq!(fake.calls().len(), CATEGORIES.len());
    }

    #[tokio::test]
    async fn one_failing_category_fails_the_board() {
        let fake = Arc::new(FakeTmdb::default().failing("discover/movie?with_genres=27"));
        let catalog = Catalog::new(fake);
        catalog.load_categories().await;
        let board = catalog.categories().await;
        assert_eq!(board.error.as_deref(), Some(CATEGORIES_ERROR));
        assert!(!board.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_advances_on_interval() {
        let fake = Arc::new(
            FakeTmdb::default().with("movie/upcoming", (1..=3).map(with_backdrop).collect()),
        );
        let catalog = Arc::new(Catalog::new(fake));
        catalog.load_hero_from("movie/upcoming").await;

        let rotation = catalog.spawn_rotation(HERO_INTERVAL);
        tokio::time::sleep(HERO_INTERVAL * 2 + Duration::from_millis(10)).await;
        rotation.abort();
        assert_eq!(catalog.hero().await.index, 2);
    }
}
