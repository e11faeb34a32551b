use crate::media::MediaItem;
use crate::tmdb::{SearchScope, TmdbApi};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const SUGGESTION_LIMIT: usize = 6;
/// Queries this short or shorter hide the suggestion dropdown.
pub const MIN_SUGGEST_CHARS: usize = 2;
pub const SEARCH_ERROR: &str = "Failed to search. Please try again.";

/// Concatenate result lists in order, keep the first occurrence of every
/// `{media_type}-{id}` key and drop items without a poster.
pub fn merge_results<I>(lists: I) -> Vec<MediaItem>
where
    I: IntoIterator<Item = Vec<MediaItem>>,
{
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|item| {
            let key = item.dedup_key();
            if seen.contains(&key) || !item.has_poster() {
                return false;
            }
            seen.insert(key);
            true
        })
        .collect()
}

/// Query the multi, movie and tv search endpoints concurrently and merge the
/// results. Any single failure fails the whole search.
pub async fn aggregate(tmdb: &dyn TmdbApi, query: &str) -> Result<Vec<MediaItem>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let (multi, movie, tv) = tokio::try_join!(
        tmdb.search(SearchScope::Multi, query),
        tmdb.search(SearchScope::Movie, query),
        tmdb.search(SearchScope::Tv, query),
    )?;
    debug!(
        multi = multi.len(),
        movie = movie.len(),
        tv = tv.len(),
        "Search responses received"
    );
    Ok(merge_results([multi, movie, tv]))
}

pub fn filter_suggestions(items: Vec<MediaItem>) -> Vec<MediaItem> {
    items
        .into_iter()
        .filter(|item| {
            matches!(item.media_type.as_deref(), Some("movie") | Some("tv")) && item.has_poster()
        })
        .take(SUGGESTION_LIMIT)
        .collect()
}

pub async fn suggest(tmdb: &dyn TmdbApi, query: &str) -> Result<Vec<MediaItem>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let items = tmdb.search(SearchScope::Multi, query).await?;
    Ok(filter_suggestions(items))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<MediaItem>,
    pub suggestions: Vec<MediaItem>,
    pub show_suggestions: bool,
    pub loading: bool,
    pub error: Option<String>,
}

/// Search box state: debounced suggestions while typing, aggregated results
/// on submit.
///
/// Every keystroke and submission bumps a generation counter. A pending
/// suggestion fetch only writes back if no newer generation exists, so a slow
/// response for an old query cannot replace the suggestions of a newer one.
/// Submissions carry their own counter: only the newest search writes its
/// results, and typing after a submit does not discard them.
pub struct SearchSession {
    tmdb: Arc<dyn TmdbApi>,
    debounce: Duration,
    state: Arc<Mutex<SearchState>>,
    generation: Arc<AtomicU64>,
    submission: AtomicU64,
}

impl SearchSession {
    pub fn new(tmdb: Arc<dyn TmdbApi>, debounce: Duration) -> Self {
        Self {
            tmdb,
            debounce,
            state: Arc::new(Mutex::new(SearchState::default())),
            generation: Arc::new(AtomicU64::new(0)),
            submission: AtomicU64::new(0),
        }
    }

    pub async fn snapshot(&self) -> SearchState {
        self.state.lock().await.clone()
    }

    /// Record a keystroke. Returns the debounced suggestion task when one was
    /// scheduled.
    pub async fn set_query(&self, query: &str) -> Option<JoinHandle<()>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock().await;
            state.query = query.to_string();
            if query.chars().count() < MIN_SUGGEST_CHARS {
                state.show_suggestions = false;
                state.suggestions.clear();
                return None;
            }
            state.show_suggestions = true;
        }

        let tmdb = self.tmdb.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        let delay = self.debounce;
        let query = query.to_string();
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) != generation {
                debug!("Suggestion for '{}' superseded before fetch", query);
                return;
            }
            let suggestions = match suggest(tmdb.as_ref(), &query).await {
                Ok(items) => items,
                Err(e) => {
                    debug!("Suggestion fetch for '{}' failed: {}", query, e);
                    Vec::new()
                }
            };
            let mut state = state.lock().await;
            if current.load(Ordering::SeqCst) != generation {
                debug!("Dropping stale suggestions for '{}'", query);
                return;
            }
            state.suggestions = suggestions;
        }))
    }

    /// Run the aggregated search for `query` (or the current query when
    /// `None`). Blank queries do nothing and return `false`.
    pub async fn submit(&self, query: Option<&str>) -> bool {
        let (query, submission) = {
            let mut state = self.state.lock().await;
            if let Some(q) = query {
                state.query = q.to_string();
            }
            if state.query.trim().is_empty() {
                return false;
            }
            state.loading = true;
            state.show_suggestions = false;
            state.error = None;
            let submission = self.submission.fetch_add(1, Ordering::SeqCst) + 1;
            (state.query.clone(), submission)
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        let outcome = aggregate(self.tmdb.as_ref(), &query).await;
        let mut state = self.state.lock().await;
        if self.submission.load(Ordering::SeqCst) != submission {
            debug!("Dropping superseded search results for '{}'", query);
            return true;
        }
        match outcome {
            Ok(results) => {
                info!("Search '{}' returned {} titles", query, results.len());
                state.results = results;
            }
            Err(e) => {
                warn!("Search '{}' failed: {:?}", query, e);
                state.error = Some(SEARCH_ERROR.to_string());
            }
        }
        state.loading = false;
        true
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.results.clear();
        state.error = None;
    }

    pub async fn hide_suggestions(&self) {
        self.state.lock().await.show_suggestions = false;
    }
}
