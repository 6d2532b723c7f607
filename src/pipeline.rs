//! Paged movie list driven by filter criteria.
//!
//! State changes go through [`reduce`], a pure transition function that
//! returns the effects to run. [`ListPipeline`] owns the state, runs fetch
//! effects on tokio and feeds their outcome back through the reducer.
//!
//! Every fetch carries the generation it was issued under. Only the most
//! recently issued fetch may land; a superseded in-flight fetch is aborted
//! and, should it still complete, its result is discarded.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::filter::{sort_results, FilterCriteria};
use crate::membership::{Category, MembershipTracker};
use crate::models::{CatalogPage, MovieRecord};
use crate::tmdb::{CatalogApi, CatalogRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageState {
    pub current_page: u32,
    pub total_pages: u32,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListState {
    pub criteria: FilterCriteria,
    pub movies: Vec<MovieRecord>,
    pub page: PageState,
    /// Generation of the most recently issued fetch.
    pub generation: u64,
    pub in_flight: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Action {
    ApplyFilters(FilterCriteria),
    NextPage,
    PrevPage,
    PageLoaded { generation: u64, page: CatalogPage },
    PageFailed { generation: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Fetch {
        generation: u64,
        request: CatalogRequest,
    },
}

fn issue(state: &mut ListState, page: u32) -> Effect {
    state.generation += 1;
    state.in_flight = Some(state.generation);
    Effect::Fetch {
        generation: state.generation,
        request: state.criteria.to_request(page),
    }
}

pub fn reduce(state: &ListState, action: Action) -> (ListState, Vec<Effect>) {
    let mut next = state.clone();
    match action {
        Action::ApplyFilters(criteria) => {
            next.criteria = criteria;
            // Paging stays disabled until the new criteria report their total.
            next.page = PageState::default();
            let effect = issue(&mut next, 1);
            (next, vec![effect])
        }
        Action::NextPage => {
            let target = state.page.current_page.saturating_add(1);
            if target > state.page.total_pages {
                return (next, Vec::new());
            }
            let effect = issue(&mut next, target);
            (next, vec![effect])
        }
        Action::PrevPage => {
            if state.page.current_page <= 1 {
                return (next, Vec::new());
            }
            let effect = issue(&mut next, state.page.current_page - 1);
            (next, vec![effect])
        }
        Action::PageLoaded { generation, page } => {
            if generation != state.generation {
                debug!(generation, latest = state.generation, "discarding stale page");
                return (next, Vec::new());
            }
            let mut movies = page.results;
            sort_results(&mut movies, state.criteria.sort_mode);
            next.movies = movies;
            let total_pages = page.total_pages.max(1);
            next.page = PageState {
                current_page: page.page.clamp(1, total_pages),
                total_pages,
            };
            next.in_flight = None;
            (next, Vec::new())
        }
        Action::PageFailed { generation } => {
            if generation == state.generation {
                next.in_flight = None;
            }
            (next, Vec::new())
        }
    }
}

/// A listed movie with the current user's membership flags.
#[derive(Debug, Clone, Serialize)]
pub struct ListedMovie {
    #[serde(flatten)]
    pub movie: MovieRecord,
    pub genres: String,
    pub poster_url: Option<String>,
    pub is_favorite: bool,
    pub in_watchlist: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListView {
    pub movies: Vec<ListedMovie>,
    pub page: PageState,
    pub criteria: FilterCriteria,
    pub loading: bool,
}

struct Driver {
    state: ListState,
    in_flight: Option<AbortHandle>,
}

struct Inner {
    catalog: Arc<dyn CatalogApi>,
    membership: Arc<MembershipTracker>,
    driver: Mutex<Driver>,
}

impl Inner {
    async fn apply(&self, action: Action) {
        let mut driver = self.driver.lock().await;
        let (next, _) = reduce(&driver.state, action);
        driver.state = next;
    }
}

#[derive(Clone)]
pub struct ListPipeline {
    inner: Arc<Inner>,
}

impl ListPipeline {
    pub fn new(catalog: Arc<dyn CatalogApi>, membership: Arc<MembershipTracker>) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                membership,
                driver: Mutex::new(Driver {
                    state: ListState::default(),
                    in_flight: None,
                }),
            }),
        }
    }

    /// Apply new criteria and load their first page.
    pub async fn refresh(&self, criteria: FilterCriteria) {
        self.dispatch(Action::ApplyFilters(criteria)).await
    }

    pub async fn next_page(&self) {
        self.dispatch(Action::NextPage).await
    }

    pub async fn prev_page(&self) {
        self.dispatch(Action::PrevPage).await
    }

    /// Reduce `action`, start its fetches, and wait until they settle or are
    /// superseded by a newer dispatch.
    pub async fn dispatch(&self, action: Action) {
        let mut pending = Vec::new();
        {
            let mut driver = self.inner.driver.lock().await;
            let (next, effects) = reduce(&driver.state, action);
            driver.state = next;
            for effect in effects {
                let handle = self.spawn_effect(effect);
                if let Some(previous) = driver.in_flight.replace(handle.abort_handle()) {
                    previous.abort();
                }
                pending.push(handle);
            }
        }
        for handle in pending {
            if let Err(e) = handle.await {
                if e.is_cancelled() {
                    debug!("fetch superseded by a newer request");
                } else {
                    warn!("fetch task failed: {}", e);
                }
            }
        }
    }

    fn spawn_effect(&self, effect: Effect) -> tokio::task::JoinHandle<()> {
        let Effect::Fetch {
            generation,
            request,
        } = effect;
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let action = match request.send(inner.catalog.as_ref()).await {
                Ok(page) => {
                    info!(
                        generation,
                        page = page.page,
                        total_pages = page.total_pages,
                        results = page.results.len(),
                        "catalog page loaded"
                    );
                    Action::PageLoaded { generation, page }
                }
                Err(e) => {
                    warn!(generation, "catalog fetch failed, keeping previous list: {:#}", e);
                    Action::PageFailed { generation }
                }
            };
            inner.apply(action).await;
        })
    }

    pub async fn state(&self) -> ListState {
        self.inner.driver.lock().await.state.clone()
    }

    /// Current list with membership flags taken from the latest snapshots.
    pub async fn view(&self) -> ListView {
        let state = self.state().await;
        let favorites = self.inner.membership.snapshot(Category::Favorites);
        let watchlist = self.inner.membership.snapshot(Category::Watchlist);
        let movies = state
            .movies
            .into_iter()
            .map(|movie| {
                let key = movie.id.to_string();
                ListedMovie {
                    genres: movie.genre_label(),
                    poster_url: movie.poster_url(),
                    is_favorite: favorites.contains(&key),
                    in_watchlist: watchlist.contains(&key),
                    movie,
                }
            })
            .collect();
        ListView {
            movies,
            page: state.page,
            criteria: state.criteria,
            loading: state.in_flight.is_some(),
        }
    }
}
