use crate::config::AppConfig;
use crate::filter::{FilterCriteria, LocalPage};
use crate::library::Library;
use crate::materialize::{collect_genres, parse_ids};
use crate::membership::{Category, MemoryStore, MembershipStore, MembershipTracker};
use crate::pipeline::{ListPipeline, ListView};
use crate::tmdb::{CatalogApi, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use constant_time_eq::constant_time_eq;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogApi>,
    pub membership: Arc<MembershipTracker>,
    pub pipeline: ListPipeline,
    pub favorites: Arc<Library>,
    pub watchlist: Arc<Library>,
    pub api_token: Option<String>,
    pub favorites_page_size: usize,
    pub watchlist_page_size: usize,
}

impl AppState {
    /// Wire the components together. Must run inside a tokio runtime.
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        store: Arc<dyn MembershipStore>,
        config: &AppConfig,
    ) -> Self {
        let membership = Arc::new(MembershipTracker::new(store));
        let pipeline = ListPipeline::new(catalog.clone(), membership.clone());
        let favorites = Arc::new(Library::spawn(
            Category::Favorites,
            &membership,
            catalog.clone(),
        ));
        let watchlist = Arc::new(Library::spawn(
            Category::Watchlist,
            &membership,
            catalog.clone(),
        ));
        Self {
            catalog,
            membership,
            pipeline,
            favorites,
            watchlist,
            api_token: config.api_token.clone(),
            favorites_page_size: config.favorites_page_size,
            watchlist_page_size: config.watchlist_page_size,
        }
    }

    fn library(&self, category: Category) -> (&Library, usize) {
        match category {
            Category::Favorites => (&self.favorites, self.favorites_page_size),
            Category::Watchlist => (&self.watchlist, self.watchlist_page_size),
        }
    }
}

pub async fn run_server(config: AppConfig) -> Result<()> {
    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::from_config(&config)?);
    let store: Arc<dyn MembershipStore> = Arc::new(MemoryStore::new());
    let state = AppState::new(catalog, store, &config);

    // Prime the browse list the way the home screen does on launch.
    state.pipeline.refresh(FilterCriteria::default()).await;

    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/session", post(start_session).delete(end_session))
        .route("/movies", get(list_movies))
        .route("/movies/filter", post(apply_filters))
        .route("/movies/next", post(next_page))
        .route("/movies/prev", post(prev_page))
        .route("/favorites", get(list_favorites))
        .route("/favorites/:id", put(add_favorite).delete(remove_favorite))
        .route("/watchlist", get(list_watchlist))
        .route("/watchlist/:id", put(add_watchlist).delete(remove_watchlist))
        .route("/profile", get(profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "OK"
}

async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if presented.len() == expected.len()
        && constant_time_eq(presented.as_bytes(), expected.as_bytes())
    {
        next.run(req).await
    } else {
        warn!("Rejecting request: invalid or missing bearer token");
        error_response(StatusCode::UNAUTHORIZED, "Invalid or missing API token")
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"status": "error", "message": message}))).into_response()
}

fn no_session() -> Response {
    error_response(StatusCode::CONFLICT, "No active session")
}

#[derive(Deserialize)]
struct SessionRequest {
    user_id: String,
}

async fn start_session(State(state): State<AppState>, Json(body): Json<SessionRequest>) -> Response {
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id must not be empty");
    }
    match state.membership.start_session(user_id).await {
        Ok(()) => Json(json!({"status": "success", "user_id": user_id})).into_response(),
        Err(e) => {
            warn!("Failed to start session: {:#}", e);
            error_response(StatusCode::BAD_GATEWAY, "Membership store unavailable")
        }
    }
}

async fn end_session(State(state): State<AppState>) -> StatusCode {
    state.membership.end_session().await;
    StatusCode::NO_CONTENT
}

async fn list_movies(State(state): State<AppState>) -> Json<ListView> {
    Json(state.pipeline.view().await)
}

async fn apply_filters(
    State(state): State<AppState>,
    Json(criteria): Json<FilterCriteria>,
) -> Json<ListView> {
    state.pipeline.refresh(criteria).await;
    Json(state.pipeline.view().await)
}

async fn next_page(State(state): State<AppState>) -> Json<ListView> {
    state.pipeline.next_page().await;
    Json(state.pipeline.view().await)
}

async fn prev_page(State(state): State<AppState>) -> Json<ListView> {
    state.pipeline.prev_page().await;
    Json(state.pipeline.view().await)
}

/// Query string of the favorites / watchlist listings. Every field is raw
/// text; anything unparseable is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LocalQuery {
    pub query: Option<String>,
    /// Comma-separated genre tags.
    pub genres: Option<String>,
    pub year_from: Option<String>,
    pub year_to: Option<String>,
    pub rating_min: Option<String>,
    pub rating_max: Option<String>,
    pub page: Option<String>,
}

impl LocalQuery {
    pub fn criteria(&self) -> FilterCriteria {
        FilterCriteria {
            text_query: self.query.clone(),
            genres: self
                .genres
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect(),
            year_from: self.year_from.clone(),
            year_to: self.year_to.clone(),
            rating_min: self.rating_min.clone(),
            rating_max: self.rating_max.clone(),
            ..Default::default()
        }
    }

    pub fn page(&self) -> usize {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(1)
    }
}

async fn local_listing(state: &AppState, category: Category, query: &LocalQuery) -> Response {
    if state.membership.current_user().await.is_none() {
        return no_session();
    }
    let (library, page_size) = state.library(category);
    let page: LocalPage = library.page(&query.criteria(), query.page(), page_size);
    Json(json!({
        "category": category,
        "loading": library.is_loading(),
        "page": page,
    }))
    .into_response()
}

async fn list_favorites(State(state): State<AppState>, Query(query): Query<LocalQuery>) -> Response {
    local_listing(&state, Category::Favorites, &query).await
}

async fn list_watchlist(State(state): State<AppState>, Query(query): Query<LocalQuery>) -> Response {
    local_listing(&state, Category::Watchlist, &query).await
}

async fn toggle(state: &AppState, category: Category, movie_id: &str, member: bool) -> Response {
    if movie_id.parse::<i32>().is_err() {
        return error_response(StatusCode::BAD_REQUEST, "movie id must be numeric");
    }
    if !state.membership.toggle(category, movie_id, member).await {
        return no_session();
    }
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "movie_id": movie_id, "member": member})),
    )
        .into_response()
}

async fn add_favorite(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    toggle(&state, Category::Favorites, &id, true).await
}

async fn remove_favorite(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    toggle(&state, Category::Favorites, &id, false).await
}

async fn add_watchlist(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    toggle(&state, Category::Watchlist, &id, true).await
}

async fn remove_watchlist(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    toggle(&state, Category::Watchlist, &id, false).await
}

async fn profile(State(state): State<AppState>) -> Response {
    let Some(user_id) = state.membership.current_user().await else {
        return no_session();
    };
    let ids = parse_ids(&state.membership.snapshot(Category::Watchlist));
    let genres = collect_genres(state.catalog.as_ref(), &ids).await;
    Json(json!({
        "user_id": user_id,
        "watchlist_count": ids.len(),
        "watchlist_genres": genres,
    }))
    .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
