use crate::data::DatasetError;
use crate::offline::VERSION_ASSET;
use crate::preferences::{MemoryStore, Theme};
use crate::session::{Command, Event, GameKind, Glossary, RankedTerm};
use crate::{SUGGESTION_LIMIT, TermStore, VersionInfo, category_tagline, describe_version};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{COOKIE, SET_COOKIE},
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use cookie::{Cookie, SameSite};
use parking_lot::RwLock;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, warn};

type SharedState = Arc<AppState>;

const SESSION_COOKIE: &str = "glosario_session";
const SESSION_ID_LEN: usize = 24;
const MAX_SESSIONS: usize = 1024;
const MAX_SEARCH_LIMIT: usize = 50;

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub base_url: String,
    /// Dataset file; the bundled glossary when `None`.
    pub data_path: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: "http://127.0.0.1:8080".to_string(),
            data_path: None,
            seed: None,
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

struct ClientSession {
    glossary: Glossary,
    last_seen: Instant,
}

/// Shared server state. Every browser gets its own [`Glossary`], found
/// through the session cookie.
pub struct AppState {
    store: Arc<TermStore>,
    load_error: Option<String>,
    version: Option<VersionInfo>,
    base_url: String,
    seed: Option<u64>,
    created: AtomicU64,
    sessions: RwLock<HashMap<String, ClientSession>>,
}

impl AppState {
    pub fn new(
        loaded: Result<TermStore, DatasetError>,
        version: Option<VersionInfo>,
        base_url: impl Into<String>,
        seed: Option<u64>,
    ) -> Self {
        let (store, load_error) = match loaded {
            Ok(store) => (store, None),
            Err(err) => {
                warn!(error = %err, "serving an empty glossary");
                (TermStore::default(), Some(err.to_string()))
            }
        };
        Self {
            store: Arc::new(store),
            load_error,
            version,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            seed,
            created: AtomicU64::new(0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn new_glossary(&self) -> Glossary {
        let ordinal = self.created.fetch_add(1, Ordering::Relaxed);
        let rng = Glossary::rng_from_seed(self.seed.map(|seed| seed.wrapping_add(ordinal)));
        Glossary::new(self.store.clone(), Box::new(MemoryStore::new()), rng)
    }

    /// Runs `f` against the caller's glossary after catching its timers up
    /// with the wall clock. Returns a `Set-Cookie` value when a new session
    /// was opened.
    fn with_session<R>(
        &self,
        headers: &HeaderMap,
        f: impl FnOnce(&mut Glossary, Vec<Event>) -> R,
    ) -> (R, Option<HeaderValue>) {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let known = session_id(headers).filter(|id| sessions.contains_key(id));
        let fresh = known.is_none();
        let id = known.unwrap_or_else(generate_session_id);
        if fresh && sessions.len() >= MAX_SESSIONS {
            evict_oldest(&mut sessions);
        }
        let session = sessions.entry(id.clone()).or_insert_with(|| ClientSession {
            glossary: self.new_glossary(),
            last_seen: now,
        });
        let elapsed = now.saturating_duration_since(session.last_seen);
        session.last_seen = now;
        let caught_up = session.glossary.dispatch(Command::Advance(elapsed));
        let result = f(&mut session.glossary, caught_up);
        drop(sessions);

        let cookie = fresh.then(|| session_cookie(&id)).flatten();
        (result, cookie)
    }
}

fn generate_session_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| Cookie::split_parse(raw))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

fn session_cookie(id: &str) -> Option<HeaderValue> {
    let cookie = Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    HeaderValue::from_str(&cookie.to_string()).ok()
}

fn evict_oldest(sessions: &mut HashMap<String, ClientSession>) {
    let oldest = sessions
        .iter()
        .min_by_key(|(_, session)| session.last_seen)
        .map(|(id, _)| id.clone());
    if let Some(id) = oldest {
        sessions.remove(&id);
        debug!(session = %id, "evicted idle session");
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let (loaded, version) = match &config.data_path {
        Some(path) => (
            TermStore::from_path(path),
            VersionInfo::load(&path.with_file_name(VERSION_ASSET)),
        ),
        None => (Ok(TermStore::bundled().clone()), VersionInfo::bundled()),
    };
    let state = Arc::new(AppState::new(
        loaded,
        version,
        config.base_url.clone(),
        config.seed,
    ));
    info!(terms = state.store.len(), "glossary ready");
    let router = build_router(state);
    info!(
        %config.addr,
        base = %config.base_url,
        seeded = config.seed.is_some(),
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/healthz", get(health))
        .route("/api/search", get(api_search))
        .route("/api/lookup", get(api_lookup))
        .route("/api/category", get(api_category))
        .route("/api/home", post(api_home))
        .route("/api/history", get(api_history))
        .route("/api/theme/toggle", post(api_toggle_theme))
        .route("/api/games/start", post(api_game_start))
        .route("/api/games/next", post(api_game_next))
        .route("/api/games/guess", post(api_game_guess))
        .route("/api/games/answer", post(api_game_answer))
        .route("/api/games/state", get(api_game_state))
        .route("/api/games/leave", post(api_game_leave))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Serialize)]
struct SessionPayload {
    events: Vec<Event>,
    score: u32,
    game: Option<GameKind>,
}

fn respond<T: Serialize>(payload: T, cookie: Option<HeaderValue>) -> Response {
    let mut response = Json(payload).into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

/// Dispatches `command` in the caller's session and returns every event it
/// produced, including any timers that came due since the last request.
fn run_command(state: &AppState, headers: &HeaderMap, command: Command) -> Response {
    let (payload, cookie) = state.with_session(headers, |glossary, mut events| {
        events.extend(glossary.dispatch(command));
        SessionPayload {
            events,
            score: glossary.score(),
            game: glossary.active_game(),
        }
    });
    respond(payload, cookie)
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let status = if state.load_error.is_none() {
        "ok"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "terms": state.store.len(),
        "error": state.load_error,
    }))
}

async fn home(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let (theme, cookie) = state.with_session(&headers, |glossary, _| glossary.theme());
    let mut response = match HomeTemplate::new(&state, theme).render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            warn!(error = %err, "home page failed to render");
            (StatusCode::INTERNAL_SERVER_ERROR, "home page unavailable").into_response()
        }
    };
    if let Some(cookie) = cookie {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

struct CategoryLink<'a> {
    name: &'a str,
    href: String,
    count: usize,
    tagline: Option<&'static str>,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="es">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Glosario técnico</title>
  </head>
  <body class="theme-{{ theme }}">
    <main>
      <h1>Glosario técnico</h1>
      {% if let Some(notice) = notice %}
      <p class="error">{{ notice }}</p>
      {% endif %}
      <p>{{ total }} términos</p>
      <form action="{{ base_url }}/api/lookup">
        <input name="q" placeholder="Buscar término" />
      </form>
      <ul>
        {% for category in categories %}
        <li>
          <a href="{{ category.href }}">{{ category.name }}</a> ({{ category.count }})
          {% if let Some(tagline) = category.tagline %}<p>{{ tagline }}</p>{% endif %}
        </li>
        {% endfor %}
      </ul>
    </main>
    <footer>{{ footer }}</footer>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate<'a> {
    theme: Theme,
    total: usize,
    base_url: &'a str,
    notice: Option<&'a str>,
    categories: Vec<CategoryLink<'a>>,
    footer: String,
}

impl<'a> HomeTemplate<'a> {
    fn new(state: &'a AppState, theme: Theme) -> Self {
        let categories = state
            .store
            .categories()
            .into_iter()
            .map(|name| CategoryLink {
                name,
                href: format!(
                    "{}/api/category?name={}",
                    state.base_url,
                    encode_component(name)
                ),
                count: state.store.filter_by_category(name).len(),
                tagline: category_tagline(name),
            })
            .collect();
        Self {
            theme,
            total: state.store.len(),
            base_url: &state.base_url,
            notice: state.load_error.as_deref(),
            categories,
            footer: describe_version(state.version.as_ref()),
        }
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn api_search(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return run_command(&state, &headers, Command::QueryChanged(query));
    }
    let limit = params
        .limit
        .unwrap_or(SUGGESTION_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);
    let hits: Vec<RankedTerm> = state
        .store
        .suggestions(&query, limit)
        .into_iter()
        .map(|hit| RankedTerm {
            term: hit.term.clone(),
            score: hit.score,
        })
        .collect();
    let (payload, cookie) = state.with_session(&headers, |glossary, mut events| {
        events.push(Event::Suggestions { query, hits });
        SessionPayload {
            events,
            score: glossary.score(),
            game: glossary.active_game(),
        }
    });
    respond(payload, cookie)
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    q: Option<String>,
}

async fn api_lookup(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<LookupParams>,
) -> Result<Response, ApiError> {
    let text = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing `q` parameter"))?;
    Ok(run_command(&state, &headers, Command::Select(text)))
}

#[derive(Debug, Deserialize)]
struct CategoryParams {
    name: Option<String>,
}

async fn api_category(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<CategoryParams>,
) -> Result<Response, ApiError> {
    let name = params
        .name
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing `name` parameter"))?;
    if !state.store.categories().contains(&name.as_str()) {
        return Err(ApiError::not_found(format!("Unknown category {name:?}")));
    }
    Ok(run_command(&state, &headers, Command::ToggleCategory(name)))
}

async fn api_home(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    run_command(&state, &headers, Command::GoHome)
}

async fn api_history(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    run_command(&state, &headers, Command::ShowHistory)
}

async fn api_toggle_theme(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    run_command(&state, &headers, Command::ToggleTheme)
}

#[derive(Debug, Deserialize)]
struct StartParams {
    kind: Option<String>,
}

async fn api_game_start(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<StartParams>,
) -> Result<Response, ApiError> {
    let kind: GameKind = params
        .kind
        .ok_or_else(|| ApiError::bad_request("Missing `kind` parameter"))?
        .parse()
        .map_err(|err: String| ApiError::bad_request(err))?;
    Ok(run_command(&state, &headers, Command::StartGame(kind)))
}

async fn api_game_next(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    run_command(&state, &headers, Command::NextRound)
}

#[derive(Debug, Deserialize)]
struct GuessParams {
    letter: Option<String>,
}

async fn api_game_guess(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<GuessParams>,
) -> Result<Response, ApiError> {
    let letter = params
        .letter
        .and_then(|letter| letter.trim().chars().next())
        .ok_or_else(|| ApiError::bad_request("Missing `letter` parameter"))?;
    Ok(run_command(&state, &headers, Command::Guess(letter)))
}

#[derive(Debug, Deserialize)]
struct AnswerParams {
    term: Option<String>,
}

async fn api_game_answer(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<AnswerParams>,
) -> Result<Response, ApiError> {
    let term = params
        .term
        .ok_or_else(|| ApiError::bad_request("Missing `term` parameter"))?;
    Ok(run_command(&state, &headers, Command::Answer(term)))
}

async fn api_game_state(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let (payload, cookie) = state.with_session(&headers, |glossary, mut events| {
        events.extend(glossary.game_view());
        SessionPayload {
            events,
            score: glossary.score(),
            game: glossary.active_game(),
        }
    });
    respond(payload, cookie)
}

async fn api_game_leave(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    run_command(&state, &headers, Command::LeaveGame)
}
