//! Inverted-index HTTP service used as the system under test
//!
//! `GET /{term}` answers the documents containing `term`, formatted as
//! `[14_1.txt, 14_8.txt]`. Two extra route families inject faults:
//!
//! * `/faulty/{every}/{term}` answers 500 to every `every`th request
//! * `/limited/{rps}/{term}` answers 503 once more than `rps` requests arrive per second
//!
//! Every route accepts a `delay_ms` query parameter to slow the answer down.
use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
#[allow(unused)]
use tracing::{debug, error, info, warn};

/// Term to sorted document names.
#[derive(Debug, Default, Clone)]
pub struct InvertedIndex {
    terms: HashMap<String, BTreeSet<String>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every file of `dir` under its file name.
    pub fn from_dir(dir: &FsPath) -> std::io::Result<Self> {
        let mut index = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(entry.path())?;
            let name = entry.file_name().to_string_lossy().into_owned();
            info!("Indexed document {name}");
            index.add_document(&name, &content);
        }
        Ok(index)
    }

    /// A handful of short documents; `the` is in `14_1.txt` and `14_8.txt`.
    pub fn sample() -> Self {
        let mut index = Self::new();
        index.add_document("14_1.txt", "The quick brown fox jumps over the lazy dog.");
        index.add_document("14_8.txt", "Of all the rivers, the Volga is the longest.");
        index.add_document("15_2.txt", "A stitch in time saves nine.");
        index.add_document("15_3.txt", "Brown bread, brown sugar.");
        index
    }

    /// Only ASCII letters survive, lowercased and split on whitespace.
    pub fn add_document(&mut self, name: &str, content: &str) {
        let cleaned: String = content
            .chars()
            .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        for term in cleaned.split_whitespace() {
            self.terms
                .entry(term.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    pub fn documents(&self, term: &str) -> Vec<&str> {
        self.terms
            .get(&term.to_lowercase())
            .map(|docs| docs.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct AppState {
    index: InvertedIndex,
    faulty: AtomicU64,
    limiters: Mutex<BTreeMap<u32, Arc<DefaultDirectRateLimiter>>>,
}

impl AppState {
    fn limiter(&self, rps: NonZeroU32) -> Arc<DefaultDirectRateLimiter> {
        let mut limiters = match self.limiters.lock() {
            Ok(limiters) => limiters,
            Err(poisoned) => poisoned.into_inner(),
        };
        limiters
            .entry(rps.get())
            .or_insert_with(|| Arc::new(RateLimiter::direct(Quota::per_second(rps))))
            .clone()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Delay {
    delay_ms: Option<u64>,
}

impl Delay {
    async fn wait(&self) {
        if let Some(delay_ms) = self.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

pub fn router(index: InvertedIndex) -> Router {
    let state = Arc::new(AppState {
        index,
        ..Default::default()
    });

    Router::new()
        .route("/:term", get(lookup))
        .route("/faulty/:every/:term", get(faulty))
        .route("/limited/:rps/:term", get(limited))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `index` on `listener` until the process ends.
pub async fn run(listener: TcpListener, index: InvertedIndex) -> std::io::Result<()> {
    info!("Started server. Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(index)).await
}

/// Serve the sample index on an ephemeral local port in the background.
pub async fn spawn() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = run(listener, InvertedIndex::sample()).await {
            error!("Mock service stopped: {err}");
        }
    });
    Ok(addr)
}

fn render(docs: &[&str]) -> String {
    format!("[{}]", docs.join(", "))
}

#[debug_handler]
async fn lookup(
    State(state): State<Arc<AppState>>,
    Path(term): Path<String>,
    Query(delay): Query<Delay>,
) -> String {
    metrics::counter!("mock_service.requests").increment(1);
    delay.wait().await;
    render(&state.index.documents(&term))
}

#[debug_handler]
async fn faulty(
    State(state): State<Arc<AppState>>,
    Path((every, term)): Path<(u64, String)>,
    Query(delay): Query<Delay>,
) -> Result<String, StatusCode> {
    metrics::counter!("mock_service.requests").increment(1);
    delay.wait().await;

    let n = state.faulty.fetch_add(1, Ordering::Relaxed) + 1;
    if every > 0 && n % every == 0 {
        debug!("Injecting fault into request {n}");
        metrics::counter!("mock_service.faults").increment(1);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(render(&state.index.documents(&term)))
}

#[debug_handler]
async fn limited(
    State(state): State<Arc<AppState>>,
    Path((rps, term)): Path<(NonZeroU32, String)>,
    Query(delay): Query<Delay>,
) -> Result<String, (StatusCode, &'static str)> {
    metrics::counter!("mock_service.requests").increment(1);
    if state.limiter(rps).check().is_err() {
        info!("Couldn't handle request due to load");
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"));
    }

    delay.wait().await;
    Ok(render(&state.index.documents(&term)))
}
