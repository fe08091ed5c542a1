use anyhow::Result;
use clap::Parser;
use sidenote_server::api::{self, AppState};
use sidenote_server::parse::{HttpExtractor, ParseCache};
use sidenote_server::session::SqliteSessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, default_value = "127.0.0.1:8787", env = "SIDENOTE_ADDR")]
    addr: String,
    /// Path to the SQLite database
    #[arg(long, default_value = "sidenote.db", env = "SIDENOTE_DB")]
    db: PathBuf,
    /// Freshness window for URL parse-cache entries, in hours
    #[arg(long, default_value_t = 6, env = "SIDENOTE_URL_CACHE_HOURS")]
    url_cache_hours: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sidenote_server=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    info!(
        addr = %args.addr,
        db = %args.db.display(),
        url_cache_hours = args.url_cache_hours,
        "starting sidenote server"
    );

    let store = SqliteSessionStore::connect(args.db).await?;
    let cache = ParseCache::new(
        store.connection(),
        Duration::from_secs(args.url_cache_hours * 60 * 60),
    );
    let state = AppState {
        store: Arc::new(store),
        cache,
        extractor: Arc::new(HttpExtractor::new()),
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
