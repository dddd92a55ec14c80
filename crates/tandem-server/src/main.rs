use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_api::middleware::require_identity;
use tandem_api::{AppState, AppStateInner, calendar, couple, pairing};
use tandem_core::cache::ImageCache;
use tandem_core::entitlement::EntitlementResolver;
use tandem_core::pairing::PairingLedger;
use tandem_core::remote::{HttpEntitlementProvider, HttpImageStore, ImageStore};
use tandem_core::sync::SyncCoordinator;
use tandem_core::timeline::TimelineStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("TANDEM_DB_PATH").unwrap_or_else(|_| "tandem.db".into());
    let cache_dir = std::env::var("TANDEM_CACHE_DIR").unwrap_or_else(|_| "image-cache".into());
    let storage_url =
        std::env::var("TANDEM_STORAGE_URL").unwrap_or_else(|_| "http://localhost:9000".into());
    let entitlement_url =
        std::env::var("TANDEM_ENTITLEMENT_URL").unwrap_or_else(|_| "http://localhost:9100".into());
    let host = std::env::var("TANDEM_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TANDEM_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Record store
    let db = Arc::new(tandem_db::Database::open(&PathBuf::from(&db_path))?);

    // Collaborators
    let store: Arc<dyn ImageStore> = Arc::new(HttpImageStore::new(&storage_url));
    let provider = Arc::new(HttpEntitlementProvider::new(&entitlement_url));

    // Core components
    let ledger = PairingLedger::new(db.clone());
    let resolver = EntitlementResolver::new(db.clone(), provider);
    let timeline = Arc::new(TimelineStore::new(db.clone()));
    let cache = ImageCache::new(PathBuf::from(&cache_dir)).await?;
    let sync = SyncCoordinator::new(db.clone(), timeline.clone(), cache, store.clone());

    let state: AppState = Arc::new(AppStateInner {
        ledger,
        resolver,
        timeline,
        sync,
        store,
    });

    // Routes — every operation requires an identity
    let app = Router::new()
        .route("/pairing/code", post(pairing::issue_code))
        .route("/pairing/redeem", post(pairing::redeem))
        .route("/pairing/unpair", post(pairing::unpair))
        .route("/pairing/entitlement", post(pairing::bind_entitlement))
        .route("/couple", get(couple::get_couple))
        .route("/couple/access", get(couple::access))
        .route("/calendar/{year}/{month}", get(calendar::month_view))
        .route("/calendar/poll", get(calendar::poll))
        .route("/calendar/entries", post(calendar::create_entry))
        .route("/calendar/latest", get(calendar::latest))
        .layer(middleware::from_fn(require_identity))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Tandem server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
