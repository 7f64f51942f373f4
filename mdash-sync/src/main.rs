//! mdash-sync - Marketing data sync service
//!
//! Pulls daily metrics from spreadsheets, ad platforms and the CRM into
//! SQLite, on demand over HTTP and on each source's cadence.

use anyhow::{Context, Result};
use clap::Parser;
use mdash_common::config::{self, SourcesConfig, TomlConfig};
use mdash_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mdash_sync::adapters::{
    AdapterRegistry, AdsAdapter, CredentialStore, CrmAdapter, HttpClient, OAuthClient, RawCache,
    SheetAdapter, TokenRefresher,
};
use mdash_sync::db::credentials::SqliteCredentialStore;
use mdash_sync::services::{
    CacheSettings, ModeMigrationManager, Scheduler, StaticIdentity, SyncOrchestrator, SyncSettings,
};
use mdash_sync::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "mdash-sync", version, about = "Marketing data sync service")]
struct Args {
    /// Root folder holding mdash.db
    #[arg(long)]
    root_folder: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "MDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured port
    #[arg(long)]
    port: Option<u16>,
}

fn oauth_client(token_url: &str, client_id: &Option<String>, client_secret: &Option<String>) -> Option<OAuthClient> {
    match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some(OAuthClient {
            token_url: token_url.to_string(),
            client_id: id.clone(),
            client_secret: secret.clone(),
        }),
        _ => None,
    }
}

fn build_registry(
    sources: &SourcesConfig,
    http: Arc<HttpClient>,
    store: Arc<dyn CredentialStore>,
) -> AdapterRegistry {
    let sheets_auth = Arc::new(TokenRefresher::new(
        store.clone(),
        http.clone(),
        oauth_client(
            &sources.sheets_token_url,
            &sources.sheets_client_id,
            &sources.sheets_client_secret,
        ),
    ));
    // Ads tokens are long-lived and have no refresh grant
    let ads_auth = Arc::new(TokenRefresher::new(store.clone(), http.clone(), None));
    let crm_auth = Arc::new(TokenRefresher::new(
        store,
        http.clone(),
        oauth_client(
            &sources.crm_token_url,
            &sources.crm_client_id,
            &sources.crm_client_secret,
        ),
    ));

    AdapterRegistry::new()
        .with(Arc::new(SheetAdapter::new(
            http.clone(),
            sheets_auth,
            sources.sheets_base_url.clone(),
        )))
        .with(Arc::new(AdsAdapter::new(
            http.clone(),
            ads_auth,
            sources.ads_base_url.clone(),
            sources.ads_api_version.clone(),
        )))
        .with(Arc::new(CrmAdapter::new(http, crm_auth, sources.crm_base_url.clone())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config: TomlConfig = config::load_toml_config(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| {
                    tracing_subscriber::EnvFilter::try_new(config::resolve_log_level(&toml_config))
                })
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting mdash-sync v{} [{}] ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE")
    );

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = mdash_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let event_bus = EventBus::new(256);
    let http = Arc::new(HttpClient::new(toml_config.sync.requests_per_second)?);
    let store: Arc<dyn CredentialStore> = Arc::new(SqliteCredentialStore::new(db_pool.clone()));
    let registry = build_registry(&toml_config.sources, http, store);
    info!(sources = ?registry.kinds(), "Source adapters registered");

    let cache = Arc::new(RawCache::new(CacheSettings::from(&toml_config.cache)));
    let identity = Arc::new(StaticIdentity::new(toml_config.identity.user_id.clone()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        db_pool.clone(),
        registry,
        cache,
        event_bus.clone(),
        identity,
        SyncSettings::from(&toml_config.sync),
    ));
    let migrations = Arc::new(ModeMigrationManager::new(db_pool.clone(), event_bus.clone()));

    let _scheduler = Scheduler::new(db_pool.clone(), orchestrator.clone(), &toml_config.sync).spawn();

    let state = AppState::new(db_pool, event_bus, orchestrator, migrations);
    let app = build_router(state);

    let port = args.port.unwrap_or(toml_config.port);
    let addr = format!("{}:{}", toml_config.bind_address, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("mdash-sync stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
