//! Small file-sharing backend: files are uploaded under a name, protected by a
//! short code, and handed back as a download link to whoever knows both.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod records;
pub mod storage;

use auth::{Hasher, TokenIssuer};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, post},
    Router,
};
use config::{AccessMode, Config, StorageConfig};
use credentials::CredentialStore;
use db::Database;
use records::FileRecordStore;
use std::sync::Arc;
use storage::{CloudinaryStorage, LocalStorage, ObjectStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Everything a handler needs, passed explicitly instead of through globals.
#[derive(Clone)]
pub struct AppState {
    pub mode: AccessMode,
    pub accounts: CredentialStore,
    pub records: FileRecordStore,
    pub hasher: Hasher,
    pub tokens: Arc<TokenIssuer>,
    pub storage: Arc<dyn ObjectStore>,
    /// Set when files live on local disk and are served by this process.
    pub local_files: Option<Arc<LocalStorage>>,
}

impl AppState {
    pub fn new(
        mode: AccessMode,
        db: Database,
        hasher: Hasher,
        tokens: TokenIssuer,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            mode,
            accounts: CredentialStore::new(db.clone(), hasher),
            records: FileRecordStore::new(db),
            hasher,
            tokens: Arc::new(tokens),
            storage,
            local_files: None,
        }
    }

    /// Uses `local` as the object store and serves its files under `/files`.
    pub fn with_local_files(mut self, local: Arc<LocalStorage>) -> Self {
        self.storage = local.clone();
        self.local_files = Some(local);
        self
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = Database::open(&config.database_url)?;
        let hasher = Hasher::new(config.hash_cost);

        let secret = match &config.jwt_secret {
            Some(secret) => secret.clone(),
            None => {
                if config.access_mode == AccessMode::Authenticated {
                    tracing::warn!("JWT_SECRET not set; tokens will not survive a restart");
                }
                auth::generate_secret()
            }
        };
        let tokens = TokenIssuer::new(&secret);

        let state = match &config.storage {
            StorageConfig::Cloudinary(credentials) => Self::new(
                config.access_mode,
                db,
                hasher,
                tokens,
                Arc::new(CloudinaryStorage::new(credentials.clone())?),
            ),
            StorageConfig::Local {
                dir,
                public_base_url,
            } => {
                let local = Arc::new(LocalStorage::new(dir, public_base_url.clone()).await?);
                Self::new(config.access_mode, db, hasher, tokens, local.clone())
                    .with_local_files(local)
            }
        };

        Ok(state)
    }
}

/// Allowed origin from `FRONTEND_URL`, or any origin without credentials.
pub fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    match frontend_url.and_then(|url| url.parse::<HeaderValue>().ok()) {
        Some(origin) => CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT])
            .allow_credentials(true)
            .allow_origin(origin),
        None => CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(Any)
            .allow_origin(Any),
    }
}

pub fn app(state: AppState, frontend_url: Option<&str>) -> Router {
    let mut api = Router::new()
        .route(
            "/upload",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(handlers::UPLOAD_BODY_LIMIT)),
        )
        .route("/download", post(handlers::download_file))
        .route("/stats", get(handlers::file_stats));

    if state.mode == AccessMode::Authenticated {
        api = api
            .route("/auth/signup", post(handlers::signup))
            .route("/auth/login", post(handlers::login));
    }

    let mut router = Router::new()
        .route("/", get(handlers::index))
        .nest("/api", api);

    if state.local_files.is_some() {
        router = router.route("/files/:key", get(handlers::serve_stored_file));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(frontend_url))
        .with_state(state)
}
