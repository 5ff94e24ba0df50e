//! crewdesk-rest - the HTTP surface.
//!
//! Endpoints:
//! - `POST /chat`, `POST /chat/stream` - the agent chat entry (buffered / SSE)
//! - `GET|DELETE /history/sessions*`, `GET /history/files`, `GET /history/search`
//! - `POST /files/upload-image|upload-file`, `GET /files/{id}`, `GET /files/preview/{id}`
//! - `POST /docs/*`, `POST /prototype/generate` - direct generators
//! - `POST /browser/start|navigate|screenshot`
//! - `/team/*` - settings, projects, skills, requirements + delivery

pub mod artifacts_bridge;
pub mod auth;
pub mod browser;
pub mod chat;
pub mod docs;
pub mod error;
pub mod files;
pub mod history;
pub mod teams;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::{Json, Router};
use crewdesk_client::ProviderFactory;
use crewdesk_core::config::Settings;
use crewdesk_core::prompt::PromptAssembler;
use crewdesk_core::provider::ModelProvider;
use crewdesk_core::session_store::{SessionCache, SessionCacheConfig};
use crewdesk_store::artifacts::ArtifactStore;
use crewdesk_store::{Database, SnapshotStore, StoreError};
use crewdesk_tools::builtin::browser::BrowserService;
use crewdesk_tools::builtin::docs::{DocumentRenderer, HtmlDocumentRenderer};
use crewdesk_tools::{builtin_registry, ToolRegistry};
use serde_json::json;

pub use auth::{JwtPrincipalResolver, Principal, PrincipalResolver};
pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: Database,
    pub artifacts: Arc<ArtifactStore>,
    pub snapshots: SnapshotStore,
    pub sessions: Arc<SessionCache>,
    pub providers: Arc<ProviderFactory>,
    pub registry: Arc<ToolRegistry>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub browser: Arc<BrowserService>,
    pub prompts: Arc<PromptAssembler>,
    pub resolver: Arc<dyn PrincipalResolver>,
    /// Test hook: when set, every turn uses this provider regardless of
    /// the request.
    pub provider_override: Option<Arc<dyn ModelProvider>>,
    /// Test hook: substitute fallback target; defaults to the factory's
    /// native provider.
    pub native_override: Option<Arc<dyn ModelProvider>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, StoreError> {
        let db = Database::open(&settings.db_path)?;
        let public_base_url = if settings.public_base_url.is_empty() {
            format!("http://{}:{}", settings.host, settings.port)
        } else {
            settings.public_base_url.clone()
        };
        let artifacts = Arc::new(ArtifactStore::new(
            settings.outputs_dir.clone(),
            db.clone(),
            settings.jwt_secret.clone(),
            public_base_url,
        ));
        let snapshots = SnapshotStore::new(settings.data_dir.join("history"));
        let sessions = Arc::new(SessionCache::new(SessionCacheConfig {
            ttl: settings.session_ttl,
            max_sessions: settings.max_sessions,
        }));
        let providers = Arc::new(ProviderFactory::new(&settings));
        let browser = Arc::new(BrowserService::new(
            settings.browser_cmd.clone(),
            settings.max_browser_pages,
            settings.browser_page_ttl,
        ));
        let prompts = Arc::new(PromptAssembler::new(settings.data_dir.clone()));
        let resolver = Arc::new(JwtPrincipalResolver::new(settings.jwt_secret.clone()));

        Ok(Self {
            settings: Arc::new(settings),
            db,
            artifacts,
            snapshots,
            sessions,
            providers,
            registry: Arc::new(builtin_registry()),
            renderer: Arc::new(HtmlDocumentRenderer),
            browser,
            prompts,
            resolver,
            provider_override: None,
            native_override: None,
        })
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/chat/stream", post(chat::chat_stream_handler))
        .route("/history/sessions", get(history::list_sessions))
        .route(
            "/history/sessions/:id",
            get(history::get_session).delete(history::delete_session),
        )
        .route("/history/files", get(history::list_files))
        .route("/history/search", get(history::search))
        .route("/files/upload-image", post(files::upload_image))
        .route("/files/upload-file", post(files::upload_file))
        .route("/files/preview/:file_id", get(files::preview))
        .route("/files/:file_id", get(files::download).delete(files::delete))
        .route("/docs/ppt", post(docs::create_ppt))
        .route("/docs/quote", post(docs::create_quote_docx))
        .route("/docs/quote-xlsx", post(docs::create_quote_xlsx))
        .route("/docs/inspection", post(docs::create_inspection_docx))
        .route("/docs/inspection-xlsx", post(docs::create_inspection_xlsx))
        .route("/prototype/generate", post(docs::generate_prototype))
        .route("/browser/start", post(browser::start))
        .route("/browser/navigate", post(browser::navigate))
        .route("/browser/screenshot", post(browser::screenshot))
        .route(
            "/team/settings",
            get(teams::get_settings).put(teams::put_settings),
        )
        .route(
            "/team/projects",
            get(teams::list_projects).post(teams::create_project),
        )
        .route("/team/projects/:id/enabled", post(teams::set_project_enabled))
        .route("/team/skills", get(teams::list_skills).post(teams::create_skill))
        .route(
            "/team/requirements",
            get(teams::list_requirements).post(teams::create_requirement),
        )
        .route(
            "/team/requirements/:id",
            patch(teams::update_requirement).delete(teams::delete_requirement),
        )
        .route(
            "/team/requirements/:id/deliver",
            post(teams::deliver_requirement),
        )
        .route(
            "/team/requirements/:id/delivery",
            post(teams::resolve_delivery),
        )
        .route("/healthz", get(health))
        .with_state(state)
}
