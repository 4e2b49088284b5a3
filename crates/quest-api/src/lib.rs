pub mod chat;
pub mod error;
pub mod middleware;
pub mod realtime;
pub mod records;
pub mod social;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

use quest_core::CoreResult;
use quest_core::checkin::CheckInEngine;
use quest_core::chat::ChatService;
use quest_core::follow::FollowGraph;
use quest_core::ids::IdAllocator;
use quest_db::Database;
use quest_gateway::Gateway;
use quest_gateway::blocking::run_blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub checkins: CheckInEngine,
    pub follows: FollowGraph,
    pub gateway: Gateway,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
}

/// Knobs the binary reads from the environment.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub jwt_secret: String,
    pub storage_timeout: Duration,
    pub upload_dir: PathBuf,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, ids: Arc<IdAllocator>, settings: ApiSettings) -> AppState {
        let chat = ChatService::new(db.clone(), ids.clone());
        Arc::new(Self {
            checkins: CheckInEngine::new(db.clone(), ids),
            follows: FollowGraph::new(db),
            gateway: Gateway::new(chat, settings.storage_timeout),
            jwt_secret: settings.jwt_secret,
            upload_dir: settings.upload_dir,
        })
    }

    pub fn chat(&self) -> &ChatService {
        &self.gateway.chat
    }

    /// Runs a core call off the async runtime, bounded by the storage timeout.
    pub async fn blocking<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        run_blocking(self.gateway.storage_timeout, f).await
    }
}

/// Every HTTP route plus the `/ws` realtime upgrade.
pub fn router(state: AppState) -> Router {
    let record_routes = Router::new()
        .route(
            "/record/submit",
            post(records::submit_record).layer(DefaultBodyLimit::max(records::MAX_UPLOAD_BODY)),
        )
        .route("/record/check", get(records::check_completion))
        .route("/record/audit", post(records::audit_record))
        .route("/record/audit/batch", post(records::audit_batch))
        .route("/record/user/list", get(records::user_records))
        .route("/record/task/list", get(records::task_records))
        .route("/record/audit/list", get(records::audit_list))
        .route("/record/delete/batch", post(records::delete_batch))
        .route("/record/{id}", delete(records::delete_record))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/social/follow", post(social::follow))
        .route("/social/unfollow", post(social::unfollow))
        .route("/social/follow/check", get(social::check_follow))
        .route("/social/following", get(social::following))
        .route("/social/followers", get(social::followers))
        .route("/chat/sessions", get(chat::list_sessions).post(chat::create_session))
        .route("/chat/messages", get(chat::get_messages).post(chat::send_message))
        .route("/chat/sessions/{id}/read", post(chat::mark_read))
        .route("/chat/mutual-follow", get(chat::mutual_follow))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/ws", get(realtime::ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(record_routes)
        .merge(protected_routes)
        .merge(ws_route)
}
