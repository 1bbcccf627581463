//! Axum JSON API for board connections and on-demand imports.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use crux_adapters::BoardClient;
use crux_core::{BoardConnectionView, BoardType, ImportResult};
use crux_storage::ConnectionRegistry;
use crux_sync::{BoardImporter, ImportConfig};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

pub mod error;

pub use error::{ApiError, ApiResult};

pub const CRATE_NAME: &str = "crux-web";

/// Header carrying the authenticated caller; token issuance lives upstream.
pub const USER_HEADER: &str = "x-user-id";

const CREDENTIAL_MAX_CHARS: usize = 255;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub client: Arc<dyn BoardClient>,
    pub importer: Arc<BoardImporter>,
}

impl AppState {
    pub fn new(
        registry: ConnectionRegistry,
        client: Arc<dyn BoardClient>,
        importer: Arc<BoardImporter>,
    ) -> Self {
        Self {
            registry,
            client,
            importer,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?;
        raw.to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Unauthorized(format!("invalid {USER_HEADER} header")))
    }
}

#[derive(Debug, Serialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    pub board_type: String,
    pub username: String,
    pub password: String,
}

impl CreateConnectionRequest {
    fn validate(&self) -> ApiResult<BoardType> {
        let board_type: BoardType = self
            .board_type
            .parse()
            .map_err(|err: crux_core::UnknownVariant| ApiError::Validation(err.to_string()))?;
        for (field, value) in [("username", &self.username), ("password", &self.password)] {
            let len = value.chars().count();
            if len == 0 || len > CREDENTIAL_MAX_CHARS {
                return Err(ApiError::Validation(format!(
                    "{field} must be between 1 and {CREDENTIAL_MAX_CHARS} characters"
                )));
            }
        }
        Ok(board_type)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/board-connections",
            get(list_connections_handler).post(create_connection_handler),
        )
        .route("/board-connections/{id}", delete(delete_connection_handler))
        .route("/board-connections/{id}/sync", post(sync_connection_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("CRUX_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = ImportConfig::from_env();
    let services = crux_sync::connect_from_env(&config).await?;

    let scheduler = crux_sync::maybe_build_scheduler(
        &config,
        services.registry.clone(),
        services.importer.clone(),
    )
    .await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!(cron = %config.sync_cron, "scheduled board sync enabled");
    }

    let state = AppState::new(services.registry, services.client, services.importer);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn list_connections_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Json<DataEnvelope<Vec<BoardConnectionView>>>> {
    let data = state.registry.list(user_id).await?;
    Ok(Json(DataEnvelope { data }))
}

async fn create_connection_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<CreateConnectionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload.map_err(|err| ApiError::Validation(err.body_text()))?;
    let board_type = req.validate()?;
    if board_type != state.client.board_type() {
        return Err(ApiError::Validation(format!(
            "only {} boards are currently supported",
            state.client.board_type().display_name()
        )));
    }

    let session = state
        .client
        .authenticate(&req.username, &req.password)
        .await
        .map_err(ApiError::BoardLogin)?;
    let board_user_id = (session.vendor_user_id != 0).then(|| session.vendor_user_id.to_string());

    let view = state
        .registry
        .connect(user_id, board_type, &req.username, &req.password, board_user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(DataEnvelope { data: view })))
}

async fn delete_connection_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.registry.disconnect(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_connection_handler(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DataEnvelope<ImportResult>>> {
    let data = state.importer.import_history(user_id, id).await?;
    Ok(Json(DataEnvelope { data }))
}
