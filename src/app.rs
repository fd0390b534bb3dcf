//! HTTP surface of the sync service.
//!
//! Every route lives under `/api/v1/` and answers with
//! `{ "success": bool, "message": string, "value": [...] }`. The caller's
//! identity arrives in the `X-Client` header, set by the authenticating
//! proxy in front of this server.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::error::SyncError;
use crate::registry::{Sheet, SheetRef};
use crate::service::SheetService;
use crate::store::{FileStore, UpdateStore};
use crate::update_log::{Delta, UpdateId};

pub const CLIENT_HEADER: &str = "x-client";

/// Request body and response record: a sheet, an update ID and a payload.
/// Fields a route does not use may be left out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Argument {
    pub publisher: String,
    pub sheet: String,
    pub id: UpdateId,
    pub payload: String,
}

impl Argument {
    fn sheet_ref(&self) -> SheetRef {
        SheetRef::new(&self.publisher, &self.sheet)
    }

    fn publisher(publisher: impl Into<String>) -> Self {
        Argument {
            publisher: publisher.into(),
            ..Default::default()
        }
    }

    fn from_sheet(sheet: &Sheet) -> Self {
        Argument {
            publisher: sheet.owner.clone(),
            sheet: sheet.name.clone(),
            ..Default::default()
        }
    }

    fn from_delta(sheet_ref: SheetRef, delta: Delta) -> Self {
        Argument {
            publisher: sheet_ref.publisher,
            sheet: sheet_ref.sheet,
            id: delta.last_id,
            payload: delta.payload,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    pub value: Vec<Argument>,
}

impl ApiResponse {
    fn ok(message: impl Into<String>, value: Vec<Argument>) -> Json<Self> {
        Json(ApiResponse {
            success: true,
            message: message.into(),
            value,
        })
    }
}

#[derive(Debug)]
pub enum ApiError {
    MissingClient,
    Sync(SyncError),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::MissingClient => (
                StatusCode::UNAUTHORIZED,
                format!("missing {} header", CLIENT_HEADER),
            ),
            ApiError::Sync(e) => {
                let status = match &e {
                    SyncError::Validation(_)
                    | SyncError::Format(_)
                    | SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    SyncError::Cell(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    SyncError::NotFound(_) => StatusCode::NOT_FOUND,
                    SyncError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                    SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    warn!("request failed: {}", e);
                }
                (status, e.to_string())
            }
        };

        let body = ApiResponse {
            success: false,
            message,
            value: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<ApiResponse>, ApiError>;
type AppState<S> = State<Arc<SheetService<S>>>;

fn caller(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(CLIENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|client| !client.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingClient)
}

pub fn router<S: UpdateStore + 'static>(service: Arc<SheetService<S>>) -> Router {
    Router::new()
        .route("/api/v1/register", post(register::<S>))
        .route("/api/v1/getPublishers", get(get_publishers::<S>))
        .route("/api/v1/createSheet", post(create_sheet::<S>))
        .route("/api/v1/getSheets", post(get_sheets::<S>))
        .route("/api/v1/deleteSheet", post(delete_sheet::<S>))
        .route(
            "/api/v1/getUpdatesForSubscription",
            post(get_updates_for_subscription::<S>),
        )
        .route(
            "/api/v1/getUpdatesForPublished",
            post(get_updates_for_published::<S>),
        )
        .route("/api/v1/updatePublished", post(update_published::<S>))
        .route("/api/v1/updateSubscription", post(update_subscription::<S>))
        .route("/api/v1/evaluate", post(evaluate::<S>))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Opens the file store named by `config` and serves until ctrl-c, then
/// writes a cache checkpoint if one is configured.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::open(&config.database_dir).await?;
    let service = Arc::new(SheetService::from_config(store, &config));
    serve(service, &config.bind_addr).await?;
    Ok(())
}

pub async fn serve<S: UpdateStore + 'static>(
    service: Arc<SheetService<S>>,
    bind_addr: &str,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = service.checkpoint().await {
        warn!("could not write cache checkpoint: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutting down"),
        Err(e) => {
            warn!("cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

async fn register<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
) -> ApiResult {
    let client = caller(&headers)?;
    let message = if service.register(&client).await? {
        "registered"
    } else {
        "already registered"
    };
    Ok(ApiResponse::ok(message, vec![Argument::publisher(client)]))
}

async fn get_publishers<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
) -> ApiResult {
    caller(&headers)?;
    let publishers = service.publishers().await?;
    let value = publishers.into_iter().map(Argument::publisher).collect();
    Ok(ApiResponse::ok("publishers", value))
}

async fn create_sheet<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let sheet = service.create_sheet(&client, &argument.sheet_ref()).await?;
    Ok(ApiResponse::ok("sheet created", vec![Argument::from_sheet(&sheet)]))
}

async fn get_sheets<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let sheets = service.sheets(&argument.publisher, &client).await?;
    let value = sheets.iter().map(Argument::from_sheet).collect();
    Ok(ApiResponse::ok("sheets", value))
}

async fn delete_sheet<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    service.delete_sheet(&client, &argument.sheet_ref()).await?;
    Ok(ApiResponse::ok("sheet deleted", Vec::new()))
}

async fn get_updates_for_subscription<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let sheet_ref = argument.sheet_ref();
    let delta = service
        .subscription_delta(&client, &sheet_ref, argument.id)
        .await?;
    Ok(ApiResponse::ok("updates", vec![Argument::from_delta(sheet_ref, delta)]))
}

async fn get_updates_for_published<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let sheet_ref = argument.sheet_ref();
    let delta = service
        .published_delta(&client, &sheet_ref, argument.id)
        .await?;
    Ok(ApiResponse::ok("updates", vec![Argument::from_delta(sheet_ref, delta)]))
}

async fn update_published<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let entry = service
        .publish(&client, &argument.sheet_ref(), &argument.payload)
        .await?;
    let value = Argument {
        id: entry.id,
        ..argument
    };
    Ok(ApiResponse::ok("published", vec![value]))
}

async fn update_subscription<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let entry = service
        .propose(&client, &argument.sheet_ref(), &argument.payload)
        .await?;
    let value = Argument {
        id: entry.id,
        ..argument
    };
    Ok(ApiResponse::ok("proposed", vec![value]))
}

/// Evaluates `payload` as a term against the sheet's accepted state.
async fn evaluate<S: UpdateStore + 'static>(
    State(service): AppState<S>,
    headers: HeaderMap,
    Json(argument): Json<Argument>,
) -> ApiResult {
    let client = caller(&headers)?;
    let value = service
        .evaluate_in_sheet(&client, &argument.sheet_ref(), &argument.payload)
        .await?;
    let result = Argument {
        payload: value.to_string(),
        ..argument
    };
    Ok(ApiResponse::ok("evaluated", vec![result]))
}
