use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use relay_config::Config;
use relay_contracts::{
    CreateRequestBody, CreatedResponse, Decision, HealthResponse, NotifyBody, OkResponse,
    Request as RelayRequest, RespondBody, ResponseView, StreamEvent, API_VERSION,
};
use relay_kernel::{
    Change, ChangeSink, Clock, MonotonicClock, NewRequest, Policy, Registry, RegistryError,
    TickScheduler, UuidV4Ids,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

mod logging;

pub use logging::init_logging;

const STREAM_CAPACITY: usize = 64;
const DEFAULT_NOTICE_TITLE: &str = "Notification";
const DEFAULT_NOTICE_MESSAGE: &str = "Task finished";

type SharedRegistry = Arc<Mutex<Registry>>;

type ApiError = (StatusCode, Json<Value>);

pub async fn serve(cfg: Config) -> Result<(), String> {
    relay_config::validate_runtime_support(&cfg).map_err(|e| e.to_string())?;
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let state = AppState::new(cfg, Arc::new(MonotonicClock::new()));
    let ticker = state.spawn_tick_driver();
    let app = state.router();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "prompt relay listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"));
    ticker.abort();
    result
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    build_app_with_clock(cfg, Arc::new(MonotonicClock::new())).await
}

pub async fn build_app_with_clock(cfg: Config, clock: Arc<dyn Clock>) -> Result<Router, String> {
    relay_config::validate_runtime_support(&cfg).map_err(|e| e.to_string())?;
    Ok(AppState::new(cfg, clock).router())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Everything the gateway shares across handlers and the tick driver.
#[derive(Clone)]
pub struct AppState {
    cfg: Arc<Config>,
    registry: SharedRegistry,
    changes: broadcast::Sender<StreamEvent>,
}

impl AppState {
    pub fn new(cfg: Config, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(STREAM_CAPACITY);
        let policy = Policy {
            pending_timeout_ms: cfg.registry.pending_timeout_ms,
            retention_ms: cfg.registry.retention_ms,
        };
        let sink = Arc::new(BroadcastSink {
            tx: changes.clone(),
        });
        let registry = Registry::new(policy, clock, Arc::new(UuidV4Ids), sink);
        Self {
            cfg: Arc::new(cfg),
            registry: Arc::new(Mutex::new(registry)),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.changes.subscribe()
    }

    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/v1/permission-request", post(create_request))
            .route("/v1/permission-request/{id}/response", get(poll_response))
            .route("/v1/permission-request/{id}/respond", post(respond))
            .route("/v1/permission-request/{id}/cancel", post(cancel))
            .route("/v1/permission-requests", get(list_requests))
            .route("/v1/notify", post(notify))
            .route("/v1/stream", get(stream))
            .route_layer(middleware::from_fn_with_state(self.clone(), require_bearer));

        Router::new()
            .route("/v1/healthz", get(healthz))
            .merge(protected)
            .with_state(self.clone())
    }

    /// Runs the expiry/cleanup sweeps on the configured cadence.
    pub fn spawn_tick_driver(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let mut scheduler = TickScheduler::new(self.cfg.scheduler.cleanup_interval_ms);
        let period = Duration::from_millis(self.cfg.scheduler.tick_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let report = {
                    let mut registry = registry.lock().await;
                    scheduler.tick(&mut registry)
                };
                if report.cleanup_ran {
                    debug!(
                        expired = report.expired,
                        removed = report.removed,
                        "cleanup sweep finished"
                    );
                }
            }
        })
    }

    fn notice(&self, title: String, message: String, origin_label: Option<String>) {
        let _ = self.changes.send(StreamEvent::Notice {
            title,
            message,
            origin_label,
            ts: now_rfc3339(),
        });
    }
}

/// Forwards registry changes to stream subscribers. Dropped when nobody listens.
struct BroadcastSink {
    tx: broadcast::Sender<StreamEvent>,
}

impl ChangeSink for BroadcastSink {
    fn publish(&self, change: Change) {
        let _ = self.tx.send(StreamEvent::Changed {
            change: change.kind().to_string(),
            request_id: change.id().to_string(),
            status: change.status(),
            ts: now_rfc3339(),
        });
    }
}

async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.cfg.auth.token.as_deref() else {
        return next.run(req).await;
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if presented == Some(expected) {
        next.run(req).await
    } else {
        api_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
        )
        .into_response()
    }
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let policy = state.registry.lock().await.policy();
    Json(HealthResponse {
        status: "ok".to_string(),
        api_version: API_VERSION.to_string(),
        request_timeout_ms: policy.pending_timeout_ms,
    })
}

async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let new = compose_request(&body);
    let created = {
        let mut registry = state.registry.lock().await;
        registry.create(new)
    }
    .map_err(registry_error)?;

    if let Some(evicted) = &created.evicted {
        warn!(request_id = %evicted, "pending request dropped to make room");
    }
    let request = created.request;
    info!(
        request_id = %request.id,
        subtitle = %request.subtitle,
        choices = request.choices.len(),
        "permission request received"
    );
    Ok(Json(CreatedResponse {
        id: request.id,
        tool_name: request.tool_name,
        message: request.message,
        expires_at: request.expires_at,
    }))
}

async fn poll_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResponseView>, ApiError> {
    let request = state
        .registry
        .lock()
        .await
        .get(&id)
        .map_err(registry_error)?;
    Ok(Json(ResponseView::from(&request)))
}

async fn respond(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Result<Json<OkResponse>, ApiError> {
    let result = match (body.choice, body.response.as_deref()) {
        (Some(number), _) => state.registry.lock().await.choose(&id, number),
        (None, Some(value)) => {
            let decision = Decision::from_wire(value).ok_or_else(|| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    "response must be allow, deny or allow_all",
                )
            })?;
            state.registry.lock().await.decide(&id, decision)
        }
        (None, None) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "response or choice is required",
            ))
        }
    };
    let request = result.map_err(registry_error)?;

    info!(
        request_id = %id,
        status = request.status.as_str(),
        action = request.resolved_action.as_deref().unwrap_or(""),
        source = body.source.as_deref().unwrap_or("unknown"),
        "response recorded"
    );
    Ok(Json(OkResponse { ok: true }))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state
        .registry
        .lock()
        .await
        .cancel(&id)
        .map_err(registry_error)?;
    info!(request_id = %id, "request cancelled by producer");
    Ok(Json(OkResponse { ok: true }))
}

async fn list_requests(State(state): State<AppState>) -> Json<Vec<RelayRequest>> {
    Json(state.registry.lock().await.list())
}

/// Publishes an informational notice unless the same pane still has a
/// prompt waiting, so the notice cannot bury it.
async fn notify(
    State(state): State<AppState>,
    Json(body): Json<NotifyBody>,
) -> Json<OkResponse> {
    let title = non_empty(body.title).unwrap_or_else(|| DEFAULT_NOTICE_TITLE.to_string());
    let message = non_empty(body.message).unwrap_or_else(|| DEFAULT_NOTICE_MESSAGE.to_string());
    let origin_label = non_empty(body.origin_label);

    if let Some(key) = non_empty(body.correlation_key) {
        if state.registry.lock().await.has_pending(&key) {
            info!(correlation_key = %key, "notice skipped, prompt still pending");
            return Json(OkResponse { ok: true });
        }
    }
    info!(%title, origin = origin_label.as_deref().unwrap_or(""), "notice received");
    state.notice(title, message, origin_label);
    Json(OkResponse { ok: true })
}

async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = BroadcastStream::new(state.subscribe()).filter_map(|msg| {
        let event = msg.ok()?;
        let name = match &event {
            StreamEvent::Changed { .. } => "changed",
            StreamEvent::Notice { .. } => "notice",
        };
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(name).data(data)))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Builds the registry input from a hook payload: the most specific
/// description available becomes the message, the header the subtitle.
fn compose_request(body: &CreateRequestBody) -> NewRequest {
    let tool = body
        .tool_name
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or("Unknown")
        .to_string();
    let subtitle = body
        .header
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(&tool)
        .to_string();

    let input_field = |name: &str| {
        body.tool_input
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    };
    let mut message = if let Some(description) = body.description.as_deref().filter(|v| !v.is_empty())
    {
        description.to_string()
    } else if let Some(command) = input_field("command") {
        format!("$ {command}")
    } else if let Some(path) = input_field("file_path") {
        path.to_string()
    } else if let Some(message) = body.message.as_deref().filter(|v| !v.is_empty()) {
        message.to_string()
    } else {
        format!("Allow {tool} to run?")
    };

    if let Some(question) = body.prompt_question.as_deref().filter(|v| !v.is_empty()) {
        message.push('\n');
        message.push_str(question);
    }
    if body.has_tmux == Some(false) {
        message.push_str("\n(no terminal pane attached; answer locally)");
    }

    NewRequest {
        tool_name: tool,
        message,
        subtitle,
        choices: body.choices.clone(),
        correlation_key: body.correlation_key.clone(),
        origin_label: body.origin_label.clone(),
        timeout_ms: body
            .timeout
            .filter(|secs| *secs > 0)
            .map(|secs| secs.saturating_mul(1000)),
    }
}

fn registry_error(err: RegistryError) -> ApiError {
    let (status, code) = match &err {
        RegistryError::NotFound { .. } => (StatusCode::NOT_FOUND, "request.not_found"),
        RegistryError::AlreadyDecided { .. } => (StatusCode::CONFLICT, "request.already_decided"),
        RegistryError::InvalidChoice { .. } => (StatusCode::BAD_REQUEST, "request.invalid_choice"),
        RegistryError::MalformedChoices(_) => {
            (StatusCode::BAD_REQUEST, "request.malformed_choices")
        }
        RegistryError::StoreFull => (StatusCode::SERVICE_UNAVAILABLE, "request.store_full"),
    };
    api_error(status, code, &err.to_string())
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    (
        status,
        Json(json!({"error": {"code": code, "message": message}})),
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
