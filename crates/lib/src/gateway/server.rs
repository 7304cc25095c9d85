//! HTTP control server: liveness routes plus `/api` behind rate limiter and auth gate.

use crate::agent::Agent;
use crate::command::PostApplyRunner;
use crate::config::{self, keys, Config};
use crate::gateway::auth::ApiAuth;
use crate::gateway::protocol::{ApiResponse, CheckParams, SetConfigParams};
use crate::gateway::rate_limit::{RateLimiter, SWEEP_INTERVAL};
use crate::sanitize;
use crate::store::{bool_value, ConfigStore};
use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const BANNER: &str = "Hello hostguard!";

/// How long `stop` waits for in-flight requests before aborting the server task.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Shared state for every route and gate.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<dyn ConfigStore>,
    pub runner: Arc<PostApplyRunner>,
    pub limiter: Arc<RateLimiter>,
    pub auth: Arc<ApiAuth>,
}

impl ApiState {
    pub fn new(config: Arc<dyn ConfigStore>, runner: Arc<PostApplyRunner>, auth: ApiAuth) -> Self {
        Self {
            config,
            runner,
            limiter: Arc::new(RateLimiter::default()),
            auth: Arc::new(auth),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }
}

/// Build the router. `/` and `/remote-test` bypass both gates; everything under `/api`
/// passes the rate limiter first, then the auth gate.
pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/status", get(api_status))
        .route("/config/:key", get(get_config).post(set_config))
        .route("/cmd_history", get(list_history).delete(clear_history))
        .route("/cmd_history/run", post(run_command))
        .route("/check/url", post(check_url))
        .route("/check/hosts", post(check_hosts))
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth_gate))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_gate));

    Router::new()
        .route("/", get(banner))
        .route("/remote-test", get(remote_test))
        .nest("/api", api)
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn access_log(req: Request, next: Next) -> Response {
    let ua = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    log::info!("> {} {} \"{}\"", req.method(), req.uri(), ua);
    next.run(req).await
}

async fn rate_limit_gate(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let key = client_key(&req);
    let decision = state.limiter.check(&key);
    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        let wait_ms = (decision.reset_at - Utc::now()).num_milliseconds().max(0);
        let retry_after = (wait_ms + 999) / 1000;
        log::debug!("rate limit exceeded for {}, retry in {}s", key, retry_after);
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::too_many(retry_after)),
        )
            .into_response()
    };
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(state.limiter.max_requests()));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Ok(v) = HeaderValue::from_str(&reset) {
        headers.insert("x-ratelimit-reset", v);
    }
    response
}

async fn auth_gate(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    match state.auth.authorize(req.headers()).await {
        Ok(()) => next.run(req).await,
        Err(denied) => {
            log::debug!("api request denied: {}", denied.message());
            (denied.status(), Json(ApiResponse::err(denied.message()))).into_response()
        }
    }
}

/// GET / — liveness banner.
async fn banner() -> &'static str {
    BANNER
}

/// GET /remote-test — reachability check with the server's current time.
async fn remote_test() -> String {
    format!("# remote-test\n# {}", chrono::Local::now().to_rfc2822())
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn internal(e: impl std::fmt::Display) -> ApiResult {
    log::error!("api handler failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::err(e.to_string())),
    )
}

async fn api_status(State(state): State<ApiState>) -> ApiResult {
    let payload = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "counters": state.runner.counters().snapshot(),
    });
    (StatusCode::OK, Json(ApiResponse::ok(payload)))
}

async fn get_config(State(state): State<ApiState>, Path(key): Path<String>) -> ApiResult {
    match state.config.get(&key).await {
        Ok(v) => (
            StatusCode::OK,
            Json(ApiResponse::ok(v.unwrap_or(serde_json::Value::Null))),
        ),
        Err(e) => internal(e),
    }
}

async fn set_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(params): Json<SetConfigParams>,
) -> ApiResult {
    match state.config.set(&key, params.value).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::done())),
        Err(e) => internal(e),
    }
}

async fn list_history(State(state): State<ApiState>) -> ApiResult {
    match state.runner.history().all().await {
        Ok(all) => (StatusCode::OK, Json(ApiResponse::ok(json!(all)))),
        Err(e) => internal(e),
    }
}

async fn clear_history(State(state): State<ApiState>) -> ApiResult {
    match state.runner.history().clear().await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::done())),
        Err(e) => internal(e),
    }
}

/// POST /api/cmd_history/run — same path as a hosts-apply event.
async fn run_command(State(state): State<ApiState>) -> ApiResult {
    let result = state.runner.run_after_apply().await;
    (StatusCode::OK, Json(ApiResponse::ok(json!(result))))
}

fn verdict(outcome: Result<(), String>) -> ApiResult {
    match outcome {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::done())),
        Err(reason) => (StatusCode::BAD_REQUEST, Json(ApiResponse::err(reason))),
    }
}

/// POST /api/check/url — is this a fetchable public http(s) URL for remote hosts.
async fn check_url(Json(params): Json<CheckParams>) -> ApiResult {
    verdict(sanitize::is_valid_url(&params.value))
}

/// POST /api/check/hosts — is this acceptable hosts file content.
async fn check_hosts(Json(params): Json<CheckParams>) -> ApiResult {
    verdict(sanitize::validate_hosts_content(&params.value))
}

async fn api_not_found() -> ApiResult {
    (StatusCode::NOT_FOUND, Json(ApiResponse::err("Not found")))
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Listener lifecycle. `start` and `stop` never return errors; failures are logged.
pub struct HttpServer {
    state: ApiState,
    port: u16,
    running: Option<Running>,
}

impl HttpServer {
    /// Port 0 picks a free port (see [`HttpServer::local_addr`]).
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state,
            port,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind to 127.0.0.1 when `local_only`, else all interfaces, and start serving.
    /// Returns false if the bind fails.
    pub async fn start(&mut self, local_only: bool) -> bool {
        if let Some(ref r) = self.running {
            log::warn!("HTTP API already listening on {}", r.local_addr);
            return true;
        }
        let addr = SocketAddr::new(config::bind_ip(local_only), self.port);
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                log::error!("binding HTTP API to {} failed: {}", addr, e);
                return false;
            }
        };
        let local_addr = listener.local_addr().unwrap_or(addr);
        log::info!("HTTP API listening on http://{}", local_addr);
        if local_only {
            log::info!("HTTP API is only accessible from localhost");
        } else {
            log::warn!("HTTP API is accessible from all network interfaces; use a firewall to restrict access");
        }

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = router(self.state.clone());
        let task = tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
            if let Err(e) = served {
                log::error!("HTTP API server exited: {}", e);
            }
        });
        let sweeper = self.state.limiter.spawn_sweeper(SWEEP_INTERVAL);
        self.running = Some(Running {
            local_addr,
            shutdown,
            task,
            sweeper,
        });
        true
    }

    /// Close the listener. No-op if never started; safe to call twice.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.sweeper.abort();
        if running.shutdown.send(()).is_err() {
            log::debug!("HTTP API server task already finished");
        }
        let mut task = running.task;
        match tokio::time::timeout(STOP_GRACE, &mut task).await {
            Ok(Ok(())) => log::info!("HTTP API stopped"),
            Ok(Err(e)) => log::error!("HTTP API server task failed: {}", e),
            Err(_) => {
                log::warn!("HTTP API did not drain within {:?}, aborting", STOP_GRACE);
                task.abort();
            }
        }
    }
}

/// Whether the API should bind loopback only: CLI override, then store `http_api_only_local`, then config file.
async fn resolve_local_only(agent: &Agent, config: &Config, override_local: Option<bool>) -> bool {
    if let Some(v) = override_local {
        return v;
    }
    match agent.store.get(keys::HTTP_API_ONLY_LOCAL).await {
        Ok(v) => bool_value(v.as_ref()).unwrap_or(config.api.only_local),
        Err(_) => config.api.only_local,
    }
}

async fn api_enabled(agent: &Agent, config: &Config) -> bool {
    if config.api.enabled {
        return true;
    }
    match agent.store.get(keys::HTTP_API_ON).await {
        Ok(v) => bool_value(v.as_ref()).unwrap_or(false),
        Err(_) => false,
    }
}

/// Run the HTTP API until Ctrl+C / SIGTERM.
/// Fails when the API is not enabled (config `api.enabled` or store `http_api_on`) or the bind fails.
pub async fn run_http_api(
    config: Config,
    config_path: PathBuf,
    override_local: Option<bool>,
) -> Result<()> {
    let agent = Agent::open(&config, &config_path).await;
    if !api_enabled(&agent, &config).await {
        anyhow::bail!(
            "HTTP API is disabled (set api.enabled in {} or `hostguard config set {} true`)",
            config_path.display(),
            keys::HTTP_API_ON
        );
    }
    let local_only = resolve_local_only(&agent, &config, override_local).await;

    let auth = ApiAuth::new(agent.store.clone()).with_file_token(config.api.key.clone());
    if auth.configured_secret().await.is_none() {
        log::warn!(
            "no API key configured ({} or {}); every /api request will be denied",
            config::API_KEY_ENV,
            keys::HTTP_API_KEY
        );
    }
    let state = ApiState::new(agent.store.clone(), agent.runner.clone(), auth);
    let mut server = HttpServer::new(state, config.api.port);
    if !server.start(local_only).await {
        anyhow::bail!("could not bind HTTP API on port {}", config.api.port);
    }

    shutdown_signal().await;
    log::info!("shutdown signal received, stopping HTTP API");
    server.stop().await;
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
