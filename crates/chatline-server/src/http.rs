//! HTTP API.
//!
//! A thin request/response layer over the shared stores: post and page
//! through channel messages, and list who is online in a channel. Every
//! request passes the per-IP rate limiter.

use crate::hub::Hub;
use crate::metrics;
use crate::rate_limit::RateLimiter;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, ConnectInfo, Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use chatline_core::{validate_channel_name, Message, OnlineUser, SentMessage, DEFAULT_PAGE_AMOUNT};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Response header carrying the caller's rate-limit usage.
pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-usage";

/// Shared HTTP state.
#[derive(Debug)]
pub struct AppState {
    /// The stores shared with live-update sessions.
    pub hub: Arc<Hub>,
    /// Per-IP request limiter.
    pub limiter: RateLimiter,
}

impl AppState {
    /// Create HTTP state over `hub`.
    #[must_use]
    pub fn new(hub: Arc<Hub>, limiter: RateLimiter) -> Self {
        Self { hub, limiter }
    }
}

/// API errors, rendered as `{"Error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    RateLimited,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "Error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default = "default_amount")]
    amount: usize,
    #[serde(default)]
    offset: usize,
}

fn default_amount() -> usize {
    DEFAULT_PAGE_AMOUNT
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/online", any(missing_channel))
        .route("/online/:channel", get(online).fallback(get_only))
        .route("/channel", any(missing_channel))
        .route(
            "/channel/:channel",
            get(get_messages).post(post_message).fallback(get_or_post_only),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// Serve the API on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {}", addr);
    }

    let janitor = tokio::spawn(prune_limiter(state.clone(), cancel.clone()));
    let app = router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.clone().cancelled_owned())
    .await;

    cancel.cancel();
    let _ = janitor.await;
    info!("HTTP API stopped");
    result
}

/// Periodically forget idle addresses.
async fn prune_limiter(state: Arc<AppState>, cancel: CancellationToken) {
    let period = state.limiter.window().max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let pruned = state.limiter.prune_idle();
                if pruned > 0 {
                    debug!(pruned, "Pruned idle rate-limit entries");
                }
            }
        }
    }
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let ip = addr.ip();
    let decision = state.limiter.check(ip);
    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(%ip, usage = %decision.usage(), "Rate limited");
        metrics::record_rate_limited();
        ApiError::RateLimited.into_response()
    };

    if let Ok(value) = HeaderValue::from_str(&decision.usage()) {
        response.headers_mut().insert(RATE_LIMIT_HEADER, value);
    }
    response
}

fn channel_name(channel: String) -> Result<String, ApiError> {
    validate_channel_name(&channel).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(channel)
}

async fn index() -> Html<&'static str> {
    Html("<h1>Chat API Service</h1>")
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.hub.bus.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online": state.hub.presence.count(),
        "channels": stats.channel_count,
        "messages": stats.message_count,
    }))
}

async fn online(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> Result<Json<Vec<OnlineUser>>, ApiError> {
    let channel = channel_name(channel)?;
    let users = state
        .hub
        .presence
        .list_online(&channel)
        .iter()
        .map(|user| OnlineUser::clone(user))
        .collect();
    Ok(Json(users))
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let channel = channel_name(channel)?;
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let messages = state
        .hub
        .bus
        .get_messages(&channel, params.amount, params.offset)
        .iter()
        .map(|message| Message::clone(message))
        .collect();
    Ok(Json(messages))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    body: Bytes,
) -> Result<Json<Message>, ApiError> {
    let channel = channel_name(channel)?;
    let sent: SentMessage = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid message: {}", e)))?;

    let message = state.hub.bus.add_message(&channel, sent);
    metrics::record_message_posted();
    debug!(channel = %channel, id = %message.id, "Message posted");
    Ok(Json(Message::clone(&message)))
}

async fn missing_channel() -> ApiError {
    ApiError::BadRequest("No channel specified (Ex. /channel/SomeRandomChannel)".to_string())
}

async fn get_only() -> ApiError {
    ApiError::BadRequest("Only GET requests are allowed".to_string())
}

async fn get_or_post_only() -> ApiError {
    ApiError::BadRequest("Only GET and POST requests are allowed".to_string())
}

async fn not_found() -> ApiError {
    ApiError::NotFound("That endpoint does not exist".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Method;
    use tower::ServiceExt;

    fn state(max_requests: usize) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(Hub::new()),
            RateLimiter::new(max_requests, Duration::from_secs(60)),
        ))
    }

    fn app(state: &Arc<AppState>) -> Router {
        router(state.clone()).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 5000))))
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Response<Bytes>) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (status, Response::from_parts(parts, bytes))
    }

    fn json(response: &Response<Bytes>) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_index() {
        let state = state(60);
        let (status, response) = call(app(&state), Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"<h1>Chat API Service</h1>");
    }

    #[tokio::test]
    async fn test_post_then_page_messages() {
        let state = state(60);

        let (status, response) = call(
            app(&state),
            Method::POST,
            "/channel/lobby",
            r#"{"CreatorName":"alice","Text":"hello","Signature":"c2ln"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let posted = json(&response);
        assert_eq!(posted["CreatorName"], "alice");
        assert_eq!(posted["Signature"], "c2ln");
        assert!(posted["MessageId"].is_string());
        assert!(posted["CreatedAt"].is_u64());

        for i in 0..3 {
            state.hub.bus.publish("lobby", Message::new("bob", format!("m{i}"), ""));
        }

        let (status, response) = call(
            app(&state),
            Method::GET,
            "/channel/lobby?amount=2&offset=1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page = json(&response);
        let texts: Vec<_> = page
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["Text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, ["m1", "m2"]);

        let (_, response) = call(app(&state), Method::GET, "/channel/lobby", "").await;
        assert_eq!(json(&response).as_array().unwrap().len(), 4);

        let (_, response) = call(app(&state), Method::GET, "/channel/empty", "").await;
        assert_eq!(json(&response), serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_post_notifies_subscribers() {
        let state = state(60);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = state.hub.bus.subscribe(move |event: &chatline_core::MessageEvent| {
            let _ = tx.send(event.channel.clone());
        });

        let (status, _) = call(
            app(&state),
            Method::POST,
            "/channel/games",
            r#"{"CreatorName":"alice","Text":"gg","Signature":""}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap(), "games");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = state(60);

        let (status, response) = call(app(&state), Method::POST, "/channel/lobby", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&response)["Error"].as_str().unwrap().starts_with("Invalid message"));

        let (status, _) = call(app(&state), Method::GET, "/channel/lobby?amount=-1", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, response) = call(app(&state), Method::DELETE, "/channel/lobby", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&response)["Error"], "Only GET and POST requests are allowed");

        let (status, _) = call(app(&state), Method::GET, "/channel", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app(&state), Method::GET, "/channel/bad%0Aname", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.hub.bus.stats().channel_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let state = state(60);
        let (status, response) = call(app(&state), Method::GET, "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json(&response),
            serde_json::json!({ "Error": "That endpoint does not exist" })
        );
    }

    #[tokio::test]
    async fn test_online_lists_channel_members() {
        let state = state(60);
        state
            .hub
            .presence
            .connect(Arc::new(OnlineUser::new("alice", "key-a", "lobby")));
        state
            .hub
            .presence
            .connect(Arc::new(OnlineUser::new("bob", "key-b", "games")));

        let (status, response) = call(app(&state), Method::GET, "/online/lobby", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&response),
            serde_json::json!([{ "Username": "alice", "PublicKey": "key-a", "Channel": "lobby" }])
        );

        let (status, _) = call(app(&state), Method::POST, "/online/lobby", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let state = state(2);

        let (status, response) = call(app(&state), Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[RATE_LIMIT_HEADER], "1/2");

        let (_, response) = call(app(&state), Method::GET, "/nope", "").await;
        assert_eq!(response.headers()[RATE_LIMIT_HEADER], "2/2");

        let (status, response) = call(app(&state), Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RATE_LIMIT_HEADER], "2/2");
        assert_eq!(json(&response)["Error"], "Rate limit exceeded");

        // A different address is counted separately.
        let other = router(state.clone()).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 2], 5000))));
        let (status, response) = call(other, Method::GET, "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[RATE_LIMIT_HEADER], "1/2");

        assert_eq!(state.limiter.tracked(), 2);
        assert_eq!(state.limiter.usage("10.0.0.1".parse().unwrap()), 2);
        assert_eq!(state.limiter.usage("10.0.0.2".parse().unwrap()), 1);
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state(60), cancel.clone()));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
