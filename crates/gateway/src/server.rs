use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Form, Json, Router,
        extract::{FromRequest, Path, Request, State},
        http::{HeaderMap, header},
        response::IntoResponse,
        routing::{get, post},
    },
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Map, Value, json},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
    wagate_channels::{LoopbackFactory, PairMode, TransportFactory, address::format_phone_number},
    wagate_config::{GatewayConfig, TransportKind},
    wagate_sessions::{SessionStore, StoreWriter},
};

use crate::{
    error::ApiError, lifecycle::SessionState, manager::SessionManager, state::GatewayState,
};

const RESTORE_ACK: &str = "Sessions initialized. Check the terminal for QR codes.";

// ── Request bodies ───────────────────────────────────────────────────────────

/// Request body given as JSON or `application/x-www-form-urlencoded`.
///
/// A missing or unrecognized content type reads as an empty body, leaving the
/// answer to field validation. Malformed bodies are rejected as
/// [`ApiError::InvalidBody`].
pub struct JsonOrForm<T>(pub T);

enum BodyKind {
    Json,
    Form,
    Empty,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return BodyKind::Empty;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime == "application/json" || mime.ends_with("+json") {
        BodyKind::Json
    } else if mime == "application/x-www-form-urlencoded" {
        BodyKind::Form
    } else {
        BodyKind::Empty
    }
}

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match body_kind(req.headers()) {
            BodyKind::Json => Json::<T>::from_request(req, state)
                .await
                .map(|Json(body)| Self(body))
                .map_err(|e| ApiError::InvalidBody(e.body_text())),
            BodyKind::Form => Form::<T>::from_request(req, state)
                .await
                .map(|Form(body)| Self(body))
                .map_err(|e| ApiError::InvalidBody(e.body_text())),
            BodyKind::Empty => serde_json::from_value(Value::Object(Map::new()))
                .map(Self)
                .map_err(|e| ApiError::InvalidBody(e.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub message: String,
}

impl SendMessageRequest {
    fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("sender", &self.sender),
            ("number", &self.number),
            ("message", &self.message),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::MissingField(field));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(restore_handler))
        .route("/health", get(health_handler))
        .route("/send-message", post(send_message_handler))
        .route("/sessions", get(list_sessions_handler).post(create_session_handler))
        .route("/sessions/{id}/qr", get(qr_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn transport_factory(config: &GatewayConfig) -> Arc<dyn TransportFactory> {
    match config.transport.kind {
        TransportKind::Loopback => {
            let mode = if config.transport.auto_pair {
                PairMode::Auto {
                    delay: Duration::from_millis(config.transport.pair_delay_ms),
                }
            } else {
                PairMode::Manual
            };
            Arc::new(LoopbackFactory::new(mode))
        },
    }
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let store = StoreWriter::spawn(SessionStore::new(&config.store.path));
    let factory = transport_factory(&config);
    let transport_name = factory.name().to_string();
    let manager = SessionManager::new(factory, store);
    let state = GatewayState::new(Arc::clone(&manager), config.transport.country_code.clone());

    if config.server.restore_on_boot {
        state.spawn_restore();
    }

    let app = build_gateway_app(Arc::clone(&state));

    let bind = config.server.bind.as_str();
    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let lines = [
        format!("wagate gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("store: {}", config.store.path.display()),
        format!("transport: {transport_name}"),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn restore_handler(State(state): State<Arc<GatewayState>>) -> &'static str {
    state.spawn_restore();
    RESTORE_ACK
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "sessions": state.manager.count().await,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn send_message_handler(
    State(state): State<Arc<GatewayState>>,
    JsonOrForm(req): JsonOrForm<SendMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    req.validate()?;
    let sender = req.sender.trim();
    let number = format_phone_number(&req.number, &state.country_code);

    let session = state
        .manager
        .lookup(sender)
        .await
        .ok_or_else(|| ApiError::UnknownSender(sender.to_string()))?;
    let client = session.client();

    let registered = client
        .is_registered_user(&number)
        .await
        .map_err(ApiError::TransportQuery)?;
    if !registered {
        return Err(ApiError::UnregisteredRecipient);
    }

    let response = client
        .send_message(&number, &req.message)
        .await
        .map_err(ApiError::TransportSend)?;
    info!(sender = %sender, to = %number, "message sent");
    Ok(Json(json!({ "status": true, "response": response })))
}

async fn list_sessions_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, ApiError> {
    let records = state.manager.stored_records().await?;
    let mut live: HashMap<String, (String, SessionState)> = state
        .manager
        .list()
        .await
        .into_iter()
        .map(|s| (s.id, (s.description, s.state)))
        .collect();

    let mut sessions: Vec<Value> = records
        .into_iter()
        .map(|r| {
            let live_state = live.remove(&r.id).map(|(_, live_state)| live_state);
            json!({
                "id": r.id,
                "description": r.description,
                "ready": r.ready,
                "state": live_state,
            })
        })
        .collect();
    // Live sessions whose record could not be persisted (or was removed).
    let mut unpersisted: Vec<_> = live.into_iter().collect();
    unpersisted.sort_by(|a, b| a.0.cmp(&b.0));
    sessions.extend(unpersisted.into_iter().map(|(id, (description, live_state))| {
        json!({
            "id": id,
            "description": description,
            "ready": false,
            "state": live_state,
        })
    }));

    Ok(Json(json!({ "status": true, "sessions": sessions })))
}

async fn create_session_handler(
    State(state): State<Arc<GatewayState>>,
    JsonOrForm(req): JsonOrForm<CreateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    let id = req.id.trim();
    if id.is_empty() {
        return Err(ApiError::MissingField("id"));
    }
    let session = state
        .manager
        .create_session(id, &req.description)
        .await
        .map_err(ApiError::Create)?;
    Ok(Json(json!({
        "status": true,
        "session": {
            "id": session.id,
            "description": session.description,
            "state": session.state(),
        },
    })))
}

async fn qr_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let challenge = match state.manager.lookup(&id).await {
        Some(session) => session.challenge(),
        None => None,
    };
    let qr = challenge.ok_or(ApiError::NoChallenge(id))?;
    Ok(Json(json!({ "status": true, "qr": qr })))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::{Body, to_bytes},
            http::{Method, StatusCode},
        },
        tower::ServiceExt,
        wagate_channels::{LoopbackFactory, LoopbackHandle, TransportEvent},
        wagate_sessions::SessionRecord,
    };

    struct TestApp {
        _dir: tempfile::TempDir,
        store: SessionStore,
        factory: Arc<LoopbackFactory>,
        state: Arc<GatewayState>,
    }

    fn test_app(initial: &[SessionRecord]) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        if !initial.is_empty() {
            store.write_all(initial).unwrap();
        }
        test_app_with(dir, store)
    }

    fn test_app_with(dir: tempfile::TempDir, store: SessionStore) -> TestApp {
        let factory = Arc::new(LoopbackFactory::manual());
        let manager = SessionManager::new(
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            StoreWriter::spawn(store.clone()),
        );
        TestApp {
            _dir: dir,
            store,
            factory,
            state: GatewayState::new(manager, "62"),
        }
    }

    impl TestApp {
        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
            let builder = axum::http::Request::builder().method(method).uri(uri);
            let req = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string())),
                None => builder.body(Body::empty()),
            }
            .unwrap();
            let resp = build_gateway_app(Arc::clone(&self.state))
                .oneshot(req)
                .await
                .unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, bytes.to_vec())
        }

        /// POST `body` to `/send-message` with an arbitrary content type.
        async fn post_raw(&self, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
            let mut builder = axum::http::Request::builder()
                .method(Method::POST)
                .uri("/send-message");
            if let Some(content_type) = content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            let req = builder.body(Body::from(body.to_string())).unwrap();
            let resp = build_gateway_app(Arc::clone(&self.state))
                .oneshot(req)
                .await
                .unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let (status, bytes) = self.call(method, uri, body).await;
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        /// Create `id` and walk it to Ready.
        async fn ready_session(&self, id: &str) -> Arc<LoopbackHandle> {
            let session = self.state.manager.create_session(id, "").await.unwrap();
            let mut watch = session.subscribe();
            let handle = self.factory.handle(id).unwrap();
            handle.emit(TransportEvent::Authenticated);
            handle.emit(TransportEvent::Ready);
            watch
                .wait_for(|s| *s == SessionState::Ready)
                .await
                .unwrap();
            handle
        }
    }

    fn send_body(sender: &str, number: &str) -> Option<Value> {
        Some(json!({ "sender": sender, "number": number, "message": "hi" }))
    }

    #[tokio::test]
    async fn root_acknowledges_and_restores() {
        let app = test_app(&[SessionRecord::new("s1", "d")]);
        let (status, body) = app.call(Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, RESTORE_ACK.as_bytes());

        tokio::time::timeout(Duration::from_secs(5), async {
            while app.state.manager.lookup("s1").await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_sender_is_422() {
        let app = test_app(&[]);
        let (status, body) = app
            .json(Method::POST, "/send-message", send_body("ghost", "6281234"))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], false);
        assert!(body["message"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn unknown_sender_wins_over_unregistered_number() {
        let app = test_app(&[]);
        let handle = app.ready_session("s1").await;
        let (status, body) = app
            .json(Method::POST, "/send-message", send_body("ghost", "0000"))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "The sender: ghost is not found!");
        assert_eq!(handle.lookup_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_number_never_sends() {
        let app = test_app(&[]);
        let handle = app.ready_session("s1").await;
        let (status, body) = app
            .json(Method::POST, "/send-message", send_body("s1", "6281234"))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body,
            json!({ "status": false, "message": "The number is not registered" })
        );
        assert_eq!(handle.lookup_count(), 1);
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn send_success_returns_receipt() {
        let app = test_app(&[]);
        let handle = app.ready_session("s1").await;
        handle.register("6281234@c.us");

        let (status, body) = app
            .json(Method::POST, "/send-message", send_body("s1", "081234"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], true);
        assert_eq!(body["response"]["to"], "6281234@c.us");
        assert_eq!(handle.sent()[0].body, "hi");
    }

    #[tokio::test]
    async fn send_failure_is_500_with_raw_payload() {
        let app = test_app(&[]);
        let handle = app.ready_session("s1").await;
        handle.register("6281234@c.us");
        handle.fail_sends(Some(json!({ "code": 429, "detail": "slow down" })));

        let (status, body) = app
            .json(Method::POST, "/send-message", send_body("s1", "6281234"))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({ "status": false, "response": { "code": 429, "detail": "slow down" } })
        );
    }

    #[tokio::test]
    async fn lookup_failure_is_500() {
        let app = test_app(&[]);
        // Created but never connected.
        app.state.manager.create_session("s1", "").await.unwrap();
        let (status, body) = app
            .json(Method::POST, "/send-message", send_body("s1", "6281234"))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["response"]["message"], "transport is not connected");
    }

    #[tokio::test]
    async fn empty_fields_are_rejected() {
        let app = test_app(&[]);
        let (status, body) = app
            .json(
                Method::POST,
                "/send-message",
                Some(json!({ "sender": "s1", "number": "", "message": "hi" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "number is required");
    }

    #[tokio::test]
    async fn form_bodies_are_accepted() {
        let app = test_app(&[]);
        let (status, body) = app
            .post_raw(
                Some("application/x-www-form-urlencoded"),
                "sender=ghost&number=6281234&message=hi",
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "The sender: ghost is not found!");
    }

    #[tokio::test]
    async fn malformed_bodies_answer_with_json() {
        let app = test_app(&[]);
        let (status, body) = app
            .post_raw(
                Some("application/json"),
                r#"{"sender":5,"number":"6281234","message":"hi"}"#,
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], false);
        assert!(body["message"].as_str().unwrap().contains("invalid type"));

        let (status, body) = app.post_raw(Some("application/json"), "not json").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], false);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn unknown_content_type_reads_as_empty_body() {
        let app = test_app(&[]);
        for content_type in [None, Some("text/plain")] {
            let (status, body) = app
                .post_raw(content_type, "sender=s1&number=1&message=hi")
                .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(
                body,
                json!({ "status": false, "message": "sender is required" })
            );
        }
    }

    #[tokio::test]
    async fn sender_is_trimmed_before_lookup() {
        let app = test_app(&[]);
        let handle = app.ready_session("s1").await;
        handle.register("6281234@c.us");

        let (status, body) = app
            .json(Method::POST, "/send-message", send_body(" s1 ", "6281234"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], true);
        assert_eq!(handle.sent().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_store_still_lists_live_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("plain-file");
        std::fs::write(&not_a_dir, "").unwrap();
        let app = test_app_with(dir, SessionStore::new(not_a_dir.join("sessions.json")));

        let (status, _) = app
            .json(
                Method::POST,
                "/sessions",
                Some(json!({ "id": "s1", "description": "tenant one" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.json(Method::GET, "/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["sessions"],
            json!([
                { "id": "s1", "description": "tenant one", "ready": false, "state": "initializing" },
            ])
        );
    }

    #[tokio::test]
    async fn create_and_list_sessions() {
        let app = test_app(&[SessionRecord::new("stored", "only on disk")]);
        let (status, body) = app
            .json(
                Method::POST,
                "/sessions",
                Some(json!({ "id": "s1", "description": "tenant one" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["state"], "initializing");

        let (status, body) = app.json(Method::GET, "/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["sessions"],
            json!([
                { "id": "stored", "description": "only on disk", "ready": false, "state": null },
                { "id": "s1", "description": "tenant one", "ready": false, "state": "initializing" },
            ])
        );
        assert_eq!(app.store.read_all().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_requires_id() {
        let app = test_app(&[]);
        let (status, body) = app
            .json(Method::POST, "/sessions", Some(json!({ "id": "  " })))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "id is required");
    }

    #[tokio::test]
    async fn create_reports_initialize_failure() {
        let app = test_app(&[]);
        app.factory.fail_initialize("bad");
        let (status, body) = app
            .json(Method::POST, "/sessions", Some(json!({ "id": "bad" })))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], false);
    }

    #[tokio::test]
    async fn qr_endpoint() {
        let app = test_app(&[]);
        let (status, _) = app.json(Method::GET, "/sessions/s1/qr", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let session = app.state.manager.create_session("s1", "").await.unwrap();
        let mut updates = app.state.manager.subscribe();
        app.factory
            .handle("s1")
            .unwrap()
            .emit(TransportEvent::Qr("pair-me".into()));
        updates.recv().await.unwrap();
        assert_eq!(session.challenge().as_deref(), Some("pair-me"));

        let (status, body) = app.json(Method::GET, "/sessions/s1/qr", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["qr"], "pair-me");
    }

    #[tokio::test]
    async fn health_counts_sessions() {
        let app = test_app(&[]);
        app.state.manager.create_session("s1", "").await.unwrap();
        let (status, body) = app.json(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
    }
}
