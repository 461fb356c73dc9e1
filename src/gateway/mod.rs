//! Axum-based HTTP gateway with body limits, timeouts, and bearer-token auth.
//!
//! - Request body size limits (64KB max)
//! - Request timeouts (30s) to prevent slow-loris attacks
//! - Routes that need a caller are wrapped in the access guard explicitly;
//!   nothing is protected by default.

pub mod account;
pub mod profile;

use crate::auth::{
    optional_auth, require_auth, AccessGuard, PasswordHasher, Principal, SessionManager,
    Pbkdf2Sha256, SqliteRevocationStore, SystemClock, TokenCodec, UserStore,
};
use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB): prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Concrete return type for JSON handlers (avoids `impl IntoResponse` inference issues).
pub(crate) type ApiResponse = (StatusCode, Json<serde_json::Value>);

pub(crate) fn failure(status: StatusCode, message: &str) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({"success": false, "message": message})),
    )
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionManager>,
    pub guard: Arc<AccessGuard>,
    pub allow_registration: bool,
}

impl AppState {
    pub fn new(users: Arc<UserStore>, sessions: Arc<SessionManager>, allow_registration: bool) -> Self {
        let guard = Arc::new(AccessGuard::new(Arc::clone(&sessions), users.clone()));
        Self {
            users,
            sessions,
            guard,
            allow_registration,
        }
    }

    /// Open the database and wire up the auth stack described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let db_path = config.database.resolved_path()?;

        let hasher: Arc<dyn PasswordHasher> =
            Arc::new(Pbkdf2Sha256::new(config.auth.password_hash_iterations));
        let users = Arc::new(
            UserStore::open(&db_path, hasher, config.auth.min_password_len)
                .context("Failed to initialize user store")?,
        );
        let revocations = Arc::new(
            SqliteRevocationStore::open(&db_path)
                .context("Failed to initialize revocation store")?,
        );

        let secret = config.auth.secret_key.as_deref().unwrap_or_default();
        let codec = TokenCodec::new(secret, Arc::new(SystemClock))?;
        let sessions = Arc::new(SessionManager::new(
            codec,
            revocations,
            config.auth.session_ttl_secs,
        )?);

        let accounts = users.user_count().context("Failed to read user store")?;
        tracing::info!(
            db = %db_path.display(),
            accounts,
            session_ttl_secs = sessions.lifetime_secs(),
            "Auth stores initialized"
        );
        Ok(Self::new(users, sessions, config.auth.allow_registration))
    }
}

/// Assemble the full route table. Guarded routes are listed with their policy.
pub fn build_router(state: AppState) -> Router {
    let guard = Arc::clone(&state.guard);

    let protected = Router::new()
        .route("/auth/verify", get(account::handle_verify))
        .route("/auth/change-password", put(account::handle_change_password))
        .route(
            "/user/profile",
            get(profile::handle_get_profile).put(profile::handle_update_profile),
        )
        .route("/user/country", put(profile::handle_update_country))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&guard), require_auth));

    let personalized = Router::new()
        .route("/auth/session", get(account::handle_session))
        .route_layer(middleware::from_fn_with_state(guard, optional_auth));

    // ── CORS: allow web clients to connect from any origin ──
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/register", post(account::handle_register))
        .route("/auth/login", post(account::handle_login))
        .route("/auth/reset-password", post(account::handle_reset_password))
        // Checks the token itself so expired sessions can still log out.
        .route("/auth/logout", post(account::handle_logout))
        .merge(protected)
        .merge(personalized)
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway until ctrl-c.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "🛑 Refusing to bind to {host}: gateway would be exposed to the internet.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let state = AppState::from_config(&config)?;

    if config.auth.revocation_sweep_secs > 0 {
        spawn_revocation_sweep(
            Arc::clone(&state.sessions),
            Duration::from_secs(config.auth.revocation_sweep_secs),
        );
    }

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;
    tracing::info!(addr = %actual, "Gateway listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Periodically drop revocation entries whose tokens have expired anyway.
fn spawn_revocation_sweep(sessions: Arc<SessionManager>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match sessions.prune_revocations() {
                Ok(0) => {}
                Ok(removed) => {
                    let remaining = sessions.revocation_count().unwrap_or_default();
                    tracing::debug!(removed, remaining, "Swept expired revocations");
                }
                Err(e) => tracing::warn!("Revocation sweep failed: {e}"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

/// Anything other than loopback counts as public.
pub fn is_public_bind(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback(),
        Err(_) => true,
    }
}

pub(crate) fn user_json(user: &Principal) -> serde_json::Value {
    serde_json::to_value(user).unwrap_or(serde_json::Value::Null)
}

/// GET /health: always public
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::MemoryRevocationStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    pub const NOW: i64 = 1_700_000_000;
    pub const TTL: u64 = 3600;

    pub struct TestApp {
        pub state: AppState,
        pub clock: Arc<ManualClock>,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_registration(true)
        }

        pub fn with_registration(allow_registration: bool) -> Self {
            let clock = Arc::new(ManualClock::new(NOW));
            let users = Arc::new(UserStore::in_memory(Arc::new(Pbkdf2Sha256::new(8)), 6).unwrap());
            let codec = TokenCodec::new("gateway-test-secret", clock.clone()).unwrap();
            let sessions = Arc::new(
                SessionManager::new(codec, Arc::new(MemoryRevocationStore::new()), TTL).unwrap(),
            );
            Self {
                state: AppState::new(users, sessions, allow_registration),
                clock,
            }
        }

        pub async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, serde_json::Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = build_router(self.state.clone())
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        /// Register + login, returning the bearer token.
        pub async fn signed_in(&self, email: &str) -> String {
            let (status, _) = self
                .call(
                    "POST",
                    "/auth/register",
                    None,
                    Some(serde_json::json!({
                        "fullName": "Test User",
                        "email": email,
                        "password": "secret123",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let (status, body) = self
                .call(
                    "POST",
                    "/auth/login",
                    None,
                    Some(serde_json::json!({"email": email, "password": "secret123"})),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            body["token"].as_str().unwrap().to_string()
        }
    }

    #[test]
    fn security_body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn public_bind_detection() {
        assert!(!is_public_bind("127.0.0.1"));
        assert!(!is_public_bind("localhost"));
        assert!(!is_public_bind("::1"));
        assert!(is_public_bind("0.0.0.0"));
        assert!(is_public_bind("192.168.1.10"));
        assert!(is_public_bind("example.com"));
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn from_config_refuses_missing_secret() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.database.path = tmp.path().join("hv.db").to_string_lossy().into_owned();
        assert!(AppState::from_config(&config).is_err());

        config.auth.secret_key = Some("configured".into());
        config.auth.password_hash_iterations = 8;
        let state = AppState::from_config(&config).unwrap();
        assert_eq!(state.sessions.lifetime_secs(), 30 * 24 * 3600);
    }

    #[tokio::test]
    async fn run_gateway_refuses_public_bind() {
        let mut config = Config::default();
        config.auth.secret_key = Some("configured".into());
        let err = run_gateway("0.0.0.0", 0, config).await.unwrap_err();
        assert!(err.to_string().contains("Refusing to bind"));
    }
}
