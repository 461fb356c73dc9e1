//! Request interceptor that turns a bearer token into a principal.
//!
//! Two policies:
//! - [`GuardPolicy::Required`] rejects with 401 unless the caller presents a
//!   valid, unrevoked token for a user that still exists.
//! - [`GuardPolicy::Optional`] never rejects; handlers see an explicit
//!   absent-principal marker instead.
//!
//! The guard is the only place verification failures become HTTP. Every
//! failure cause produces the same 401 body; the cause only reaches logs.
//!
//! Routes opt in explicitly:
//!
//! ```ignore
//! Router::new()
//!     .route("/auth/verify", get(handler))
//!     .route_layer(middleware::from_fn_with_state(guard, require_auth));
//! ```

use super::principal::{Principal, UserDirectory};
use super::session::{SessionManager, Verification};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::convert::Infallible;
use std::sync::Arc;

/// The authenticated caller, placed in request extensions by the guard.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub token_id: String,
}

/// Why a request is unauthenticated. Internal only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingHeader,
    MalformedHeader,
    InvalidToken,
    Expired,
    Revoked,
    StoreUnavailable,
    /// Token verified but the user was deleted after issuance.
    UnknownPrincipal,
    DirectoryUnavailable,
}

impl Rejection {
    pub fn label(self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidToken => "invalid_token",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::StoreUnavailable => "store_unavailable",
            Self::UnknownPrincipal => "unknown_principal",
            Self::DirectoryUnavailable => "directory_unavailable",
        }
    }
}

#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated(AuthContext),
    Unauthenticated(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPolicy {
    Required,
    Optional,
}

/// Extract the token from `Authorization: <scheme> <token>`.
///
/// Exactly one space-separated pair, scheme `Bearer` in any case, non-empty
/// token. Anything else is malformed and never reaches the codec.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, Rejection> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(Rejection::MissingHeader)?
        .to_str()
        .map_err(|_| Rejection::MalformedHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None)
            if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() =>
        {
            Ok(token)
        }
        _ => Err(Rejection::MalformedHeader),
    }
}

/// The uniform rejection. Carries nothing about the cause.
pub fn unauthenticated_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(serde_json::json!({
            "success": false,
            "message": "Authentication required",
        })),
    )
        .into_response()
}

pub struct AccessGuard {
    sessions: Arc<SessionManager>,
    users: Arc<dyn UserDirectory>,
}

impl AccessGuard {
    pub fn new(sessions: Arc<SessionManager>, users: Arc<dyn UserDirectory>) -> Self {
        Self { sessions, users }
    }

    /// Resolve the caller behind `headers`, if any.
    pub fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let token = match bearer_token(headers) {
            Ok(token) => token,
            Err(rejection) => return AuthOutcome::Unauthenticated(rejection),
        };

        let (subject, token_id) = match self.sessions.verify(token) {
            Verification::Valid { subject, token_id } => (subject, token_id),
            Verification::Invalid => return AuthOutcome::Unauthenticated(Rejection::InvalidToken),
            Verification::Expired => return AuthOutcome::Unauthenticated(Rejection::Expired),
            Verification::Revoked => return AuthOutcome::Unauthenticated(Rejection::Revoked),
            Verification::StoreUnavailable => {
                return AuthOutcome::Unauthenticated(Rejection::StoreUnavailable)
            }
        };

        match self.users.find_user_by_id(&subject) {
            Ok(Some(principal)) => AuthOutcome::Authenticated(AuthContext {
                principal,
                token_id,
            }),
            Ok(None) => AuthOutcome::Unauthenticated(Rejection::UnknownPrincipal),
            Err(e) => {
                tracing::warn!(sub = %subject, "user lookup failed: {e:#}");
                AuthOutcome::Unauthenticated(Rejection::DirectoryUnavailable)
            }
        }
    }

    /// Run `next` under `policy`.
    pub async fn handle(&self, policy: GuardPolicy, mut request: Request, next: Next) -> Response {
        match self.authenticate(request.headers()) {
            AuthOutcome::Authenticated(ctx) => {
                request.extensions_mut().insert(ctx);
            }
            AuthOutcome::Unauthenticated(rejection) => {
                let path = request.uri().path();
                match rejection {
                    Rejection::StoreUnavailable | Rejection::DirectoryUnavailable => {
                        tracing::warn!(reason = rejection.label(), path, "auth backend unavailable");
                    }
                    _ => tracing::debug!(reason = rejection.label(), path, "unauthenticated request"),
                }
                if policy == GuardPolicy::Required {
                    return unauthenticated_response();
                }
            }
        }
        next.run(request).await
    }
}

/// Middleware for routes that need a principal.
pub async fn require_auth(
    State(guard): State<Arc<AccessGuard>>,
    request: Request,
    next: Next,
) -> Response {
    guard.handle(GuardPolicy::Required, request, next).await
}

/// Middleware for routes that personalize when a principal is present.
pub async fn optional_auth(
    State(guard): State<Arc<AccessGuard>>,
    request: Request,
    next: Next,
) -> Response {
    guard.handle(GuardPolicy::Optional, request, next).await
}

/// Handler argument for [`require_auth`] routes.
///
/// Rejects with the standard 401 if the route was mounted without the
/// guard, so a missing layer fails closed.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthContext);

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Self)
            .ok_or_else(unauthenticated_response)
    }
}

/// Handler argument for [`optional_auth`] routes. `None` means anonymous.
#[derive(Debug, Clone)]
pub struct MaybeAuthenticated(pub Option<AuthContext>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeAuthenticated {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<AuthContext>().cloned()))
    }
}
