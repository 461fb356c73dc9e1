//! Token authentication with server-side revocation.
//!
//! Provides:
//! - Signed, expiring bearer tokens (HS256 compact form, one `jti` per token)
//! - A revocation list so logout takes effect before natural expiry
//! - Session issue / verify / revoke on top of the two
//! - An axum guard that resolves the bearer to a live [`Principal`]
//! - SQLite-backed user accounts
//!
//! ## Design Decisions
//! - Verification is stateless apart from one revocation lookup per request.
//! - A revocation store that cannot answer rejects the request.
//! - Every guard rejection is the same 401 body; the reason is only logged.

pub mod clock;
pub mod codec;
pub mod error;
pub mod guard;
pub mod password;
pub mod principal;
pub mod revocation;
pub mod session;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use codec::{Claims, TokenCodec};
pub use error::{AuthError, AuthResult};
pub use guard::{
    optional_auth, require_auth, AccessGuard, AuthContext, AuthOutcome, Authenticated,
    GuardPolicy, MaybeAuthenticated, Rejection,
};
pub use password::{PasswordHasher, Pbkdf2Sha256};
pub use principal::{Principal, UserDirectory};
pub use revocation::{MemoryRevocationStore, RevocationStore, SqliteRevocationStore};
pub use session::{IssuedToken, SessionManager, Verification};
pub use store::{AccountError, ProfileUpdate, UserStore};
