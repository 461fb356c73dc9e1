//! Session token lifecycle: issue, verify, revoke.
//!
//! A token is `Active` while it decodes, `now < exp`, and its `jti` is not
//! in the revocation store. `Expired` and `Revoked` are both terminal; they
//! stay distinct here so logs can tell them apart, while the access guard
//! answers both with the same 401.

use super::clock::Clock;
use super::codec::{Claims, TokenCodec};
use super::error::{AuthError, AuthResult};
use super::revocation::RevocationStore;
use std::sync::Arc;

/// Default session duration: 30 days (seconds).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

/// A freshly minted bearer token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: i64,
}

/// Outcome of [`SessionManager::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Decodable, unexpired, unrevoked.
    Valid { subject: String, token_id: String },
    /// Bad signature or shape.
    Invalid,
    /// Well-formed but `now >= exp`.
    Expired,
    /// Well-formed, unexpired, explicitly revoked.
    Revoked,
    /// The revocation store could not answer. Treated as a failure.
    StoreUnavailable,
}

impl Verification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Valid { .. } => "valid",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

pub struct SessionManager {
    codec: TokenCodec,
    revocations: Arc<dyn RevocationStore>,
    lifetime_secs: i64,
}

impl SessionManager {
    pub fn new(
        codec: TokenCodec,
        revocations: Arc<dyn RevocationStore>,
        lifetime_secs: u64,
    ) -> AuthResult<Self> {
        let lifetime_secs = i64::try_from(lifetime_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| AuthError::configuration("session lifetime must be positive"))?;
        Ok(Self {
            codec,
            revocations,
            lifetime_secs,
        })
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.codec.clock()
    }

    /// Mint a token for `principal_id` valid for the configured lifetime.
    pub fn issue(&self, principal_id: &str) -> AuthResult<IssuedToken> {
        let expires_at = self.clock().now().saturating_add(self.lifetime_secs);
        let (token, claims) = self.codec.encode(principal_id, expires_at)?;
        tracing::debug!(sub = principal_id, jti = %claims.jti, exp = claims.exp, "session issued");
        Ok(IssuedToken {
            token,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    pub fn verify(&self, token: &str) -> Verification {
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!("token rejected by codec: {e}");
                return Verification::Invalid;
            }
        };

        let outcome = if self.clock().now() >= claims.exp {
            Verification::Expired
        } else {
            match self.revocations.is_revoked(&claims.jti) {
                Ok(false) => {
                    return Verification::Valid {
                        subject: claims.sub,
                        token_id: claims.jti,
                    }
                }
                Ok(true) => Verification::Revoked,
                Err(e) => {
                    tracing::warn!(jti = %claims.jti, "revocation lookup failed: {e:#}");
                    return Verification::StoreUnavailable;
                }
            }
        };
        tracing::debug!(jti = %claims.jti, sub = %claims.sub, outcome = outcome.label(), "token refused");
        outcome
    }

    /// Revoke the token so it never verifies again, returning its claims.
    ///
    /// The signature must check out, but expiry and prior revocation are
    /// ignored: logging out with an expired or already-revoked token still
    /// succeeds.
    pub fn revoke_session(&self, token: &str) -> AuthResult<Claims> {
        let claims = self.codec.decode(token)?;
        let inserted = self
            .revocations
            .revoke(&claims.jti, claims.exp, self.clock().now())
            .map_err(AuthError::Store)?;
        tracing::debug!(jti = %claims.jti, sub = %claims.sub, inserted, "session revoked");
        Ok(claims)
    }

    /// Drop revocation entries for tokens past their natural expiry.
    pub fn prune_revocations(&self) -> AuthResult<u64> {
        self.revocations
            .purge_expired(self.clock().now())
            .map_err(AuthError::Store)
    }

    /// Entries currently held by the revocation store.
    pub fn revocation_count(&self) -> AuthResult<u64> {
        self.revocations.count().map_err(AuthError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::revocation::{MemoryRevocationStore, SqliteRevocationStore};

    const NOW: i64 = 1_700_000_000;
    const TTL: u64 = 3600;

    /// Store whose every call fails, standing in for a lost database.
    struct BrokenStore;

    impl RevocationStore for BrokenStore {
        fn revoke(&self, _jti: &str, _expires_at: i64, _now: i64) -> anyhow::Result<bool> {
            anyhow::bail!("disk I/O error")
        }
        fn revoked_at(&self, _jti: &str) -> anyhow::Result<Option<i64>> {
            anyhow::bail!("disk I/O error")
        }
        fn purge_expired(&self, _now: i64) -> anyhow::Result<u64> {
            anyhow::bail!("disk I/O error")
        }
        fn count(&self) -> anyhow::Result<u64> {
            anyhow::bail!("disk I/O error")
        }
    }

    fn manager_with(store: Arc<dyn RevocationStore>) -> (Arc<ManualClock>, SessionManager) {
        let clock = Arc::new(ManualClock::new(NOW));
        let codec = TokenCodec::new("session-test-secret", clock.clone()).unwrap();
        (clock, SessionManager::new(codec, store, TTL).unwrap())
    }

    fn manager() -> (Arc<ManualClock>, SessionManager) {
        manager_with(Arc::new(MemoryRevocationStore::new()))
    }

    #[test]
    fn issued_token_verifies_as_valid() {
        let (_clock, sessions) = manager();
        let issued = sessions.issue("u1").unwrap();

        assert_eq!(issued.expires_at, NOW + TTL as i64);
        assert_eq!(
            sessions.verify(&issued.token),
            Verification::Valid {
                subject: "u1".into(),
                token_id: issued.token_id,
            }
        );
    }

    #[test]
    fn token_expires_at_exact_deadline() {
        let (clock, sessions) = manager();
        let issued = sessions.issue("u1").unwrap();

        clock.advance(TTL as i64 - 1);
        assert!(matches!(sessions.verify(&issued.token), Verification::Valid { .. }));
        clock.advance(1);
        assert_eq!(sessions.verify(&issued.token), Verification::Expired);
    }

    #[test]
    fn token_one_second_past_expiry_is_expired_not_revoked() {
        let (clock, sessions) = manager();
        let issued = sessions.issue("u1").unwrap();
        clock.set(issued.expires_at + 1);

        let outcome = sessions.verify(&issued.token);
        assert_eq!(outcome, Verification::Expired);
        assert_ne!(outcome, Verification::Revoked);
    }

    #[test]
    fn revoked_token_never_verifies_again() {
        let (clock, sessions) = manager();
        let issued = sessions.issue("u1").unwrap();

        sessions.revoke_session(&issued.token).unwrap();
        assert_eq!(sessions.verify(&issued.token), Verification::Revoked);

        sessions.revoke_session(&issued.token).unwrap();
        assert_eq!(sessions.verify(&issued.token), Verification::Revoked);

        clock.advance(TTL as i64 / 2);
        assert!(!matches!(sessions.verify(&issued.token), Verification::Valid { .. }));
        clock.advance(TTL as i64);
        assert!(!matches!(sessions.verify(&issued.token), Verification::Valid { .. }));
    }

    #[test]
    fn revoking_one_session_leaves_others_active() {
        let (_clock, sessions) = manager();
        let phone = sessions.issue("u1").unwrap();
        let laptop = sessions.issue("u1").unwrap();

        sessions.revoke_session(&phone.token).unwrap();
        assert_eq!(sessions.verify(&phone.token), Verification::Revoked);
        assert!(matches!(sessions.verify(&laptop.token), Verification::Valid { .. }));
    }

    #[test]
    fn expired_but_well_formed_token_can_still_be_revoked() {
        let (clock, sessions) = manager();
        let issued = sessions.issue("u1").unwrap();
        clock.advance(TTL as i64 * 2);

        sessions.revoke_session(&issued.token).unwrap();
        assert_eq!(sessions.verify(&issued.token), Verification::Expired);
    }

    #[test]
    fn revocation_is_stamped_with_the_session_clock() {
        let store = Arc::new(MemoryRevocationStore::new());
        let (clock, sessions) = manager_with(store.clone());
        let issued = sessions.issue("u1").unwrap();
        clock.advance(42);

        sessions.revoke_session(&issued.token).unwrap();
        assert_eq!(store.revoked_at(&issued.token_id).unwrap(), Some(NOW + 42));

        clock.advance(100);
        sessions.revoke_session(&issued.token).unwrap();
        assert_eq!(store.revoked_at(&issued.token_id).unwrap(), Some(NOW + 42));
    }

    #[test]
    fn empty_principal_cannot_be_issued_a_token() {
        let (_clock, sessions) = manager();
        assert!(matches!(sessions.issue(""), Err(AuthError::InvalidSubject)));
    }

    #[test]
    fn malformed_token_cannot_be_revoked() {
        let (_clock, sessions) = manager();
        let err = sessions.revoke_session("not-a-token").unwrap_err();
        assert!(err.is_invalid_token());
    }

    #[test]
    fn garbage_verifies_as_invalid() {
        let (_clock, sessions) = manager();
        assert_eq!(sessions.verify("a.b.c"), Verification::Invalid);
        assert_eq!(sessions.verify(""), Verification::Invalid);
    }

    #[test]
    fn store_outage_fails_closed() {
        let (_clock, sessions) = manager_with(Arc::new(BrokenStore));
        let issued = sessions.issue("u1").unwrap();
        assert!(sessions.revocation_count().is_err());

        assert_eq!(sessions.verify(&issued.token), Verification::StoreUnavailable);
        assert!(matches!(
            sessions.revoke_session(&issued.token),
            Err(AuthError::Store(_))
        ));
    }

    #[test]
    fn revocation_visible_through_sqlite_store() {
        let store = Arc::new(SqliteRevocationStore::in_memory().unwrap());
        let (_clock, sessions) = manager_with(store.clone());
        let issued = sessions.issue("u1").unwrap();

        sessions.revoke_session(&issued.token).unwrap();
        assert!(store.is_revoked(&issued.token_id).unwrap());
        assert_eq!(sessions.verify(&issued.token), Verification::Revoked);
    }

    #[test]
    fn prune_keeps_revocations_of_live_tokens() {
        let (clock, sessions) = manager();
        let short = sessions.issue("u1").unwrap();
        clock.advance(TTL as i64 / 2);
        let long = sessions.issue("u2").unwrap();
        sessions.revoke_session(&short.token).unwrap();
        sessions.revoke_session(&long.token).unwrap();

        assert_eq!(sessions.revocation_count().unwrap(), 2);
        clock.set(short.expires_at);
        assert_eq!(sessions.prune_revocations().unwrap(), 1);
        assert_eq!(sessions.revocation_count().unwrap(), 1);
        assert_eq!(sessions.verify(&long.token), Verification::Revoked);
        assert_eq!(sessions.verify(&short.token), Verification::Expired);
    }

    #[test]
    fn zero_lifetime_is_rejected() {
        let clock = Arc::new(ManualClock::new(NOW));
        let codec = TokenCodec::new("secret", clock).unwrap();
        let store = Arc::new(MemoryRevocationStore::new());
        assert!(matches!(
            SessionManager::new(codec, store, 0),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn concurrent_logout_of_same_token() {
        let (_clock, sessions) = manager();
        let sessions = Arc::new(sessions);
        let issued = sessions.issue("u1").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                let token = issued.token.clone();
                std::thread::spawn(move || sessions.revoke_session(&token).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(sessions.verify(&issued.token), Verification::Revoked);
    }

    #[test]
    fn labels_are_distinct() {
        let labels = [
            Verification::Invalid.label(),
            Verification::Expired.label(),
            Verification::Revoked.label(),
            Verification::StoreUnavailable.label(),
        ];
        for (i, a) in labels.iter().enumerate() {
            for b in &labels[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
