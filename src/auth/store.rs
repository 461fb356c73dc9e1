//! SQLite-backed user accounts.
//!
//! Tables:
//! - `users`: uid, full_name, email, password_hash, selected_country,
//!   avatar_url, created_at, updated_at
//!
//! This is the user directory the access guard resolves token subjects
//! against. Password hashing is delegated to a [`PasswordHasher`].

use super::password::PasswordHasher;
use super::principal::{Principal, UserDirectory};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Country assigned to new accounts.
pub const DEFAULT_COUNTRY: &str = "Egypt";

/// Maximum display-name length.
const MAX_NAME_LEN: usize = 100;

/// Maximum email length.
const MAX_EMAIL_LEN: usize = 120;

const USER_COLUMNS: &str =
    "uid, full_name, email, selected_country, avatar_url, created_at, updated_at";

/// Account operation failures that callers map to distinct responses.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already in use")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("User not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AccountError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(e.into())
    }
}

/// Fields a user may change on their own profile. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub selected_country: Option<String>,
}

pub struct UserStore {
    conn: Mutex<Connection>,
    hasher: Arc<dyn PasswordHasher>,
    min_password_len: usize,
}

impl UserStore {
    /// Open (or create) the user table in the database at `db_path`.
    pub fn open(
        db_path: &Path,
        hasher: Arc<dyn PasswordHasher>,
        min_password_len: usize,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open user DB: {}", db_path.display()))?;
        Self::init(conn, hasher, min_password_len)
    }

    pub fn in_memory(hasher: Arc<dyn PasswordHasher>, min_password_len: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, hasher, min_password_len)
    }

    fn init(
        conn: Connection,
        hasher: Arc<dyn PasswordHasher>,
        min_password_len: usize,
    ) -> Result<Self> {
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                selected_country TEXT NOT NULL DEFAULT 'Egypt',
                avatar_url TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            hasher,
            min_password_len,
        })
    }

    // ── Registration & Login ────────────────────────────────────────

    /// Create an account. Email is trimmed and lower-cased.
    pub fn register(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Principal, AccountError> {
        let full_name = full_name.trim();
        let email = normalize_email(email);

        if full_name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AccountError::Validation("All fields are required".into()));
        }
        if full_name.chars().count() > MAX_NAME_LEN {
            return Err(AccountError::Validation(format!(
                "Full name too long (max {MAX_NAME_LEN} characters)"
            )));
        }
        if !looks_like_email(&email) || email.len() > MAX_EMAIL_LEN {
            return Err(AccountError::Validation("Invalid email format".into()));
        }
        self.check_password_len(password, "Password")?;

        let uid = uuid::Uuid::new_v4().to_string();
        let password_hash = self.hasher.hash(password);
        let now = Utc::now().timestamp();

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (uid, full_name, email, password_hash, selected_country, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![uid, full_name, email, password_hash, DEFAULT_COUNTRY, now],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(AccountError::EmailTaken);
            }
            Err(e) => return Err(e.into()),
        }

        query_user(&conn, "uid", &uid)?
            .ok_or_else(|| AccountError::Internal(anyhow::anyhow!("inserted user vanished")))
    }

    /// Check `email` + `password`.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Principal, AccountError> {
        let email = normalize_email(email);
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT uid, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        };

        let Some((uid, stored_hash)) = row else {
            // Spend the same hashing work so response time does not reveal
            // whether the email exists.
            let _ = self.hasher.hash(password);
            return Err(AccountError::InvalidCredentials);
        };

        if !self.hasher.verify(password, &stored_hash) {
            return Err(AccountError::InvalidCredentials);
        }

        self.get_user(&uid)?.ok_or(AccountError::InvalidCredentials)
    }

    // ── Lookup ──────────────────────────────────────────────────────

    pub fn get_user(&self, uid: &str) -> Result<Option<Principal>> {
        let conn = self.conn.lock();
        query_user(&conn, "uid", uid)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let conn = self.conn.lock();
        query_user(&conn, "email", &normalize_email(email))
    }

    /// Count registered users.
    pub fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ── Mutation ────────────────────────────────────────────────────

    pub fn update_profile(
        &self,
        uid: &str,
        update: &ProfileUpdate,
    ) -> Result<Principal, AccountError> {
        let full_name = update.full_name.as_deref().map(str::trim);
        let country = update.selected_country.as_deref().map(str::trim);

        if full_name.is_none() && country.is_none() {
            return Err(AccountError::Validation("No valid fields to update".into()));
        }
        if full_name.is_some_and(str::is_empty) {
            return Err(AccountError::Validation("Full name cannot be empty".into()));
        }
        if full_name.is_some_and(|n| n.chars().count() > MAX_NAME_LEN) {
            return Err(AccountError::Validation(format!(
                "Full name too long (max {MAX_NAME_LEN} characters)"
            )));
        }
        if country.is_some_and(str::is_empty) {
            return Err(AccountError::Validation("Selected country cannot be empty".into()));
        }

        let now = Utc::now().timestamp();
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET
                full_name = COALESCE(?2, full_name),
                selected_country = COALESCE(?3, selected_country),
                updated_at = ?4
             WHERE uid = ?1",
            params![uid, full_name, country, now],
        )?;
        if updated == 0 {
            return Err(AccountError::NotFound);
        }
        query_user(&conn, "uid", uid)?.ok_or(AccountError::NotFound)
    }

    /// Replace the password after checking the current one.
    pub fn change_password(
        &self,
        uid: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(AccountError::Validation(
                "Current and new passwords are required".into(),
            ));
        }

        let stored_hash: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT password_hash FROM users WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()?
        };
        let stored_hash = stored_hash.ok_or(AccountError::NotFound)?;

        if !self.hasher.verify(current_password, &stored_hash) {
            return Err(AccountError::InvalidCredentials);
        }
        self.check_password_len(new_password, "New password")?;

        let new_hash = self.hasher.hash(new_password);
        let now = Utc::now().timestamp();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE uid = ?1",
            params![uid, new_hash, now],
        )?;
        Ok(())
    }

    /// Remove an account. Tokens already issued for it stop authenticating
    /// because the guard can no longer resolve their subject.
    pub fn delete_user(&self, uid: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM users WHERE uid = ?1", params![uid])?;
        Ok(deleted > 0)
    }

    fn check_password_len(&self, password: &str, label: &str) -> Result<(), AccountError> {
        if password.chars().count() < self.min_password_len {
            return Err(AccountError::Validation(format!(
                "{label} must be at least {} characters long",
                self.min_password_len
            )));
        }
        Ok(())
    }
}

impl UserDirectory for UserStore {
    fn find_user_by_id(&self, id: &str) -> Result<Option<Principal>> {
        self.get_user(id)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// `column` is always one of our own literals, never caller input.
fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<Principal>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let user = conn
        .query_row(&sql, params![value], principal_from_row)
        .optional()?;
    Ok(user)
}

fn principal_from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        selected_country: row.get(3)?,
        avatar_url: row.get(4)?,
        created_at: iso_timestamp(row.get(5)?),
        updated_at: iso_timestamp(row.get(6)?),
    })
}

pub(crate) fn iso_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::Pbkdf2Sha256;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, UserStore) {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("hierovision.db");
        let store = UserStore::open(&db_path, Arc::new(Pbkdf2Sha256::new(16)), 6).unwrap();
        (tmp, store)
    }

    #[test]
    fn register_and_authenticate() {
        let (_tmp, store) = test_store();

        let user = store
            .register("Test User", "Test@Example.com", "secret123")
            .unwrap();
        assert_eq!(user.email, "test@example.com");
        assert_eq!(user.selected_country, DEFAULT_COUNTRY);
        assert!(user.avatar_url.is_none());

        let again = store.authenticate(" test@example.com ", "secret123").unwrap();
        assert_eq!(again.id, user.id);
    }

    #[test]
    fn register_duplicate_email_fails() {
        let (_tmp, store) = test_store();

        store.register("A", "a@example.com", "secret123").unwrap();
        let err = store.register("B", "A@EXAMPLE.com", "other1234").unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken));
    }

    #[test]
    fn register_validates_input() {
        let (_tmp, store) = test_store();

        let cases = [
            ("", "a@example.com", "secret123", "required"),
            ("A", "", "secret123", "required"),
            ("A", "a@example.com", "", "required"),
            ("A", "not-an-email", "secret123", "email"),
            ("A", "a@localhost", "secret123", "email"),
            ("A", "a@example.com", "short", "at least 6"),
        ];
        for (name, email, password, expected) in cases {
            match store.register(name, email, password) {
                Err(AccountError::Validation(msg)) => {
                    assert!(msg.contains(expected), "{msg} !~ {expected}")
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
        assert_eq!(store.user_count().unwrap(), 0);
    }

    #[test]
    fn authenticate_wrong_password_fails() {
        let (_tmp, store) = test_store();

        store.register("A", "a@example.com", "correct_password").unwrap();
        let err = store.authenticate("a@example.com", "wrong_password").unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));
    }

    #[test]
    fn authenticate_nonexistent_user_fails_the_same_way() {
        let (_tmp, store) = test_store();

        let err = store.authenticate("ghost@example.com", "anypassword").unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));
    }

    #[test]
    fn lookup_by_id_and_email() {
        let (_tmp, store) = test_store();

        let user = store.register("A", "a@example.com", "secret123").unwrap();
        assert_eq!(store.get_user(&user.id).unwrap(), Some(user.clone()));
        assert_eq!(store.find_user_by_id(&user.id).unwrap(), Some(user.clone()));
        assert_eq!(store.find_by_email("A@example.com").unwrap(), Some(user));
        assert!(store.get_user("nonexistent_id").unwrap().is_none());
    }

    #[test]
    fn profile_update_changes_only_given_fields() {
        let (_tmp, store) = test_store();
        let user = store.register("Old Name", "a@example.com", "secret123").unwrap();

        let updated = store
            .update_profile(
                &user.id,
                &ProfileUpdate {
                    full_name: None,
                    selected_country: Some(" Jordan ".into()),
                },
            )
            .unwrap();
        assert_eq!(updated.full_name, "Old Name");
        assert_eq!(updated.selected_country, "Jordan");

        let updated = store
            .update_profile(
                &user.id,
                &ProfileUpdate {
                    full_name: Some("New Name".into()),
                    selected_country: None,
                },
            )
            .unwrap();
        assert_eq!(updated.full_name, "New Name");
        assert_eq!(updated.selected_country, "Jordan");
    }

    #[test]
    fn profile_update_rejects_empty_request() {
        let (_tmp, store) = test_store();
        let user = store.register("A", "a@example.com", "secret123").unwrap();

        let err = store
            .update_profile(&user.id, &ProfileUpdate::default())
            .unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));

        let err = store
            .update_profile(
                "missing",
                &ProfileUpdate {
                    full_name: Some("X".into()),
                    selected_country: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, AccountError::NotFound));
    }

    #[test]
    fn change_password_requires_current_password() {
        let (_tmp, store) = test_store();
        let user = store.register("A", "a@example.com", "secret123").unwrap();

        let err = store
            .change_password(&user.id, "wrong-current", "newsecret")
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));

        let err = store.change_password(&user.id, "secret123", "tiny").unwrap_err();
        assert!(matches!(err, AccountError::Validation(_)));

        store
            .change_password(&user.id, "secret123", "newsecret")
            .unwrap();
        assert!(store.authenticate("a@example.com", "secret123").is_err());
        assert!(store.authenticate("a@example.com", "newsecret").is_ok());
    }

    #[test]
    fn delete_user_removes_from_directory() {
        let (_tmp, store) = test_store();
        let user = store.register("A", "a@example.com", "secret123").unwrap();

        assert!(store.delete_user(&user.id).unwrap());
        assert!(!store.delete_user(&user.id).unwrap());
        assert!(store.find_user_by_id(&user.id).unwrap().is_none());
    }

    #[test]
    fn user_count_tracks_registrations() {
        let (_tmp, store) = test_store();

        assert_eq!(store.user_count().unwrap(), 0);
        store.register("A", "a@example.com", "password1").unwrap();
        assert_eq!(store.user_count().unwrap(), 1);
        store.register("B", "b@example.com", "password2").unwrap();
        assert_eq!(store.user_count().unwrap(), 2);
    }

    #[test]
    fn principal_serializes_with_client_field_names() {
        let (_tmp, store) = test_store();
        let user = store.register("A", "a@example.com", "secret123").unwrap();

        let json = serde_json::to_value(&user).unwrap();
        for key in ["uid", "fullName", "email", "selectedCountry", "avatarURL", "createdAt", "updatedAt"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a@@b.co"));
        assert!(!looks_like_email("ab.co"));
    }
}
