use crate::auth::password::DEFAULT_HASH_ITERATIONS;
use crate::auth::session::DEFAULT_SESSION_TTL_SECS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SECRET_KEY_ENV: &str = "HIEROVISION_SECRET_KEY";
pub const SESSION_TTL_ENV: &str = "HIEROVISION_SESSION_TTL_SECS";
pub const DB_PATH_ENV: &str = "HIEROVISION_DB_PATH";

/// Top-level configuration, read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Allow binding to a non-loopback address.
    pub allow_public_bind: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            allow_public_bind: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret. Required; usually supplied through the environment.
    pub secret_key: Option<String>,
    pub session_ttl_secs: u64,
    /// How often expired revocation entries are purged. 0 disables the sweep.
    pub revocation_sweep_secs: u64,
    pub allow_registration: bool,
    pub min_password_len: usize,
    pub password_hash_iterations: u32,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("revocation_sweep_secs", &self.revocation_sweep_secs)
            .field("allow_registration", &self.allow_registration)
            .field("min_password_len", &self.min_password_len)
            .field("password_hash_iterations", &self.password_hash_iterations)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            revocation_sweep_secs: 3600,
            allow_registration: true,
            min_password_len: 6,
            password_hash_iterations: DEFAULT_HASH_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding users and revoked tokens. `~` is expanded.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.hierovision/hierovision.db".into(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.path)
            .with_context(|| format!("Failed to expand database path: {}", self.path))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

impl Config {
    /// Load from `path`, or from the platform config dir when `None`.
    ///
    /// A missing file yields defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config: {}", p.display()))?;
                let config = Self::from_toml(&raw)
                    .with_context(|| format!("Failed to parse config: {}", p.display()))?;
                tracing::debug!(path = %p.display(), "Loaded config file");
                config
            }
            _ => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `HIEROVISION_*` overrides. `lookup` is injected so tests stay
    /// off the process environment.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(secret) = lookup(SECRET_KEY_ENV).filter(|s| !s.trim().is_empty()) {
            self.auth.secret_key = Some(secret);
        }
        if let Some(ttl) = lookup(SESSION_TTL_ENV) {
            self.auth.session_ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("{SESSION_TTL_ENV} must be a whole number of seconds"))?;
        }
        if let Some(path) = lookup(DB_PATH_ENV).filter(|s| !s.trim().is_empty()) {
            self.database.path = path;
        }
        Ok(())
    }

    /// Refuse to start without a signing secret or with a zero session lifetime.
    pub fn validate(&self) -> Result<()> {
        if self
            .auth
            .secret_key
            .as_deref()
            .is_none_or(|s| s.trim().is_empty())
        {
            anyhow::bail!(
                "No signing secret configured.\n\
                 Fix: set {SECRET_KEY_ENV} or [auth] secret_key in config.toml."
            );
        }
        if self.auth.session_ttl_secs == 0 {
            anyhow::bail!("[auth] session_ttl_secs must be greater than zero");
        }
        if self.auth.min_password_len == 0 {
            anyhow::bail!("[auth] min_password_len must be at least 1");
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hierovision")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
