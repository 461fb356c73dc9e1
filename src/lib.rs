//! hierovision: bearer-token authentication with server-side revocation.
//!
//! - [`auth`]: token codec, revocation list, session manager, access guard, user store
//! - [`config`]: `config.toml` + `HIEROVISION_*` environment overrides
//! - [`gateway`]: the axum HTTP surface

pub mod auth;
pub mod config;
pub mod gateway;
