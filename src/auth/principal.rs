use anyhow::Result;
use serde::Serialize;

/// An authenticated actor as seen by route handlers.
///
/// Serialized with the camelCase field names the web client expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    #[serde(rename = "uid")]
    pub id: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub email: String,
    #[serde(rename = "selectedCountry")]
    pub selected_country: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

/// Resolves a token subject to a live user.
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the user no longer exists.
    fn find_user_by_id(&self, id: &str) -> Result<Option<Principal>>;
}
