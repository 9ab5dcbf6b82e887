//! Domain model types for the session layer.
//!
//! This module defines:
//! - [`User`] - Identity of the signed-in user
//! - [`UserPatch`] - A partial profile update
//! - [`Credentials`] - The access/refresh token pair
//! - [`ActiveSession`] - A user together with their credentials
//! - [`Session`] - The full session state including restoration progress
//! - [`RestorationStatus`] - Whether the persisted session has been loaded yet

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;
use crate::store::Secret;

/// Identity of the signed-in user.
///
/// Immutable except through [`User::apply`], which validates the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The API sends numeric ids; they are kept as strings.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub email: String,
    /// File name of the avatar under the API's `/avatar/` path.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub avatar: Option<String>,
}

impl User {
    /// Create a user without an avatar.
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Check the invariants every stored user must satisfy.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.id.trim().is_empty() {
            return Err(SessionError::validation("user id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(SessionError::validation("name must not be empty"));
        }
        if !self.email.contains('@') {
            return Err(SessionError::validation(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        Ok(())
    }

    /// Produce the user that results from applying `patch`.
    ///
    /// `self` is left untouched; the result is validated before it is returned.
    pub fn apply(&self, patch: &UserPatch) -> Result<User, SessionError> {
        let mut updated = self.clone();
        if let Some(name) = &patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(email) = &patch.email {
            updated.email = email.trim().to_string();
        }
        if let Some(avatar) = &patch.avatar {
            updated.avatar = if avatar.is_empty() {
                None
            } else {
                Some(avatar.clone())
            };
        }
        updated.validate()?;
        Ok(updated)
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// A partial update of the user's profile.
///
/// Fields left as `None` are kept. An empty `avatar` removes the avatar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

impl UserPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.avatar.is_none()
    }
}

/// The access/refresh token pair.
///
/// Both tokens are always present: a half-populated pair cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: Secret,
    pub refresh_token: Secret,
}

impl Credentials {
    /// Build a credential pair, rejecting empty tokens.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let credentials = Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.access_token.is_empty() || self.refresh_token.is_empty() {
            return Err(SessionError::validation(
                "credentials need both an access token and a refresh token",
            ));
        }
        Ok(())
    }
}

/// A signed-in user together with their credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub user: User,
    pub credentials: Credentials,
}

impl ActiveSession {
    pub fn new(user: User, credentials: Credentials) -> Result<Self, SessionError> {
        user.validate()?;
        credentials.validate()?;
        Ok(Self { user, credentials })
    }
}

/// Progress of loading the persisted session at process start.
///
/// Leaves `Pending` exactly once and never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorationStatus {
    Pending,
    /// A session was found (or a sign-in completed first).
    Restored,
    /// Nothing usable was stored.
    Absent,
}

impl RestorationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Restored => "restored",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for RestorationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the local session.
///
/// The user and the credentials live together in [`ActiveSession`], so one
/// is present exactly when the other is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    active: Option<ActiveSession>,
    restoration: RestorationStatus,
}

impl Session {
    pub(crate) fn new(active: Option<ActiveSession>, restoration: RestorationStatus) -> Self {
        Self {
            active,
            restoration,
        }
    }

    /// An empty session whose restoration has not run yet.
    pub fn empty() -> Self {
        Self::new(None, RestorationStatus::Pending)
    }

    pub fn user(&self) -> Option<&User> {
        self.active.as_ref().map(|a| &a.user)
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.active.as_ref().map(|a| &a.credentials)
    }

    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn restoration(&self) -> RestorationStatus {
        self.restoration
    }
}
