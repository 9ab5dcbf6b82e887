//! Typed access to the gym API's business endpoints.
//!
//! [`GymApi`] only shapes requests and responses; authentication, renewal and
//! error classification all happen in the pipeline behind
//! [`SessionContext::execute`].

use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::SessionContext;
use crate::error::SessionError;
use crate::model::{User, UserPatch, string_or_number};
use crate::request::RequestDescriptor;
use crate::store::Secret;

pub const GROUPS_FALLBACK: &str = "Could not load the muscle groups";
pub const EXERCISES_FALLBACK: &str = "Could not load the exercises";
pub const EXERCISE_FALLBACK: &str = "Could not load the exercise details";
pub const PROFILE_FALLBACK: &str = "Could not update the profile. Try again later.";

/// An exercise as listed by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub series: String,
    #[serde(deserialize_with = "string_or_number")]
    pub repetitions: String,
    pub group: String,
    /// File name under `/exercise/demo/`.
    pub demo: String,
    /// File name under `/exercise/thumb/`.
    pub thumb: String,
}

/// Body of `PUT /users`.
///
/// The name and email are mirrored into the local session; the password
/// fields are forwarded to the server and nothing else.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<Secret>,
}

impl ProfileUpdate {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Change the password; the server checks `old_password`.
    pub fn with_password(mut self, old_password: impl Into<String>, password: impl Into<String>) -> Self {
        self.old_password = Some(Secret::new(old_password));
        self.password = Some(Secret::new(password));
        self
    }

    fn local_patch(&self) -> UserPatch {
        let patch = UserPatch::new().name(self.name.clone());
        match &self.email {
            Some(email) => patch.email(email.clone()),
            None => patch,
        }
    }
}

/// Client for the business endpoints.
#[derive(Debug, Clone)]
pub struct GymApi {
    context: SessionContext,
    base_url: Url,
}

impl GymApi {
    pub fn new(context: SessionContext) -> Result<Self, SessionError> {
        let base_url = context.config().validate()?;
        Ok(Self { context, base_url })
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Names of the muscle groups.
    pub async fn groups(&self) -> Result<Vec<String>, SessionError> {
        self.context
            .execute(RequestDescriptor::get("/groups"))
            .await?
            .json()
    }

    pub async fn exercises_by_group(&self, group: &str) -> Result<Vec<Exercise>, SessionError> {
        self.context
            .execute(RequestDescriptor::get(format!("/exercises/bygroup/{}", group)))
            .await?
            .json()
    }

    pub async fn exercise(&self, id: &str) -> Result<Exercise, SessionError> {
        self.context
            .execute(RequestDescriptor::get(format!("/exercises/{}", id)))
            .await?
            .json()
    }

    /// Update the profile remotely, then mirror the new name locally.
    ///
    /// The resulting user is validated before anything is sent, so a
    /// rejected name never reaches the server.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, SessionError> {
        let patch = update.local_patch();
        let current = self
            .context
            .user()
            .ok_or(SessionError::SessionExpired)?;
        current.apply(&patch)?;

        let body = serde_json::to_value(&update)
            .map_err(|e| SessionError::unknown(e.to_string()))?;
        self.context
            .execute(RequestDescriptor::put("/users", body))
            .await?;

        self.context.update_profile(patch).await
    }

    /// URL of the user's avatar, if they have one.
    pub fn avatar_url(&self, user: &User) -> Option<Url> {
        let avatar = user.avatar.as_deref()?;
        self.asset_url(&["avatar", avatar])
    }

    pub fn demo_url(&self, exercise: &Exercise) -> Option<Url> {
        self.asset_url(&["exercise", "demo", &exercise.demo])
    }

    pub fn thumb_url(&self, exercise: &Exercise) -> Option<Url> {
        self.asset_url(&["exercise", "thumb", &exercise.thumb])
    }

    fn asset_url(&self, segments: &[&str]) -> Option<Url> {
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
        Some(url)
    }
}
