//! User profiles supplied by the account collaborator.

use crate::error::Result;
use crate::model::UserProfile;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Source of the profile data needed for screening.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Profile of `user_id`, or `None` if the user is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be reached.
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
}

/// Directory kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn upsert(&self, profile: UserProfile) {
        self.profiles.write().insert(profile.id.clone(), profile);
    }

    /// Remove a profile, returning it.
    pub fn remove(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.write().remove(user_id)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.profiles.read().get(user_id).cloned())
    }
}
