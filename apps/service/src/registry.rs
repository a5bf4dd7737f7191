//! Target registry: the validated CRUD surface over stored targets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::{StatusRange, Target};
use crate::monitoring::validation::{ValidationError, validate_target};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("target {0} not found")]
    NotFound(String),
    #[error("'{0}' matches more than one target, use a longer id")]
    Ambiguous(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Partial update of a target; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    /// An empty name clears it
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    /// An empty body clears it
    pub body: Option<String>,
    pub interval_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub expected_status: Option<StatusRange>,
    pub enabled: Option<bool>,
    /// An empty chat id clears it
    pub owner_chat_id: Option<String>,
}

impl TargetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.method.is_none()
            && self.headers.is_none()
            && self.body.is_none()
            && self.interval_seconds.is_none()
            && self.timeout_seconds.is_none()
            && self.expected_status.is_none()
            && self.enabled.is_none()
            && self.owner_chat_id.is_none()
    }

    fn apply_to(self, target: &mut Target) {
        let non_empty = |value: String| (!value.trim().is_empty()).then_some(value);

        if let Some(name) = self.name {
            target.name = non_empty(name);
        }
        if let Some(url) = self.url {
            target.url = url;
        }
        if let Some(method) = self.method {
            target.method = method.to_uppercase();
        }
        if let Some(headers) = self.headers {
            target.headers = headers;
        }
        if let Some(body) = self.body {
            target.body = non_empty(body);
        }
        if let Some(interval) = self.interval_seconds {
            target.interval_seconds = interval;
        }
        if let Some(timeout) = self.timeout_seconds {
            target.timeout_seconds = timeout;
        }
        if let Some(range) = self.expected_status {
            target.expected_status = range;
        }
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(chat_id) = self.owner_chat_id {
            target.owner_chat_id = non_empty(chat_id);
        }
    }
}

pub struct TargetRegistry {
    database: Arc<dyn Database>,
    allow_private: bool,
}

impl TargetRegistry {
    pub fn new(database: Arc<dyn Database>, allow_private: bool) -> Self {
        Self { database, allow_private }
    }

    /// Validate and store a new target
    pub async fn add(&self, mut target: Target) -> Result<Target, RegistryError> {
        target.method = target.method.to_uppercase();
        validate_target(&target, self.allow_private)?;

        let now = SystemTime::now();
        target.id = None;
        target.created_at = now;
        target.updated_at = now;
        target.id = Some(self.database.save_target(&target).await?);

        info!(target = %target.uuid, url = %target.url, "Target added");
        Ok(target)
    }

    /// Apply `update` to an existing target; the stored copy only changes if
    /// the result is still valid
    pub async fn update(&self, uuid: Uuid, update: TargetUpdate) -> Result<Target, RegistryError> {
        let mut target = self.get(uuid).await?;
        update.apply_to(&mut target);
        validate_target(&target, self.allow_private)?;

        target.updated_at = SystemTime::now();
        self.database.save_target(&target).await?;

        info!(target = %uuid, "Target updated");
        Ok(target)
    }

    /// Delete a target together with its results, state and alert events
    pub async fn remove(&self, uuid: Uuid) -> Result<(), RegistryError> {
        if !self.database.delete_target(uuid).await? {
            return Err(RegistryError::NotFound(uuid.to_string()));
        }
        info!(target = %uuid, "Target removed");
        Ok(())
    }

    pub async fn get(&self, uuid: Uuid) -> Result<Target, RegistryError> {
        self.database.get_target(uuid).await?.ok_or_else(|| RegistryError::NotFound(uuid.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Target>, RegistryError> {
        Ok(self.database.list_targets().await?)
    }

    /// Look a target up by full uuid or by an unambiguous uuid prefix
    pub async fn find(&self, id: &str) -> Result<Target, RegistryError> {
        if let Ok(uuid) = Uuid::parse_str(id) {
            return self.get(uuid).await;
        }

        let needle = id.trim().to_lowercase();
        if needle.is_empty() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        let mut matches: Vec<Target> = self
            .list()
            .await?
            .into_iter()
            .filter(|target| target.uuid.to_string().starts_with(&needle))
            .collect();

        match matches.len() {
            0 => Err(RegistryError::NotFound(id.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(RegistryError::Ambiguous(id.to_string())),
        }
    }

    /// Pause or resume one target
    pub async fn set_enabled(&self, uuid: Uuid, enabled: bool) -> Result<(), RegistryError> {
        if !self.database.set_target_enabled(uuid, enabled).await? {
            return Err(RegistryError::NotFound(uuid.to_string()));
        }
        info!(target = %uuid, enabled, "Target {}", if enabled { "resumed" } else { "paused" });
        Ok(())
    }

    /// Pause or resume every target, returning how many changed
    pub async fn set_all_enabled(&self, enabled: bool) -> Result<u64, RegistryError> {
        let changed = self.database.set_all_targets_enabled(enabled).await?;
        info!("{} target(s) {}", changed, if enabled { "resumed" } else { "paused" });
        Ok(changed)
    }
}
