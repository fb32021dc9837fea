use std::{io, path::PathBuf, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::app_config_capsule,
    error::{ErrorKind, LinkError},
};

pub fn owner_identity_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<OwnerIdentityService> {
    let owner_file = get.as_ref(app_config_capsule).owner_file.clone();
    Arc::new(OwnerIdentityService::new(Arc::new(
        FileOwnerIdentityStore::new(owner_file),
    )))
}

/// The identity links are created under and mutations are authorized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    owner: Uuid,
}

impl Session {
    #[must_use]
    pub const fn new(owner: Uuid) -> Self {
        Self { owner }
    }

    #[must_use]
    pub const fn owner(&self) -> Uuid {
        self.owner
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OwnerIdentityStore: Send + Sync {
    /// The persisted identity, or [`None`] when there is nothing usable on disk.
    async fn load(&self) -> Option<Uuid>;

    /// Persists `owner`, replacing any previous identity.
    async fn save_new(&self, owner: Uuid) -> anyhow::Result<Uuid>;
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Invalid(#[from] LinkError),
    #[error("failed to persist owner identity: {0:#}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

pub struct OwnerIdentityService {
    store: Arc<dyn OwnerIdentityStore>,
}

impl OwnerIdentityService {
    pub fn new(store: Arc<dyn OwnerIdentityStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Will return [`Err`] if a fresh identity could not be persisted.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self) -> Result<Session, IdentityError> {
        match self.store.load().await {
            Some(owner) => Ok(Session::new(owner)),
            None => self.create_new_and_switch().await,
        }
    }

    /// # Errors
    /// Will return [`Err`] if the new identity could not be persisted.
    #[instrument(skip(self))]
    pub async fn create_new_and_switch(&self) -> Result<Session, IdentityError> {
        let owner = self
            .store
            .save_new(Uuid::new_v4())
            .await
            .map_err(IdentityError::Internal)?;
        info!(%owner, "Created new owner identity");
        Ok(Session::new(owner))
    }

    /// # Errors
    /// Will return [`IdentityError::Invalid`] with [`ErrorKind::InvalidIdentity`] if `raw`
    /// is not a UUID; the persisted identity is left untouched in that case.
    #[instrument(skip(self))]
    pub async fn switch_to(&self, raw: &str) -> Result<Session, IdentityError> {
        let owner = Uuid::parse_str(raw.trim()).map_err(|err| {
            LinkError::new(ErrorKind::InvalidIdentity, format!("{raw} is not a UUID: {err}"))
        })?;
        let owner = self
            .store
            .save_new(owner)
            .await
            .map_err(IdentityError::Internal)?;
        info!(%owner, "Switched owner identity");
        Ok(Session::new(owner))
    }

    pub async fn current(&self) -> Option<Uuid> {
        self.store.load().await
    }
}

/// Keeps the identity as a single hyphenated UUID in a local file.
pub struct FileOwnerIdentityStore {
    path: PathBuf,
}

impl FileOwnerIdentityStore {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl OwnerIdentityStore for FileOwnerIdentityStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Option<Uuid> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(?err, "Failed to read owner identity file");
                return None;
            }
        };

        let contents = contents.trim();
        if contents.is_empty() {
            return None;
        }
        Uuid::parse_str(contents)
            .inspect_err(|err| warn!(?err, "Owner identity file does not hold a UUID"))
            .ok()
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn save_new(&self, owner: Uuid) -> anyhow::Result<Uuid> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        tokio::fs::write(&self.path, owner.hyphenated().to_string())
            .await
            .with_context(|| format!("Failed to save owner identity to {}", self.path.display()))?;
        Ok(owner)
    }
}
