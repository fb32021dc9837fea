use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use rearch::CapsuleHandle;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::link::ShortLink;

pub fn link_store_capsule(_: CapsuleHandle) -> Arc<InMemoryLinkStore> {
    Arc::new(InMemoryLinkStore::default())
}

/// The one query the code generator needs from storage.
#[cfg_attr(test, mockall::automock)]
pub trait LinkExistence: Send + Sync {
    fn exists(&self, code: &str) -> bool;
}

/// Link records keyed by short code.
///
/// None of these operations fail; absence is an empty result.
pub trait LinkStore: LinkExistence {
    fn get(&self, code: &str) -> Option<ShortLink>;

    /// Unconditional insert or overwrite.
    fn put(&self, link: ShortLink);

    /// Atomically replaces the record for `code` with `transform(current)`.
    ///
    /// `transform` is not called when no record exists. It is called exactly once
    /// otherwise; returning [`None`] deletes the record. Callers on the same code
    /// observe each other's transforms in a serial order.
    fn update_conditional(
        &self,
        code: &str,
        transform: &mut dyn FnMut(&ShortLink) -> Option<ShortLink>,
    ) -> Option<ShortLink>;

    /// Idempotent.
    fn delete(&self, code: &str);

    fn list_by_owner(&self, owner: Uuid) -> Vec<ShortLink>;

    /// Records with `expires_at <= now`.
    fn list_expired(&self, now: OffsetDateTime) -> Vec<ShortLink>;
}

#[derive(Debug, Default)]
pub struct InMemoryLinkStore {
    links: DashMap<String, ShortLink>,
}

impl InMemoryLinkStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl LinkExistence for InMemoryLinkStore {
    fn exists(&self, code: &str) -> bool {
        self.links.contains_key(code)
    }
}

impl LinkStore for InMemoryLinkStore {
    fn get(&self, code: &str) -> Option<ShortLink> {
        self.links.get(code).map(|entry| entry.value().clone())
    }

    #[instrument(skip_all, fields(code = %link.code()))]
    fn put(&self, link: ShortLink) {
        self.links.insert(link.code().as_str().to_owned(), link);
    }

    // NOTE: the entry holds the shard write lock for the whole transform,
    // which is what makes this linearizable per key
    fn update_conditional(
        &self,
        code: &str,
        transform: &mut dyn FnMut(&ShortLink) -> Option<ShortLink>,
    ) -> Option<ShortLink> {
        match self.links.entry(code.to_owned()) {
            Entry::Vacant(_) => None,
            Entry::Occupied(mut entry) => match transform(entry.get()) {
                Some(updated) => {
                    entry.insert(updated.clone());
                    Some(updated)
                }
                None => {
                    entry.remove();
                    debug!(code, "Removed link during conditional update");
                    None
                }
            },
        }
    }

    fn delete(&self, code: &str) {
        if self.links.remove(code).is_some() {
            debug!(code, "Deleted link");
        }
    }

    fn list_by_owner(&self, owner: Uuid) -> Vec<ShortLink> {
        self.links
            .iter()
            .filter(|entry| entry.value().owner() == owner)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn list_expired(&self, now: OffsetDateTime) -> Vec<ShortLink> {
        self.links
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.value().clone())
            .collect()
    }
}
