use std::sync::Arc;

use rearch::CapsuleHandle;
use time::Duration;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    clock::{Clock, clock_capsule},
    code_gen::{CodeGenerator, code_generator_capsule},
    config::app_config_capsule,
    error::{ErrorKind, LinkError, LinkResult},
    link::ShortLink,
    link_store::{LinkStore, link_store_capsule},
    notify::{NotificationSink, notification_sink_capsule},
};

/// Upper bound on link lifetime, far beyond any sane configuration.
const MAX_TTL: Duration = Duration::days(365 * 100);

pub fn link_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn LinkLifecycleService> {
    let config = get.as_ref(app_config_capsule).clone();
    let store = Arc::clone(get.as_ref(link_store_capsule));
    let codes = Arc::clone(get.as_ref(code_generator_capsule));
    let notifier = Arc::clone(get.as_ref(notification_sink_capsule));
    let clock = Arc::clone(get.as_ref(clock_capsule));
    Arc::new(LinkLifecycleServiceImpl::new(
        store,
        codes,
        notifier,
        clock,
        config.ttl_seconds,
        config.default_max_clicks,
    ))
}

/// Creation, redirect resolution, and owner-scoped management of short links.
///
/// Every mutation of an existing link goes through
/// [`LinkStore::update_conditional`], so concurrent callers never lose updates.
pub trait LinkLifecycleService: Send + Sync {
    /// # Errors
    /// [`ErrorKind::InvalidUrl`], [`ErrorKind::InvalidLimit`], or
    /// [`ErrorKind::GenerationExhausted`].
    fn create(&self, owner: Uuid, url: &str, max_clicks: Option<i64>) -> LinkResult<ShortLink>;

    /// Counts a click and returns the original URL.
    ///
    /// An expired link is deleted by this call.
    ///
    /// # Errors
    /// [`ErrorKind::LinkNotFound`], [`ErrorKind::LinkExpired`], or
    /// [`ErrorKind::LinkLimitReached`].
    fn resolve_for_redirect(&self, code: &str) -> LinkResult<String>;

    fn list_by_owner(&self, owner: Uuid) -> Vec<ShortLink>;

    /// # Errors
    /// [`ErrorKind::LinkNotFound`] or [`ErrorKind::AccessDenied`].
    fn delete(&self, owner: Uuid, code: &str) -> LinkResult<()>;

    /// # Errors
    /// [`ErrorKind::InvalidLimit`], [`ErrorKind::LinkNotFound`], or
    /// [`ErrorKind::AccessDenied`].
    fn update_max_clicks(&self, owner: Uuid, code: &str, new_limit: i64)
    -> LinkResult<ShortLink>;
}

pub struct LinkLifecycleServiceImpl {
    store: Arc<dyn LinkStore>,
    codes: Arc<CodeGenerator>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    default_max_clicks: u32,
}

enum Resolution {
    Expired { owner: Uuid },
    LimitReached,
    Redirect { url: String, owner: Uuid, notify_limit: bool },
}

enum LimitUpdate {
    Denied,
    Updated { notify_limit: bool },
}

impl LinkLifecycleServiceImpl {
    pub fn new(
        store: Arc<dyn LinkStore>,
        codes: Arc<CodeGenerator>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        ttl_seconds: u64,
        default_max_clicks: u32,
    ) -> Self {
        let ttl = Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX)).min(MAX_TTL);
        Self {
            store,
            codes,
            notifier,
            clock,
            ttl,
            default_max_clicks,
        }
    }
}

impl LinkLifecycleService for LinkLifecycleServiceImpl {
    #[instrument(skip(self))]
    fn create(&self, owner: Uuid, url: &str, max_clicks: Option<i64>) -> LinkResult<ShortLink> {
        validate_url(url)?;
        let max_clicks =
            validate_limit(max_clicks.unwrap_or_else(|| self.default_max_clicks.into()))?;

        let created_at = self.clock.now();
        let code = self.codes.generate_unique_code()?;
        let link = ShortLink::new(
            code,
            owner,
            url.to_owned(),
            created_at,
            created_at + self.ttl,
            max_clicks,
            0,
            false,
        )?;

        self.store.put(link.clone());
        info!(code = %link.code(), %owner, max_clicks, "Created short link");
        Ok(link)
    }

    #[instrument(skip(self))]
    fn resolve_for_redirect(&self, code: &str) -> LinkResult<String> {
        let now = self.clock.now();
        let mut resolution = None;

        self.store.update_conditional(code, &mut |link| {
            if link.is_expired(now) {
                resolution = Some(Resolution::Expired {
                    owner: link.owner(),
                });
                return None;
            }
            if link.is_limit_reached() {
                resolution = Some(Resolution::LimitReached);
                return Some(link.clone());
            }

            // NOTE: clicks_used < max_clicks here, so this cannot overflow
            let clicks_used = link.clicks_used() + 1;
            let notify_limit = clicks_used >= link.max_clicks() && !link.limit_notified();
            resolution = Some(Resolution::Redirect {
                url: link.original_url().to_owned(),
                owner: link.owner(),
                notify_limit,
            });
            Some(link.with_clicks_used(clicks_used, link.limit_notified() || notify_limit))
        });

        match resolution {
            None => Err(LinkError::not_found(code)),
            Some(Resolution::Expired { owner }) => {
                debug!(code, "Link expired on access; removed");
                self.notifier.notify_expired(owner, code);
                Err(LinkError::new(
                    ErrorKind::LinkExpired,
                    format!("link {code} outlived its time-to-live and was removed"),
                ))
            }
            Some(Resolution::LimitReached) => Err(LinkError::new(
                ErrorKind::LinkLimitReached,
                format!("link {code} has used up its clicks"),
            )),
            Some(Resolution::Redirect {
                url,
                owner,
                notify_limit,
            }) => {
                if notify_limit {
                    debug!(code, "Link reached its click limit");
                    self.notifier.notify_limit_reached(owner, code);
                }
                Ok(url)
            }
        }
    }

    fn list_by_owner(&self, owner: Uuid) -> Vec<ShortLink> {
        self.store.list_by_owner(owner)
    }

    #[instrument(skip(self))]
    fn delete(&self, owner: Uuid, code: &str) -> LinkResult<()> {
        let link = self
            .store
            .get(code)
            .ok_or_else(|| LinkError::not_found(code))?;
        if link.owner() != owner {
            return Err(LinkError::new(
                ErrorKind::AccessDenied,
                "only the owner may delete a link",
            ));
        }

        // NOTE: a concurrent removal between get and delete is harmless
        self.store.delete(code);
        info!(code, %owner, "Deleted short link");
        Ok(())
    }

    #[instrument(skip(self))]
    fn update_max_clicks(
        &self,
        owner: Uuid,
        code: &str,
        new_limit: i64,
    ) -> LinkResult<ShortLink> {
        let new_limit = validate_limit(new_limit)?;
        let mut outcome = None;

        let stored = self.store.update_conditional(code, &mut |link| {
            if link.owner() != owner {
                outcome = Some(LimitUpdate::Denied);
                return Some(link.clone());
            }

            // NOTE: raising the limit never clears limit_notified
            let updated = link.with_max_clicks(new_limit);
            let notify_limit = updated.is_limit_reached() && !updated.limit_notified();
            outcome = Some(LimitUpdate::Updated { notify_limit });
            Some(if notify_limit {
                updated.with_clicks_used(updated.clicks_used(), true)
            } else {
                updated
            })
        });

        match (outcome, stored) {
            (Some(LimitUpdate::Denied), _) => Err(LinkError::new(
                ErrorKind::AccessDenied,
                "only the owner may change a link's click limit",
            )),
            (Some(LimitUpdate::Updated { notify_limit }), Some(updated)) => {
                if notify_limit {
                    self.notifier.notify_limit_reached(owner, code);
                }
                info!(code, max_clicks = new_limit, "Updated click limit");
                Ok(updated)
            }
            _ => Err(LinkError::not_found(code)),
        }
    }
}

fn validate_url(raw: &str) -> LinkResult<()> {
    let url = Url::parse(raw).map_err(|err| {
        LinkError::new(ErrorKind::InvalidUrl, format!("{raw} is not a valid URL: {err}"))
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|host| !host.is_empty()) => Ok(()),
        scheme => Err(LinkError::new(
            ErrorKind::InvalidUrl,
            format!("{raw} must be an absolute http or https URL, not {scheme}"),
        )),
    }
}

fn validate_limit(limit: i64) -> LinkResult<u32> {
    u32::try_from(limit)
        .ok()
        .filter(|limit| *limit > 0)
        .ok_or_else(|| {
            LinkError::new(
                ErrorKind::InvalidLimit,
                format!("click limit must be between 1 and {}, got {limit}", u32::MAX),
            )
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockall::predicate::eq;
    use time::{OffsetDateTime, macros::datetime};

    use crate::{
        clock::ManualClock,
        link_store::{InMemoryLinkStore, LinkExistence},
        notify::{MockNotificationSink, Notification, RecordingSink},
    };

    use super::*;

    const TTL_SECONDS: u64 = 3600;
    const START: OffsetDateTime = datetime!(2025-01-01 00:00:00 UTC);

    struct Harness {
        service: LinkLifecycleServiceImpl,
        store: Arc<InMemoryLinkStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(notifier: Arc<dyn NotificationSink>) -> Harness {
        let store = Arc::new(InMemoryLinkStore::default());
        let clock = Arc::new(ManualClock::new(START));
        let service = LinkLifecycleServiceImpl::new(
            Arc::clone(&store) as Arc<dyn LinkStore>,
            Arc::new(CodeGenerator::new(Arc::clone(&store) as Arc<dyn LinkExistence>)),
            notifier,
            Arc::clone(&clock) as Arc<dyn Clock>,
            TTL_SECONDS,
            10,
        );
        Harness {
            service,
            store,
            clock,
        }
    }

    #[test]
    fn test_create_sets_defaults() {
        let h = harness(Arc::new(RecordingSink::default()));
        let owner = Uuid::new_v4();

        let link = h.service.create(owner, "https://example.com", None).unwrap();

        assert_eq!(link.owner(), owner);
        assert_eq!(link.original_url(), "https://example.com");
        assert_eq!(link.max_clicks(), 10);
        assert_eq!(link.clicks_used(), 0);
        assert!(!link.limit_notified());
        assert_eq!(link.created_at(), START);
        assert_eq!(link.expires_at(), START + Duration::hours(1));
        assert_eq!(h.store.get(link.code().as_str()), Some(link));
    }

    #[test]
    fn test_create_rejects_bad_urls() {
        let h = harness(Arc::new(RecordingSink::default()));
        for url in ["not a url", "ftp://example.com/file", "mailto:me@example.com", "/relative"] {
            let err = h.service.create(Uuid::new_v4(), url, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidUrl, "{url}");
        }
        assert!(h.store.is_empty());
    }

    #[test]
    fn test_create_rejects_bad_limits() {
        let h = harness(Arc::new(RecordingSink::default()));
        for limit in [0, -1, i64::from(u32::MAX) + 1] {
            let err = h
                .service
                .create(Uuid::new_v4(), "https://example.com", Some(limit))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidLimit);
        }
    }

    #[test]
    fn test_same_url_different_owners_get_different_codes() {
        let h = harness(Arc::new(RecordingSink::default()));
        let a = h.service.create(Uuid::new_v4(), "https://example.com", None).unwrap();
        let b = h.service.create(Uuid::new_v4(), "https://example.com", None).unwrap();
        assert_ne!(a.code(), b.code());
    }

    #[test]
    fn test_resolve_round_trip() {
        let h = harness(Arc::new(RecordingSink::default()));
        let url = "https://example.com/some/path?q=1";
        let link = h.service.create(Uuid::new_v4(), url, Some(5)).unwrap();

        let resolved = h.service.resolve_for_redirect(link.code().as_str()).unwrap();

        assert_eq!(resolved, url);
        assert_eq!(h.store.get(link.code().as_str()).unwrap().clicks_used(), 1);
    }

    #[test]
    fn test_resolve_unknown_code() {
        let h = harness(Arc::new(RecordingSink::default()));
        let err = h.service.resolve_for_redirect("nope1234").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkNotFound);
    }

    #[test]
    fn test_limit_enforced_with_single_notification() {
        let sink = Arc::new(RecordingSink::default());
        let h = harness(Arc::clone(&sink) as Arc<dyn NotificationSink>);
        let owner = Uuid::new_v4();
        let link = h.service.create(owner, "https://example.com", Some(3)).unwrap();
        let code = link.code().as_str();

        for click in 1..=3 {
            assert!(h.service.resolve_for_redirect(code).is_ok());
            let expected = if click == 3 { 1 } else { 0 };
            assert_eq!(sink.events().len(), expected, "after click {click}");
        }
        assert_eq!(
            sink.events(),
            [Notification::LimitReached {
                owner,
                code: code.to_owned()
            }]
        );

        let err = h.service.resolve_for_redirect(code).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkLimitReached);
        assert_eq!(sink.events().len(), 1);

        let stored = h.store.get(code).unwrap();
        assert_eq!(stored.clicks_used(), 3);
        assert!(stored.limit_notified());
    }

    #[test]
    fn test_expired_link_is_removed_on_access() {
        let mut notifier = MockNotificationSink::new();
        let owner = Uuid::new_v4();
        notifier
            .expect_notify_expired()
            .with(eq(owner), mockall::predicate::always())
            .once()
            .return_const(());
        notifier.expect_notify_limit_reached().never();
        let h = harness(Arc::new(notifier));
        let link = h.service.create(owner, "https://example.com", None).unwrap();
        let code = link.code().as_str();

        h.clock.advance(Duration::seconds(3599));
        assert!(h.service.resolve_for_redirect(code).is_ok());

        h.clock.advance(Duration::seconds(1));
        let err = h.service.resolve_for_redirect(code).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkExpired);
        assert!(!h.store.exists(code));

        let err = h.service.resolve_for_redirect(code).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkNotFound);
    }

    #[test]
    fn test_expiry_takes_precedence_over_limit() {
        let sink = Arc::new(RecordingSink::default());
        let h = harness(Arc::clone(&sink) as Arc<dyn NotificationSink>);
        let owner = Uuid::new_v4();
        let link = h.service.create(owner, "https://example.com", Some(1)).unwrap();
        let code = link.code().as_str();
        h.service.resolve_for_redirect(code).unwrap();

        h.clock.advance(Duration::hours(2));
        let err = h.service.resolve_for_redirect(code).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::LinkExpired);
        assert_eq!(
            sink.events().last(),
            Some(&Notification::Expired {
                owner,
                code: code.to_owned()
            })
        );
    }

    #[test]
    fn test_delete_requires_owner() {
        let h = harness(Arc::new(RecordingSink::default()));
        let (owner_a, owner_b) = (Uuid::new_v4(), Uuid::new_v4());
        let link = h.service.create(owner_b, "https://example.com", None).unwrap();
        let code = link.code().as_str();

        let err = h.service.delete(owner_a, code).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(h.store.exists(code));

        h.service.delete(owner_b, code).unwrap();
        assert!(!h.store.exists(code));

        let err = h.service.delete(owner_b, code).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkNotFound);
    }

    #[test]
    fn test_list_by_owner() {
        let h = harness(Arc::new(RecordingSink::default()));
        let (owner_a, owner_b) = (Uuid::new_v4(), Uuid::new_v4());
        h.service.create(owner_a, "https://a.example", None).unwrap();
        h.service.create(owner_a, "https://b.example", None).unwrap();
        h.service.create(owner_b, "https://c.example", None).unwrap();

        let links = h.service.list_by_owner(owner_a);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|link| link.owner() == owner_a));
    }

    #[test]
    fn test_update_max_clicks() {
        let h = harness(Arc::new(RecordingSink::default()));
        let owner = Uuid::new_v4();
        let link = h.service.create(owner, "https://example.com", Some(1)).unwrap();
        let code = link.code().as_str();
        h.service.resolve_for_redirect(code).unwrap();
        assert_eq!(
            h.service.resolve_for_redirect(code).unwrap_err().kind(),
            ErrorKind::LinkLimitReached
        );

        let updated = h.service.update_max_clicks(owner, code, 2).unwrap();

        assert_eq!(updated.max_clicks(), 2);
        assert_eq!(updated.clicks_used(), 1);
        assert!(updated.limit_notified());
        assert_eq!(h.service.resolve_for_redirect(code).unwrap(), "https://example.com");
    }

    #[test]
    fn test_lowering_limit_below_clicks_notifies_once() {
        let sink = Arc::new(RecordingSink::default());
        let h = harness(Arc::clone(&sink) as Arc<dyn NotificationSink>);
        let owner = Uuid::new_v4();
        let link = h.service.create(owner, "https://example.com", Some(5)).unwrap();
        let code = link.code().as_str();
        h.service.resolve_for_redirect(code).unwrap();
        h.service.resolve_for_redirect(code).unwrap();

        let updated = h.service.update_max_clicks(owner, code, 2).unwrap();
        assert!(updated.limit_notified());
        h.service.update_max_clicks(owner, code, 1).unwrap();

        assert_eq!(
            sink.events(),
            [Notification::LimitReached {
                owner,
                code: code.to_owned()
            }]
        );
        assert_eq!(
            h.service.resolve_for_redirect(code).unwrap_err().kind(),
            ErrorKind::LinkLimitReached
        );
    }

    #[test]
    fn test_update_max_clicks_errors() {
        let h = harness(Arc::new(RecordingSink::default()));
        let owner = Uuid::new_v4();
        let link = h.service.create(owner, "https://example.com", Some(4)).unwrap();
        let code = link.code().as_str();

        let err = h.service.update_max_clicks(owner, code, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLimit);

        let err = h
            .service
            .update_max_clicks(Uuid::new_v4(), code, 7)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert_eq!(h.store.get(code).unwrap().max_clicks(), 4);

        let err = h
            .service
            .update_max_clicks(owner, "missing1", 7)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkNotFound);
    }

    #[test]
    fn test_concurrent_redirects_never_exceed_limit() {
        let sink = Arc::new(RecordingSink::default());
        let h = harness(Arc::clone(&sink) as Arc<dyn NotificationSink>);
        let link = h
            .service
            .create(Uuid::new_v4(), "https://example.com", Some(50))
            .unwrap();
        let code = link.code().clone().into_inner();

        let successes: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..20)
                            .filter(|_| h.service.resolve_for_redirect(&code).is_ok())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).sum()
        });

        assert_eq!(successes, 50);
        assert_eq!(h.store.get(&code).unwrap().clicks_used(), 50);
        assert_eq!(sink.events().len(), 1);
    }
}
