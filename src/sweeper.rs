use std::sync::Arc;

use rearch::CapsuleHandle;
use tokio::{
    task::{self, JoinHandle},
    time::{Duration, Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, error, info, instrument};

use crate::{
    clock::{Clock, clock_capsule},
    link_store::{LinkStore, link_store_capsule},
    notify::{NotificationSink, notification_sink_capsule},
};

pub fn cleanup_sweeper_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<CleanupSweeper> {
    let store = Arc::clone(get.as_ref(link_store_capsule));
    let notifier = Arc::clone(get.as_ref(notification_sink_capsule));
    let clock = Arc::clone(get.as_ref(clock_capsule));
    Arc::new(CleanupSweeper::new(store, notifier, clock))
}

/// Removes expired links and tells their owners.
pub struct CleanupSweeper {
    store: Arc<dyn LinkStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl CleanupSweeper {
    pub fn new(
        store: Arc<dyn LinkStore>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Returns how many links this call removed.
    ///
    /// A link that vanished between the scan and its removal (for example,
    /// because a redirect found it expired first) is skipped without a
    /// second notification.
    #[instrument(skip(self))]
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        for link in self.store.list_expired(now) {
            let code = link.code().as_str();
            let mut was_present = false;
            self.store.update_conditional(code, &mut |_| {
                was_present = true;
                None
            });
            if was_present {
                self.notifier.notify_expired(link.owner(), code);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Swept expired links");
        } else {
            debug!("No expired links to sweep");
        }
        removed
    }

    /// Sweeps every `period`, starting one `period` from now, until the handle is aborted.
    ///
    /// A sweep that panics is logged and the schedule carries on.
    pub fn spawn_periodic(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sweeper = Arc::clone(&self);
                if let Err(err) = task::spawn_blocking(move || sweeper.sweep_expired()).await {
                    error!(?err, "Scheduled sweep failed; skipping this run");
                }
            }
        })
    }
}
