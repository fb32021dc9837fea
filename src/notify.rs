use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

use rearch::CapsuleHandle;
use tracing::warn;
use uuid::Uuid;

pub fn notification_sink_capsule(_: CapsuleHandle) -> Arc<dyn NotificationSink> {
    Arc::new(ConsoleNotificationSink::new(io::stderr()))
}

/// Owner-facing notifications. Fire-and-forget: implementations swallow their own failures.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn notify_limit_reached(&self, owner: Uuid, code: &str);
    fn notify_expired(&self, owner: Uuid, code: &str);
}

pub struct ConsoleNotificationSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> ConsoleNotificationSink<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, owner: Uuid, code: &str, message: &str) {
        let Ok(mut out) = self.out.lock() else {
            warn!(%owner, code, "Notification writer poisoned; dropping notification");
            return;
        };
        if let Err(err) = writeln!(out, "[NOTIFY] owner={owner} link={code}: {message}") {
            warn!(?err, %owner, code, "Failed to write notification");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> NotificationSink for ConsoleNotificationSink<W> {
    fn notify_limit_reached(&self, owner: Uuid, code: &str) {
        self.emit(owner, code, "click limit reached");
    }

    fn notify_expired(&self, owner: Uuid, code: &str) {
        self.emit(owner, code, "link expired and was removed");
    }
}

#[cfg(test)]
pub(crate) use recording::{Notification, RecordingSink};
