use std::sync::Arc;

use rearch::CapsuleHandle;
use time::OffsetDateTime;

pub fn clock_capsule(_: CapsuleHandle) -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
