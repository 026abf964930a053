use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use crate::utils::helper::to_chrono;

/// Source of wall-clock time in the market timezone.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    /// Returns once `deadline` has passed; immediately if it already has.
    async fn sleep_until(&self, deadline: DateTime<Tz>);

    async fn sleep(&self, duration: Duration) {
        match self.now().checked_add_signed(to_chrono(duration)) {
            Some(deadline) => self.sleep_until(deadline).await,
            // Beyond any representable time.
            None => std::future::pending().await,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    timezone: Tz,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        SystemClock { timezone }
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    async fn sleep_until(&self, deadline: DateTime<Tz>) {
        let wait = (deadline - self.now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
    }
}

/// Clock that only moves when slept on or set; sleeping jumps straight to
/// the deadline. Used to drive schedules through whole days in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Tz>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Tz>) -> Self {
        ManualClock { now: Mutex::new(start) }
    }

    pub fn set(&self, now: DateTime<Tz>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Tz> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep_until(&self, deadline: DateTime<Tz>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if deadline > *now {
            *now = deadline;
        }
    }
}
