use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use tracing::Instrument;
use crate::config::ScheduleConfig;
use crate::error::{Error, FetchError, RetryClass};
use crate::observability::metrics::{CYCLES_SETTLED, FETCH_ATTEMPTS, FETCH_FAILURES};
use crate::observability::tracing::trace_fetch;
use crate::price_infra::connectors::PriceProvider;
use crate::scheduler::clock::Clock;
use crate::store::SourceCache;
use crate::types::series::{PriceSeries, ProviderId};
use crate::utils::helper::{local_time_on, to_chrono};

/// How an acquisition cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A fetch returned enough hours, tomorrow included.
    Complete,
    /// The deadline passed first; whatever was last obtained was kept.
    DeadlineReached,
    /// The provider refused the request and fail-fast is enabled.
    PermanentFailure,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Complete => "complete",
            CycleOutcome::DeadlineReached => "deadline_reached",
            CycleOutcome::PermanentFailure => "permanent_failure",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerState {
    Idle,
    WaitingForWindow {
        opens_at: DateTime<Tz>,
    },
    Fetching {
        attempt: u32,
        deadline: DateTime<Tz>,
    },
    Retrying {
        attempt: u32,
        resume_at: DateTime<Tz>,
        deadline: DateTime<Tz>,
    },
    Settled {
        outcome: CycleOutcome,
        window_day: NaiveDate,
    },
}

/// Acquisition Scheduler - one per provider
///
/// ## Daily cycle
/// ```text
/// Idle -> WaitingForWindow -> Fetching -> Settled -> WaitingForWindow -> ...
///                                ^    |
///                                |    v
///                               Retrying
/// ```
/// The window opens at the publication time and closes at the deadline. The
/// first complete fetch settles the cycle. Otherwise fetches repeat every retry
/// interval, and at the deadline the last obtained series (possibly empty) is
/// merged into the cache.
///
/// ## Startup
/// Starting before today's deadline targets today's window, so a process that
/// comes up at 14:00 fetches right away. Starting before the window opens
/// optionally does one warm-up fetch so the cache is not left empty until then.
pub struct AcquisitionScheduler {
    provider: Arc<dyn PriceProvider>,
    cache: SourceCache,
    clock: Arc<dyn Clock>,
    schedule: ScheduleConfig,
    request_timeout: Duration,
    state: SchedulerState,
    last_obtained: Option<PriceSeries>,
}

impl AcquisitionScheduler {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        cache: SourceCache,
        clock: Arc<dyn Clock>,
        schedule: ScheduleConfig,
        request_timeout: Duration,
    ) -> Self {
        AcquisitionScheduler {
            provider,
            cache,
            clock,
            schedule,
            request_timeout,
            state: SchedulerState::Idle,
            last_obtained: None,
        }
    }

    pub fn provider_id(&self) -> ProviderId {
        self.provider.provider_id()
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Run cycles forever.
    pub async fn run(mut self) {
        tracing::info!(provider = %self.provider_id(), "Starting acquisition scheduler");
        loop {
            self.step().await;
        }
    }

    /// Advance until the current cycle settles. Starting from `Settled` runs the
    /// next day's cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if matches!(self.state, SchedulerState::Settled { .. }) {
            self.step().await;
        }
        loop {
            self.step().await;
            if let SchedulerState::Settled { outcome, .. } = &self.state {
                return *outcome;
            }
        }
    }

    /// Perform exactly one transition.
    pub async fn step(&mut self) -> &SchedulerState {
        let next = match self.state.clone() {
            SchedulerState::Idle => self.start().await,
            SchedulerState::WaitingForWindow { opens_at } => {
                self.clock.sleep_until(opens_at).await;
                self.last_obtained = None;
                let deadline = self.at(opens_at.date_naive(), self.schedule.deadline);
                tracing::info!(provider = %self.provider_id(), %deadline, "Acquisition window open");
                SchedulerState::Fetching { attempt: 1, deadline }
            }
            SchedulerState::Fetching { attempt, deadline } => self.attempt(attempt, deadline).await,
            SchedulerState::Retrying { attempt, resume_at, deadline } => {
                self.clock.sleep_until(resume_at).await;
                if self.clock.now() >= deadline {
                    self.settle(CycleOutcome::DeadlineReached, deadline).await
                } else {
                    SchedulerState::Fetching { attempt: attempt + 1, deadline }
                }
            }
            SchedulerState::Settled { window_day, .. } => {
                let next_day = window_day.succ_opt().unwrap_or(window_day);
                SchedulerState::WaitingForWindow {
                    opens_at: self.at(next_day, self.schedule.publication_time),
                }
            }
        };

        self.state = next;
        &self.state
    }

    async fn start(&mut self) -> SchedulerState {
        let now = self.clock.now();
        let today = now.date_naive();

        let opens_at = if now < self.at(today, self.schedule.deadline) {
            self.at(today, self.schedule.publication_time)
        } else {
            self.at(today.succ_opt().unwrap_or(today), self.schedule.publication_time)
        };

        if self.schedule.fetch_on_start && now < opens_at {
            match self.fetch_once(now, 0).await {
                Ok(series) if !series.is_empty() => {
                    if let Err(e) = self.cache.merge(&series).await {
                        tracing::error!(provider = %self.provider_id(), "Failed to save warm-up prices: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    FETCH_FAILURES.with_label_values(&[self.provider_id().as_str()]).inc();
                    tracing::warn!(provider = %self.provider_id(), "Warm-up fetch failed: {}", e);
                }
            }
        }

        tracing::info!(provider = %self.provider_id(), %opens_at, "Waiting for acquisition window");
        SchedulerState::WaitingForWindow { opens_at }
    }

    async fn attempt(&mut self, attempt: u32, deadline: DateTime<Tz>) -> SchedulerState {
        let provider = self.provider_id();
        let now = self.clock.now();

        match self.fetch_once(now, attempt).await {
            Ok(series) => {
                let check = self.check_complete(&series, now);
                tracing::info!(provider = %provider, attempt, hours = series.len(), "Fetch succeeded");
                self.last_obtained = Some(series);
                match check {
                    Ok(()) => return self.settle(CycleOutcome::Complete, deadline).await,
                    Err(e) => tracing::warn!(provider = %provider, attempt, "{}", e),
                }
            }
            Err(e) => {
                FETCH_FAILURES.with_label_values(&[provider.as_str()]).inc();
                tracing::warn!(provider = %provider, attempt, "Price fetch failed: {}", e);
                if e.retry_class() == RetryClass::Permanent && self.schedule.fail_fast_on_permanent {
                    return self.settle(CycleOutcome::PermanentFailure, deadline).await;
                }
            }
        }

        let now = self.clock.now();
        if now >= deadline {
            return self.settle(CycleOutcome::DeadlineReached, deadline).await;
        }

        let resume_at = now
            .checked_add_signed(to_chrono(self.schedule.retry_interval()))
            .map_or(deadline, |t| t.min(deadline));
        tracing::debug!(provider = %provider, %resume_at, "Retry scheduled");
        SchedulerState::Retrying { attempt, resume_at, deadline }
    }

    /// Persist the last obtained series and close the cycle.
    async fn settle(&mut self, outcome: CycleOutcome, deadline: DateTime<Tz>) -> SchedulerState {
        let provider = self.provider_id();
        let obtained = self.last_obtained
            .take()
            .unwrap_or_else(|| PriceSeries::new(provider, self.clock.now().fixed_offset()));

        match self.cache.merge(&obtained).await {
            Ok(merged) => tracing::info!(
                provider = %provider,
                %outcome,
                hours = merged.len(),
                "Acquisition cycle settled"
            ),
            Err(e) => tracing::error!(provider = %provider, %outcome, "Failed to save prices: {}", e),
        }

        CYCLES_SETTLED.with_label_values(&[provider.as_str(), outcome.as_str()]).inc();
        SchedulerState::Settled { outcome, window_day: deadline.date_naive() }
    }

    async fn fetch_once(&self, now: DateTime<Tz>, attempt: u32) -> Result<PriceSeries, FetchError> {
        let provider = self.provider_id();
        FETCH_ATTEMPTS.with_label_values(&[provider.as_str()]).inc();

        let fetch = tokio::time::timeout(self.request_timeout, self.provider.fetch(now));
        match fetch.instrument(trace_fetch(provider, attempt)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient {
                provider,
                reason: format!("no response within {:?}", self.request_timeout),
            }),
        }
    }

    /// Enough hours, at least one of them dated tomorrow.
    fn check_complete(&self, series: &PriceSeries, now: DateTime<Tz>) -> Result<(), Error> {
        let has_next_day = now
            .date_naive()
            .succ_opt()
            .is_some_and(|tomorrow| series.has_hour_on(tomorrow));
        if series.len() >= self.schedule.min_hours && has_next_day {
            return Ok(());
        }
        Err(Error::Incomplete {
            hours: series.len(),
            required: self.schedule.min_hours,
            has_next_day,
        })
    }

    fn at(&self, date: NaiveDate, time: chrono::NaiveTime) -> DateTime<Tz> {
        local_time_on(self.clock.now().timezone(), date, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use chrono_tz::Europe::Amsterdam;
    use rust_decimal_macros::dec;
    use crate::price_infra::connectors::MockPriceProvider;
    use crate::scheduler::clock::ManualClock;
    use crate::types::hour::HourKey;
    use crate::types::price::Price;

    const PROVIDER: ProviderId = ProviderId::Tibber;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Tz> {
        Amsterdam.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    fn hours(from: &str, to: &str) -> PriceSeries {
        let mut series = PriceSeries::new(PROVIDER, at(15, 13, 0).fixed_offset());
        let range = HourKey::range_inclusive(from.parse().unwrap(), to.parse().unwrap());
        for hour in range {
            series.insert(hour, Price::new(dec!(0.25)));
        }
        series
    }

    /// Today and tomorrow in full, as published after 13:00 on `day`.
    fn day_ahead(day: NaiveDate) -> PriceSeries {
        let from = HourKey::at(day, 0).unwrap();
        let to = HourKey::at(day.succ_opt().unwrap(), 23).unwrap();
        hours(&from.to_string(), &to.to_string())
    }

    fn complete() -> PriceSeries {
        day_ahead(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
    }

    fn partial() -> PriceSeries {
        hours("2024-01-15T14:00", "2024-01-15T23:00")
    }

    fn transient() -> FetchError {
        FetchError::Transient { provider: PROVIDER, reason: "connection reset".to_string() }
    }

    fn schedule(fetch_on_start: bool, fail_fast: bool) -> ScheduleConfig {
        ScheduleConfig {
            fetch_on_start,
            fail_fast_on_permanent: fail_fast,
            ..ScheduleConfig::default()
        }
    }

    fn mock() -> MockPriceProvider {
        let mut provider = MockPriceProvider::new();
        provider.expect_provider_id().return_const(PROVIDER);
        provider
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: SourceCache,
        clock: Arc<ManualClock>,
    }

    fn fixture(start: DateTime<Tz>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = SourceCache::new(PROVIDER, dir.path().join("prices_tibber.json"));
        Fixture { _dir: dir, cache, clock: Arc::new(ManualClock::new(start)) }
    }

    fn scheduler(f: &Fixture, provider: impl PriceProvider + 'static, schedule: ScheduleConfig) -> AcquisitionScheduler {
        AcquisitionScheduler::new(
            Arc::new(provider),
            f.cache.clone(),
            f.clock.clone(),
            schedule,
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_complete_first_fetch_settles() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        provider.expect_fetch().times(1).returning(|_| Ok(complete()));
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        assert_eq!(
            scheduler.step().await,
            &SchedulerState::WaitingForWindow { opens_at: at(15, 13, 0) }
        );
        assert_eq!(
            scheduler.step().await,
            &SchedulerState::Fetching { attempt: 1, deadline: at(15, 15, 0) }
        );
        assert_eq!(
            scheduler.step().await,
            &SchedulerState::Settled {
                outcome: CycleOutcome::Complete,
                window_day: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            }
        );
        assert_eq!(f.clock.now(), at(15, 13, 0));
        assert_eq!(f.cache.load().await.len(), 48);
    }

    #[tokio::test]
    async fn test_partial_data_retried_until_deadline_then_kept() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        // 13:00, 13:05, ..., 14:55
        provider.expect_fetch().times(24).returning(|_| Ok(partial()));
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        let outcome = scheduler.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::DeadlineReached);
        assert_eq!(f.clock.now(), at(15, 15, 0));
        assert_eq!(f.cache.load().await.len(), 10);
    }

    #[tokio::test]
    async fn test_failures_then_success() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        let mut calls = 0;
        provider.expect_fetch().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 { Err(transient()) } else { Ok(complete()) }
        });
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Complete);
        assert_eq!(f.clock.now(), at(15, 13, 10));
        assert_eq!(f.cache.load().await.len(), 48);
    }

    #[tokio::test]
    async fn test_last_obtained_survives_later_failures() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        let mut calls = 0;
        provider.expect_fetch().times(24).returning(move |_| {
            calls += 1;
            if calls == 1 { Ok(partial()) } else { Err(transient()) }
        });
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::DeadlineReached);
        assert_eq!(f.cache.load().await.len(), 10);
    }

    #[tokio::test]
    async fn test_hours_without_tomorrow_are_incomplete() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        let mut calls = 0;
        provider.expect_fetch().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(hours("2024-01-14T12:00", "2024-01-15T23:00"))
            } else {
                Ok(complete())
            }
        });
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Complete);
        assert_eq!(f.clock.now(), at(15, 13, 5));
    }

    #[test]
    fn test_completeness_reports_what_is_missing() {
        let f = fixture(at(15, 13, 0));
        let scheduler = scheduler(&f, mock(), schedule(false, false));
        let now = at(15, 13, 0);

        assert!(scheduler.check_complete(&complete(), now).is_ok());
        assert!(matches!(
            scheduler.check_complete(&partial(), now),
            Err(Error::Incomplete { hours: 10, required: 34, has_next_day: false })
        ));
        assert!(matches!(
            scheduler.check_complete(&hours("2024-01-14T00:00", "2024-01-15T23:00"), now),
            Err(Error::Incomplete { hours: 48, required: 34, has_next_day: false })
        ));
        assert!(matches!(
            scheduler.check_complete(&hours("2024-01-15T20:00", "2024-01-16T03:00"), now),
            Err(Error::Incomplete { hours: 8, required: 34, has_next_day: true })
        ));
    }

    #[tokio::test]
    async fn test_permanent_failure_fails_fast_when_enabled() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        provider.expect_fetch().times(1).returning(|_| {
            Err(FetchError::Permanent { provider: PROVIDER, reason: "HTTP 401".to_string() })
        });
        let mut scheduler = scheduler(&f, provider, schedule(false, true));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::PermanentFailure);
        assert_eq!(f.clock.now(), at(15, 13, 0));
    }

    #[tokio::test]
    async fn test_permanent_failure_retried_by_default() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        provider.expect_fetch().times(24).returning(|_| {
            Err(FetchError::Permanent { provider: PROVIDER, reason: "HTTP 401".to_string() })
        });
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::DeadlineReached);
        assert!(f.cache.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_inside_window_fetches_immediately() {
        let f = fixture(at(15, 14, 0));
        let mut provider = mock();
        provider.expect_fetch().times(1).returning(|_| Ok(complete()));
        let mut scheduler = scheduler(&f, provider, schedule(true, false));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Complete);
        assert_eq!(f.clock.now(), at(15, 14, 0));
    }

    #[tokio::test]
    async fn test_start_after_deadline_warms_up_and_waits_for_tomorrow() {
        let f = fixture(at(15, 16, 0));
        let mut provider = mock();
        provider.expect_fetch().times(1).returning(|_| Ok(complete()));
        let mut scheduler = scheduler(&f, provider, schedule(true, false));

        assert_eq!(
            scheduler.step().await,
            &SchedulerState::WaitingForWindow { opens_at: at(16, 13, 0) }
        );
        assert_eq!(f.cache.load().await.len(), 48);
    }

    #[tokio::test]
    async fn test_settled_cycle_waits_for_next_day() {
        let f = fixture(at(15, 12, 0));
        let mut provider = mock();
        provider.expect_fetch().times(2).returning(|now| Ok(day_ahead(now.date_naive())));
        let mut scheduler = scheduler(&f, provider, schedule(false, false));

        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Complete);
        assert_eq!(
            scheduler.step().await,
            &SchedulerState::WaitingForWindow { opens_at: at(16, 13, 0) }
        );
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::Complete);
        assert_eq!(f.clock.now(), at(16, 13, 0));
    }

    struct StalledProvider;

    #[async_trait]
    impl PriceProvider for StalledProvider {
        fn provider_id(&self) -> ProviderId {
            PROVIDER
        }

        async fn fetch(&self, _reference_time: DateTime<Tz>) -> Result<PriceSeries, FetchError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_request_times_out_as_transient() {
        let f = fixture(at(15, 14, 55));
        let mut scheduler = AcquisitionScheduler::new(
            Arc::new(StalledProvider),
            f.cache.clone(),
            f.clock.clone(),
            schedule(false, false),
            Duration::from_millis(20),
        );

        scheduler.step().await;
        scheduler.step().await;
        let state = scheduler.step().await.clone();

        assert_eq!(
            state,
            SchedulerState::Retrying { attempt: 1, resume_at: at(15, 15, 0), deadline: at(15, 15, 0) }
        );
        assert_eq!(scheduler.run_cycle().await, CycleOutcome::DeadlineReached);
    }
}
