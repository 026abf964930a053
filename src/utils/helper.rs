use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

/// Resolve a wall-clock time on `date` in `tz`.
///
/// An ambiguous time (clocks going back) resolves to the earlier instant. A time
/// inside a spring-forward gap resolves to the first instant after the gap.
pub fn local_time_on(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
            LocalResult::None => tz.from_utc_datetime(&naive),
        },
    }
}

/// Most recent occurrence of `time` at or before `now`.
pub fn latest_occurrence(now: DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = local_time_on(tz, now.date_naive(), time);
    if today <= now {
        today
    } else {
        local_time_on(tz, now.date_naive() - Duration::days(1), time)
    }
}

/// Converts a std duration for wall-clock arithmetic, saturating on overflow.
pub fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
