use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wall-clock hour in the market timezone, serialized as `YYYY-MM-DDTHH:00`.
///
/// Keys order chronologically, so a `BTreeMap<HourKey, _>` iterates from the
/// earliest hour to the latest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourKey(NaiveDateTime);

impl HourKey {
    const FORMAT: &'static str = "%Y-%m-%dT%H:00";
    const PARSE_FORMAT: &'static str = "%Y-%m-%dT%H:%M";

    /// Truncates a local wall-clock time to the start of its hour.
    pub fn from_naive(local: NaiveDateTime) -> Self {
        let time = NaiveTime::from_hms_opt(local.hour(), 0, 0).unwrap_or_default();
        HourKey(NaiveDateTime::new(local.date(), time))
    }

    /// Converts an instant into the market timezone and truncates it.
    pub fn from_datetime<T: TimeZone>(instant: &DateTime<T>, tz: Tz) -> Self {
        Self::from_naive(instant.with_timezone(&tz).naive_local())
    }

    pub fn at(date: NaiveDate, hour: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, 0, 0).map(|t| HourKey(NaiveDateTime::new(date, t)))
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn next(&self) -> Self {
        HourKey(self.0 + Duration::hours(1))
    }

    /// Every hour from `start` through `end`, both inclusive.
    pub fn range_inclusive(start: HourKey, end: HourKey) -> impl Iterator<Item = HourKey> {
        std::iter::successors(Some(start), |h| Some(h.next())).take_while(move |h| *h <= end)
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for HourKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accepts longer ISO strings by looking at the first 16 characters only.
        let head = s.get(..16).unwrap_or(s);
        NaiveDateTime::parse_from_str(head, Self::PARSE_FORMAT).map(Self::from_naive)
    }
}

impl Serialize for HourKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HourKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
