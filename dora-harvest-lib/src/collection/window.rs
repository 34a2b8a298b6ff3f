use crate::Result;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use core::fmt::{Display, Formatter};
use ohno::{IntoAppError, app_err, bail};
use serde::{Deserialize, Serialize};

/// The inclusive `[start, end]` range events are filtered against.
///
/// `start <= end` holds for every constructed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct CollectionWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawWindow> for CollectionWindow {
    type Error = ohno::AppError;

    fn try_from(raw: RawWindow) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl CollectionWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            bail!("collection window start {start} is after its end {end}");
        }

        Ok(Self { start, end })
    }

    /// Window covering the `days` whole days leading up to `now`.
    ///
    /// The start snaps to midnight `days` days back and the end to the last second of today, so
    /// every run on the same UTC day gets the same window.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Result<Self> {
        let today = now.date_naive();
        let first = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| app_err!("a window of {days} days reaches before the earliest supported date"))?;
        Self::new(first.and_time(NaiveTime::MIN).and_utc(), today.and_time(end_of_day()).and_utc())
    }

    /// Parse a window from two command-line values.
    ///
    /// Each bound is either an RFC 3339 timestamp or a `YYYY-MM-DD` date. A bare end date covers
    /// the whole day.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = parse_bound(start, NaiveTime::MIN)?;
        let end = parse_bound(end, end_of_day())?;
        Self::new(start, end)
    }

    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Whether `ts` precedes the window. Descending scans stop on the first such timestamp.
    #[must_use]
    pub fn is_before(&self, ts: DateTime<Utc>) -> bool {
        ts < self.start
    }

    /// The `created` range filter understood by the workflow-runs endpoint.
    #[must_use]
    pub fn created_filter(&self) -> String {
        format!("{}..{}", format_ts(self.start), format_ts(self.end))
    }
}

impl Display for CollectionWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} .. {}", format_ts(self.start), format_ts(self.end))
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn parse_bound(value: &str, time_of_day: NaiveTime) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.to_utc());
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .into_app_err_with(|| format!("'{value}' is neither an RFC 3339 timestamp nor a YYYY-MM-DD date"))?;
    Ok(date.and_time(time_of_day).and_utc())
}
