//! Session-aware cacheability policy.
//!
//! A day may be persisted only once its trading session has closed; an open
//! or future session must always be fetched fresh. The exchange clock is
//! US/Eastern modeled as a fixed UTC-5 offset with a 16:00 close; session
//! boundaries, not civil wall time, are what matter here.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};

use dv_types::DvResult;

/// Seconds-of-day at which the regular session closes (16:00 exchange time).
const SESSION_CLOSE_SECS: u32 = 16 * 3600;

/// Exchange-local calendar date and seconds-of-day for a UTC instant.
fn exchange_parts(ts: DateTime<Utc>) -> (NaiveDate, u32) {
    let local = ts - Duration::hours(5);
    (local.date_naive(), local.time().num_seconds_from_midnight())
}

/// External trading-calendar collaborator. Optional; lookups may fail.
pub trait TradingCalendar: Send + Sync + fmt::Debug {
    fn is_trading_day(&self, day: NaiveDate) -> DvResult<bool>;
}

/// Classifies days as tradable and sessions as closed.
///
/// Without a calendar collaborator every weekday counts as a trading day.
/// With one, holiday accuracy improves; a failing lookup degrades silently
/// to the weekday answer instead of raising.
#[derive(Debug, Clone, Default)]
pub struct CalendarPolicy {
    calendar: Option<Arc<dyn TradingCalendar>>,
}

impl CalendarPolicy {
    /// Weekday-only policy (the default and the fallback).
    pub fn naive() -> Self {
        Self { calendar: None }
    }

    pub fn with_calendar(calendar: Arc<dyn TradingCalendar>) -> Self {
        Self {
            calendar: Some(calendar),
        }
    }

    pub fn is_trading_day(&self, day: NaiveDate) -> bool {
        let weekday = !matches!(day.weekday(), Weekday::Sat | Weekday::Sun);
        match &self.calendar {
            Some(calendar) => match calendar.is_trading_day(day) {
                Ok(open) => open,
                Err(e) => {
                    tracing::debug!("calendar lookup failed for {day}: {e}; weekday fallback");
                    weekday
                }
            },
            None => weekday,
        }
    }

    /// Ordered trading days in the inclusive range `[start, end]`.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut day = start;
        while day <= end {
            if self.is_trading_day(day) {
                days.push(day);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }

    /// True only if `day`'s session has fully closed as of `now`. Open and
    /// future sessions are never cacheable. Deterministic per `(day, now)`.
    pub fn is_cacheable(&self, day: NaiveDate, now: DateTime<Utc>) -> bool {
        let (today, secs) = exchange_parts(now);
        day < today || (day == today && secs >= SESSION_CLOSE_SECS)
    }
}

/// The exchange-local calendar date of a UTC instant. Default `end` for
/// range queries that leave it unset.
pub fn exchange_date(ts: DateTime<Utc>) -> NaiveDate {
    exchange_parts(ts).0
}

/// True when both instants fall in the same exchange-local calendar date.
/// The freshness rule for current option-chain slots; deliberately free of
/// holiday logic.
pub fn same_session(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    exchange_parts(a).0 == exchange_parts(b).0
}
