//! Range resolution: answer a date-range query exactly as the upstream
//! provider would, with the fewest possible provider calls.
//!
//! A request decomposes into trading-day buckets. Days whose session has
//! closed are answered from disk when present; every other day joins the
//! to-fetch set. Adjacent to-fetch days (adjacent in the decomposed
//! trading-day sequence, so a weekend between two missing days does not
//! split them) coalesce into one upstream request per contiguous gap.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use dv_types::{DvError, DvResult, Interval, PriceRow};

use crate::calendar::{exchange_date, CalendarPolicy};
use crate::keys::{normalize_symbol, PriceCacheKey};
use crate::providers::MarketDataProvider;
use crate::storage::CacheStore;

/// A range request: explicit dates, or a trailing period resolved against
/// the current exchange date. `end` is inclusive at day granularity.
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub period: Option<String>,
    pub interval: Interval,
}

impl RangeQuery {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    /// A trailing window ending at the current exchange date, e.g. `"5d"`,
    /// `"2wk"`, `"3mo"`, `"1y"`.
    pub fn trailing(period: &str) -> Self {
        Self {
            period: Some(period.to_string()),
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }
}

/// Parse a trailing-period shorthand into a duration. Months and years are
/// approximated as 30 and 365 days.
fn parse_period(period: &str) -> DvResult<Duration> {
    let p = period.trim().to_ascii_lowercase();
    let (digits, days_per_unit) = if let Some(v) = p.strip_suffix("wk") {
        (v, 7)
    } else if let Some(v) = p.strip_suffix("mo") {
        (v, 30)
    } else if let Some(v) = p.strip_suffix('y') {
        (v, 365)
    } else if let Some(v) = p.strip_suffix('d') {
        (v, 1)
    } else {
        return Err(DvError::invalid_key(format!(
            "unrecognized period {period:?} (expected Nd, Nwk, Nmo, or Ny)"
        )));
    };
    let value: i64 = digits
        .parse()
        .map_err(|_| DvError::invalid_key(format!("unrecognized period {period:?}")))?;
    if value <= 0 {
        return Err(DvError::invalid_key(format!("non-positive period {period:?}")));
    }
    Ok(Duration::days(value * days_per_unit))
}

/// Resolve a query into an explicit inclusive `[start, end]` day pair.
/// Pure date arithmetic, no I/O.
pub fn resolve_range(query: &RangeQuery, now: DateTime<Utc>) -> DvResult<(NaiveDate, NaiveDate)> {
    let end = query.end.unwrap_or_else(|| exchange_date(now));
    let start = match (query.start, &query.period) {
        (Some(start), _) => start,
        (None, Some(period)) => end - parse_period(period)?,
        (None, None) => {
            return Err(DvError::invalid_key(
                "range requires a start date or a period",
            ))
        }
    };
    if start > end {
        return Err(DvError::invalid_key(format!(
            "start {start} is after end {end}"
        )));
    }
    Ok((start, end))
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(NaiveDate::MAX)
}

/// Group the to-fetch days into contiguous runs of the decomposed day
/// sequence. A cached day between two missing days ends a run.
fn contiguous_spans(days: &[NaiveDate], to_fetch: &HashSet<NaiveDate>) -> Vec<Vec<NaiveDate>> {
    let mut spans = Vec::new();
    let mut current: Vec<NaiveDate> = Vec::new();
    for &day in days {
        if to_fetch.contains(&day) {
            current.push(day);
        } else if !current.is_empty() {
            spans.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        spans.push(current);
    }
    spans
}

/// Chronological merge with boundary dedup by (timestamp, symbol); the later
/// copy wins. Rows outside `[start, end]` are clamped away.
fn merge_rows(rows: Vec<PriceRow>, start: NaiveDate, end: NaiveDate) -> Vec<PriceRow> {
    let mut merged: BTreeMap<(DateTime<Utc>, String), PriceRow> = BTreeMap::new();
    for row in rows {
        merged.insert((row.timestamp, row.symbol.clone()), row);
    }
    merged
        .into_values()
        .filter(|row| {
            let day = row.day();
            day >= start && day <= end
        })
        .collect()
}

/// Resolves range queries against the store, fetching gaps upstream.
#[derive(Debug)]
pub struct PriceResolver {
    store: Arc<CacheStore>,
    policy: CalendarPolicy,
    provider: Arc<dyn MarketDataProvider>,
}

impl PriceResolver {
    pub fn new(
        store: Arc<CacheStore>,
        policy: CalendarPolicy,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            store,
            policy,
            provider,
        }
    }

    pub async fn resolve(&self, symbol: &str, query: &RangeQuery) -> DvResult<Vec<PriceRow>> {
        let now = Utc::now();
        let symbol = normalize_symbol(symbol)?;
        let (start, end) = resolve_range(query, now)?;
        let interval = query.interval;

        let days = self.policy.trading_days(start, end);
        if days.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let mut to_fetch = HashSet::new();
        for &day in &days {
            if !self.policy.is_cacheable(day, now) {
                // Open or future session: always fresh, never persisted.
                to_fetch.insert(day);
                continue;
            }
            let key = PriceCacheKey {
                symbol: symbol.clone(),
                interval,
                day,
            };
            if !self.store.has(&key) {
                to_fetch.insert(day);
                continue;
            }
            match self.store.load(&key) {
                Ok(entry) => rows.extend(entry.rows),
                Err(e) if e.is_corrupt() => {
                    tracing::warn!("corrupt entry for {symbol} {interval} {day}: {e}; refetching");
                    self.store.delete(&key);
                    to_fetch.insert(day);
                }
                Err(e) => return Err(e),
            }
        }

        if to_fetch.is_empty() {
            tracing::debug!("full cache hit for {symbol} {interval} [{start}, {end}]");
        } else {
            for span in contiguous_spans(&days, &to_fetch) {
                let first = span[0];
                let last = span[span.len() - 1];
                tracing::info!("fetching {symbol} {interval} [{first}, {last}] upstream");
                let fetched = self
                    .provider
                    .fetch_price_range(&symbol, interval, first, next_day(last))
                    .await?;
                self.persist_days(&symbol, interval, &span, &fetched, now)?;
                rows.extend(fetched);
            }
        }

        Ok(merge_rows(rows, start, end))
    }

    /// Split a fetched span back into day buckets and store each cacheable
    /// day, including days that came back empty, which become valid
    /// zero-row entries instead of perpetual misses.
    fn persist_days(
        &self,
        symbol: &str,
        interval: Interval,
        span: &[NaiveDate],
        fetched: &[PriceRow],
        now: DateTime<Utc>,
    ) -> DvResult<()> {
        let mut by_day: BTreeMap<NaiveDate, Vec<PriceRow>> = BTreeMap::new();
        for row in fetched {
            by_day.entry(row.day()).or_default().push(row.clone());
        }
        for &day in span {
            if !self.policy.is_cacheable(day, now) {
                continue;
            }
            let day_rows = by_day.remove(&day).unwrap_or_default();
            let key = PriceCacheKey {
                symbol: symbol.to_string(),
                interval,
                day,
            };
            self.store.store(&key, &day_rows)?;
        }
        Ok(())
    }
}
