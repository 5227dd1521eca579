//! Canonical cache identities. Pure construction and validation, no I/O.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use dv_types::{DvError, DvResult, Interval, OptionLeg};

/// Trim, upper-case, and replace path-hostile characters so the symbol can
/// double as a directory name.
pub fn normalize_symbol(raw: &str) -> DvResult<String> {
    let symbol = raw.trim().to_ascii_uppercase().replace(['/', ' '], "_");
    if symbol.is_empty() {
        return Err(DvError::invalid_key("empty symbol"));
    }
    Ok(symbol)
}

/// Parse a `YYYY-MM-DD` expiration string into a calendar date.
pub fn parse_expiration(raw: &str) -> DvResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| DvError::invalid_key(format!("malformed expiration {raw:?}: {e}")))
}

/// Identity of one cached day of price history. Uniquely identifies at most
/// one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceCacheKey {
    pub symbol: String,
    pub interval: Interval,
    pub day: NaiveDate,
}

impl PriceCacheKey {
    pub fn new(symbol: &str, interval: Interval, day: NaiveDate) -> DvResult<Self> {
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            interval,
            day,
        })
    }

    /// Key for the UTC day a row timestamp falls in.
    pub fn from_timestamp(symbol: &str, interval: Interval, ts: DateTime<Utc>) -> DvResult<Self> {
        Self::new(symbol, interval, ts.date_naive())
    }
}

/// Identity of one cached option-chain leg. An absent snapshot addresses the
/// mutable "current" slot; a present snapshot addresses an immutable
/// historical slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionCacheKey {
    pub symbol: String,
    pub expiration: NaiveDate,
    pub leg: OptionLeg,
    pub snapshot: Option<NaiveDateTime>,
}

impl OptionCacheKey {
    pub fn new(
        symbol: &str,
        expiration: NaiveDate,
        leg: OptionLeg,
        snapshot: Option<NaiveDateTime>,
    ) -> DvResult<Self> {
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            expiration,
            leg,
            snapshot,
        })
    }

    pub fn calls(symbol: &str, expiration: NaiveDate) -> DvResult<Self> {
        Self::new(symbol, expiration, OptionLeg::Calls, None)
    }

    pub fn puts(symbol: &str, expiration: NaiveDate) -> DvResult<Self> {
        Self::new(symbol, expiration, OptionLeg::Puts, None)
    }

    pub fn underlying(symbol: &str, expiration: NaiveDate) -> DvResult<Self> {
        Self::new(symbol, expiration, OptionLeg::Underlying, None)
    }

    /// The same key addressed at a historical snapshot.
    pub fn at_snapshot(mut self, snapshot: NaiveDateTime) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}
