//! Option-chain data: legs, rows, and the chain aggregate for one
//! underlying/expiration pair.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::DvError;

/// One side of a cached option chain: the calls table, the puts table, or
/// the underlying instrument's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionLeg {
    Calls,
    Puts,
    Underlying,
}

impl OptionLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionLeg::Calls => "calls",
            OptionLeg::Puts => "puts",
            OptionLeg::Underlying => "underlying",
        }
    }
}

impl fmt::Display for OptionLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OptionLeg {
    type Err = DvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calls" => Ok(OptionLeg::Calls),
            "puts" => Ok(OptionLeg::Puts),
            "underlying" => Ok(OptionLeg::Underlying),
            other => Err(DvError::invalid_key(format!(
                "unrecognized option leg: {other:?}"
            ))),
        }
    }
}

/// A single contract row in an option chain leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRow {
    pub contract_symbol: String,
    pub last_trade: Option<DateTime<Utc>>,
    pub strike: Decimal,
    pub last_price: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub implied_volatility: Option<f64>,
    pub in_the_money: Option<bool>,
}

/// The underlying instrument's attributes captured alongside a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingQuote {
    pub symbol: String,
    pub price: Option<Decimal>,
    pub previous_close: Option<Decimal>,
    pub currency: Option<String>,
    pub quote_time: Option<DateTime<Utc>>,
}

impl UnderlyingQuote {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            previous_close: None,
            currency: None,
            quote_time: None,
        }
    }
}

/// An option chain for a single underlying/expiration pair, in one snapshot
/// state. Fixed shape: calls, puts, underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub calls: Vec<OptionRow>,
    pub puts: Vec<OptionRow>,
    pub underlying: UnderlyingQuote,
}

impl OptionChain {
    pub fn new(calls: Vec<OptionRow>, puts: Vec<OptionRow>, underlying: UnderlyingQuote) -> Self {
        Self {
            calls,
            puts,
            underlying,
        }
    }

    /// A chain with no contracts, returned when a symbol lists no
    /// expirations at all.
    pub fn empty(symbol: &str) -> Self {
        Self {
            calls: Vec::new(),
            puts: Vec::new(),
            underlying: UnderlyingQuote::new(symbol),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }

    /// Total contract count across both legs.
    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }
}
