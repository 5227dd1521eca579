//! Upstream data collaborators. The cache treats them as slow and fallible;
//! retries, backoff, and timeouts are the provider's own concern.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use serde::Deserialize;

use dv_types::{DvError, DvResult, Interval, OptionRow, PriceRow, UnderlyingQuote};

/// Everything one upstream option-chain call returns: both legs, the
/// underlying attributes, and the expiration the provider resolved.
#[derive(Debug, Clone)]
pub struct FetchedChain {
    pub expiration: NaiveDate,
    pub calls: Vec<OptionRow>,
    pub puts: Vec<OptionRow>,
    pub underlying: UnderlyingQuote,
}

/// Trait for remote market-data providers.
#[async_trait]
pub trait MarketDataProvider: Send + Sync + fmt::Debug {
    /// Ordered rows covering `[start, end)` at the given interval.
    async fn fetch_price_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DvResult<Vec<PriceRow>>;

    /// One expiration's chain; `None` asks the provider to resolve the
    /// nearest expiration itself.
    async fn fetch_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> DvResult<FetchedChain>;

    /// All listed expirations for a symbol.
    async fn fetch_expirations(&self, symbol: &str) -> DvResult<Vec<NaiveDate>>;

    /// Get provider name
    fn name(&self) -> &str;
}

/// Yahoo Finance provider using the unofficial chart/options endpoints.
///
/// Data is delayed and intended for personal use; see Yahoo's terms.
#[derive(Debug)]
pub struct YahooFinanceProvider {
    name: String,
    client: reqwest::Client,
    chart_url: String,
    options_url: String,
}

impl YahooFinanceProvider {
    pub fn new() -> DvResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DvError::data_source(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            name: "Yahoo Finance".to_string(),
            client,
            chart_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
            options_url: "https://query1.finance.yahoo.com/v7/finance/options".to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> DvResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DvError::data_source(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DvError::data_source(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DvError::data_source(format!("response decode failed: {e}")))
    }

    async fn options_payload(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> DvResult<YahooChainData> {
        let url = match expiration {
            Some(exp) => {
                let ts = exp
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or_default();
                format!("{}/{}?date={}", self.options_url, symbol, ts)
            }
            None => format!("{}/{}", self.options_url, symbol),
        };

        let response: YahooOptionsResponse = self.get_json(&url).await?;
        response
            .option_chain
            .result
            .into_iter()
            .next()
            .ok_or_else(|| DvError::data_source(format!("no options data for {symbol}")))
    }
}

#[async_trait]
impl MarketDataProvider for YahooFinanceProvider {
    async fn fetch_price_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DvResult<Vec<PriceRow>> {
        tracing::info!("fetching {symbol} {interval} [{start}, {end}) from Yahoo");

        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let period2 = end
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let url = format!(
            "{}/{}?period1={}&period2={}&interval={}&events=div%2Csplits",
            self.chart_url, symbol, period1, period2, interval
        );

        let response: YahooChartResponse = self.get_json(&url).await?;
        if let Some(error) = response.chart.error {
            return Err(DvError::data_source(format!(
                "Yahoo chart error: {}",
                error.description
            )));
        }
        let data = response
            .chart
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| DvError::data_source(format!("no chart data for {symbol}")))?;

        let timestamps = data.timestamp.unwrap_or_default();
        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .unwrap_or_default();
        let adjclose = data
            .indicators
            .adjclose
            .unwrap_or_default()
            .into_iter()
            .next()
            .unwrap_or_default()
            .adjclose;

        let mut rows = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            let timestamp = match Utc.timestamp_opt(*ts, 0).single() {
                Some(t) => t,
                None => continue,
            };
            let (open, high, low, close) = match (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                _ => continue,
            };
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);
            let adj = adjclose.get(i).copied().flatten().unwrap_or(close);

            rows.push(PriceRow::new(
                symbol,
                timestamp,
                Decimal::from_f64_retain(open).unwrap_or_default(),
                Decimal::from_f64_retain(high).unwrap_or_default(),
                Decimal::from_f64_retain(low).unwrap_or_default(),
                Decimal::from_f64_retain(close).unwrap_or_default(),
                Decimal::from_f64_retain(adj).unwrap_or_default(),
                Decimal::from_f64_retain(volume).unwrap_or_default(),
            ));
        }
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        tracing::info!("retrieved {} rows for {symbol}", rows.len());
        Ok(rows)
    }

    async fn fetch_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> DvResult<FetchedChain> {
        let data = self.options_payload(symbol, expiration).await?;

        let resolved = expiration
            .or_else(|| {
                data.options
                    .first()
                    .and_then(|o| o.expiration_date)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()))
            })
            .ok_or_else(|| DvError::data_source(format!("no expirations listed for {symbol}")))?;

        let underlying = UnderlyingQuote {
            symbol: symbol.to_string(),
            price: data
                .quote
                .regular_market_price
                .and_then(Decimal::from_f64_retain),
            previous_close: data
                .quote
                .regular_market_previous_close
                .and_then(Decimal::from_f64_retain),
            currency: data.quote.currency.clone(),
            quote_time: data
                .quote
                .regular_market_time
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        };

        let (calls, puts) = match data.options.into_iter().next() {
            Some(legs) => (
                legs.calls.into_iter().filter_map(to_option_row).collect(),
                legs.puts.into_iter().filter_map(to_option_row).collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(FetchedChain {
            expiration: resolved,
            calls,
            puts,
            underlying,
        })
    }

    async fn fetch_expirations(&self, symbol: &str) -> DvResult<Vec<NaiveDate>> {
        let data = self.options_payload(symbol, None).await?;
        Ok(data
            .expiration_dates
            .iter()
            .filter_map(|&ts| DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()))
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn to_option_row(data: YahooOptionData) -> Option<OptionRow> {
    Some(OptionRow {
        contract_symbol: data.contract_symbol?,
        last_trade: data
            .last_trade_date
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        strike: Decimal::from_f64_retain(data.strike?)?,
        last_price: data.last_price.and_then(Decimal::from_f64_retain),
        bid: data.bid.and_then(Decimal::from_f64_retain),
        ask: data.ask.and_then(Decimal::from_f64_retain),
        volume: data.volume.map(|v| v.max(0) as u64),
        open_interest: data.open_interest.map(|oi| oi.max(0) as u64),
        implied_volatility: data.implied_volatility,
        in_the_money: data.in_the_money,
    })
}

// Yahoo Finance API response structures

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooChartData>>,
    error: Option<YahooApiError>,
}

#[derive(Debug, Deserialize)]
struct YahooApiError {
    #[allow(dead_code)]
    code: Option<String>,
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooChartData {
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuoteBlock>,
    adjclose: Option<Vec<YahooAdjCloseBlock>>,
}

#[derive(Debug, Default, Deserialize)]
struct YahooQuoteBlock {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct YahooAdjCloseBlock {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct YahooOptionsResponse {
    #[serde(rename = "optionChain")]
    option_chain: YahooOptionChain,
}

#[derive(Debug, Deserialize)]
struct YahooOptionChain {
    result: Vec<YahooChainData>,
}

#[derive(Debug, Deserialize)]
struct YahooChainData {
    #[serde(rename = "expirationDates", default)]
    expiration_dates: Vec<i64>,
    quote: YahooUnderlying,
    #[serde(default)]
    options: Vec<YahooOptionLegs>,
}

#[derive(Debug, Deserialize)]
struct YahooUnderlying {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(rename = "regularMarketPreviousClose")]
    regular_market_previous_close: Option<f64>,
    #[serde(rename = "regularMarketTime")]
    regular_market_time: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YahooOptionLegs {
    #[serde(rename = "expirationDate")]
    expiration_date: Option<i64>,
    #[serde(default)]
    calls: Vec<YahooOptionData>,
    #[serde(default)]
    puts: Vec<YahooOptionData>,
}

#[derive(Debug, Deserialize)]
struct YahooOptionData {
    #[serde(rename = "contractSymbol")]
    contract_symbol: Option<String>,
    #[serde(rename = "lastTradeDate")]
    last_trade_date: Option<i64>,
    strike: Option<f64>,
    #[serde(rename = "lastPrice")]
    last_price: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    volume: Option<i64>,
    #[serde(rename = "openInterest")]
    open_interest: Option<i64>,
    #[serde(rename = "impliedVolatility")]
    implied_volatility: Option<f64>,
    #[serde(rename = "inTheMoney")]
    in_the_money: Option<bool>,
}

/// Deterministic synthetic provider for tests and demos.
///
/// Rows for a given symbol/day are stable across calls regardless of the
/// requested span, so reassembled ranges compare equal to direct fetches.
/// Served requests are recorded so callers can observe upstream traffic.
#[derive(Debug)]
pub struct SampleDataProvider {
    name: String,
    expirations: Vec<NaiveDate>,
    price_requests: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    chain_requests: AtomicUsize,
    expiration_requests: AtomicUsize,
}

impl SampleDataProvider {
    pub fn new() -> Self {
        Self {
            name: "Sample Data Provider".to_string(),
            expirations: vec![
                NaiveDate::from_ymd_opt(2030, 1, 18).unwrap(),
                NaiveDate::from_ymd_opt(2030, 2, 15).unwrap(),
                NaiveDate::from_ymd_opt(2030, 3, 21).unwrap(),
            ],
            price_requests: Mutex::new(Vec::new()),
            chain_requests: AtomicUsize::new(0),
            expiration_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_expirations(mut self, expirations: Vec<NaiveDate>) -> Self {
        self.expirations = expirations;
        self
    }

    /// Price spans served so far, in request order.
    pub fn price_requests(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.price_requests.lock().unwrap().clone()
    }

    pub fn chain_request_count(&self) -> usize {
        self.chain_requests.load(Ordering::SeqCst)
    }

    pub fn expiration_request_count(&self) -> usize {
        self.expiration_requests.load(Ordering::SeqCst)
    }

    fn base_price(symbol: &str) -> Decimal {
        match symbol {
            "AAPL" => Decimal::from(150),
            "GOOGL" => Decimal::from(2500),
            "MSFT" => Decimal::from(300),
            "SPY" => Decimal::from(400),
            _ => Decimal::from(100),
        }
    }

    /// Simple per-day PRNG so a day's rows never depend on the span that
    /// fetched them.
    fn day_state(symbol: &str, day: NaiveDate) -> u64 {
        let mut state = 0xcbf2_9ce4_8422_2325u64;
        for b in symbol.bytes() {
            state = (state ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3);
        }
        state ^ day.num_days_from_ce() as u64
    }

    fn rows_for_day(symbol: &str, interval: Interval, day: NaiveDate) -> Vec<PriceRow> {
        let slots: u32 = if interval.is_intraday() { 6 } else { 1 };
        let mut state = Self::day_state(symbol, day);
        let base = Self::base_price(symbol);

        let mut rows = Vec::with_capacity(slots as usize);
        for slot in 0..slots {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            let drift = Decimal::from((state >> 16) as i64 % 100) / Decimal::from(100);
            let open = base + drift;
            let close = open + Decimal::ONE / Decimal::from(2);

            let timestamp = match day.and_hms_opt(14 + slot / 2, 30 * (slot % 2), 0) {
                Some(naive) => naive.and_utc(),
                None => continue,
            };
            rows.push(PriceRow::new(
                symbol,
                timestamp,
                open,
                close + Decimal::ONE,
                open - Decimal::ONE,
                close,
                close,
                Decimal::from(10_000 + (state % 1_000)),
            ));
        }
        rows
    }

    fn chain_row(symbol: &str, expiration: NaiveDate, strike: Decimal, call: bool) -> OptionRow {
        let kind = if call { 'C' } else { 'P' };
        OptionRow {
            contract_symbol: format!("{symbol}{}{}{}", expiration.format("%y%m%d"), kind, strike),
            last_trade: None,
            strike,
            last_price: Some(strike / Decimal::from(100)),
            bid: Some(strike / Decimal::from(101)),
            ask: Some(strike / Decimal::from(99)),
            volume: Some(25),
            open_interest: Some(250),
            implied_volatility: Some(0.3),
            in_the_money: Some(false),
        }
    }
}

impl Default for SampleDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for SampleDataProvider {
    async fn fetch_price_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DvResult<Vec<PriceRow>> {
        self.price_requests.lock().unwrap().push((start, end));

        let mut rows = Vec::new();
        let mut day = start;
        while day < end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                rows.extend(Self::rows_for_day(symbol, interval, day));
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(rows)
    }

    async fn fetch_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> DvResult<FetchedChain> {
        self.chain_requests.fetch_add(1, Ordering::SeqCst);

        let expiration = expiration
            .or_else(|| self.expirations.first().copied())
            .ok_or_else(|| DvError::data_source(format!("no expirations for {symbol}")))?;

        let base = Self::base_price(symbol);
        let strikes: Vec<Decimal> = (-2i64..=2)
            .map(|i| base + Decimal::from(i * 5))
            .collect();

        let underlying = UnderlyingQuote {
            symbol: symbol.to_string(),
            price: Some(base),
            previous_close: Some(base - Decimal::ONE),
            currency: Some("USD".to_string()),
            // Left unset so repeated fetches compare equal.
            quote_time: None,
        };

        Ok(FetchedChain {
            expiration,
            calls: strikes
                .iter()
                .map(|&s| Self::chain_row(symbol, expiration, s, true))
                .collect(),
            puts: strikes
                .iter()
                .map(|&s| Self::chain_row(symbol, expiration, s, false))
                .collect(),
            underlying,
        })
    }

    async fn fetch_expirations(&self, _symbol: &str) -> DvResult<Vec<NaiveDate>> {
        self.expiration_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.expirations.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
