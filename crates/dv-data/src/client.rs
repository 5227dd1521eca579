//! Client facade. The provider-compatible surface callers invoke; contains
//! no caching policy of its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use dv_types::{DvResult, Interval, OptionChain, PriceRow};

use crate::calendar::CalendarPolicy;
use crate::config::CacheConfig;
use crate::options::OptionChainCache;
use crate::providers::MarketDataProvider;
use crate::resolver::{PriceResolver, RangeQuery};
use crate::storage::CacheStore;

/// A cached, provider-compatible market-data client.
#[derive(Debug)]
pub struct CachedClient {
    store: Arc<CacheStore>,
    resolver: PriceResolver,
    options: OptionChainCache,
}

impl CachedClient {
    /// Client over the default cache root (environment override honored)
    /// and the naive weekday calendar.
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> DvResult<Self> {
        Self::with_config(CacheConfig::default(), CalendarPolicy::default(), provider)
    }

    pub fn with_config(
        config: CacheConfig,
        policy: CalendarPolicy,
        provider: Arc<dyn MarketDataProvider>,
    ) -> DvResult<Self> {
        let store = Arc::new(CacheStore::new(&config)?);
        Ok(Self {
            resolver: PriceResolver::new(store.clone(), policy, provider.clone()),
            options: OptionChainCache::new(store.clone(), provider),
            store,
        })
    }

    /// Resolve each symbol independently and join the results keyed by
    /// normalized symbol.
    pub async fn download(
        &self,
        symbols: &[&str],
        query: &RangeQuery,
    ) -> DvResult<BTreeMap<String, Vec<PriceRow>>> {
        let mut joined = BTreeMap::new();
        for symbol in symbols {
            let rows = self.resolver.resolve(symbol, query).await?;
            let key = crate::keys::normalize_symbol(symbol)?;
            joined.insert(key, rows);
        }
        Ok(joined)
    }

    pub async fn download_one(&self, symbol: &str, query: &RangeQuery) -> DvResult<Vec<PriceRow>> {
        self.resolver.resolve(symbol, query).await
    }

    /// The current-slot chain for one expiration (nearest when `None`).
    /// `use_cache: false` bypasses the freshness check and refetches.
    pub async fn get_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
        use_cache: bool,
    ) -> DvResult<OptionChain> {
        if use_cache {
            self.options.get_or_fetch(symbol, expiration, None).await
        } else {
            self.options.refresh(symbol, expiration).await
        }
    }

    /// An immutable historical recording of a chain.
    pub async fn get_option_chain_snapshot(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: NaiveDateTime,
    ) -> DvResult<OptionChain> {
        self.options
            .get_or_fetch(symbol, Some(expiration), Some(snapshot))
            .await
    }

    pub async fn get_options_expirations(
        &self,
        symbol: &str,
        use_cache: bool,
    ) -> DvResult<Vec<NaiveDate>> {
        self.options.list_expirations(symbol, use_cache).await
    }

    /// Snapshot ids recorded for one expiration, oldest first.
    pub fn snapshots(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> DvResult<impl Iterator<Item = NaiveDateTime>> {
        self.options.enumerate_snapshots(symbol, expiration)
    }

    /// Cached days on disk for a symbol/interval, oldest first.
    pub fn cached_days(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> DvResult<impl Iterator<Item = NaiveDate>> {
        self.store.iterate(symbol, interval)
    }
}
