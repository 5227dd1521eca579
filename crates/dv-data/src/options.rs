//! Option-chain caching. The range-resolver mechanics applied at
//! per-expiration/per-leg granularity, with one extra dimension: an absent
//! snapshot addresses the mutable current slot, valid only within the
//! session that wrote it, while a present snapshot addresses an immutable
//! historical recording that is never refetched once present.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};

use dv_types::{DvResult, OptionChain};

use crate::calendar::same_session;
use crate::keys::normalize_symbol;
use crate::providers::MarketDataProvider;
use crate::storage::CacheStore;

#[derive(Debug)]
pub struct OptionChainCache {
    store: Arc<CacheStore>,
    provider: Arc<dyn MarketDataProvider>,
}

impl OptionChainCache {
    pub fn new(store: Arc<CacheStore>, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { store, provider }
    }

    /// Serve a chain from cache or fetch it upstream. With no expiration the
    /// nearest listed one is used; a symbol listing no expirations at all
    /// yields an empty chain rather than an error.
    pub async fn get_or_fetch(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
        snapshot: Option<NaiveDateTime>,
    ) -> DvResult<OptionChain> {
        let symbol = normalize_symbol(symbol)?;
        let expiration = match expiration {
            Some(exp) => exp,
            None => match self.list_expirations(&symbol, true).await?.first().copied() {
                Some(exp) => exp,
                None => {
                    tracing::debug!("no expirations listed for {symbol}");
                    return Ok(OptionChain::empty(&symbol));
                }
            },
        };

        match snapshot {
            Some(snap) => self.snapshot_slot(&symbol, expiration, snap).await,
            None => self.current_slot(&symbol, expiration).await,
        }
    }

    /// The mutable slot: reusable only within the session that wrote it.
    async fn current_slot(&self, symbol: &str, expiration: NaiveDate) -> DvResult<OptionChain> {
        if self.store.has_chain(symbol, expiration, None) {
            match self.store.load_chain(symbol, expiration, None) {
                Ok((chain, meta)) if same_session(meta.cached_at, Utc::now()) => {
                    tracing::debug!("chain hit for {symbol} {expiration}");
                    return Ok(chain);
                }
                Ok(_) => {
                    tracing::debug!("chain for {symbol} {expiration} is from an earlier session");
                }
                Err(e) if e.is_corrupt() => {
                    tracing::warn!("corrupt chain slot for {symbol} {expiration}: {e}; refetching");
                }
                Err(e) => return Err(e),
            }
        }
        self.refresh(symbol, Some(expiration)).await
    }

    /// An immutable slot: pure read once present. When absent it is fetched
    /// once and recorded under the requested snapshot id, write-once from
    /// then on.
    async fn snapshot_slot(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: NaiveDateTime,
    ) -> DvResult<OptionChain> {
        if self.store.has_chain(symbol, expiration, Some(snapshot)) {
            match self.store.load_chain(symbol, expiration, Some(snapshot)) {
                Ok((chain, _)) => return Ok(chain),
                Err(e) if e.is_corrupt() => {
                    // A damaged recording was never validly written; clear it
                    // so the write-once store accepts the repair.
                    tracing::warn!("corrupt snapshot {snapshot} for {symbol} {expiration}: {e}");
                    self.store.delete_chain(symbol, expiration, Some(snapshot));
                }
                Err(e) => return Err(e),
            }
        }

        let fetched = self
            .provider
            .fetch_option_chain(symbol, Some(expiration))
            .await?;
        self.store.store_chain(
            symbol,
            expiration,
            &fetched.calls,
            &fetched.puts,
            &fetched.underlying,
            Utc::now(),
            Some(snapshot),
        )?;
        Ok(OptionChain::new(
            fetched.calls,
            fetched.puts,
            fetched.underlying,
        ))
    }

    /// Fetch fresh and fully replace the current slot. Calls, puts, and the
    /// underlying come back in one upstream call but persist as independent
    /// payload groups.
    pub async fn refresh(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> DvResult<OptionChain> {
        let symbol = normalize_symbol(symbol)?;
        let fetched = self.provider.fetch_option_chain(&symbol, expiration).await?;
        self.store.store_chain(
            &symbol,
            fetched.expiration,
            &fetched.calls,
            &fetched.puts,
            &fetched.underlying,
            Utc::now(),
            None,
        )?;
        Ok(OptionChain::new(
            fetched.calls,
            fetched.puts,
            fetched.underlying,
        ))
    }

    /// The listed expirations, reusing the stored tuple while it is still
    /// same-session-valid. `use_cache: false` skips the read but still
    /// refreshes the stored tuple.
    pub async fn list_expirations(&self, symbol: &str, use_cache: bool) -> DvResult<Vec<NaiveDate>> {
        let symbol = normalize_symbol(symbol)?;
        if use_cache {
            if let Some(meta) = self.store.load_expirations(&symbol)? {
                if same_session(meta.cached_at, Utc::now()) {
                    return Ok(meta.expirations);
                }
            }
        }

        let fresh = self.provider.fetch_expirations(&symbol).await?;
        self.store.store_expirations(&symbol, &fresh, Utc::now())?;
        Ok(fresh)
    }

    /// Chronologically ordered snapshot ids recorded for one expiration.
    pub fn enumerate_snapshots(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> DvResult<impl Iterator<Item = NaiveDateTime>> {
        self.store.iterate_snapshots(symbol, expiration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::providers::SampleDataProvider;
    use chrono::Duration;
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cache_at(
        root: &std::path::Path,
        provider: Arc<SampleDataProvider>,
    ) -> (OptionChainCache, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::new(&CacheConfig::new(root)).unwrap());
        (OptionChainCache::new(store.clone(), provider), store)
    }

    // Scenario: two same-session requests serve from cache; a session
    // rollover triggers exactly one refetch.
    #[tokio::test]
    async fn test_same_session_chain_is_reused() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new());
        let (cache, _) = cache_at(dir.path(), provider.clone());
        let expiration = day(2030, 1, 18);

        let first = cache
            .get_or_fetch("AAPL", Some(expiration), None)
            .await
            .unwrap();
        let second = cache
            .get_or_fetch("AAPL", Some(expiration), None)
            .await
            .unwrap();

        assert_eq!(provider.chain_request_count(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_session_rollover_forces_refetch() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new());
        let (cache, store) = cache_at(dir.path(), provider.clone());
        let expiration = day(2030, 1, 18);

        // A chain written during yesterday's session.
        let stale = provider
            .fetch_option_chain("AAPL", Some(expiration))
            .await
            .unwrap();
        store
            .store_chain(
                "AAPL",
                expiration,
                &stale.calls,
                &stale.puts,
                &stale.underlying,
                Utc::now() - Duration::days(1),
                None,
            )
            .unwrap();
        let baseline = provider.chain_request_count();

        cache
            .get_or_fetch("AAPL", Some(expiration), None)
            .await
            .unwrap();
        assert_eq!(provider.chain_request_count(), baseline + 1);

        // The refreshed slot now serves without another call.
        cache
            .get_or_fetch("AAPL", Some(expiration), None)
            .await
            .unwrap();
        assert_eq!(provider.chain_request_count(), baseline + 1);
    }

    #[tokio::test]
    async fn test_snapshot_slot_fetches_once_then_reads() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new());
        let (cache, store) = cache_at(dir.path(), provider.clone());
        let expiration = day(2030, 1, 18);
        let snap = day(2024, 1, 10).and_hms_opt(15, 30, 0).unwrap();

        let recorded = cache
            .get_or_fetch("AAPL", Some(expiration), Some(snap))
            .await
            .unwrap();
        assert_eq!(provider.chain_request_count(), 1);

        // Age the recording: snapshots ignore session freshness entirely.
        let meta = store.load_chain_meta("AAPL", expiration, Some(snap)).unwrap();
        assert!(!recorded.is_empty());
        assert!(meta.cached_at <= Utc::now());

        let reread = cache
            .get_or_fetch("AAPL", Some(expiration), Some(snap))
            .await
            .unwrap();
        assert_eq!(provider.chain_request_count(), 1);
        assert_eq!(recorded, reread);

        let listed: Vec<_> = cache.enumerate_snapshots("AAPL", expiration).unwrap().collect();
        assert_eq!(listed, vec![snap]);
    }

    #[tokio::test]
    async fn test_expirations_tuple_reused_within_session() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new());
        let (cache, store) = cache_at(dir.path(), provider.clone());

        let first = cache.list_expirations("AAPL", true).await.unwrap();
        let second = cache.list_expirations("AAPL", true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.expiration_request_count(), 1);

        // Bypassing the cache still refreshes the stored tuple.
        cache.list_expirations("AAPL", false).await.unwrap();
        assert_eq!(provider.expiration_request_count(), 2);

        // A tuple from an earlier session reads as stale.
        store
            .store_expirations("AAPL", &first, Utc::now() - Duration::days(1))
            .unwrap();
        cache.list_expirations("AAPL", true).await.unwrap();
        assert_eq!(provider.expiration_request_count(), 3);
    }

    #[tokio::test]
    async fn test_missing_expiration_resolves_nearest() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new());
        let (cache, store) = cache_at(dir.path(), provider.clone());

        let chain = cache.get_or_fetch("AAPL", None, None).await.unwrap();
        assert!(!chain.is_empty());
        // The chain landed under the nearest listed expiration.
        assert!(store.has_chain("AAPL", day(2030, 1, 18), None));
    }

    #[tokio::test]
    async fn test_no_expirations_yields_empty_chain() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new().with_expirations(Vec::new()));
        let (cache, _) = cache_at(dir.path(), provider.clone());

        let chain = cache.get_or_fetch("AAPL", None, None).await.unwrap();
        assert!(chain.is_empty());
        assert_eq!(provider.chain_request_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_current_slot_repaired() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(SampleDataProvider::new());
        let (cache, store) = cache_at(dir.path(), provider.clone());
        let expiration = day(2030, 1, 18);

        let clean = cache
            .get_or_fetch("AAPL", Some(expiration), None)
            .await
            .unwrap();

        let calls_path = store
            .root()
            .join("AAPL/options/2030-01-18/calls.csv");
        std::fs::write(&calls_path, b"garbage").unwrap();

        let repaired = cache
            .get_or_fetch("AAPL", Some(expiration), None)
            .await
            .unwrap();
        assert_eq!(clean, repaired);
        assert_eq!(provider.chain_request_count(), 2);
    }
}
