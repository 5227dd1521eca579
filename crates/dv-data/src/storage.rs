//! Hierarchical on-disk store: deterministic key→path mapping plus atomic
//! persistence.
//!
//! Price days live at `root/SYMBOL/INTERVAL/YYYY/MM/YYYY-MM-DD-INTERVAL.csv`
//! with a JSON metadata sidecar next to the payload. Option chains live
//! under `root/SYMBOL/options/EXPIRATION/`, historical snapshots one level
//! deeper. Payloads are written to a temp file in the target directory and
//! renamed into place, so a reader never observes a half-written file;
//! concurrent stores on one key resolve to last-writer-wins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use dv_types::{
    DvError, DvResult, Interval, OptionChain, OptionLeg, OptionRow, PriceRow, UnderlyingQuote,
    PRICE_COLUMNS,
};

use crate::config::CacheConfig;
use crate::keys::{normalize_symbol, OptionCacheKey, PriceCacheKey};

const PAYLOAD_EXT: &str = "csv";
const OPTIONS_DIR: &str = "options";
const SNAPSHOTS_DIR: &str = "historical";

/// Sidecar metadata for one cached price day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    pub symbol: String,
    pub interval: Interval,
    pub day: NaiveDate,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub checksum: String,
    pub written_at: DateTime<Utc>,
}

/// A cached payload together with its sidecar metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub rows: Vec<PriceRow>,
    pub meta: EntryMeta,
}

/// Sidecar metadata for one option-chain slot. The underlying attribute set
/// rides along here rather than in a payload file of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainMeta {
    pub symbol: String,
    pub expiration: NaiveDate,
    pub cached_at: DateTime<Utc>,
    pub calls_rows: usize,
    pub puts_rows: usize,
    pub calls_checksum: String,
    pub puts_checksum: String,
    pub underlying: UnderlyingQuote,
}

/// Stored expiration tuple for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationsMeta {
    pub expirations: Vec<NaiveDate>,
    pub cached_at: DateTime<Utc>,
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn encode_rows<T: Serialize>(rows: &[T]) -> DvResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| DvError::Io(std::io::Error::other(e.to_string())))?;
    }
    writer
        .into_inner()
        .map_err(|e| DvError::Io(std::io::Error::other(e.to_string())))
}

fn decode_rows<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> DvResult<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.map_err(|e| DvError::corrupt(path, format!("payload decode: {e}")))?);
    }
    Ok(rows)
}

fn read_sidecar<T: DeserializeOwned>(path: &Path) -> DvResult<T> {
    let bytes =
        fs::read(path).map_err(|e| DvError::corrupt(path, format!("unreadable sidecar: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DvError::corrupt(path, format!("sidecar decode: {e}")))
}

/// Read a payload file and verify it against the recorded checksum.
fn read_verified(path: &Path, checksum: &str) -> DvResult<Vec<u8>> {
    let bytes =
        fs::read(path).map_err(|e| DvError::corrupt(path, format!("unreadable payload: {e}")))?;
    if hex_digest(&bytes) != checksum {
        return Err(DvError::corrupt(path, "checksum mismatch"));
    }
    Ok(bytes)
}

/// Write `bytes` to a temp file in `dir` and atomically rename to `path`.
fn persist_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> DvResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| DvError::Io(e.error))?;
    Ok(())
}

/// On-disk cache store rooted at a fixed path.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(config: &CacheConfig) -> DvResult<Self> {
        fs::create_dir_all(&config.root)?;
        Ok(Self {
            root: config.root.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn day_dir(&self, key: &PriceCacheKey) -> PathBuf {
        self.root
            .join(&key.symbol)
            .join(key.interval.as_str())
            .join(format!("{:04}", key.day.year()))
            .join(format!("{:02}", key.day.month()))
    }

    fn data_path(&self, key: &PriceCacheKey) -> PathBuf {
        self.day_dir(key).join(format!(
            "{}-{}.{}",
            key.day.format("%Y-%m-%d"),
            key.interval,
            PAYLOAD_EXT
        ))
    }

    fn meta_path(&self, key: &PriceCacheKey) -> PathBuf {
        self.day_dir(key)
            .join(format!("{}-{}.json", key.day.format("%Y-%m-%d"), key.interval))
    }

    /// Existence check by metadata presence only; the payload is not read.
    pub fn has(&self, key: &PriceCacheKey) -> bool {
        self.meta_path(key).exists()
    }

    /// Load a cached day. Checksum mismatches and undecodable payloads come
    /// back as [`DvError::Corrupt`]; callers treat that as a miss and
    /// refetch rather than surfacing it.
    pub fn load(&self, key: &PriceCacheKey) -> DvResult<CacheEntry> {
        let meta: EntryMeta = read_sidecar(&self.meta_path(key))?;
        let data_path = self.data_path(key);
        let bytes = read_verified(&data_path, &meta.checksum)?;
        let rows: Vec<PriceRow> = decode_rows(&bytes, &data_path)?;
        if rows.len() != meta.row_count {
            return Err(DvError::corrupt(
                &data_path,
                format!("row count {} != recorded {}", rows.len(), meta.row_count),
            ));
        }
        Ok(CacheEntry { rows, meta })
    }

    /// Persist one day of rows. Re-storing the same key replaces the entry
    /// atomically. Zero-row payloads are stored too: an empty trading day
    /// is a valid entry, not a miss.
    pub fn store(&self, key: &PriceCacheKey, rows: &[PriceRow]) -> DvResult<()> {
        let dir = self.day_dir(key);
        fs::create_dir_all(&dir)?;

        let payload = encode_rows(rows)?;
        let meta = EntryMeta {
            symbol: key.symbol.clone(),
            interval: key.interval,
            day: key.day,
            row_count: rows.len(),
            columns: PRICE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            checksum: hex_digest(&payload),
            written_at: Utc::now(),
        };

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&payload)?;
        fs::write(self.meta_path(key), serde_json::to_vec_pretty(&meta)?)?;
        tmp.persist(self.data_path(key))
            .map_err(|e| DvError::Io(e.error))?;

        tracing::debug!(
            "stored {} {} {} ({} rows)",
            key.symbol,
            key.interval,
            key.day,
            rows.len()
        );
        Ok(())
    }

    /// Best-effort removal. Payload and sidecar need not go together;
    /// absence of either reads as a miss.
    pub fn delete(&self, key: &PriceCacheKey) {
        let _ = fs::remove_file(self.data_path(key));
        let _ = fs::remove_file(self.meta_path(key));
    }

    /// Chronologically ordered cached days for a symbol/interval, computed
    /// from directory contents at call time. Each call re-lists, so the
    /// sequence is restartable; it reflects state at iteration start, not a
    /// live view.
    pub fn iterate(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> DvResult<impl Iterator<Item = NaiveDate>> {
        let dir = self.root.join(normalize_symbol(symbol)?).join(interval.as_str());
        let mut days = Vec::new();
        for year_dir in sorted_dirs(&dir)? {
            for month_dir in sorted_dirs(&year_dir)? {
                for file in sorted_files(&month_dir)? {
                    if file.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let prefix = match file.file_stem().and_then(|s| s.to_str()).and_then(|s| s.get(..10)) {
                        Some(p) => p,
                        None => continue,
                    };
                    if let Ok(day) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                        days.push(day);
                    }
                }
            }
        }
        days.sort_unstable();
        Ok(days.into_iter())
    }

    // ------------------------------------------------------------------
    // Option-chain slots
    // ------------------------------------------------------------------

    fn expiration_dir(&self, symbol: &str, expiration: NaiveDate) -> PathBuf {
        self.root
            .join(symbol)
            .join(OPTIONS_DIR)
            .join(expiration.format("%Y-%m-%d").to_string())
    }

    fn chain_dir(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: Option<NaiveDateTime>,
    ) -> PathBuf {
        let dir = self.expiration_dir(symbol, expiration);
        match snapshot {
            None => dir,
            Some(snap) => dir
                .join(SNAPSHOTS_DIR)
                .join(snap.date().format("%Y-%m-%d").to_string()),
        }
    }

    fn leg_path(&self, key: &OptionCacheKey) -> PathBuf {
        let dir = self.chain_dir(&key.symbol, key.expiration, key.snapshot);
        let leg = key.leg.as_str();
        match key.snapshot {
            None => dir.join(format!("{leg}.{PAYLOAD_EXT}")),
            Some(snap) => dir.join(format!("{leg}_{}.{PAYLOAD_EXT}", snap.format("%H%M%S"))),
        }
    }

    fn chain_meta_path(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: Option<NaiveDateTime>,
    ) -> PathBuf {
        let dir = self.chain_dir(symbol, expiration, snapshot);
        match snapshot {
            None => dir.join("metadata.json"),
            Some(snap) => dir.join(format!("metadata_{}.json", snap.format("%H%M%S"))),
        }
    }

    pub fn has_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: Option<NaiveDateTime>,
    ) -> bool {
        self.chain_meta_path(symbol, expiration, snapshot).exists()
    }

    pub fn load_chain_meta(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: Option<NaiveDateTime>,
    ) -> DvResult<ChainMeta> {
        read_sidecar(&self.chain_meta_path(symbol, expiration, snapshot))
    }

    /// Load a full chain slot: both leg payloads verified against the
    /// metadata checksums, plus the underlying attributes from the sidecar.
    pub fn load_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: Option<NaiveDateTime>,
    ) -> DvResult<(OptionChain, ChainMeta)> {
        let meta = self.load_chain_meta(symbol, expiration, snapshot)?;

        let calls_key = OptionCacheKey {
            symbol: symbol.to_string(),
            expiration,
            leg: OptionLeg::Calls,
            snapshot,
        };
        let puts_key = OptionCacheKey {
            leg: OptionLeg::Puts,
            ..calls_key.clone()
        };

        let calls_path = self.leg_path(&calls_key);
        let calls: Vec<OptionRow> = decode_rows(
            &read_verified(&calls_path, &meta.calls_checksum)?,
            &calls_path,
        )?;
        let puts_path = self.leg_path(&puts_key);
        let puts: Vec<OptionRow> =
            decode_rows(&read_verified(&puts_path, &meta.puts_checksum)?, &puts_path)?;

        let chain = OptionChain::new(calls, puts, meta.underlying.clone());
        Ok((chain, meta))
    }

    /// Persist a chain slot: leg payloads renamed into place first, the
    /// metadata sidecar (which gates `has_chain`) written last. Storing an
    /// already-present historical snapshot is a no-op, since snapshots are
    /// write-once.
    #[allow(clippy::too_many_arguments)]
    pub fn store_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        calls: &[OptionRow],
        puts: &[OptionRow],
        underlying: &UnderlyingQuote,
        cached_at: DateTime<Utc>,
        snapshot: Option<NaiveDateTime>,
    ) -> DvResult<()> {
        let meta_path = self.chain_meta_path(symbol, expiration, snapshot);
        if snapshot.is_some() && meta_path.exists() {
            tracing::debug!("snapshot already recorded for {symbol} {expiration}; keeping it");
            return Ok(());
        }

        let dir = self.chain_dir(symbol, expiration, snapshot);
        fs::create_dir_all(&dir)?;

        let calls_payload = encode_rows(calls)?;
        let puts_payload = encode_rows(puts)?;
        let meta = ChainMeta {
            symbol: symbol.to_string(),
            expiration,
            cached_at,
            calls_rows: calls.len(),
            puts_rows: puts.len(),
            calls_checksum: hex_digest(&calls_payload),
            puts_checksum: hex_digest(&puts_payload),
            underlying: underlying.clone(),
        };

        let calls_key = OptionCacheKey {
            symbol: symbol.to_string(),
            expiration,
            leg: OptionLeg::Calls,
            snapshot,
        };
        let puts_key = OptionCacheKey {
            leg: OptionLeg::Puts,
            ..calls_key.clone()
        };
        persist_atomic(&dir, &self.leg_path(&calls_key), &calls_payload)?;
        persist_atomic(&dir, &self.leg_path(&puts_key), &puts_payload)?;
        persist_atomic(&dir, &meta_path, &serde_json::to_vec_pretty(&meta)?)?;

        tracing::debug!(
            "stored chain {symbol} {expiration} ({} calls, {} puts, snapshot: {})",
            calls.len(),
            puts.len(),
            snapshot.is_some()
        );
        Ok(())
    }

    /// Best-effort removal of one chain slot, used to clear corrupt entries
    /// before a repair fetch.
    pub fn delete_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
        snapshot: Option<NaiveDateTime>,
    ) {
        for leg in [OptionLeg::Calls, OptionLeg::Puts] {
            let key = OptionCacheKey {
                symbol: symbol.to_string(),
                expiration,
                leg,
                snapshot,
            };
            let _ = fs::remove_file(self.leg_path(&key));
        }
        let _ = fs::remove_file(self.chain_meta_path(symbol, expiration, snapshot));
    }

    /// Chronologically ordered expirations with any cached chain data.
    /// Same snapshot-at-call-time contract as [`CacheStore::iterate`].
    pub fn iterate_expirations(
        &self,
        symbol: &str,
    ) -> DvResult<impl Iterator<Item = NaiveDate>> {
        let dir = self.root.join(normalize_symbol(symbol)?).join(OPTIONS_DIR);
        let mut expirations = Vec::new();
        for entry in sorted_dirs(&dir)? {
            if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                if let Ok(day) = NaiveDate::parse_from_str(name, "%Y-%m-%d") {
                    expirations.push(day);
                }
            }
        }
        expirations.sort_unstable();
        Ok(expirations.into_iter())
    }

    /// Chronologically ordered snapshot timestamps recorded for one
    /// expiration.
    pub fn iterate_snapshots(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> DvResult<impl Iterator<Item = NaiveDateTime>> {
        let dir = self
            .expiration_dir(&normalize_symbol(symbol)?, expiration)
            .join(SNAPSHOTS_DIR);
        let mut snapshots = Vec::new();
        for day_dir in sorted_dirs(&dir)? {
            let day = match day_dir
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok())
            {
                Some(d) => d,
                None => continue,
            };
            for file in sorted_files(&day_dir)? {
                let stem = match file.file_stem().and_then(|s| s.to_str()) {
                    Some(s) => s,
                    None => continue,
                };
                if let Some(hms) = stem.strip_prefix("metadata_") {
                    if let Ok(time) = chrono::NaiveTime::parse_from_str(hms, "%H%M%S") {
                        snapshots.push(day.and_time(time));
                    }
                }
            }
        }
        snapshots.sort_unstable();
        Ok(snapshots.into_iter())
    }

    // ------------------------------------------------------------------
    // Expiration-tuple slot
    // ------------------------------------------------------------------

    fn expirations_path(&self, symbol: &str) -> PathBuf {
        self.root
            .join(symbol)
            .join(OPTIONS_DIR)
            .join("expirations.json")
    }

    /// The stored expiration tuple, or `None` when absent or unreadable;
    /// a damaged tuple reads as a miss, never an error.
    pub fn load_expirations(&self, symbol: &str) -> DvResult<Option<ExpirationsMeta>> {
        let path = self.expirations_path(symbol);
        if !path.exists() {
            return Ok(None);
        }
        match read_sidecar::<ExpirationsMeta>(&path) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::debug!("unreadable expirations tuple for {symbol}: {e}");
                Ok(None)
            }
        }
    }

    pub fn store_expirations(
        &self,
        symbol: &str,
        expirations: &[NaiveDate],
        cached_at: DateTime<Utc>,
    ) -> DvResult<()> {
        let path = self.expirations_path(symbol);
        let dir = self.root.join(symbol).join(OPTIONS_DIR);
        fs::create_dir_all(&dir)?;
        let meta = ExpirationsMeta {
            expirations: expirations.to_vec(),
            cached_at,
        };
        persist_atomic(&dir, &path, &serde_json::to_vec_pretty(&meta)?)
    }
}

/// Sorted subdirectories of `dir`; empty when `dir` does not exist.
fn sorted_dirs(dir: &Path) -> DvResult<Vec<PathBuf>> {
    list_sorted(dir, true)
}

/// Sorted plain files of `dir`; empty when `dir` does not exist.
fn sorted_files(dir: &Path) -> DvResult<Vec<PathBuf>> {
    list_sorted(dir, false)
}

fn list_sorted(dir: &Path, dirs_only: bool) -> DvResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() == dirs_only {
            entries.push(path);
        }
    }
    entries.sort_unstable();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn store_at(root: &Path) -> CacheStore {
        CacheStore::new(&CacheConfig::new(root)).unwrap()
    }

    fn sample_rows(symbol: &str, d: NaiveDate, count: u32) -> Vec<PriceRow> {
        (0..count)
            .map(|i| {
                let ts = Utc
                    .with_ymd_and_hms(d.year(), d.month(), d.day(), 14, 30 + i, 0)
                    .unwrap();
                PriceRow::new(
                    symbol,
                    ts,
                    dec!(100) + rust_decimal::Decimal::from(i),
                    dec!(105),
                    dec!(98),
                    dec!(102),
                    dec!(102),
                    dec!(10000),
                )
            })
            .collect()
    }

    fn sample_calls() -> Vec<OptionRow> {
        vec![OptionRow {
            contract_symbol: "AAPL240119C00150000".to_string(),
            last_trade: Some(Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap()),
            strike: dec!(150),
            last_price: Some(dec!(2.50)),
            bid: Some(dec!(2.45)),
            ask: Some(dec!(2.55)),
            volume: Some(120),
            open_interest: Some(4000),
            implied_volatility: Some(0.22),
            in_the_money: Some(false),
        }]
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 18)).unwrap();
        let rows = sample_rows("AAPL", key.day, 3);

        store.store(&key, &rows).unwrap();
        let entry = store.load(&key).unwrap();
        assert_eq!(entry.rows, rows);
        assert_eq!(entry.meta.row_count, 3);
        assert_eq!(entry.meta.columns, PRICE_COLUMNS.to_vec());
    }

    #[test]
    fn test_repeated_store_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 18)).unwrap();
        let rows = sample_rows("AAPL", key.day, 2);

        store.store(&key, &rows).unwrap();
        store.store(&key, &rows).unwrap();
        assert_eq!(store.load(&key).unwrap().rows, rows);
    }

    #[test]
    fn test_restore_replaces_entry() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 18)).unwrap();

        store.store(&key, &sample_rows("AAPL", key.day, 2)).unwrap();
        let newer = sample_rows("AAPL", key.day, 5);
        store.store(&key, &newer).unwrap();
        assert_eq!(store.load(&key).unwrap().rows, newer);
    }

    #[test]
    fn test_has_checks_metadata_only() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 18)).unwrap();
        store.store(&key, &sample_rows("AAPL", key.day, 1)).unwrap();

        // Removing only the payload leaves has() true; the load then fails
        // as corrupt and is recovered by the caller as a miss.
        fs::remove_file(store.data_path(&key)).unwrap();
        assert!(store.has(&key));
        assert!(store.load(&key).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_zero_row_entry_is_a_hit() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 25)).unwrap();

        store.store(&key, &[]).unwrap();
        assert!(store.has(&key));
        let entry = store.load(&key).unwrap();
        assert!(entry.rows.is_empty());
        assert_eq!(entry.meta.row_count, 0);
    }

    #[test]
    fn test_truncated_payload_detected() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 18)).unwrap();
        store.store(&key, &sample_rows("AAPL", key.day, 3)).unwrap();

        let path = store.data_path(&key);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(store.load(&key).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_delete_reads_as_miss() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let key = PriceCacheKey::new("AAPL", Interval::Day, day(2023, 12, 18)).unwrap();
        store.store(&key, &sample_rows("AAPL", key.day, 1)).unwrap();

        store.delete(&key);
        assert!(!store.has(&key));
        // Deleting again is harmless.
        store.delete(&key);
    }

    #[test]
    fn test_iterate_is_chronological_and_restartable() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        for d in [day(2024, 1, 3), day(2023, 12, 18), day(2023, 11, 6)] {
            let key = PriceCacheKey::new("AAPL", Interval::Day, d).unwrap();
            store.store(&key, &sample_rows("AAPL", d, 1)).unwrap();
        }
        // A different interval must not leak in.
        let other = PriceCacheKey::new("AAPL", Interval::Hour, day(2023, 12, 19)).unwrap();
        store.store(&other, &sample_rows("AAPL", other.day, 1)).unwrap();

        let expected = vec![day(2023, 11, 6), day(2023, 12, 18), day(2024, 1, 3)];
        let first: Vec<_> = store.iterate("AAPL", Interval::Day).unwrap().collect();
        let second: Vec<_> = store.iterate("AAPL", Interval::Day).unwrap().collect();
        assert_eq!(first, expected);
        assert_eq!(second, expected);
    }

    #[test]
    fn test_iterate_unknown_symbol_is_empty() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        assert_eq!(store.iterate("MSFT", Interval::Day).unwrap().count(), 0);
    }

    #[test]
    fn test_chain_round_trip_current_slot() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let expiration = day(2024, 1, 19);
        let underlying = UnderlyingQuote {
            symbol: "AAPL".to_string(),
            price: Some(dec!(185.5)),
            previous_close: Some(dec!(184.0)),
            currency: Some("USD".to_string()),
            quote_time: Some(Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap()),
        };
        let cached_at = Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap();

        store
            .store_chain("AAPL", expiration, &sample_calls(), &[], &underlying, cached_at, None)
            .unwrap();

        assert!(store.has_chain("AAPL", expiration, None));
        let (chain, meta) = store.load_chain("AAPL", expiration, None).unwrap();
        assert_eq!(chain.calls, sample_calls());
        assert!(chain.puts.is_empty());
        assert_eq!(chain.underlying, underlying);
        assert_eq!(meta.cached_at, cached_at);
    }

    #[test]
    fn test_snapshot_slot_is_write_once() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let expiration = day(2024, 1, 19);
        let snap = day(2024, 1, 10).and_hms_opt(15, 30, 0).unwrap();
        let underlying = UnderlyingQuote::new("AAPL");
        let cached_at = Utc.with_ymd_and_hms(2024, 1, 10, 20, 30, 0).unwrap();

        store
            .store_chain("AAPL", expiration, &sample_calls(), &[], &underlying, cached_at, Some(snap))
            .unwrap();
        // A second store against the same snapshot must not replace it.
        store
            .store_chain("AAPL", expiration, &[], &[], &underlying, cached_at, Some(snap))
            .unwrap();

        let (chain, _) = store.load_chain("AAPL", expiration, Some(snap)).unwrap();
        assert_eq!(chain.calls, sample_calls());
    }

    #[test]
    fn test_iterate_snapshots_chronological() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let expiration = day(2024, 1, 19);
        let underlying = UnderlyingQuote::new("AAPL");
        let cached_at = Utc.with_ymd_and_hms(2024, 1, 10, 20, 30, 0).unwrap();

        let snaps = [
            day(2024, 1, 10).and_hms_opt(15, 30, 0).unwrap(),
            day(2024, 1, 9).and_hms_opt(20, 0, 0).unwrap(),
            day(2024, 1, 10).and_hms_opt(9, 45, 0).unwrap(),
        ];
        for snap in snaps {
            store
                .store_chain("AAPL", expiration, &[], &[], &underlying, cached_at, Some(snap))
                .unwrap();
        }

        let listed: Vec<_> = store.iterate_snapshots("AAPL", expiration).unwrap().collect();
        assert_eq!(
            listed,
            vec![
                day(2024, 1, 9).and_hms_opt(20, 0, 0).unwrap(),
                day(2024, 1, 10).and_hms_opt(9, 45, 0).unwrap(),
                day(2024, 1, 10).and_hms_opt(15, 30, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_expirations_tuple_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let cached_at = Utc.with_ymd_and_hms(2024, 1, 10, 14, 0, 0).unwrap();
        let expirations = vec![day(2024, 1, 19), day(2024, 2, 16)];

        assert!(store.load_expirations("AAPL").unwrap().is_none());
        store.store_expirations("AAPL", &expirations, cached_at).unwrap();

        let meta = store.load_expirations("AAPL").unwrap().unwrap();
        assert_eq!(meta.expirations, expirations);
        assert_eq!(meta.cached_at, cached_at);
    }

    #[test]
    fn test_damaged_expirations_tuple_reads_as_miss() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let path = store.expirations_path("AAPL");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not json").unwrap();

        assert!(store.load_expirations("AAPL").unwrap().is_none());
    }
}
