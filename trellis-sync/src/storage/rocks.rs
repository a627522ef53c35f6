//! RocksDB-backed record store.
//!
//! Column families:
//! - `canvas`   — canvas records, keyed by document id (LZ4 compressed)
//! - `workflow` — workflow records, keyed by document id (LZ4 compressed)
//! - `projects` — project records, keyed by record id (LZ4 compressed)
//! - `keys`     — key index: `<keyspace tag:1 byte><key bytes>` → id (16 bytes)
//!
//! Inserts and swaps are serialised by an in-process write lock and land as
//! one atomic write batch, so the key index and the record never disagree.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use super::{InsertOutcome, Keyspace, Record, RecordStore, StoreError, SwapOutcome};

const CF_KEYS: &str = "keys";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trellis_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Durable record store.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serialises read-check-write sequences
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store at the configured path, creating the database and
    /// column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Keyspace::ALL
            .iter()
            .map(|space| space.name())
            .chain(std::iter::once(CF_KEYS))
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened record store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);
        // Record values are LZ4 framed already; index values are 16 bytes
        opts.set_compression_type(DBCompressionType::None);

        if name == CF_KEYS {
            opts.optimize_for_point_lookup(config.block_cache_size as u64);
        } else {
            opts.set_max_write_buffer_number(2);
        }

        opts
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn index_key(space: Keyspace, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + key.len());
        out.push(space.tag());
        out.extend_from_slice(key);
        out
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn encode_record(record: &Record) -> Result<Vec<u8>, StoreError> {
        Ok(lz4_flex::compress_prepend_size(&record.encode()?))
    }

    fn decode_record(bytes: &[u8]) -> Result<Record, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::CompressionError(e.to_string()))?;
        Record::decode(&raw)
    }

    fn parse_id(bytes: &[u8]) -> Result<Uuid, StoreError> {
        Uuid::from_slice(bytes).map_err(|e| StoreError::DeserializationError(e.to_string()))
    }
}

impl RecordStore for RocksStore {
    fn get(&self, space: Keyspace, id: Uuid) -> Result<Option<Record>, StoreError> {
        let cf = self.cf(space.name())?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup(&self, space: Keyspace, key: &[u8]) -> Result<Option<Uuid>, StoreError> {
        let cf = self.cf(CF_KEYS)?;
        match self.db.get_cf(&cf, Self::index_key(space, key))? {
            Some(bytes) => Ok(Some(Self::parse_id(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_if_absent(
        &self,
        space: Keyspace,
        record: Record,
    ) -> Result<InsertOutcome, StoreError> {
        let _guard = self.write_lock.lock()?;
        if let Some(existing) = self.lookup(space, &record.key)? {
            return Ok(InsertOutcome::Existing(existing));
        }

        let cf_keys = self.cf(CF_KEYS)?;
        let cf_records = self.cf(space.name())?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_keys, Self::index_key(space, &record.key), record.id.as_bytes());
        batch.put_cf(&cf_records, record.id.as_bytes(), Self::encode_record(&record)?);
        self.db.write_opt(batch, &self.write_opts())?;

        Ok(InsertOutcome::Inserted(record))
    }

    fn compare_and_swap(
        &self,
        space: Keyspace,
        id: Uuid,
        expected_revision: u64,
        body: Vec<u8>,
    ) -> Result<SwapOutcome, StoreError> {
        let _guard = self.write_lock.lock()?;
        let Some(current) = self.get(space, id)? else {
            return Ok(SwapOutcome::Missing);
        };
        if current.revision != expected_revision {
            return Ok(SwapOutcome::Stale {
                current_revision: current.revision,
            });
        }

        let next = current.successor(body);
        let cf = self.cf(space.name())?;
        self.db
            .put_cf_opt(&cf, id.as_bytes(), Self::encode_record(&next)?, &self.write_opts())?;

        Ok(SwapOutcome::Swapped(next))
    }

    fn list_ids(&self, space: Keyspace) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(space.name())?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(Self::parse_id(&key)?);
        }
        Ok(ids)
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
