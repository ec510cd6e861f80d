use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rocksdb::{
    DBIteratorWithThreadMode, DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options,
    SnapshotWithThreadMode, WriteBatch, WriteOptions,
};
use tracing::warn;

use crate::error::{EventDbError, Result};

type Db = DBWithThreadMode<MultiThreaded>;

/// Separator between key segments; never appears in the fixed prefixes.
const SEP: u8 = 0x1F;
/// Key-space for event records: `evt <SEP> bucket <SEP> record-key`.
const PREFIX_DATA: &str = "evt";
/// Registration keys: `bkt <SEP> bucket`. A bucket stays registered when its
/// last record is deleted, so emptied buckets still enumerate.
const PREFIX_REGISTRY: &str = "bkt";

pub const DEFAULT_BUCKET: &str = "__default__";

const OPEN_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Ordered key-value store with named buckets on a single rocksdb keyspace.
/// One writer at a time; readers work against snapshots and are never blocked
/// by the writer.
pub struct BucketStore {
    db: Db,
    write_lock: Mutex<()>,
}

impl BucketStore {
    /// Opens or creates the store. Another process holding the file lock is
    /// retried for up to ten seconds before giving up. The default bucket is
    /// created on first open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut options = Options::default();
        options.create_if_missing(true);

        let deadline = Instant::now() + OPEN_LOCK_TIMEOUT;
        let db = loop {
            match Db::open(&options, path) {
                Ok(db) => break db,
                Err(err) if is_lock_contention(&err) => {
                    if Instant::now() >= deadline {
                        return Err(EventDbError::Store(format!(
                            "timed out waiting for store lock on {}",
                            path.display()
                        )));
                    }
                    thread::sleep(OPEN_RETRY_DELAY);
                }
                Err(err) => {
                    return Err(EventDbError::Store(format!(
                        "open {}: {}",
                        path.display(),
                        err
                    )));
                }
            }
        };

        let store = Self {
            db,
            write_lock: Mutex::new(()),
        };
        store.update(|tx| {
            tx.create_bucket_if_missing(DEFAULT_BUCKET);
            Ok(())
        })?;
        Ok(store)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Integer-valued engine property, `None` when rocksdb does not report it.
    pub fn property_int(&self, name: &str) -> Option<u64> {
        self.db.property_int_value(name).ok().flatten()
    }

    /// Runs `f` inside a read-write transaction. The batch is committed with
    /// a synced write when `f` returns `Ok`; an `Err` return drops the batch
    /// unwritten, and a panic unwinds past it the same way.
    pub fn update<T>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut tx = WriteTx {
            db: &self.db,
            batch: WriteBatch::default(),
            created: Vec::new(),
        };
        let value = f(&mut tx)?;

        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(tx.batch, &opts)?;
        Ok(value)
    }

    /// Runs `f` against a consistent snapshot.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<T>) -> Result<T> {
        let tx = ReadTx {
            snapshot: self.db.snapshot(),
        };
        f(&tx)
    }
}

fn is_lock_contention(err: &rocksdb::Error) -> bool {
    err.to_string().to_ascii_lowercase().contains("lock")
}

/// Handle to a named bucket, valid for the duration of a transaction.
#[derive(Debug, Clone)]
pub struct Bucket {
    name: String,
    prefix: Vec<u8>,
}

impl Bucket {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            prefix: data_prefix(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn data_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

fn data_prefix(name: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(PREFIX_DATA.len() + name.len() + 2);
    prefix.extend_from_slice(PREFIX_DATA.as_bytes());
    prefix.push(SEP);
    prefix.extend_from_slice(name.as_bytes());
    prefix.push(SEP);
    prefix
}

fn registry_key(name: &str) -> Vec<u8> {
    let mut key = registry_prefix();
    key.extend_from_slice(name.as_bytes());
    key
}

fn registry_prefix() -> Vec<u8> {
    let mut prefix = Vec::with_capacity(PREFIX_REGISTRY.len() + 1);
    prefix.extend_from_slice(PREFIX_REGISTRY.as_bytes());
    prefix.push(SEP);
    prefix
}

pub struct WriteTx<'a> {
    db: &'a Db,
    batch: WriteBatch,
    /// Buckets registered within this transaction; the batch is not readable
    /// before commit, so lookups consult this list first.
    created: Vec<String>,
}

impl<'a> WriteTx<'a> {
    pub fn create_bucket_if_missing(&mut self, name: &str) -> Bucket {
        match self.bucket(name) {
            Ok(Some(bucket)) => bucket,
            _ => {
                self.batch.put(registry_key(name), b"");
                self.created.push(name.to_owned());
                Bucket::new(name)
            }
        }
    }

    pub fn bucket(&self, name: &str) -> Result<Option<Bucket>> {
        if self.created.iter().any(|created| created == name) {
            return Ok(Some(Bucket::new(name)));
        }
        Ok(self.db.get(registry_key(name))?.map(|_| Bucket::new(name)))
    }

    pub fn put(&mut self, bucket: &Bucket, key: &[u8], value: &[u8]) {
        self.batch.put(bucket.data_key(key), value);
    }

    pub fn delete(&mut self, bucket: &Bucket, key: &[u8]) {
        self.batch.delete(bucket.data_key(key));
    }

    pub fn cursor(&self, bucket: &Bucket) -> Cursor<'_> {
        Cursor::new(CursorSource::Live(self.db), bucket.prefix.clone())
    }
}

pub struct ReadTx<'a> {
    snapshot: SnapshotWithThreadMode<'a, Db>,
}

impl<'a> ReadTx<'a> {
    pub fn bucket(&self, name: &str) -> Result<Option<Bucket>> {
        Ok(self
            .snapshot
            .get(registry_key(name))?
            .map(|_| Bucket::new(name)))
    }

    pub fn cursor(&self, bucket: &Bucket) -> Cursor<'_> {
        Cursor::new(CursorSource::Snapshot(&self.snapshot), bucket.prefix.clone())
    }

    pub fn for_each_bucket(&self, mut f: impl FnMut(&str) -> Result<()>) -> Result<()> {
        let mut cursor = Cursor::new(CursorSource::Snapshot(&self.snapshot), registry_prefix());
        cursor.seek(&[]);
        while let Some((name, _)) = cursor.next() {
            match std::str::from_utf8(&name) {
                Ok(name) => f(name)?,
                Err(_) => warn!("skipping bucket with non-utf8 name: {name:?}"),
            }
        }
        Ok(())
    }

    pub fn bucket_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.for_each_bucket(|name| {
            names.push(name.to_owned());
            Ok(())
        })?;
        Ok(names)
    }
}

enum CursorSource<'a> {
    Live(&'a Db),
    Snapshot(&'a SnapshotWithThreadMode<'a, Db>),
}

/// Forward scan over one bucket's key-space. `seek` positions at the first
/// key at or after the given one; `next` yields `(key, value)` pairs with the
/// bucket prefix stripped, in ascending order, until the bucket is exhausted.
pub struct Cursor<'a> {
    source: CursorSource<'a>,
    prefix: Vec<u8>,
    iter: Option<DBIteratorWithThreadMode<'a, Db>>,
}

impl<'a> Cursor<'a> {
    fn new(source: CursorSource<'a>, prefix: Vec<u8>) -> Self {
        Self {
            source,
            prefix,
            iter: None,
        }
    }

    pub fn seek(&mut self, key: &[u8]) {
        let mut from = self.prefix.clone();
        from.extend_from_slice(key);
        let mode = IteratorMode::From(&from, Direction::Forward);
        self.iter = Some(match &self.source {
            CursorSource::Live(db) => db.iterator(mode),
            CursorSource::Snapshot(snapshot) => snapshot.iterator(mode),
        });
    }

    pub fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let iter = self.iter.as_mut()?;
        match iter.next()? {
            Ok((key, value)) => {
                if !key.starts_with(&self.prefix) {
                    self.iter = None;
                    return None;
                }
                Some((key[self.prefix.len()..].to_vec(), value.into_vec()))
            }
            Err(err) => {
                warn!("cursor iteration error: {err}");
                self.iter = None;
                None
            }
        }
    }
}
