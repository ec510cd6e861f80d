mod bucket;

use std::{collections::BTreeMap, path::Path};

use serde::Serialize;
use tracing::warn;

use crate::{
    error::{EventDbError, Result},
    event::{self, Event},
};

pub use bucket::{Bucket, BucketStore, Cursor, ReadTx, WriteTx, DEFAULT_BUCKET};

/// Predicate applied to decoded events during a scan. `None` means match-all
/// and lets the count/delete paths skip value decoding entirely.
pub type EventFilter<'a> = dyn Fn(&Event) -> bool + 'a;

/// Event persistence on top of the bucket store: one bucket per event stream,
/// records keyed by timestamp so range scans are cursor walks.
pub struct EventStore {
    kv: BucketStore,
}

impl EventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            kv: BucketStore::open(path)?,
        })
    }

    pub fn close(&self) -> Result<()> {
        self.kv.flush()
    }

    /// Persists one event. An unset timestamp is refused; an unset name goes
    /// to the default bucket, created on demand.
    pub fn save_event(&self, event: &Event) -> Result<()> {
        if event.time == 0 {
            return Err(EventDbError::BadInput("event time must be set".into()));
        }

        let name = bucket_name(&event.name);
        self.kv.update(|tx| {
            let bucket = tx.create_bucket_if_missing(name);
            let (value, key) = event.marshal()?;
            tx.put(&bucket, &key, &value);
            Ok(())
        })
    }

    /// Events with `from <= time <= to`, in ascending time order, optionally
    /// narrowed by a predicate. Records that fail to decode are logged and
    /// skipped; they never abort the scan.
    pub fn get_events<'a>(
        &self,
        name: &str,
        from: i64,
        to: i64,
        filter: Option<&'a EventFilter<'a>>,
    ) -> Result<Vec<Event>> {
        if to < from {
            return Err(EventDbError::BadRange);
        }

        let name = bucket_name(name);
        self.kv.view(|tx| {
            let bucket = tx
                .bucket(name)?
                .ok_or_else(|| EventDbError::UnknownBucket(name.to_owned()))?;

            let mut events = Vec::new();
            let mut cursor = tx.cursor(&bucket);
            cursor.seek(&event::marshal_ts(from, None));
            while let Some((key, value)) = cursor.next() {
                let ts = match event::unmarshal_ts(&key) {
                    Ok(ts) => ts,
                    Err(err) => {
                        warn!(bucket = name, "skipping record with bad key: {err}");
                        continue;
                    }
                };
                if ts > to {
                    break;
                }
                if ts < from {
                    continue;
                }
                match Event::unmarshal(&value) {
                    Ok(event) => {
                        if filter.map_or(true, |matches| matches(&event)) {
                            events.push(event);
                        }
                    }
                    Err(err) => warn!(bucket = name, ts, "skipping undecodable record: {err}"),
                }
            }
            Ok(events)
        })
    }

    /// Deletes events in the range, returning how many were removed. Keys are
    /// collected before any delete is issued so the scan is never invalidated.
    pub fn delete_events<'a>(
        &self,
        name: &str,
        from: i64,
        to: i64,
        filter: Option<&'a EventFilter<'a>>,
    ) -> Result<usize> {
        if to < from {
            return Err(EventDbError::BadRange);
        }

        let name = bucket_name(name);
        self.kv.update(|tx| {
            let bucket = tx
                .bucket(name)?
                .ok_or_else(|| EventDbError::UnknownBucket(name.to_owned()))?;

            let mut keys = Vec::new();
            let mut cursor = tx.cursor(&bucket);
            cursor.seek(&event::marshal_ts(from, None));
            while let Some((key, value)) = cursor.next() {
                let ts = match event::unmarshal_ts(&key) {
                    Ok(ts) => ts,
                    Err(_) => continue,
                };
                if ts > to {
                    break;
                }
                if ts < from {
                    continue;
                }
                match filter {
                    None => keys.push(key),
                    Some(matches) => match Event::unmarshal(&value) {
                        Ok(event) if matches(&event) => keys.push(key),
                        Ok(_) => {}
                        Err(err) => {
                            warn!(bucket = name, ts, "skipping undecodable record: {err}");
                        }
                    },
                }
            }
            drop(cursor);

            let deleted = keys.len();
            for key in keys {
                tx.delete(&bucket, &key);
            }
            Ok(deleted)
        })
    }

    /// Timestamps of matching events; with no filter the record values are
    /// never decoded.
    pub fn count_events<'a>(
        &self,
        name: &str,
        from: i64,
        to: i64,
        filter: Option<&'a EventFilter<'a>>,
    ) -> Result<Vec<i64>> {
        if to < from {
            return Err(EventDbError::BadRange);
        }

        let name = bucket_name(name);
        self.kv.view(|tx| {
            let bucket = tx
                .bucket(name)?
                .ok_or_else(|| EventDbError::UnknownBucket(name.to_owned()))?;

            let mut timestamps = Vec::new();
            let mut cursor = tx.cursor(&bucket);
            cursor.seek(&event::marshal_ts(from, None));
            while let Some((key, value)) = cursor.next() {
                let ts = match event::unmarshal_ts(&key) {
                    Ok(ts) => ts,
                    Err(_) => continue,
                };
                if ts > to {
                    break;
                }
                if ts < from {
                    continue;
                }
                match filter {
                    None => timestamps.push(ts),
                    Some(matches) => match Event::unmarshal(&value) {
                        Ok(event) if matches(&event) => timestamps.push(ts),
                        Ok(_) => {}
                        Err(err) => {
                            warn!(bucket = name, ts, "skipping undecodable record: {err}");
                        }
                    },
                }
            }
            Ok(timestamps)
        })
    }

    /// Names of all buckets visible in one snapshot.
    pub fn buckets(&self) -> Result<Vec<String>> {
        self.kv.view(|tx| tx.bucket_names())
    }

    /// Per-bucket record counts plus a few engine-level figures, all taken
    /// from one snapshot. Counting walks keys only; values are not decoded.
    pub fn stats(&self) -> Result<StoreStats> {
        let buckets = self.kv.view(|tx| {
            let mut counts = BTreeMap::new();
            for name in tx.bucket_names()? {
                let Some(bucket) = tx.bucket(&name)? else {
                    continue;
                };
                let mut cursor = tx.cursor(&bucket);
                cursor.seek(&[]);
                let mut count = 0usize;
                while cursor.next().is_some() {
                    count += 1;
                }
                counts.insert(name, count);
            }
            Ok(counts)
        })?;

        Ok(StoreStats {
            buckets,
            estimated_keys: self.kv.property_int("rocksdb.estimate-num-keys"),
            total_sst_files_size: self.kv.property_int("rocksdb.total-sst-files-size"),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub buckets: BTreeMap<String, usize>,
    pub estimated_keys: Option<u64>,
    pub total_sst_files_size: Option<u64>,
}

fn bucket_name(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_BUCKET
    } else {
        name
    }
}
