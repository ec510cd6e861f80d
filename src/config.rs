use std::{fs, path::Path, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::{
    error::{EventDbError, Result},
    timeutil,
};

pub const DEFAULT_DBFILE: &str = "eventdb.boltdb";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub dbfile: String,
    /// Duration string such as `1h` or `30d`; absent means the vacuum worker
    /// never deletes anything.
    pub retention: Option<String>,
    pub debug: bool,
    pub default_bucket: String,
    // The original wire key carries a typo; keep accepting it alongside the
    // corrected spelling.
    #[serde(rename = "promwebhool_conf", alias = "promwebhook_conf")]
    pub promwebhook_conf: Option<PromWebhookConf>,
    pub annotations_conf: Option<AnnotationsConf>,

    #[serde(skip)]
    pub retention_parsed: Option<Duration>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            dbfile: DEFAULT_DBFILE.to_owned(),
            retention: None,
            debug: false,
            default_bucket: String::new(),
            promwebhook_conf: None,
            annotations_conf: None,
            retention_parsed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PromWebhookConf {
    /// Whitelist of alert labels that are processed at all; empty means every
    /// label is accepted.
    pub mapped_labels: Vec<String>,
    /// Bucket used when an alert carries no `name` label.
    pub bucket: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnnotationsConf {
    /// Columns appended to the annotation text, one `name: value` per line.
    pub returned_cols: Vec<String>,
}

impl Configuration {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: Configuration = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.dbfile.is_empty() {
            self.dbfile = DEFAULT_DBFILE.to_owned();
        }
        if let Some(retention) = &self.retention {
            self.retention_parsed = Some(
                humantime::parse_duration(retention).map_err(|err| {
                    EventDbError::Config(format!("parse retention time: {err}"))
                })?,
            );
        }
        Ok(())
    }

    /// Timestamp below which events fall outside the retention window, or
    /// `None` when no retention is configured.
    pub fn retention_cutoff_nanos(&self, now: DateTime<Utc>) -> Option<i64> {
        let retention = self.retention_parsed?;
        Some(timeutil::to_nanos(now) - retention.as_nanos() as i64)
    }
}

/// Configuration shared across handlers and the vacuum worker. Reload swaps
/// the value wholesale; readers resolve it once per request and see either
/// the old or the new configuration, never a mix.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Configuration>>>,
}

impl SharedConfig {
    pub fn new(config: Configuration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn load(&self) -> Arc<Configuration> {
        Arc::clone(&self.inner.read())
    }

    pub fn store(&self, config: Configuration) {
        *self.inner.write() = Arc::new(config);
    }
}
