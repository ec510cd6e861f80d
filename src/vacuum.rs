use std::{sync::Arc, time::Duration};

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::{sync::Notify, time};
use tracing::{info, warn};

use crate::{config::SharedConfig, store::EventStore};

const STARTUP_DELAY: Duration = Duration::from_secs(60);
const RUN_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);

/// Background retention enforcement. Waits a minute after startup, then runs
/// a pass every three hours; a pass with no retention configured is a no-op.
/// Every sleep is interruptible through the shutdown notification.
pub async fn run(store: Arc<EventStore>, config: SharedConfig, shutdown: Arc<Notify>) {
    if !sleep_or_shutdown(STARTUP_DELAY, &shutdown).await {
        return;
    }
    loop {
        run_once(&store, &config);
        if !sleep_or_shutdown(RUN_INTERVAL, &shutdown).await {
            return;
        }
    }
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = time::sleep(duration) => true,
        _ = shutdown.notified() => {
            info!("vacuum worker stopping");
            false
        }
    }
}

/// One retention pass across all buckets; returns the number of events
/// removed. Each bucket is deleted in its own short transaction so writers
/// are not starved, and a failing bucket does not stop the pass.
pub fn run_once(store: &EventStore, config: &SharedConfig) -> u64 {
    let config = config.load();
    let Some(cutoff) = config.retention_cutoff_nanos(Utc::now()) else {
        return 0;
    };
    if cutoff <= 0 {
        return 0;
    }

    let buckets = match store.buckets() {
        Ok(buckets) => buckets,
        Err(err) => {
            warn!("vacuum bucket enumeration failed: {err}");
            return 0;
        }
    };

    let mut total = 0u64;
    for bucket in buckets {
        match store.delete_events(&bucket, 0, cutoff, None) {
            Ok(deleted) => {
                info!(bucket = %bucket, deleted, cutoff, "vacuum pass");
                counter!("eventdb_vacuum_events_deleted_total", deleted as u64);
                total += deleted as u64;
            }
            Err(err) => warn!(bucket = %bucket, "vacuum delete error: {err}"),
        }
    }

    gauge!(
        "eventdb_vacuum_last_run_time_seconds",
        Utc::now().timestamp() as f64
    );
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Configuration, event::Event, timeutil};
    use tempfile::tempdir;

    #[test]
    fn pass_deletes_only_out_of_retention_events() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events")).unwrap();
        let config = SharedConfig::new(Configuration::from_yaml("retention: 1h\n").unwrap());

        let now = timeutil::to_nanos(Utc::now());
        let stale = Event {
            name: "svc".into(),
            time: now - 2 * 3_600_000_000_000,
            ..Event::default()
        };
        let fresh = Event {
            name: "svc".into(),
            time: now - 30 * 60_000_000_000,
            ..Event::default()
        };
        store.save_event(&stale).unwrap();
        store.save_event(&fresh).unwrap();

        let deleted = run_once(&store, &config);
        assert_eq!(deleted, 1);

        let remaining = store.get_events("svc", 0, i64::MAX, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].time, fresh.time);
    }

    #[test]
    fn pass_without_retention_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events")).unwrap();
        let config = SharedConfig::new(Configuration::default());

        let old = Event {
            name: "svc".into(),
            time: 1,
            ..Event::default()
        };
        store.save_event(&old).unwrap();

        assert_eq!(run_once(&store, &config), 0);
        assert_eq!(store.get_events("svc", 0, 10, None).unwrap().len(), 1);
    }
}
