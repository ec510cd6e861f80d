use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::TimeRange;
use crate::{
    error::{EventDbError, Result},
    query::Query,
    server::AppState,
    timeutil,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryReq {
    pub range: TimeRange,
    pub interval: String,
    pub targets: Vec<QueryTarget>,
    #[serde(rename = "maxDataPoints")]
    pub max_data_points: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryTarget {
    pub target: String,
    #[serde(rename = "refId")]
    pub ref_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Serialize)]
pub struct TargetResp {
    pub target: String,
    /// `[count, timestamp-in-millis]` pairs, one per occupied interval slot.
    pub datapoints: Vec<[f64; 2]>,
    #[serde(skip)]
    prev_slot: i64,
}

impl TargetResp {
    fn append_ts(&mut self, ts: i64, interval: i64) {
        let slot = if interval > 1 { ts / interval } else { ts };
        if self.prev_slot == slot {
            if let Some(last) = self.datapoints.last_mut() {
                last[0] += 1.0;
                return;
            }
        }
        self.datapoints.push([1.0, (ts / 1_000_000) as f64]);
        self.prev_slot = slot;
    }
}

/// Grafana simple-json histogram endpoint: counts events per interval slot
/// for every `timeserie` target.
pub async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryReq>,
) -> Result<Json<Vec<Option<TargetResp>>>> {
    let from = timeutil::parse_time(&req.range.from)
        .map_err(|err| EventDbError::BadInput(format!("wrong from date: {err}")))?;
    let to = timeutil::parse_time(&req.range.to)
        .map_err(|err| EventDbError::BadInput(format!("wrong to date: {err}")))?;
    let interval = parse_interval(&req.interval);

    let mut resp = Vec::with_capacity(req.targets.len());
    for target in &req.targets {
        if target.kind != "timeserie" {
            info!(kind = %target.kind, "invalid target type");
            resp.push(None);
            continue;
        }

        let query = Query::parse(&target.target)?;
        let mut timestamps = query.execute_count(
            &state.store,
            timeutil::to_nanos(from),
            timeutil::to_nanos(to),
        )?;
        timestamps.sort_unstable();

        let mut entry = TargetResp {
            target: target.target.clone(),
            ..TargetResp::default()
        };
        for ts in timestamps {
            entry.append_ts(ts, interval);
        }

        // Truncation happens after aggregation; the tail is discarded.
        if req.max_data_points > 0 && entry.datapoints.len() > req.max_data_points {
            debug!(
                target = %target.target,
                datapoints = entry.datapoints.len(),
                limit = req.max_data_points,
                "limiting datapoints"
            );
            entry.datapoints.truncate(req.max_data_points);
        }

        resp.push(Some(entry));
    }

    Ok(Json(resp))
}

fn parse_interval(raw: &str) -> i64 {
    if raw.is_empty() {
        return 0;
    }
    match humantime::parse_duration(raw) {
        Ok(duration) => duration.as_secs() as i64 * 1_000_000_000,
        Err(err) => {
            info!("parse interval '{raw}' error: {err}");
            0
        }
    }
}

/// Grafana target lookup; the request body is ignored.
pub async fn search(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.store.buckets()?))
}
