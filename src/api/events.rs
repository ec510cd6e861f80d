use std::collections::BTreeMap;

use axum::{
    extract::{Query as UrlQuery, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::{
    error::{EventDbError, Result},
    event::{Event, EventCol},
    query::Query,
    server::AppState,
    timeutil,
};

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventReq {
    pub name: String,
    pub summary: String,
    pub time: Value,
    pub description: String,
    pub tags: String,
    pub labels: BTreeMap<String, String>,
}

pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<EventReq>,
) -> Result<impl IntoResponse> {
    let config = state.config.load();

    let mut event = Event {
        name: req.name,
        summary: req.summary,
        description: req.description,
        ..Event::default()
    };
    event.set_tags(&req.tags);
    event.cols = req
        .labels
        .into_iter()
        .map(|(name, value)| EventCol::new(name, value))
        .collect();
    event.time = parse_event_time(&req.time)?;

    if event.time == 0 {
        counter!("eventdb_events_failed_total", 1);
        return Err(EventDbError::BadInput("wrong time".into()));
    }

    if let Some(cutoff) = config.retention_cutoff_nanos(Utc::now()) {
        if event.time < cutoff {
            debug!(time = event.time, "event older than retention window - skipping");
            return Err(EventDbError::RetentionSkip);
        }
    }

    match state.store.save_event(&event) {
        Ok(()) => {
            counter!("eventdb_events_created_total", 1, "src" => "api-v2-event-post");
            Ok((StatusCode::CREATED, Json("ok")))
        }
        Err(err) => {
            error!("save event error: {err}");
            counter!("eventdb_events_failed_total", 1);
            Err(err)
        }
    }
}

fn parse_event_time(value: &Value) -> Result<i64> {
    match value {
        Value::Number(num) => {
            if let Some(int) = num.as_i64() {
                Ok(timeutil::num_to_unix_nano(int))
            } else if let Some(float) = num.as_f64() {
                Ok(timeutil::num_to_unix_nano(float as i64))
            } else {
                Err(EventDbError::BadInput("wrong time".into()))
            }
        }
        Value::String(raw) => Ok(timeutil::to_nanos(timeutil::parse_time(raw)?)),
        Value::Null => Ok(0),
        _ => Err(EventDbError::BadInput("wrong time".into())),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RangeParams {
    pub from: String,
    pub to: String,
    pub query: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventsHeader {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub query: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventsResponse {
    pub header: EventsHeader,
    pub events: Vec<Event>,
}

pub async fn list(
    State(state): State<AppState>,
    UrlQuery(params): UrlQuery<RangeParams>,
) -> Result<Json<EventsResponse>> {
    let now = Utc::now();
    let mut from = now - Duration::days(1);
    let mut to = now;

    if !params.from.is_empty() {
        from = timeutil::parse_time(&params.from)
            .map_err(|err| EventDbError::BadInput(format!("wrong from date: {err}")))?;
    }
    if !params.to.is_empty() {
        to = timeutil::parse_time(&params.to)
            .map_err(|err| EventDbError::BadInput(format!("wrong to date: {err}")))?;
    }

    let query = Query::parse(&params.query)?;
    let events = query.execute(
        &state.store,
        timeutil::to_nanos(from),
        timeutil::to_nanos(to),
    )?;

    Ok(Json(EventsResponse {
        header: EventsHeader {
            from,
            to,
            query: params.query,
        },
        events,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteResponse {
    pub deleted: usize,
}

pub async fn remove(
    State(state): State<AppState>,
    UrlQuery(params): UrlQuery<RangeParams>,
) -> Result<Json<DeleteResponse>> {
    let from = timeutil::parse_time(&params.from)
        .map_err(|err| EventDbError::BadInput(format!("wrong 'from' date: {err}")))?;
    let to = timeutil::parse_time(&params.to)
        .map_err(|err| EventDbError::BadInput(format!("wrong 'to' date: {err}")))?;
    if to < from {
        return Err(EventDbError::BadRange);
    }

    let query = Query::parse(&params.query)?;
    let deleted = query.execute_delete(
        &state.store,
        timeutil::to_nanos(from),
        timeutil::to_nanos(to),
    )?;

    Ok(Json(DeleteResponse { deleted }))
}

pub async fn buckets(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.store.buckets()?))
}
