use std::collections::BTreeMap;

use axum::{extract::State, response::{IntoResponse, Response}, Json};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    config::Configuration,
    error::{EventDbError, Result},
    event::{Event, EventCol},
    server::AppState,
    timeutil,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub status: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(rename = "endsAt")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookMessage {
    pub receiver: String,
    pub status: String,
    pub alerts: Vec<Alert>,
    #[serde(rename = "groupLabels")]
    pub group_labels: BTreeMap<String, String>,
    #[serde(rename = "commonLabels")]
    pub common_labels: BTreeMap<String, String>,
    #[serde(rename = "commonAnnotations")]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(rename = "externalURL")]
    pub external_url: String,
    pub version: String,
    #[serde(rename = "groupKey")]
    pub group_key: serde_json::Value,
}

/// AlertManager webhook ingest: one event per alert, timestamped from
/// `startsAt`. Alerts older than the retention window are skipped; when every
/// alert in the payload was skipped the response is 304.
pub async fn ingest(
    State(state): State<AppState>,
    Json(message): Json<WebhookMessage>,
) -> Result<Response> {
    let config = state.config.load();
    let cutoff = config.retention_cutoff_nanos(Utc::now());

    let mut saved = 0usize;
    let mut skipped = 0usize;

    for alert in &message.alerts {
        let Some(starts_at) = alert.starts_at else {
            debug!("alert without startsAt - skipping");
            continue;
        };
        let time = timeutil::to_nanos(starts_at);

        if let Some(cutoff) = cutoff {
            if time < cutoff {
                debug!(%starts_at, "alert older than retention window - skipping");
                skipped += 1;
                continue;
            }
        }

        let event = event_from_alert(alert, time, &config);
        match state.store.save_event(&event) {
            Ok(()) => {
                saved += 1;
                counter!("eventdb_events_created_total", 1, "src" => "api-v1-promwebhook-post");
            }
            Err(err) => {
                error!("save event error: {err}");
                counter!("eventdb_events_failed_total", 1);
            }
        }
    }

    if saved == 0 && skipped > 0 {
        return Err(EventDbError::RetentionSkip);
    }
    Ok(Json(message).into_response())
}

fn event_from_alert(alert: &Alert, time: i64, config: &Configuration) -> Event {
    let mut event = Event {
        time,
        ..Event::default()
    };

    event.summary = match alert.annotations.get("summary") {
        Some(summary) => format!("[{}] {}", alert.status, summary.trim()),
        None => format!("[{}]", alert.status),
    };
    if let Some(description) = alert.annotations.get("description") {
        event.description = description.trim().to_owned();
    }

    let mapped_labels = config
        .promwebhook_conf
        .as_ref()
        .map(|conf| conf.mapped_labels.as_slice())
        .unwrap_or_default();

    for (key, value) in &alert.labels {
        if !mapped_labels.is_empty() && !mapped_labels.iter().any(|label| label == key) {
            continue;
        }
        match key.as_str() {
            "tags" => event.set_tags(value.trim()),
            "name" => event.name = value.trim().to_owned(),
            _ => event.cols.push(EventCol::new(key.clone(), value.clone())),
        }
    }

    if event.name.is_empty() {
        event.name = config
            .promwebhook_conf
            .as_ref()
            .map(|conf| conf.bucket.clone())
            .filter(|bucket| !bucket.is_empty())
            .unwrap_or_else(|| config.default_bucket.clone());
    }

    event
}
