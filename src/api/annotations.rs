use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::TimeRange;
use crate::{
    error::{EventDbError, Result},
    query::Query,
    server::AppState,
    timeutil,
};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotation {
    pub datasource: String,
    pub enable: bool,
    pub name: String,
    pub query: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnnotationReq {
    pub range: TimeRange,
    pub annotation: Annotation,
}

#[derive(Serialize)]
pub struct AnnotationResp {
    pub annotation: Annotation,
    pub title: String,
    /// Milliseconds since the epoch, as the dashboard expects.
    pub time: i64,
    pub text: String,
    pub tags: String,
}

pub async fn annotations(
    State(state): State<AppState>,
    Json(req): Json<AnnotationReq>,
) -> Result<Json<Vec<AnnotationResp>>> {
    let config = state.config.load();

    let from = timeutil::parse_time(&req.range.from)
        .map_err(|err| EventDbError::BadInput(format!("wrong from date: {err}")))?;
    let to = timeutil::parse_time(&req.range.to)
        .map_err(|err| EventDbError::BadInput(format!("wrong to date: {err}")))?;

    let query = Query::parse(&req.annotation.query)?;
    let events = query.execute(
        &state.store,
        timeutil::to_nanos(from),
        timeutil::to_nanos(to),
    )?;

    let returned_cols = config
        .annotations_conf
        .as_ref()
        .map(|conf| conf.returned_cols.as_slice())
        .unwrap_or_default();

    let resp = events
        .into_iter()
        .map(|event| {
            let mut text = event.description.clone();
            let extra: Vec<String> = returned_cols
                .iter()
                .filter_map(|col| {
                    event
                        .column_value(col)
                        .map(|value| format!("{col}: {value}"))
                })
                .collect();
            if !extra.is_empty() {
                text.push('\n');
                text.push_str(&extra.join("\n"));
            }

            AnnotationResp {
                annotation: req.annotation.clone(),
                title: event.summary,
                time: event.time / 1_000_000,
                text,
                tags: event.tags.join(" "),
            }
        })
        .collect();

    Ok(Json(resp))
}
