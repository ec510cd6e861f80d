use axum::{
    extract::{Query as UrlQuery, State},
    response::Html,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use crate::{
    event::{sort_events_by_time, Event},
    query::Query,
    server::AppState,
    timeutil,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageParams {
    pub query: String,
    pub from: String,
    pub to: String,
}

/// Human query page: a form plus a result table. Results are only loaded
/// when the visitor submitted a query.
pub async fn query_page(
    State(state): State<AppState>,
    UrlQuery(params): UrlQuery<PageParams>,
) -> Html<String> {
    let mut error = String::new();
    let now = Utc::now();

    let to = parse_or(&params.to, now, "TO", &mut error);
    let from = parse_or(&params.from, to - Duration::hours(1), "FROM", &mut error);

    let from_display = if params.from.is_empty() {
        from.format(TS_FORMAT).to_string()
    } else {
        params.from.clone()
    };

    let query_text = if params.query.is_empty() {
        state.store.buckets().unwrap_or_default().join(";")
    } else {
        params.query.clone()
    };

    let mut events = Vec::new();
    if error.is_empty() && !params.query.is_empty() {
        match load_events(&state, &params.query, from, to) {
            Ok(loaded) => events = loaded,
            Err(err) => {
                info!("query page load error: {err}");
                error = err.to_string();
            }
        }
    }

    Html(render_page(
        &query_text,
        &from_display,
        &params.to,
        &error,
        &events,
    ))
}

fn parse_or(
    raw: &str,
    fallback: DateTime<Utc>,
    which: &str,
    error: &mut String,
) -> DateTime<Utc> {
    if raw.is_empty() {
        return fallback;
    }
    match timeutil::parse_time(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            *error = format!("parse {which} error: {err}");
            fallback
        }
    }
}

fn load_events(
    state: &AppState,
    raw_query: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> crate::error::Result<Vec<Event>> {
    let query = Query::parse(raw_query)?;
    let mut events = query.execute(
        &state.store,
        timeutil::to_nanos(from),
        timeutil::to_nanos(to),
    )?;
    sort_events_by_time(&mut events);
    Ok(events)
}

fn render_page(
    query: &str,
    from: &str,
    to: &str,
    error: &str,
    events: &[Event],
) -> String {
    let mut page = String::with_capacity(2048);
    page.push_str(
        "<!DOCTYPE HTML>\n<html>\n<head>\n\t<meta charset=\"utf-8\">\n\t<title>EventDB</title>\n\
         \t<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         \t<style type=\"text/css\">body{margin:20px auto;line-height:1.6;font-size:12px;color:#444;padding:0 10px}h1,h2,h3{line-height:1.2}</style>\n\
         </head>\n<body>\n\t<h1>EventDB</h1>\n\t<h2>Query</h2>\n",
    );

    if !error.is_empty() {
        page.push_str(&format!("\t<p><strong>{}</strong></p>\n", escape(error)));
    }

    page.push_str(&format!(
        "\t<form>\n\t\t<label for=\"query\">Query</label><br/>\n\
         \t\t<textarea id=\"query\" name=\"query\" cols=\"80\" rows=\"5\">{}</textarea><br/>\n\
         \t\t<label for=\"from\">From:</label><br/>\n\
         \t\t<input id=\"from\" name=\"from\" value=\"{}\" /><br/>\n\
         \t\t<label for=\"to\">To:</label><br/>\n\
         \t\t<input id=\"to\" name=\"to\" value=\"{}\" /><br/><br/>\n\
         \t\t<button type=\"submit\">Send</button>\n\t</form>\n\t<br/>\n",
        escape(query),
        escape(from),
        escape(to)
    ));

    page.push_str(
        "\t<table border=\"1\" cellspacing=\"0\">\n\t<thead>\n\t\t<tr>\n\
         \t\t\t<th>Name</th><th>TS</th><th>Summary</th><th>Description</th><th>Cols</th><th>Tags</th>\n\
         \t\t</tr>\n\t</thead>\n",
    );

    if events.is_empty() {
        page.push_str("\t\t<tr>\n\t\t\t<td colspan=\"6\">No result</td>\n\t\t</tr>\n");
    } else {
        for event in events {
            let ts = timeutil::nanos_to_datetime(event.time).format(TS_FORMAT);
            let cols = event
                .cols
                .iter()
                .map(|col| format!("{}={}", col.name, col.value))
                .collect::<Vec<_>>()
                .join(" ");
            page.push_str(&format!(
                "\t\t<tr>\n\t\t\t<td>{}</td>\n\t\t\t<td>{}</td>\n\t\t\t<td>{}</td>\n\
                 \t\t\t<td>{}</td>\n\t\t\t<td>{}</td>\n\t\t\t<td>{}</td>\n\t\t</tr>\n",
                escape(&event.name),
                ts,
                escape(&event.summary),
                escape(&event.description),
                escape(&cols),
                escape(&event.tags.join(" "))
            ));
        }
    }

    page.push_str("\t</table>\n</body>\n</html>");
    page
}

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
