pub mod annotations;
pub mod db;
pub mod events;
pub mod promwebhook;
pub mod query;
pub mod web;

use serde::Deserialize;

/// Time range as the dashboard sends it: two free-form time strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}
