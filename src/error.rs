use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EventDbError>;

#[derive(Debug, Error)]
pub enum EventDbError {
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("wrong time range (from > to)")]
    BadRange,
    #[error("unknown bucket name: {0}")]
    UnknownBucket(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Store(String),
    #[error("query parse error: {0}")]
    ParseQuery(String),
    #[error("event older than retention window")]
    RetentionSkip,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<rocksdb::Error> for EventDbError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_yaml::Error> for EventDbError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl IntoResponse for EventDbError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadInput(_) | Self::BadRange | Self::ParseQuery(_) => StatusCode::BAD_REQUEST,
            Self::UnknownBucket(_) => StatusCode::NOT_FOUND,
            Self::RetentionSkip => StatusCode::NOT_MODIFIED,
            Self::Decode(_) | Self::Store(_) | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // 304 must not carry a body.
        if status == StatusCode::NOT_MODIFIED {
            return status.into_response();
        }

        let message = self.to_string();
        (status, Json(ErrorBody { message: &message })).into_response()
    }
}
