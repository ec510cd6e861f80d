use std::panic::{self, AssertUnwindSafe};

use adler32::RollingAdler32;
use serde::{Deserialize, Serialize};

use crate::error::{EventDbError, Result};

/// On-disk value format marker. Values written by older deployments carry no
/// marker and are decoded through the legacy JSON path.
pub const FORMAT_VERSION: u8 = 0x01;

/// Key length: 8-byte big-endian timestamp plus 4 checksum bytes.
pub const KEY_LEN: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Event {
    pub name: String,
    pub summary: String,
    pub description: String,
    /// Nanoseconds since the Unix epoch; the primary ordering key.
    pub time: i64,
    pub tags: Vec<String>,
    pub cols: Vec<EventCol>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EventCol {
    pub name: String,
    pub value: String,
}

impl EventCol {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Event {
    /// Replaces the tag set wholesale. The raw string is split on spaces and
    /// commas; empty fragments are dropped, order is preserved.
    pub fn set_tags(&mut self, raw: &str) {
        self.tags = raw
            .split([' ', ','])
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .collect();
    }

    /// True when every requested tag is present. An empty request matches
    /// any event.
    pub fn check_tags(&self, tags: &[String]) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }

    /// First column with a matching name wins; absence is not a match.
    pub fn column_value(&self, name: &str) -> Option<&str> {
        self.cols
            .iter()
            .find(|col| col.name == name)
            .map(|col| col.value.as_str())
    }

    /// Encodes the event for storage, returning `(value, key)`.
    pub fn marshal(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let body = postcard::to_allocvec(self)
            .map_err(|err| EventDbError::Store(format!("encode event record: {err}")))?;
        let key = marshal_ts(self.time, Some(&body));

        let mut value = Vec::with_capacity(body.len() + 1);
        value.push(FORMAT_VERSION);
        value.extend_from_slice(&body);
        Ok((value, key))
    }

    /// Decodes a stored value, current format or legacy. Never panics:
    /// anything the decoders throw is converted into a decode error.
    pub fn unmarshal(data: &[u8]) -> Result<Event> {
        panic::catch_unwind(AssertUnwindSafe(|| decode_value(data)))
            .unwrap_or_else(|_| Err(EventDbError::Decode("panic while decoding record".into())))
    }
}

fn decode_value(data: &[u8]) -> Result<Event> {
    match data.first() {
        Some(&FORMAT_VERSION) => postcard::from_bytes(&data[1..])
            .map_err(|err| EventDbError::Decode(err.to_string())),
        Some(_) => {
            // Legacy values are a self-describing JSON stream with no
            // version prefix; its first byte is never 0x01.
            serde_json::from_slice(data).map_err(|err| EventDbError::Decode(err.to_string()))
        }
        None => Err(EventDbError::Decode("empty record".into())),
    }
}

/// Builds a storage key from a timestamp and the encoded record body. With no
/// body the result is the 8-byte seek prefix for the timestamp.
///
/// The checksum slicing uses shifts of 3/2/1/0 rather than whole bytes; files
/// written by existing deployments carry keys in this exact shape, so it is
/// kept bit-for-bit.
pub fn marshal_ts(ts: i64, body: Option<&[u8]>) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_LEN);
    key.extend_from_slice(&ts.to_be_bytes());
    if let Some(body) = body {
        let hash = RollingAdler32::from_buffer(body).hash();
        key.push((hash >> 3) as u8);
        key.push((hash >> 2) as u8);
        key.push((hash >> 1) as u8);
        key.push(hash as u8);
    }
    key
}

/// Reads the timestamp back out of a storage key. Succeeds for any key of at
/// least eight bytes.
pub fn unmarshal_ts(key: &[u8]) -> Result<i64> {
    let prefix: [u8; 8] = key
        .get(..8)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| EventDbError::Decode(format!("key too short: {} bytes", key.len())))?;
    Ok(i64::from_be_bytes(prefix))
}

pub fn sort_events_by_time(events: &mut [Event]) {
    events.sort_by_key(|event| event.time);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(time: i64) -> Event {
        Event {
            name: "svc".into(),
            summary: "boot".into(),
            description: "service came up".into(),
            time,
            tags: vec!["a".into(), "b".into()],
            cols: vec![
                EventCol::new("host", "node-1"),
                EventCol::new("region", "eu-1"),
            ],
        }
    }

    #[test]
    fn marshal_roundtrip() {
        let event = sample_event(1_685_577_600_000_000_000);
        let (value, key) = event.marshal().unwrap();

        assert_eq!(key.len(), KEY_LEN);
        assert_eq!(value[0], FORMAT_VERSION);

        let decoded = Event::unmarshal(&value).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn marshal_roundtrip_empty_fields() {
        let event = Event {
            time: 1,
            ..Event::default()
        };
        let (value, _) = event.marshal().unwrap();
        assert_eq!(Event::unmarshal(&value).unwrap(), event);
    }

    #[test]
    fn legacy_values_still_decode() {
        let event = sample_event(42);
        let legacy = serde_json::to_vec(&event).unwrap();
        assert_ne!(legacy[0], FORMAT_VERSION);
        assert_eq!(Event::unmarshal(&legacy).unwrap(), event);
    }

    #[test]
    fn malformed_values_fail_without_panicking() {
        assert!(Event::unmarshal(&[]).is_err());
        assert!(Event::unmarshal(b"\x01\xff\xff\xff\xff").is_err());
        assert!(Event::unmarshal(b"not a record").is_err());
    }

    #[test]
    fn keys_order_by_time() {
        let times = [
            10,
            11,
            10 << 3,
            (10 << 3) + 1,
            1_685_577_600,
            1_685_577_600_000_000_000,
        ];
        let keys: Vec<_> = times.iter().map(|&ts| marshal_ts(ts, None)).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn ts_roundtrip_and_determinism() {
        for shift in 0..56u32 {
            for factor in 1..8i64 {
                let ts = factor << shift;
                let key = marshal_ts(ts, Some(b"body"));
                assert_eq!(key, marshal_ts(ts, Some(b"body")));
                assert_eq!(unmarshal_ts(&key).unwrap(), ts);
            }
        }
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(unmarshal_ts(&[0, 1, 2]).is_err());
        assert!(unmarshal_ts(&7i64.to_be_bytes()).is_ok());
    }

    #[test]
    fn set_tags_splits_on_spaces_and_commas() {
        let mut event = Event::default();

        event.set_tags("tag1");
        assert_eq!(event.tags, ["tag1"]);

        event.set_tags("tag1 tag2");
        assert_eq!(event.tags, ["tag1", "tag2"]);

        event.set_tags("tag1 tag2,  tag3,tag4 tag5");
        assert_eq!(event.tags, ["tag1", "tag2", "tag3", "tag4", "tag5"]);
    }

    #[test]
    fn check_tags_membership() {
        let event = sample_event(1);
        assert!(event.check_tags(&[]));
        assert!(event.check_tags(&["a".into()]));
        assert!(event.check_tags(&["a".into(), "b".into()]));
        assert!(!event.check_tags(&["c".into()]));
    }

    #[test]
    fn column_lookup_first_match_wins() {
        let mut event = sample_event(1);
        event.cols.push(EventCol::new("host", "node-2"));
        assert_eq!(event.column_value("host"), Some("node-1"));
        assert_eq!(event.column_value("missing"), None);
    }
}
