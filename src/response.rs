use std::str::FromStr;

use bytes::Bytes;

/// A single field value: text for ordinary `key: value` lines, raw bytes for
/// `binary` payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Binary(Bytes),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Value::Text(_) => None,
            Value::Binary(b) => Some(b),
        }
    }
}

/// Ordered multimap of response fields, accumulated until a terminal line.
///
/// A `Response` is only ever produced by the dispatch loop matching a
/// terminal success line; terminal errors become
/// [`MpdError::CommandFailed`](crate::MpdError::CommandFailed) instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    fields: Vec<(String, Value)>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, key: String, value: Value) {
        self.fields.push((key, value));
    }

    /// First text value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_text())
    }

    /// All values recorded for `key`, in wire order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Value> {
        self.fields
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// First value for `key` parsed as `T`. Unparseable values read as absent.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// First binary payload in the response, if any.
    pub fn binary(&self) -> Option<&Bytes> {
        self.fields.iter().find_map(|(k, v)| {
            if k == "binary" {
                v.as_binary()
            } else {
                None
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields.iter()
    }

    // Typed accessors for the keys the scheduler reads.

    /// Daemon playback state: `play`, `pause` or `stop`.
    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    pub fn playlist_length(&self) -> Option<u32> {
        self.get_parsed("playlistlength")
    }

    /// Daemon-side playlist id of the current track.
    pub fn song_id(&self) -> Option<u32> {
        self.get_parsed("songid")
    }

    /// Daemon-side playlist id of the upcoming track.
    pub fn next_song_id(&self) -> Option<u32> {
        self.get_parsed("nextsongid")
    }

    /// File locator of a playlist entry.
    pub fn file(&self) -> Option<&str> {
        self.get("file")
    }

    /// Subsystems a `changed: <name>` line reported during an idle wait.
    pub fn changed(&self) -> Vec<&str> {
        self.get_all("changed")
            .filter_map(|v| v.as_text())
            .collect()
    }
}

impl FromIterator<(String, Value)> for Response {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
