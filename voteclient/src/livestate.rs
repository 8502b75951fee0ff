//! The live view of poll, user and organization data.
//!
//! The server only ever sends deltas. Each frame maps `collection/id/field` keys to raw values,
//! where `null` means the key was deleted. Frames are merged into a cumulative [`LiveState`]
//! and typed entities are projected out of it on demand.

use crate::*;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One partial update
pub type Frame = Map<String, Value>;

/// An entity that can be projected out of the live state.
///
/// The field list is declared statically so the subscription request and the projection agree
/// on it without any runtime reflection.
pub trait Entity: DeserializeOwned + Default {
    const COLLECTION: &'static str;
    const FIELDS: &'static [&'static str];
}

/// Accumulated field map, keyed by full field path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveState {
    inner: BTreeMap<String, Value>,
}

impl LiveState {
    /// Merge a frame. Null values delete their key, everything else overwrites.
    /// Keys absent from the frame are left untouched.
    pub fn merge_frame(&mut self, frame: Frame) {
        for (key, value) in frame {
            if value.is_null() {
                self.inner.remove(&key);
            } else {
                self.inner.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// All present fields of `collection/id`, with the prefix stripped
    pub fn fields<'a>(
        &'a self,
        collection: &str,
        id: u64,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        let prefix = format!("{}/{}/", collection, id);
        let prefix_len = prefix.len();
        let start = prefix.clone();

        // Keys sharing a prefix are contiguous in the BTreeMap
        self.inner
            .range(start..)
            .take_while(move |(key, _)| key.starts_with(&prefix))
            .map(move |(key, value)| (&key[prefix_len..], value))
    }

    /// Whether any field of `collection/id` is present
    pub fn contains_entity(&self, collection: &str, id: u64) -> bool {
        self.fields(collection, id).next().is_some()
    }

    /// Decode `collection/id` into its entity type.
    ///
    /// Projection always starts from `E::default()`: absent or deleted fields take their
    /// default value, fields not declared in `E::FIELDS` are ignored.
    pub fn project<E: Entity>(&self, id: u64) -> Result<E, ProtocolError> {
        let relevant: Map<String, Value> = self
            .fields(E::COLLECTION, id)
            .filter(|(field, _)| E::FIELDS.iter().any(|declared| declared == field))
            .map(|(field, value)| (field.to_owned(), value.clone()))
            .collect();

        if relevant.is_empty() {
            return Ok(E::default());
        }

        serde_json::from_value(Value::Object(relevant)).map_err(|source| ProtocolError::Decode {
            key: format!("{}/{}", E::COLLECTION, id),
            source,
        })
    }
}

/// One entry of the live-state request body
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Subscription {
    pub collection: String,
    pub ids: Vec<u64>,
    pub fields: Map<String, Value>,
}

impl Subscription {
    /// Subscribe to every declared field of an entity
    pub fn for_entity<E: Entity>(id: u64) -> Self {
        Subscription {
            collection: E::COLLECTION.to_owned(),
            ids: vec![id],
            fields: E::FIELDS
                .iter()
                .map(|field| (field.to_string(), Value::Null))
                .collect(),
        }
    }
}

/// The voting client's subscriptions: the voter, the poll and the organization
pub fn subscriptions(user_id: u64, poll_id: u64) -> Vec<Subscription> {
    vec![
        Subscription::for_entity::<User>(user_id),
        Subscription::for_entity::<Poll>(poll_id),
        Subscription::for_entity::<Organization>(ORGANIZATION_ID),
    ]
}

/// There is exactly one organization
pub const ORGANIZATION_ID: u64 = 1;

/// Reads newline delimited frames from a stream it does not own.
pub struct FrameReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        FrameReader {
            reader,
            line: Vec::new(),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream was closed cleanly. A broken stream is a transport error,
    /// a line that is not a JSON object (including invalid UTF-8) is a protocol error.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(TransportError::Io)?;
            if read == 0 {
                return Ok(None);
            }

            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let frame: Frame = serde_json::from_slice(&self.line).map_err(ProtocolError::Frame)?;
            return Ok(Some(frame));
        }
    }
}
