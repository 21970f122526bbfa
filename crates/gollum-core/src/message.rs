//! The `Message` type and its stream identifiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

/// 64-bit FNV-1a hash of a stream name.
///
/// Deterministic across process restarts: the offset basis and prime
/// are the standard FNV-1a constants, never randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hashes a stream name into its stable [`StreamId`].
pub fn hash_stream_name(name: &str) -> StreamId {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    StreamId(hash)
}

/// Name of the wildcard stream: binds producers/formatters to "any
/// stream not otherwise matched".
pub const WILDCARD_STREAM: &str = "*";
/// Name of the default drop sink for messages that cannot be delivered.
pub const DROPPED_STREAM: &str = "_DROPPED_";
/// Name of the internal self-logging stream.
pub const GOLLUM_STREAM: &str = "_GOLLUM_";

impl StreamId {
    pub fn wildcard() -> Self {
        hash_stream_name(WILDCARD_STREAM)
    }

    pub fn dropped() -> Self {
        hash_stream_name(DROPPED_STREAM)
    }

    pub fn gollum() -> Self {
        hash_stream_name(GOLLUM_STREAM)
    }
}

/// Process-wide monotonic sequence generator, assigned to messages once
/// at ingress and never rewritten afterward.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Opaque handle back to the consumer that produced a message, used only
/// for ack and blocked-state queries. Never owns the consumer.
pub trait SourceHandle: Send + Sync {
    /// True if the originating consumer is currently unable to accept
    /// more backpressure (e.g. its own upstream is stalled).
    fn is_blocked(&self) -> bool {
        false
    }

    /// Acknowledge that a message with this sequence number has been
    /// durably handled by some downstream producer.
    fn ack(&self, _sequence: u64) {}
}

/// A `SourceHandle` used for messages with no live originating consumer
/// (e.g. materialized while replaying a spool segment).
pub struct NullSourceHandle;

impl SourceHandle for NullSourceHandle {}

/// Immutable payload plus mutable routing fields.
#[derive(Clone)]
pub struct Message {
    data: Arc<[u8]>,
    stream_id: StreamId,
    prev_stream_id: StreamId,
    sequence: u64,
    timestamp_nanos: i64,
    source: Weak<dyn SourceHandle>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("stream_id", &self.stream_id)
            .field("prev_stream_id", &self.prev_stream_id)
            .field("sequence", &self.sequence)
            .field("timestamp_nanos", &self.timestamp_nanos)
            .field("len", &self.data.len())
            .finish()
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl Message {
    /// Creates a new message on `stream_id`, assigning it a sequence
    /// number from `seq` and stamping the current time. `prev_stream_id`
    /// starts out equal to `stream_id`: no routing step has happened yet.
    pub fn new(data: impl Into<Arc<[u8]>>, stream_id: StreamId, seq: &SequenceGenerator) -> Self {
        Self {
            data: data.into(),
            stream_id,
            prev_stream_id: stream_id,
            sequence: seq.next(),
            timestamp_nanos: now_nanos(),
            source: Weak::<NullSourceHandle>::new(),
        }
    }

    /// Creates a message with an explicit source handle, for consumers
    /// that support ack/blocked-state queries.
    pub fn with_source(
        data: impl Into<Arc<[u8]>>,
        stream_id: StreamId,
        seq: &SequenceGenerator,
        source: Weak<dyn SourceHandle>,
    ) -> Self {
        let mut msg = Self::new(data, stream_id, seq);
        msg.source = source;
        msg
    }

    /// Reconstructs a message with every field explicit, used by the
    /// spool reader to materialize persisted messages verbatim.
    pub fn from_parts(
        data: impl Into<Arc<[u8]>>,
        stream_id: StreamId,
        prev_stream_id: StreamId,
        sequence: u64,
        timestamp_nanos: i64,
    ) -> Self {
        Self {
            data: data.into(),
            stream_id,
            prev_stream_id,
            sequence,
            timestamp_nanos,
            source: Weak::<NullSourceHandle>::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn prev_stream_id(&self) -> StreamId {
        self.prev_stream_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    pub fn source(&self) -> &Weak<dyn SourceHandle> {
        &self.source
    }

    /// Sets `prev_stream_id = stream_id; stream_id = new_stream`. This is
    /// the single primitive every routing operation (stream plugin
    /// dispatch, drop-to-stream) is built on.
    pub fn route(&mut self, new_stream: StreamId) {
        self.prev_stream_id = self.stream_id;
        self.stream_id = new_stream;
    }

    /// Returns a copy of this message routed to `new_stream`, leaving
    /// the original untouched. Formatters use this to produce a new
    /// payload alongside a possibly new stream without mutating the
    /// message the caller still holds.
    pub fn routed(&self, new_stream: StreamId) -> Self {
        let mut copy = self.clone();
        copy.route(new_stream);
        copy
    }

    /// Sets `stream_id` directly, leaving `prev_stream_id` untouched.
    /// Used by the spool reader and `routeToOrigin` paths, which send a
    /// message back onto its recorded prior stream rather than advancing
    /// history by one more step.
    pub fn set_stream_id(&mut self, stream_id: StreamId) {
        self.stream_id = stream_id;
    }

    /// Replaces the payload, as a formatter does; routing fields are
    /// untouched.
    pub fn with_data(&self, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            ..self.clone()
        }
    }
}
