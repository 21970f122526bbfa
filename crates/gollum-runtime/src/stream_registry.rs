//! Bidirectional stream name/ID mapping, stream plugin hosting, and the
//! routing fabric built on top of it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use gollum_core::{hash_stream_name, Dispatch, Message, StreamId, StreamPlugin};

use crate::stream_plugins::Broadcast;

/// Messages routed onto a stream with no plugin or subscribers registered
/// are silently dropped; a re-route loop longer than this is almost
/// certainly a misconfiguration (e.g. a Route plugin pointing at
/// itself), so routing gives up and drops rather than spinning forever.
const MAX_ROUTE_HOPS: u8 = 16;

struct StreamEntry {
    name: String,
    plugin: Arc<dyn StreamPlugin>,
    subscribers: Vec<mpsc::Sender<Message>>,
}

/// Process-wide `name <-> StreamId` table; also hosts each stream's
/// dispatch policy and subscriber list.
#[derive(Default)]
pub struct StreamRegistry {
    ids_by_name: RwLock<HashMap<String, StreamId>>,
    streams: RwLock<HashMap<StreamId, StreamEntry>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` if not already known, defaulting its dispatch
    /// policy to `Broadcast`. Returns its stable `StreamId` either way.
    pub fn register(&self, name: &str) -> StreamId {
        if let Some(id) = self.ids_by_name.read().get(name) {
            return *id;
        }
        let id = hash_stream_name(name);
        self.ids_by_name.write().insert(name.to_string(), id);
        self.streams.write().entry(id).or_insert_with(|| StreamEntry {
            name: name.to_string(),
            plugin: Arc::new(Broadcast),
            subscribers: Vec::new(),
        });
        id
    }

    pub fn resolve_name(&self, id: StreamId) -> Option<String> {
        self.streams.read().get(&id).map(|e| e.name.clone())
    }

    /// Replaces the dispatch policy for an already-registered stream.
    pub fn set_plugin(&self, id: StreamId, plugin: Arc<dyn StreamPlugin>) {
        if let Some(entry) = self.streams.write().get_mut(&id) {
            entry.plugin = plugin;
        }
    }

    /// Adds a subscriber to `id`'s delivery list, returning its index
    /// (stable for the stream's lifetime, used by `StreamPlugin` target
    /// selection).
    pub fn subscribe(&self, id: StreamId, sender: mpsc::Sender<Message>) -> usize {
        let mut streams = self.streams.write();
        let entry = streams.entry(id).or_insert_with(|| StreamEntry {
            name: String::new(),
            plugin: Arc::new(Broadcast),
            subscribers: Vec::new(),
        });
        entry.subscribers.push(sender);
        entry.subscribers.len() - 1
    }

    /// Resolves the final delivery targets for `msg`, following
    /// `Dispatch::Rerouted` up to `MAX_ROUTE_HOPS` times. Returns one
    /// (sender, message-clone) pair per target; the caller is
    /// responsible for actually delivering (typically via
    /// `ProducerBase::enqueue`, which owns the drop-on-timeout policy).
    pub fn route(&self, mut msg: Message) -> Vec<(mpsc::Sender<Message>, Message)> {
        for _ in 0..MAX_ROUTE_HOPS {
            let streams = self.streams.read();
            let Some(entry) = streams.get(&msg.stream_id()) else {
                return Vec::new();
            };
            match entry.plugin.dispatch(&mut msg, entry.subscribers.len()) {
                Dispatch::Targets(idxs) => {
                    return idxs
                        .into_iter()
                        .filter_map(|i| entry.subscribers.get(i).cloned())
                        .map(|tx| (tx, msg.clone()))
                        .collect();
                }
                Dispatch::Rerouted => continue,
            }
        }
        tracing::warn!(
            stream_id = msg.stream_id().0,
            "routing exceeded max hops, dropping message"
        );
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gollum_core::SequenceGenerator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn register_is_idempotent_and_bidirectional() {
        let reg = StreamRegistry::new();
        let a = reg.register("alerts");
        let b = reg.register("alerts");
        assert_eq!(a, b);
        assert_eq!(reg.resolve_name(a), Some("alerts".to_string()));
    }

    #[tokio::test]
    async fn broadcast_routes_to_every_subscriber() {
        let reg = StreamRegistry::new();
        let id = reg.register("alerts");
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        reg.subscribe(id, tx1);
        reg.subscribe(id, tx2);

        let seq = SequenceGenerator::new();
        let msg = Message::new(b"hi".to_vec(), id, &seq);
        let targets = reg.route(msg);
        assert_eq!(targets.len(), 2);
        for (tx, m) in targets {
            tx.send(m).await.unwrap();
        }
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn route_plugin_reroutes_before_dispatch() {
        let reg = StreamRegistry::new();
        let from = reg.register("a");
        let to = reg.register("b");
        reg.set_plugin(from, StdArc::new(crate::stream_plugins::Route::new(to)));
        let (tx, _rx) = mpsc::channel(4);
        reg.subscribe(to, tx);

        let seq = SequenceGenerator::new();
        let msg = Message::new(b"hi".to_vec(), from, &seq);
        let targets = reg.route(msg);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].1.stream_id(), to);
        assert_eq!(targets[0].1.prev_stream_id(), from);
    }

    #[test]
    fn self_routing_loop_drops_after_max_hops() {
        let reg = StreamRegistry::new();
        let a = reg.register("a");
        reg.set_plugin(a, StdArc::new(crate::stream_plugins::Route::new(a)));
        let seq = SequenceGenerator::new();
        let msg = Message::new(b"hi".to_vec(), a, &seq);
        assert!(reg.route(msg).is_empty());
    }

    #[test]
    fn round_robin_distributes_across_subscribers() {
        let reg = StreamRegistry::new();
        let id = reg.register("rr");
        reg.set_plugin(id, StdArc::new(crate::stream_plugins::RoundRobin::default()));
        let counts = StdArc::new(AtomicUsize::new(0));
        let seq = SequenceGenerator::new();
        let (tx, _rx) = mpsc::channel(16);
        reg.subscribe(id, tx.clone());
        reg.subscribe(id, tx);
        for _ in 0..4 {
            let msg = Message::new(b"x".to_vec(), id, &seq);
            let targets = reg.route(msg);
            assert_eq!(targets.len(), 1);
            counts.fetch_add(1, Ordering::Relaxed);
        }
        assert_eq!(counts.load(Ordering::Relaxed), 4);
    }
}
