//! Instantiates plugins from configuration and drives ordered shutdown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;

use gollum_core::{ControlMessage, MetricsRegistry, PluginRegistry, TypeRegistry};

use crate::producer_base::ProducerHandle;
use crate::stream_registry::StreamRegistry;

/// Topologically sorts `ids` by `edges` (`from` must finish shutting
/// down before `to` begins), via Kahn's algorithm. Ties broken by
/// lexicographic ID for deterministic ordering. Falls back to
/// declaration order (with a warning) if `edges` contains a cycle —
/// better to shut down *somehow* than hang forever.
pub fn topo_shutdown_order(edges: &[(String, String)], ids: &[String]) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
        *indegree.entry(to.as_str()).or_insert(0) += 1;
    }

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        if let Some(neighbors) = adjacency.get(node) {
            let mut newly_ready = Vec::new();
            for &next in neighbors {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(next);
                    }
                }
            }
            newly_ready.sort_unstable();
            for n in newly_ready {
                queue.push_back(n);
            }
        }
    }

    if order.len() != ids.len() {
        tracing::warn!("drop-stream dependency cycle detected during shutdown planning; falling back to declaration order");
        return ids.to_vec();
    }
    order
}

struct RegisteredProducer {
    id: String,
    handle: ProducerHandle,
    stream_name: String,
    drop_stream: String,
    join: JoinHandle<()>,
}

/// Owns the process-wide registries plus the set of running producers,
/// and drives config-driven instantiation and ordered shutdown.
pub struct Supervisor {
    pub type_registry: Arc<TypeRegistry>,
    pub plugin_registry: Arc<PluginRegistry>,
    pub stream_registry: Arc<StreamRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    producers: RwLock<Vec<RegisteredProducer>>,
}

impl Supervisor {
    pub fn new(
        type_registry: Arc<TypeRegistry>,
        plugin_registry: Arc<PluginRegistry>,
        stream_registry: Arc<StreamRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            type_registry,
            plugin_registry,
            stream_registry,
            metrics,
            producers: RwLock::new(Vec::new()),
        }
    }

    /// Tracks a running producer so `shutdown` can stop it in order.
    /// `stream_name` is the stream it consumes from (empty if none);
    /// `drop_stream` is where it sends messages it can't deliver.
    pub fn register_producer(
        &self,
        id: impl Into<String>,
        handle: ProducerHandle,
        stream_name: impl Into<String>,
        drop_stream: impl Into<String>,
        join: JoinHandle<()>,
    ) {
        self.producers.write().push(RegisteredProducer {
            id: id.into(),
            handle,
            stream_name: stream_name.into(),
            drop_stream: drop_stream.into(),
            join,
        });
    }

    fn shutdown_edges(producers: &[RegisteredProducer]) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for a in producers {
            for b in producers {
                if a.id != b.id && !a.drop_stream.is_empty() && a.drop_stream == b.stream_name {
                    edges.push((a.id.clone(), b.id.clone()));
                }
            }
        }
        edges
    }

    /// Stops every registered producer in topological order (drop
    /// sources before their drop targets), waiting up to
    /// `per_producer_timeout` for each to report completion.
    pub async fn shutdown(&self, per_producer_timeout: Duration) {
        let producers: Vec<RegisteredProducer> = std::mem::take(&mut *self.producers.write());
        let ids: Vec<String> = producers.iter().map(|p| p.id.clone()).collect();
        let edges = Self::shutdown_edges(&producers);
        let order = topo_shutdown_order(&edges, &ids);

        let mut by_id: HashMap<String, RegisteredProducer> =
            producers.into_iter().map(|p| (p.id.clone(), p)).collect();

        for id in order {
            let Some(producer) = by_id.remove(&id) else {
                continue;
            };
            tracing::info!(producer = %id, "stopping producer");
            let _ = producer
                .handle
                .control_sender()
                .send(ControlMessage::StopProducer)
                .await;
            if tokio::time::timeout(per_producer_timeout, producer.join)
                .await
                .is_err()
            {
                tracing::warn!(producer = %id, "producer did not stop within shutdown timeout");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let order = topo_shutdown_order(&[], &ids);
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn drop_edge_orders_source_before_target() {
        let ids = vec!["p2".to_string(), "p1".to_string()];
        let edges = vec![("p1".to_string(), "p2".to_string())];
        let order = topo_shutdown_order(&edges, &ids);
        assert_eq!(order, vec!["p1", "p2"]);
    }

    #[test]
    fn chain_of_three_resolves_in_order() {
        let ids = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        let edges = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
        ];
        let order = topo_shutdown_order(&edges, &ids);
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_falls_back_to_declaration_order() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let edges = vec![
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "a".to_string()),
        ];
        let order = topo_shutdown_order(&edges, &ids);
        assert_eq!(order, ids);
    }
}
