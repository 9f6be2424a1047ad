// src/graph.rs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, warn};

use workbench_plugin::graph::{Graph, GraphObserver, Node, NodeKey};
use workbench_plugin::observe::Subscription;
use workbench_plugin::plugin::GraphContributor;

/// Upper bound on nodes visited in one settle pass. A contributor that
/// keeps generating nodes past this is broken, not busy.
const SETTLE_LIMIT: usize = 10_000;

#[derive(Clone)]
struct ContributorEntry {
    id: u64,
    plugin: String,
    contributor: GraphContributor,
}

/// Applies plugin contributors to the shared node tree.
///
/// Contributors run once per node, in plugin-registration order. Nodes a
/// contributor creates are queued and visited on the next drain, never
/// inside the call that created them, so a contributor cannot re-enter
/// itself through its own mutations.
pub struct GraphManager {
    graph: Graph,
    contributors: Mutex<Vec<ContributorEntry>>,
    /// One entry per (contributor, node) pairing already offered.
    outputs: DashMap<(u64, NodeKey), Subscription>,
    pending: Mutex<VecDeque<Node>>,
    next_id: AtomicU64,
}

impl GraphManager {
    pub fn new(graph: Graph) -> Arc<Self> {
        let manager = Arc::new(Self {
            graph,
            contributors: Mutex::new(Vec::new()),
            outputs: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
        });
        manager.graph.observe(manager.clone());
        manager
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Add a contributor and offer it every node already in the tree. A
    /// plugin may register several; they run in registration order.
    pub fn register(&self, plugin: impl Into<String>, contributor: GraphContributor) {
        let plugin = plugin.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(plugin = %plugin, id, "graph contributor registered");
        self.contributors.lock().unwrap().push(ContributorEntry { id, plugin, contributor });
        {
            let mut pending = self.pending.lock().unwrap();
            for node in self.graph.nodes() {
                pending.push_back(node);
            }
        }
        self.settle();
    }

    /// Drop a plugin's contributors, dispose everything they set up and
    /// detach every node the plugin owns.
    pub fn unregister(&self, plugin: &str) {
        let dropped: Vec<u64> = {
            let mut contributors = self.contributors.lock().unwrap();
            let dropped = contributors
                .iter()
                .filter(|entry| entry.plugin == plugin)
                .map(|entry| entry.id)
                .collect();
            contributors.retain(|entry| entry.plugin != plugin);
            dropped
        };
        let stale: Vec<(u64, NodeKey)> = self
            .outputs
            .iter()
            .filter(|kv| dropped.contains(&kv.key().0))
            .map(|kv| *kv.key())
            .collect();
        for key in stale {
            if let Some((_, sub)) = self.outputs.remove(&key) {
                sub.dispose();
            }
        }
        let removed = self.graph.remove_owned(plugin);
        debug!(plugin = %plugin, removed, "graph contributor unregistered");
    }

    /// Drain the queue of freshly added nodes, offering each to every
    /// contributor that has not seen it yet. Call after installs and
    /// after dispatching intents that may have grown the tree.
    pub fn settle(&self) {
        let mut visited = 0usize;
        loop {
            let node = { self.pending.lock().unwrap().pop_front() };
            let Some(node) = node else { break };
            visited += 1;
            if visited > SETTLE_LIMIT {
                warn!(limit = SETTLE_LIMIT, "settle pass gave up, queue still growing");
                break;
            }
            if !node.is_alive() {
                continue;
            }
            let contributors = self.contributors.lock().unwrap().clone();
            for entry in contributors {
                let seen = (entry.id, node.key());
                if self.outputs.contains_key(&seen) {
                    continue;
                }
                // nodes the contributor adds get stamped with its plugin id
                let scoped = node.scoped(&entry.plugin);
                let sub = (entry.contributor)(&scoped).unwrap_or_else(Subscription::empty);
                self.outputs.insert(seen, sub);
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl GraphObserver for GraphManager {
    fn node_added(&self, node: &Node) {
        self.pending.lock().unwrap().push_back(node.clone());
    }

    fn node_removed(&self, key: NodeKey, _owner: Option<&str>) {
        // dropping the subscriptions disposes them
        self.outputs.retain(|(_, k), _| *k != key);
    }
}

impl std::fmt::Debug for GraphManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let contributors: Vec<String> = self
            .contributors
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.plugin.clone())
            .collect();
        f.debug_struct("GraphManager")
            .field("contributors", &contributors)
            .field("outputs", &self.outputs.len())
            .field("pending", &self.pending_len())
            .finish()
    }
}
