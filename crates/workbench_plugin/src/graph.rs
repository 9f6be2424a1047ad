// crates/workbench_plugin/src/graph.rs

use std::{
    cmp::Ordering as CmpOrdering,
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use petgraph::{graph::NodeIndex, prelude::StableDiGraph};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use crate::{intent::Intent, observe::Subscription, space::ObjectRef};

pub const ROOT_ID: &str = "root";

/// Node label: plain text, or a translation key with its namespace.
/// Serializes as `"text"` or `["key", {"ns": "..."}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Label {
    Text(String),
    Key(String, LabelNs),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabelNs {
    pub ns: String,
}

impl Label {
    pub fn text(text: impl Into<String>) -> Self {
        Label::Text(text.into())
    }

    pub fn key(key: impl Into<String>, ns: impl Into<String>) -> Self {
        Label::Key(key.into(), LabelNs { ns: ns.into() })
    }
}

/// An opaque renderable reference; the rendering layer decides what a
/// name like `palette` maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Icon {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Icon {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), color: None }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Declarative description of a node to upsert under a parent.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub id: String,
    pub label: Option<Label>,
    pub icon: Option<Icon>,
    pub data: Option<ObjectRef>,
    pub properties: HashMap<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_data(mut self, data: ObjectRef) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Closure behind an imperative action. Runs whatever the plugin captured,
/// usually a dispatch against the shell; it must not edit the tree itself.
pub type InvokeFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Option<Value>>> + Send + Sync>;

#[derive(Clone)]
pub enum ActionBehavior {
    /// Declarative: the caller dispatches this chain.
    Intent(Vec<Intent>),
    /// Imperative: the caller runs the closure.
    Invoke(InvokeFn),
}

/// Declarative description of an action to upsert on a node.
#[derive(Clone)]
pub struct ActionSpec {
    pub id: String,
    pub label: Option<Label>,
    pub icon: Option<Icon>,
    pub properties: HashMap<String, Value>,
    pub behavior: ActionBehavior,
}

impl ActionSpec {
    /// Action backed by an intent chain.
    pub fn intent(id: impl Into<String>, chain: Vec<Intent>) -> Self {
        Self {
            id: id.into(),
            label: None,
            icon: None,
            properties: HashMap::new(),
            behavior: ActionBehavior::Intent(chain),
        }
    }

    /// Action backed by a closure.
    pub fn invoke<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<Option<Value>>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            label: None,
            icon: None,
            properties: HashMap::new(),
            behavior: ActionBehavior::Invoke(Arc::new(f)),
        }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Stable identity of a node for bookkeeping maps; survives index reuse
/// inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

/// Read-only projection of one node, handed to predicates.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: String,
    pub label: Option<Label>,
    pub icon: Option<Icon>,
    pub data: Option<ObjectRef>,
    pub properties: HashMap<String, Value>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum GraphEvent {
    NodeAdded { id: String, parent: String, owner: Option<String> },
    NodeUpdated { id: String },
    NodeRemoved { id: String, owner: Option<String> },
    ActionAdded { node: String, id: String },
}

/// Synchronous hooks for the shell; called after graph locks are released.
pub trait GraphObserver: Send + Sync {
    fn node_added(&self, node: &Node);
    fn node_removed(&self, key: NodeKey, owner: Option<&str>);
}

struct ActionEntry {
    id: String,
    label: Option<Label>,
    icon: Option<Icon>,
    properties: HashMap<String, Value>,
    behavior: ActionBehavior,
}

struct NodeEntry {
    key: u64,
    id: String,
    label: Option<Label>,
    icon: Option<Icon>,
    data: Option<ObjectRef>,
    properties: HashMap<String, Value>,
    actions: Vec<ActionEntry>,
    /// declaration order; sorting by the `index` property happens on read
    children: Vec<NodeIndex>,
    parent: Option<NodeIndex>,
    owner: Option<String>,
    /// disposed when this node leaves the tree
    subscriptions: Vec<Subscription>,
}

impl NodeEntry {
    fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id.clone(),
            label: self.label.clone(),
            icon: self.icon.clone(),
            data: self.data.clone(),
            properties: self.properties.clone(),
            owner: self.owner.clone(),
        }
    }
}

struct GraphInner {
    graph: StableDiGraph<NodeEntry, ()>,
    root: NodeIndex,
}

struct GraphShared {
    inner: RwLock<GraphInner>,
    observers: Mutex<Vec<Arc<dyn GraphObserver>>>,
    events: broadcast::Sender<GraphEvent>,
    next_key: AtomicU64,
}

/// The shared navigation tree every plugin contributes into. Handles are
/// cheap clones; node handles left over after a removal turn into no-ops.
#[derive(Clone)]
pub struct Graph {
    shared: Arc<GraphShared>,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(NodeEntry {
            key: 0,
            id: ROOT_ID.to_string(),
            label: None,
            icon: None,
            data: None,
            properties: HashMap::new(),
            actions: Vec::new(),
            children: Vec::new(),
            parent: None,
            owner: None,
            subscriptions: Vec::new(),
        });
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(GraphShared {
                inner: RwLock::new(GraphInner { graph, root }),
                observers: Mutex::new(Vec::new()),
                events,
                next_key: AtomicU64::new(1),
            }),
        }
    }

    pub fn root(&self) -> Node {
        let inner = self.shared.inner.read().unwrap();
        Node {
            shared: self.shared.clone(),
            ix: inner.root,
            key: 0,
            id: ROOT_ID.to_string(),
            scope: None,
        }
    }

    /// Register a synchronous observer for node arrivals and departures.
    pub fn observe(&self, observer: Arc<dyn GraphObserver>) {
        self.shared.observers.lock().unwrap().push(observer);
    }

    /// Broadcast feed of tree changes, for renderers and tests.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GraphEvent> {
        self.shared.events.subscribe()
    }

    /// Depth-first search in declaration order, first match wins.
    pub fn find(&self, pred: impl Fn(&NodeInfo) -> bool) -> Option<Node> {
        let found = {
            let inner = self.shared.inner.read().unwrap();
            let mut stack = vec![inner.root];
            let mut hit: Option<(NodeIndex, u64, String)> = None;
            while let Some(ix) = stack.pop() {
                if let Some(entry) = inner.graph.node_weight(ix) {
                    if pred(&entry.info()) {
                        hit = Some((ix, entry.key, entry.id.clone()));
                        break;
                    }
                    for &child in entry.children.iter().rev() {
                        stack.push(child);
                    }
                }
            }
            hit
        };
        found.map(|(ix, key, id)| Node { shared: self.shared.clone(), ix, key, id, scope: None })
    }

    pub fn find_by_id(&self, id: &str) -> Option<Node> {
        self.find(|info| info.id == id)
    }

    /// Every node in the tree, depth-first in declaration order.
    pub fn nodes(&self) -> Vec<Node> {
        let collected = {
            let inner = self.shared.inner.read().unwrap();
            let mut stack = vec![inner.root];
            let mut out: Vec<(NodeIndex, u64, String)> = Vec::new();
            while let Some(ix) = stack.pop() {
                if let Some(entry) = inner.graph.node_weight(ix) {
                    out.push((ix, entry.key, entry.id.clone()));
                    for &child in entry.children.iter().rev() {
                        stack.push(child);
                    }
                }
            }
            out
        };
        collected
            .into_iter()
            .map(|(ix, key, id)| Node { shared: self.shared.clone(), ix, key, id, scope: None })
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.shared.inner.read().unwrap().graph.node_count()
    }

    /// Detach every subtree rooted at a node owned by `owner`. Returns how
    /// many nodes left the tree.
    pub fn remove_owned(&self, owner: &str) -> usize {
        let roots: Vec<NodeIndex> = {
            let inner = self.shared.inner.read().unwrap();
            inner
                .graph
                .node_indices()
                .filter(|&ix| {
                    let Some(entry) = inner.graph.node_weight(ix) else {
                        return false;
                    };
                    if entry.owner.as_deref() != Some(owner) {
                        return false;
                    }
                    // skip nodes whose ancestor is going away with them
                    let mut cursor = entry.parent;
                    while let Some(pix) = cursor {
                        match inner.graph.node_weight(pix) {
                            Some(parent) => {
                                if parent.owner.as_deref() == Some(owner) {
                                    return false;
                                }
                                cursor = parent.parent;
                            }
                            None => break,
                        }
                    }
                    true
                })
                .collect()
        };
        let mut removed = 0;
        for ix in roots {
            removed += remove_subtree(&self.shared, ix);
        }
        removed
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").field("nodes", &self.node_count()).finish()
    }
}

/// Handle to one node. Mutations made through a scoped handle stamp the
/// scope's plugin id as owner on everything they create.
#[derive(Clone)]
pub struct Node {
    shared: Arc<GraphShared>,
    ix: NodeIndex,
    key: u64,
    id: String,
    scope: Option<String>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Node {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> NodeKey {
        NodeKey(self.key)
    }

    /// Same node, with mutations attributed to `owner` from here on.
    pub fn scoped(&self, owner: impl Into<String>) -> Node {
        Node { scope: Some(owner.into()), ..self.clone() }
    }

    pub fn is_alive(&self) -> bool {
        self.read(|_| ()).is_some()
    }

    pub fn info(&self) -> Option<NodeInfo> {
        self.read(NodeEntry::info)
    }

    pub fn label(&self) -> Option<Label> {
        self.read(|e| e.label.clone()).flatten()
    }

    pub fn icon(&self) -> Option<Icon> {
        self.read(|e| e.icon.clone()).flatten()
    }

    pub fn data(&self) -> Option<ObjectRef> {
        self.read(|e| e.data.clone()).flatten()
    }

    pub fn owner(&self) -> Option<String> {
        self.read(|e| e.owner.clone()).flatten()
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.read(|e| e.properties.get(key).cloned()).flatten()
    }

    pub fn properties(&self) -> HashMap<String, Value> {
        self.read(|e| e.properties.clone()).unwrap_or_default()
    }

    /// Upsert a child by id. A fresh id appends in declaration order; an
    /// existing id updates the child in place and keeps its position. Data
    /// is replaced wholesale, never merged, and a re-claim by a different
    /// owner is logged.
    pub fn add(&self, spec: NodeSpec) -> Node {
        enum Outcome {
            Inserted(Node),
            Updated(Node),
            DeadParent(Node),
        }
        let outcome = {
            let mut inner = self.shared.inner.write().unwrap();
            let alive = inner
                .graph
                .node_weight(self.ix)
                .is_some_and(|e| e.key == self.key);
            if !alive {
                Outcome::DeadParent(Node {
                    shared: self.shared.clone(),
                    ix: self.ix,
                    key: u64::MAX,
                    id: spec.id,
                    scope: self.scope.clone(),
                })
            } else {
                let children: Vec<NodeIndex> = match inner.graph.node_weight(self.ix) {
                    Some(e) => e.children.clone(),
                    None => Vec::new(),
                };
                let existing = children.into_iter().find(|&c| {
                    inner.graph.node_weight(c).is_some_and(|e| e.id == spec.id)
                });
                let mut updated: Option<Node> = None;
                if let Some(cix) = existing {
                    if let Some(entry) = inner.graph.node_weight_mut(cix) {
                        let prev_owner = entry.owner.clone();
                        if let (Some(scope), Some(prev)) =
                            (self.scope.as_deref(), prev_owner.as_deref())
                        {
                            if scope != prev {
                                warn!(node = %spec.id, from = %prev, to = %scope, "node re-claimed by another plugin, last write wins");
                            }
                        }
                        let prev_data = entry.data.as_ref().map(|d| d.id().to_string());
                        let next_data = spec.data.as_ref().map(|d| d.id().to_string());
                        if prev_data.is_some() && prev_data != next_data {
                            warn!(node = %spec.id, "node data replaced on upsert");
                        }
                        entry.label = spec.label.clone();
                        entry.icon = spec.icon.clone();
                        entry.data = spec.data.clone();
                        entry.properties = spec.properties.clone();
                        entry.owner = self.scope.clone().or(prev_owner);
                        updated = Some(Node {
                            shared: self.shared.clone(),
                            ix: cix,
                            key: entry.key,
                            id: entry.id.clone(),
                            scope: self.scope.clone(),
                        });
                    }
                }
                match updated {
                    Some(node) => Outcome::Updated(node),
                    None => {
                        let key = self.shared.next_key.fetch_add(1, Ordering::Relaxed);
                        let entry = NodeEntry {
                            key,
                            id: spec.id.clone(),
                            label: spec.label,
                            icon: spec.icon,
                            data: spec.data,
                            properties: spec.properties,
                            actions: Vec::new(),
                            children: Vec::new(),
                            parent: Some(self.ix),
                            owner: self.scope.clone(),
                            subscriptions: Vec::new(),
                        };
                        let cix = inner.graph.add_node(entry);
                        inner.graph.add_edge(self.ix, cix, ());
                        if let Some(parent) = inner.graph.node_weight_mut(self.ix) {
                            parent.children.push(cix);
                        }
                        Outcome::Inserted(Node {
                            shared: self.shared.clone(),
                            ix: cix,
                            key,
                            id: spec.id,
                            scope: self.scope.clone(),
                        })
                    }
                }
            }
        };
        match outcome {
            Outcome::DeadParent(node) => {
                warn!(parent = %self.id, child = %node.id, "child added under a removed node, ignoring");
                node
            }
            Outcome::Updated(node) => {
                self.shared
                    .events
                    .send(GraphEvent::NodeUpdated { id: node.id.clone() })
                    .ok();
                node
            }
            Outcome::Inserted(node) => {
                // node landed; tell the world with no locks held
                self.shared
                    .events
                    .send(GraphEvent::NodeAdded {
                        id: node.id.clone(),
                        parent: self.id.clone(),
                        owner: node.scope.clone(),
                    })
                    .ok();
                let observers: Vec<Arc<dyn GraphObserver>> = {
                    self.shared.observers.lock().unwrap().clone()
                };
                for observer in observers {
                    observer.node_added(&node);
                }
                node
            }
        }
    }

    /// Upsert an action by id; an existing id is updated in place.
    pub fn add_action(&self, spec: ActionSpec) -> Action {
        let mut fresh = false;
        {
            let mut inner = self.shared.inner.write().unwrap();
            let alive = inner
                .graph
                .node_weight(self.ix)
                .is_some_and(|e| e.key == self.key);
            if !alive {
                warn!(node = %self.id, action = %spec.id, "action added on a removed node, ignoring");
                return Action {
                    shared: self.shared.clone(),
                    node_ix: self.ix,
                    node_key: u64::MAX,
                    id: spec.id,
                };
            }
            if let Some(entry) = inner.graph.node_weight_mut(self.ix) {
                match entry.actions.iter_mut().find(|a| a.id == spec.id) {
                    Some(action) => {
                        action.label = spec.label;
                        action.icon = spec.icon;
                        action.properties = spec.properties;
                        action.behavior = spec.behavior;
                    }
                    None => {
                        entry.actions.push(ActionEntry {
                            id: spec.id.clone(),
                            label: spec.label,
                            icon: spec.icon,
                            properties: spec.properties,
                            behavior: spec.behavior,
                        });
                        fresh = true;
                    }
                }
            }
        }
        if fresh {
            self.shared
                .events
                .send(GraphEvent::ActionAdded { node: self.id.clone(), id: spec.id.clone() })
                .ok();
        }
        Action {
            shared: self.shared.clone(),
            node_ix: self.ix,
            node_key: self.key,
            id: spec.id,
        }
    }

    /// Children with an `index` property first (numbers before strings),
    /// the rest in declaration order.
    pub fn children(&self) -> Vec<Node> {
        let mut metas: Vec<(NodeIndex, u64, String, Option<Value>)> = {
            let inner = self.shared.inner.read().unwrap();
            let Some(entry) = inner.graph.node_weight(self.ix) else {
                return Vec::new();
            };
            if entry.key != self.key {
                return Vec::new();
            }
            entry
                .children
                .iter()
                .filter_map(|&c| {
                    inner.graph.node_weight(c).map(|e| {
                        (c, e.key, e.id.clone(), e.properties.get("index").cloned())
                    })
                })
                .collect()
        };
        metas.sort_by(|a, b| compare_sort_index(a.3.as_ref(), b.3.as_ref()));
        metas
            .into_iter()
            .map(|(ix, key, id, _)| Node {
                shared: self.shared.clone(),
                ix,
                key,
                id,
                scope: self.scope.clone(),
            })
            .collect()
    }

    pub fn child(&self, id: &str) -> Option<Node> {
        self.children().into_iter().find(|c| c.id == id)
    }

    /// Actions in declaration order.
    pub fn actions(&self) -> Vec<Action> {
        let ids: Vec<String> = self
            .read(|e| e.actions.iter().map(|a| a.id.clone()).collect())
            .unwrap_or_default();
        ids.into_iter()
            .map(|id| Action {
                shared: self.shared.clone(),
                node_ix: self.ix,
                node_key: self.key,
                id,
            })
            .collect()
    }

    pub fn action(&self, id: &str) -> Option<Action> {
        self.actions().into_iter().find(|a| a.id == id)
    }

    pub fn parent(&self) -> Option<Node> {
        let meta = {
            let inner = self.shared.inner.read().unwrap();
            let entry = inner.graph.node_weight(self.ix)?;
            if entry.key != self.key {
                return None;
            }
            let pix = entry.parent?;
            inner
                .graph
                .node_weight(pix)
                .map(|p| (pix, p.key, p.id.clone()))
        };
        meta.map(|(ix, key, id)| Node {
            shared: self.shared.clone(),
            ix,
            key,
            id,
            scope: self.scope.clone(),
        })
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        let changed = {
            let mut inner = self.shared.inner.write().unwrap();
            match inner.graph.node_weight_mut(self.ix) {
                Some(entry) if entry.key == self.key => {
                    entry.properties.insert(key.into(), value);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.shared
                .events
                .send(GraphEvent::NodeUpdated { id: self.id.clone() })
                .ok();
        }
    }

    /// Tie a subscription's lifetime to this node; it is disposed when the
    /// node leaves the tree. On a stale handle the subscription is disposed
    /// right away.
    pub fn attach(&self, sub: Subscription) {
        let stale = {
            let mut inner = self.shared.inner.write().unwrap();
            match inner.graph.node_weight_mut(self.ix) {
                Some(entry) if entry.key == self.key => {
                    entry.subscriptions.push(sub);
                    None
                }
                _ => Some(sub),
            }
        };
        if let Some(sub) = stale {
            sub.dispose();
        }
    }

    /// Detach this node and its whole subtree. No-op on a stale handle.
    pub fn remove(&self) -> bool {
        remove_subtree(&self.shared, self.ix) > 0
    }

    pub fn remove_child(&self, id: &str) -> bool {
        match self.child(id) {
            Some(child) => child.remove(),
            None => false,
        }
    }

    /// Drop children failing the predicate. A scoped handle only touches
    /// children it owns; an unscoped one touches all of them.
    pub fn retain_children(&self, pred: impl Fn(&NodeInfo) -> bool) {
        let doomed: Vec<NodeIndex> = {
            let inner = self.shared.inner.read().unwrap();
            let Some(entry) = inner.graph.node_weight(self.ix) else {
                return;
            };
            if entry.key != self.key {
                return;
            }
            entry
                .children
                .iter()
                .filter_map(|&c| inner.graph.node_weight(c).map(|e| (c, e)))
                .filter(|(_, e)| match self.scope.as_deref() {
                    Some(scope) => e.owner.as_deref() == Some(scope),
                    None => true,
                })
                .filter(|(_, e)| !pred(&e.info()))
                .map(|(c, _)| c)
                .collect()
        };
        for ix in doomed {
            remove_subtree(&self.shared, ix);
        }
    }

    fn read<R>(&self, f: impl FnOnce(&NodeEntry) -> R) -> Option<R> {
        let inner = self.shared.inner.read().unwrap();
        let entry = inner.graph.node_weight(self.ix)?;
        if entry.key != self.key {
            return None;
        }
        Some(f(entry))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Handle to one action on a node.
#[derive(Clone)]
pub struct Action {
    shared: Arc<GraphShared>,
    node_ix: NodeIndex,
    node_key: u64,
    id: String,
}

impl Action {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> Option<Label> {
        self.read(|a| a.label.clone()).flatten()
    }

    pub fn icon(&self) -> Option<Icon> {
        self.read(|a| a.icon.clone()).flatten()
    }

    pub fn properties(&self) -> HashMap<String, Value> {
        self.read(|a| a.properties.clone()).unwrap_or_default()
    }

    /// The chain behind a declarative action, `None` for closure actions.
    pub fn intent_chain(&self) -> Option<Vec<Intent>> {
        self.read(|a| match &a.behavior {
            ActionBehavior::Intent(chain) => Some(chain.clone()),
            ActionBehavior::Invoke(_) => None,
        })
        .flatten()
    }

    /// The closure behind an imperative action, `None` for declarative
    /// ones. The closure is cloned out so it runs with no graph lock held.
    pub fn invoke(&self) -> Option<BoxFuture<'static, anyhow::Result<Option<Value>>>> {
        let f: Option<InvokeFn> = self
            .read(|a| match &a.behavior {
                ActionBehavior::Intent(_) => None,
                ActionBehavior::Invoke(f) => Some(f.clone()),
            })
            .flatten();
        f.map(|f| f())
    }

    fn read<R>(&self, f: impl FnOnce(&ActionEntry) -> R) -> Option<R> {
        let inner = self.shared.inner.read().unwrap();
        let entry = inner.graph.node_weight(self.node_ix)?;
        if entry.key != self.node_key {
            return None;
        }
        entry.actions.iter().find(|a| a.id == self.id).map(f)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("id", &self.id).finish()
    }
}

/// `index` properties sort ahead of everything else; numbers before
/// strings, numbers by value, strings lexicographically. Ties keep
/// declaration order (the sort is stable).
fn compare_sort_index(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(x), Some(y)) => match (x, y) {
            (Value::Number(m), Value::Number(n)) => {
                let m = m.as_f64().unwrap_or(0.0);
                let n = n.as_f64().unwrap_or(0.0);
                m.partial_cmp(&n).unwrap_or(CmpOrdering::Equal)
            }
            (Value::Number(_), _) => CmpOrdering::Less,
            (_, Value::Number(_)) => CmpOrdering::Greater,
            (Value::String(s), Value::String(t)) => s.cmp(t),
            _ => CmpOrdering::Equal,
        },
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

/// Detach `ix` and everything under it. Entries are taken out under the
/// write lock; subscriptions, observers and events run after it drops.
fn remove_subtree(shared: &Arc<GraphShared>, ix: NodeIndex) -> usize {
    struct Removed {
        key: u64,
        id: String,
        owner: Option<String>,
        subscriptions: Vec<Subscription>,
    }
    let removed: Vec<Removed> = {
        let mut inner = shared.inner.write().unwrap();
        if inner.graph.node_weight(ix).is_none() {
            return 0;
        }
        if ix == inner.root {
            warn!("refusing to remove the root node");
            return 0;
        }
        // unhook from the parent's ordered children first
        let parent = inner.graph.node_weight(ix).and_then(|e| e.parent);
        if let Some(pix) = parent {
            if let Some(parent_entry) = inner.graph.node_weight_mut(pix) {
                parent_entry.children.retain(|&c| c != ix);
            }
        }
        let mut order = Vec::new();
        let mut stack = vec![ix];
        while let Some(cursor) = stack.pop() {
            order.push(cursor);
            if let Some(entry) = inner.graph.node_weight(cursor) {
                stack.extend(entry.children.iter().copied());
            }
        }
        order
            .into_iter()
            .filter_map(|cursor| {
                inner.graph.remove_node(cursor).map(|entry| Removed {
                    key: entry.key,
                    id: entry.id,
                    owner: entry.owner,
                    subscriptions: entry.subscriptions,
                })
            })
            .collect()
    };
    let count = removed.len();
    let observers: Vec<Arc<dyn GraphObserver>> = shared.observers.lock().unwrap().clone();
    for node in removed {
        for sub in node.subscriptions {
            sub.dispose();
        }
        for observer in &observers {
            observer.node_removed(NodeKey(node.key), node.owner.as_deref());
        }
        shared
            .events
            .send(GraphEvent::NodeRemoved { id: node.id, owner: node.owner })
            .ok();
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Observable;
    use crate::space::ObjectRef;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id()).collect()
    }

    #[test]
    fn add_is_an_upsert_preserving_position() {
        let graph = Graph::new();
        let root = graph.root();
        root.add(NodeSpec::new("a").with_label(Label::text("A")));
        root.add(NodeSpec::new("b").with_label(Label::text("B")));
        root.add(NodeSpec::new("c").with_label(Label::text("C")));
        assert_eq!(graph.node_count(), 4);

        let again = root.add(NodeSpec::new("b").with_label(Label::text("B2")));
        assert_eq!(graph.node_count(), 4);
        assert_eq!(again.label(), Some(Label::text("B2")));
        assert_eq!(ids(&root.children()), vec!["a", "b", "c"]);
    }

    #[test]
    fn reclaim_replaces_data_without_merging() {
        let graph = Graph::new();
        let root = graph.root();
        let first = ObjectRef::new("obj-1", Observable::new(json!({"x": 1})));
        let second = ObjectRef::new("obj-2", Observable::new(json!({"y": 2})));
        root.add(NodeSpec::new("n").with_data(first));
        let node = root.add(NodeSpec::new("n").with_data(second));
        let data = node.data().unwrap();
        assert_eq!(data.id(), "obj-2");
        assert_eq!(data.value().get(), json!({"y": 2}));
    }

    #[test]
    fn children_sort_by_index_property_first() {
        let graph = Graph::new();
        let root = graph.root();
        root.add(NodeSpec::new("plain"));
        root.add(NodeSpec::new("late").with_property("index", json!("b")));
        root.add(NodeSpec::new("second").with_property("index", json!(2)));
        root.add(NodeSpec::new("first").with_property("index", json!(1)));
        root.add(NodeSpec::new("early").with_property("index", json!("a")));
        assert_eq!(
            ids(&root.children()),
            vec!["first", "second", "early", "late", "plain"]
        );
    }

    #[test]
    fn reorder_through_set_property() {
        let graph = Graph::new();
        let root = graph.root();
        let a = root.add(NodeSpec::new("a"));
        root.add(NodeSpec::new("b").with_property("index", json!(1)));
        assert_eq!(ids(&root.children()), vec!["b", "a"]);
        a.set_property("index", json!(0));
        assert_eq!(ids(&root.children()), vec!["a", "b"]);
    }

    #[test]
    fn removal_detaches_subtree_and_disposes_subscriptions() {
        let graph = Graph::new();
        let root = graph.root();
        let parent = root.add(NodeSpec::new("parent"));
        let child = parent.add(NodeSpec::new("child"));

        let obs = Observable::new(0u32);
        let fires = Arc::new(AtomicUsize::new(0));
        let f1 = fires.clone();
        let f2 = fires.clone();
        parent.attach(obs.subscribe(move |_| {
            f1.fetch_add(1, Ordering::SeqCst);
        }));
        child.attach(obs.subscribe(move |_| {
            f2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(parent.remove());
        assert_eq!(graph.node_count(), 1);
        obs.set(1);
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert!(!child.is_alive());
    }

    #[test]
    fn stale_handles_are_noops() {
        let graph = Graph::new();
        let root = graph.root();
        let node = root.add(NodeSpec::new("gone"));
        assert!(node.remove());
        assert!(!node.remove());
        assert!(node.info().is_none());
        node.set_property("index", json!(1));
        let orphan = node.add(NodeSpec::new("orphan"));
        assert!(!orphan.is_alive());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn find_walks_depth_first_in_declaration_order() {
        let graph = Graph::new();
        let root = graph.root();
        let a = root.add(NodeSpec::new("a"));
        a.add(NodeSpec::new("leaf").with_property("which", json!("under-a")));
        let b = root.add(NodeSpec::new("b"));
        b.add(NodeSpec::new("leaf").with_property("which", json!("under-b")));

        let hit = graph.find(|info| info.id == "leaf").unwrap();
        assert_eq!(hit.property("which"), Some(json!("under-a")));
        assert!(graph.find_by_id("missing").is_none());
    }

    #[test]
    fn retain_children_scoped_to_owner() {
        let graph = Graph::new();
        let root = graph.root();
        let mine = root.scoped("example.com/plugin/mine");
        mine.add(NodeSpec::new("keep"));
        mine.add(NodeSpec::new("drop"));
        root.scoped("example.com/plugin/other").add(NodeSpec::new("foreign"));

        mine.retain_children(|info| info.id == "keep");
        assert_eq!(ids(&root.children()), vec!["keep", "foreign"]);
    }

    #[test]
    fn remove_owned_takes_whole_subtrees() {
        let graph = Graph::new();
        let root = graph.root();
        let mine = root.scoped("example.com/plugin/mine");
        let group = mine.add(NodeSpec::new("group"));
        group.add(NodeSpec::new("inner"));
        root.scoped("example.com/plugin/other").add(NodeSpec::new("foreign"));

        let removed = graph.remove_owned("example.com/plugin/mine");
        assert_eq!(removed, 2);
        assert_eq!(ids(&root.children()), vec!["foreign"]);
    }

    #[test]
    fn events_report_adds_updates_and_removes() {
        let graph = Graph::new();
        let mut rx = graph.subscribe_events();
        let root = graph.root();
        let node = root.scoped("example.com/plugin/mine").add(NodeSpec::new("n"));
        root.add(NodeSpec::new("n"));
        node.remove();

        assert_eq!(
            rx.try_recv().unwrap(),
            GraphEvent::NodeAdded {
                id: "n".into(),
                parent: "root".into(),
                owner: Some("example.com/plugin/mine".into()),
            }
        );
        assert_eq!(rx.try_recv().unwrap(), GraphEvent::NodeUpdated { id: "n".into() });
        assert_eq!(
            rx.try_recv().unwrap(),
            GraphEvent::NodeRemoved {
                id: "n".into(),
                owner: Some("example.com/plugin/mine".into()),
            }
        );
    }

    #[tokio::test]
    async fn actions_carry_chains_or_closures() {
        let graph = Graph::new();
        let root = graph.root();
        let node = root.add(NodeSpec::new("n"));
        node.add_action(
            ActionSpec::intent(
                "create",
                vec![Intent::new("example.com/plugin/palette", "create")],
            )
            .with_label(Label::key("create label", "palette")),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        node.add_action(ActionSpec::invoke("ping", move || {
            let hits = hits2.clone();
            Box::pin(async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(Some(json!({"pong": true})))
            })
        }));

        let create = node.action("create").unwrap();
        let chain = create.intent_chain().unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].action, "create");
        assert!(create.invoke().is_none());

        let ping = node.action("ping").unwrap();
        assert!(ping.intent_chain().is_none());
        let out = ping.invoke().unwrap().await.unwrap();
        assert_eq!(out, Some(json!({"pong": true})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let action_ids: Vec<String> =
            node.actions().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(action_ids, vec!["create", "ping"]);
    }
}
