use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{
    graph::{Icon, Label, Node},
    intent::{Intent, Resolver},
    observe::Subscription,
    surface::{Component, ComponentResolver},
};

/// Identity a plugin presents to the host and to other plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PluginMeta {
    /// Reverse-DNS id with a path, e.g. `example.com/plugin/color`.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
}

impl PluginMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), name: None, icon: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_icon(mut self, icon: Icon) -> Self {
        self.icon = Some(icon);
        self
    }
}

/// Where a plugin is in its life. The host drives the transitions;
/// anything out of order is a bug worth logging, not a crash.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    EnumString,
    AsRefStr,
    Display,
)]
#[strum(serialize_all = "camelCase")]
pub enum PluginState {
    #[default]
    Constructed,
    Ready,
    Active,
    Unloading,
    Unloaded,
}

impl PluginState {
    pub fn can_advance_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Constructed, Ready)
                | (Ready, Active)
                | (Constructed | Ready | Active, Unloading)
                | (Unloading, Unloaded)
        )
    }
}

/// Offered every node as a candidate parent, exactly once per node. May
/// upsert children and actions under it, and may hand back a subscription
/// that keeps derived children current; the host disposes it when the node
/// goes away or the plugin unloads.
pub type GraphContributor = Arc<dyn Fn(&Node) -> Option<Subscription> + Send + Sync>;

/// Nested `lang -> namespace -> key -> text`, the shape translation
/// fragments arrive in. Bundles merge by namespace at composition.
pub type TranslationBundle = HashMap<String, HashMap<String, HashMap<String, String>>>;

/// Declares how objects of one type present themselves outside any
/// surface: placeholder label and icon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetadataRecord {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
}

/// A "create" entry for object stacks: fires its intent when picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StackCreator {
    pub id: String,
    #[serde(rename = "testId")]
    pub test_id: String,
    pub label: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    pub intent: Intent,
}

pub type ObjectFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A "choose existing" entry for object stacks: the filter decides which
/// stored objects qualify.
#[derive(Clone)]
pub struct StackChooser {
    pub id: String,
    pub test_id: String,
    pub label: Label,
    pub icon: Option<Icon>,
    pub filter: ObjectFilter,
}

impl fmt::Debug for StackChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackChooser").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StackProvides {
    pub creators: Vec<StackCreator>,
    pub choosers: Vec<StackChooser>,
}

impl StackProvides {
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty() && self.choosers.is_empty()
    }
}

/// The fragments one plugin contributes. Every field is optional; a
/// plugin provides what it has and the host composes the rest around it.
#[derive(Clone, Default)]
pub struct Provides {
    pub graph: Vec<GraphContributor>,
    pub intent: Option<Resolver>,
    pub surface: Option<ComponentResolver>,
    pub stack: StackProvides,
    pub metadata: Vec<MetadataRecord>,
    pub translations: Vec<TranslationBundle>,
}

pub type ReadyFn = Arc<dyn Fn(PluginSet) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type UnloadFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// What a plugin factory returns: identity, lifecycle hooks and the
/// provided fragments. Factories must be pure so a reinstall yields a
/// structurally equivalent contribution.
#[derive(Clone)]
pub struct PluginDefinition {
    pub meta: PluginMeta,
    pub provides: Provides,
    ready: Option<ReadyFn>,
    unload: Option<UnloadFn>,
}

impl PluginDefinition {
    pub fn new(meta: PluginMeta) -> Self {
        Self { meta, provides: Provides::default(), ready: None, unload: None }
    }

    /// Runs after every plugin is installed; gets the whole set for
    /// capability lookups. Failure isolates this plugin, not the host.
    pub fn on_ready<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginSet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: ReadyFn = Arc::new(move |set: PluginSet| {
            let fut: BoxFuture<'static, anyhow::Result<()>> = Box::pin(f(set));
            fut
        });
        self.ready = Some(hook);
        self
    }

    /// Runs at unload, after the host revoked the plugin's registrations.
    /// Release whatever the host cannot see from here: private caches,
    /// connections, local state.
    pub fn on_unload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: UnloadFn = Arc::new(move || {
            let fut: BoxFuture<'static, anyhow::Result<()>> = Box::pin(f());
            fut
        });
        self.unload = Some(hook);
        self
    }

    pub fn with_graph(
        mut self,
        contributor: impl Fn(&Node) -> Option<Subscription> + Send + Sync + 'static,
    ) -> Self {
        self.provides.graph.push(Arc::new(contributor));
        self
    }

    pub fn with_intent(mut self, resolver: Resolver) -> Self {
        self.provides.intent = Some(resolver);
        self
    }

    pub fn with_surface(
        mut self,
        resolver: impl Fn(&Value, &str) -> Option<Component> + Send + Sync + 'static,
    ) -> Self {
        self.provides.surface = Some(Arc::new(resolver));
        self
    }

    pub fn with_stack(mut self, stack: StackProvides) -> Self {
        self.provides.stack = stack;
        self
    }

    pub fn with_metadata(mut self, record: MetadataRecord) -> Self {
        self.provides.metadata.push(record);
        self
    }

    pub fn with_translations(mut self, bundle: TranslationBundle) -> Self {
        self.provides.translations.push(bundle);
        self
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub async fn ready(&self, set: PluginSet) -> anyhow::Result<()> {
        match &self.ready {
            Some(hook) => hook(set).await,
            None => Ok(()),
        }
    }

    pub async fn unload(&self) -> anyhow::Result<()> {
        match &self.unload {
            Some(hook) => hook().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("id", &self.meta.id)
            .field("graph", &self.provides.graph.len())
            .field("intent", &self.provides.intent.is_some())
            .field("surface", &self.provides.surface.is_some())
            .field("metadata", &self.provides.metadata.len())
            .field("translations", &self.provides.translations.len())
            .finish()
    }
}

/// A pure constructor for a plugin. Called once per install; calling it
/// again must describe the same contribution.
pub type PluginFactory = Arc<dyn Fn() -> PluginDefinition + Send + Sync>;

/// The installed plugins, in installation order. Capability lookups are
/// soft: asking for something a plugin does not provide is `None`, never
/// an error.
#[derive(Clone, Default)]
pub struct PluginSet {
    plugins: Vec<Arc<PluginDefinition>>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<PluginDefinition>>) -> Self {
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.meta.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PluginDefinition>> {
        self.plugins.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PluginDefinition>> {
        self.plugins.iter().find(|p| p.meta.id == id)
    }

    pub fn meta_of(&self, id: &str) -> Option<PluginMeta> {
        self.get(id).map(|p| p.meta.clone())
    }

    pub fn intent_of(&self, id: &str) -> Option<Resolver> {
        self.get(id).and_then(|p| p.provides.intent.clone())
    }

    pub fn surface_of(&self, id: &str) -> Option<ComponentResolver> {
        self.get(id).and_then(|p| p.provides.surface.clone())
    }

    pub fn graph_of(&self, id: &str) -> Option<Vec<GraphContributor>> {
        self.get(id).map(|p| p.provides.graph.clone()).filter(|g| !g.is_empty())
    }

    pub fn stack_of(&self, id: &str) -> Option<StackProvides> {
        self.get(id).map(|p| p.provides.stack.clone()).filter(|s| !s.is_empty())
    }
}

impl fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSet").field("ids", &self.ids()).finish()
    }
}
