// src/host.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use workbench_plugin::graph::Graph;
use workbench_plugin::intent::Intent;
use workbench_plugin::plugin::{PluginDefinition, PluginFactory, PluginSet, PluginState};

use crate::graph::GraphManager;
use crate::intent::{ChainReport, DispatchError, IntentDispatcher, UnresolvedPolicy};
use crate::metadata::MetadataRegistry;
use crate::stack::StackRegistry;
use crate::surface::SurfaceRegistry;
use crate::translate::TranslationRegistry;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    #[error("invalid plugin id `{0}`")]
    InvalidId(String),
    #[error("plugin `{0}` is already installed")]
    AlreadyInstalled(String),
    #[error("plugin `{0}` is not installed")]
    NotInstalled(String),
}

struct Installed {
    definition: Arc<PluginDefinition>,
    state: PluginState,
}

/// Owns the shared tree, the dispatcher and every fragment registry, and
/// drives plugins through their lifecycle. One host per shell.
pub struct PluginHost {
    graph: Graph,
    manager: Arc<GraphManager>,
    dispatcher: IntentDispatcher,
    surfaces: SurfaceRegistry,
    translations: TranslationRegistry,
    metadata: MetadataRegistry,
    stacks: StackRegistry,
    plugins: DashMap<String, Installed>,
    order: Mutex<Vec<String>>,
    id_pattern: Regex,
}

impl PluginHost {
    pub fn new(policy: UnresolvedPolicy) -> Result<Arc<Self>> {
        let graph = Graph::new();
        let manager = GraphManager::new(graph.clone());
        let id_pattern =
            Regex::new(r"^[a-z0-9.-]+(/[a-z0-9_-]+)+$").context("plugin id pattern")?;
        Ok(Arc::new(Self {
            graph,
            manager,
            dispatcher: IntentDispatcher::with_policy(policy),
            surfaces: SurfaceRegistry::new(),
            translations: TranslationRegistry::new(),
            metadata: MetadataRegistry::new(),
            stacks: StackRegistry::new(),
            plugins: DashMap::new(),
            order: Mutex::new(Vec::new()),
            id_pattern,
        }))
    }

    pub fn graph(&self) -> Graph {
        self.graph.clone()
    }

    pub fn manager(&self) -> Arc<GraphManager> {
        self.manager.clone()
    }

    pub fn dispatcher(&self) -> &IntentDispatcher {
        &self.dispatcher
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn translations(&self) -> &TranslationRegistry {
        &self.translations
    }

    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    pub fn stacks(&self) -> &StackRegistry {
        &self.stacks
    }

    /// Run the factory and compose its fragments into the host. The new
    /// plugin lands in `Constructed`; call [`ready_all`] to activate.
    ///
    /// [`ready_all`]: PluginHost::ready_all
    pub fn install(&self, factory: &PluginFactory) -> Result<String, HostError> {
        let definition = Arc::new(factory());
        let id = definition.id().to_string();
        if !self.id_pattern.is_match(&id) {
            return Err(HostError::InvalidId(id));
        }
        if self.plugins.contains_key(&id) {
            return Err(HostError::AlreadyInstalled(id));
        }
        info!(plugin = %id, "installing plugin");

        for contributor in &definition.provides.graph {
            self.manager.register(&id, contributor.clone());
        }
        if let Some(resolver) = &definition.provides.intent {
            self.dispatcher.register(&id, resolver.clone());
        }
        if let Some(surface) = &definition.provides.surface {
            self.surfaces.register(&id, surface.clone());
        }
        if !definition.provides.stack.is_empty() {
            self.stacks.register(&id, definition.provides.stack.clone());
        }
        if !definition.provides.metadata.is_empty() {
            self.metadata.register(&id, definition.provides.metadata.clone());
        }
        for bundle in &definition.provides.translations {
            self.translations.register(&id, bundle.clone());
        }

        self.plugins.insert(id.clone(), Installed {
            definition,
            state: PluginState::Constructed,
        });
        self.order.lock().unwrap().push(id.clone());
        Ok(id)
    }

    /// Install every factory in order, then run the ready hooks.
    pub async fn install_all(&self, factories: &[PluginFactory]) -> Result<Vec<String>, HostError> {
        let mut ids = Vec::with_capacity(factories.len());
        for factory in factories {
            ids.push(self.install(factory)?);
        }
        self.ready_all().await;
        Ok(ids)
    }

    /// Run outstanding ready hooks, in installation order. Each hook gets
    /// the full set for capability lookups. A failing hook leaves its own
    /// plugin short of `Active` and touches nothing else.
    pub async fn ready_all(&self) {
        let set = self.plugin_set();
        let order: Vec<String> = self.order.lock().unwrap().clone();
        for id in order {
            let pending = self
                .plugins
                .get(&id)
                .filter(|entry| entry.state == PluginState::Constructed)
                .map(|entry| entry.definition.clone());
            let Some(definition) = pending else { continue };
            self.advance(&id, PluginState::Ready);
            match definition.ready(set.clone()).await {
                Ok(()) => self.advance(&id, PluginState::Active),
                Err(err) => {
                    warn!(plugin = %id, error = %err, "ready hook failed, plugin stays inactive")
                }
            }
        }
        self.manager.settle();
    }

    /// Revoke every registration the plugin made, then let its unload
    /// hook release what the host cannot see.
    pub async fn uninstall(&self, id: &str) -> Result<(), HostError> {
        let definition = match self.plugins.get(id) {
            Some(entry) => entry.definition.clone(),
            None => return Err(HostError::NotInstalled(id.to_string())),
        };
        info!(plugin = %id, "unloading plugin");
        self.advance(id, PluginState::Unloading);

        self.manager.unregister(id);
        self.dispatcher.unregister(id);
        self.surfaces.unregister(id);
        self.stacks.unregister(id);
        self.metadata.unregister(id);
        self.translations.unregister(id);

        if let Err(err) = definition.unload().await {
            warn!(plugin = %id, error = %err, "unload hook failed");
        }
        self.advance(id, PluginState::Unloaded);
        self.plugins.remove(id);
        self.order.lock().unwrap().retain(|p| p != id);
        Ok(())
    }

    /// Unload everything, most recent install first.
    pub async fn shutdown(&self) {
        let order: Vec<String> = {
            let mut order = self.order.lock().unwrap().clone();
            order.reverse();
            order
        };
        for id in order {
            if let Err(err) = self.uninstall(&id).await {
                warn!(plugin = %id, error = %err, "shutdown skipped a plugin");
            }
        }
    }

    /// Dispatch a chain, then fold any tree growth back through the
    /// contributors.
    pub async fn dispatch(&self, chain: Vec<Intent>) -> Result<Option<Value>, DispatchError> {
        let result = self.dispatcher.dispatch(chain).await;
        self.manager.settle();
        result
    }

    /// Like [`dispatch`], keeping the full per-step record.
    ///
    /// [`dispatch`]: PluginHost::dispatch
    pub async fn execute(&self, chain: Vec<Intent>) -> ChainReport {
        let report = self.dispatcher.execute(chain).await;
        self.manager.settle();
        report
    }

    pub fn plugin_set(&self) -> PluginSet {
        let order = self.order.lock().unwrap();
        let plugins: Vec<Arc<PluginDefinition>> = order
            .iter()
            .filter_map(|id| self.plugins.get(id).map(|entry| entry.definition.clone()))
            .collect();
        PluginSet::new(plugins)
    }

    pub fn state_of(&self, id: &str) -> Option<PluginState> {
        self.plugins.get(id).map(|entry| entry.state)
    }

    /// Simple diagnostics: plugin id to state.
    pub fn diagnostics(&self) -> HashMap<String, PluginState> {
        self.plugins
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().state))
            .collect()
    }

    pub fn installed(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    fn advance(&self, id: &str, next: PluginState) {
        if let Some(mut entry) = self.plugins.get_mut(id) {
            if !entry.state.can_advance_to(next) {
                warn!(plugin = %id, from = %entry.state, to = %next, "plugin state advanced out of order");
            }
            entry.state = next;
        }
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.installed())
            .field("nodes", &self.graph.node_count())
            .finish()
    }
}
