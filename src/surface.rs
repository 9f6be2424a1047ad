use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use workbench_plugin::surface::{Component, ComponentResolver};

/// Maps (data, role) pairs to components. Resolvers are scanned in
/// plugin-registration order and the first one that answers wins; no
/// answer at all is a normal outcome, not an error.
#[derive(Default)]
pub struct SurfaceRegistry {
    resolvers: RwLock<Vec<(String, ComponentResolver)>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: impl Into<String>, resolver: ComponentResolver) {
        let plugin = plugin.into();
        debug!(plugin = %plugin, "surface resolver registered");
        self.resolvers.write().unwrap().push((plugin, resolver));
    }

    pub fn unregister(&self, plugin: &str) -> bool {
        let mut resolvers = self.resolvers.write().unwrap();
        let before = resolvers.len();
        resolvers.retain(|(id, _)| id != plugin);
        before != resolvers.len()
    }

    pub fn resolve(&self, data: &Value, role: &str) -> Option<Component> {
        let resolvers = self.resolvers.read().unwrap();
        for (_, resolver) in resolvers.iter() {
            if let Some(component) = resolver(data, role) {
                return Some(component);
            }
        }
        None
    }

    pub fn plugins(&self) -> Vec<String> {
        self.resolvers
            .read()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.read().unwrap().is_empty()
    }
}

impl std::fmt::Debug for SurfaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceRegistry")
            .field("plugins", &self.plugins())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver_for(type_name: &str, component_id: &str) -> ComponentResolver {
        let type_name = type_name.to_string();
        let component_id = component_id.to_string();
        Arc::new(move |data: &Value, role: &str| {
            if role != "main" {
                return None;
            }
            if data.get("type") == Some(&Value::String(type_name.clone())) {
                Some(Component::new(&component_id, |_| json!({"ok": true})))
            } else {
                None
            }
        })
    }

    #[test]
    fn first_registered_match_wins() {
        let registry = SurfaceRegistry::new();
        registry.register("example.com/plugin/a", resolver_for("example.com/type/doc", "a-doc"));
        registry.register("example.com/plugin/b", resolver_for("example.com/type/doc", "b-doc"));

        let hit = registry
            .resolve(&json!({"type": "example.com/type/doc"}), "main")
            .unwrap();
        assert_eq!(hit.id(), "a-doc");
    }

    #[test]
    fn no_match_is_a_normal_none() {
        let registry = SurfaceRegistry::new();
        registry.register("example.com/plugin/a", resolver_for("example.com/type/doc", "a-doc"));
        assert!(registry.resolve(&json!({"type": "example.com/type/sheet"}), "main").is_none());
        assert!(registry.resolve(&json!({"type": "example.com/type/doc"}), "sidebar").is_none());
        assert!(registry.resolve(&json!(42), "main").is_none());
    }

    #[test]
    fn unregister_uncovers_later_plugins() {
        let registry = SurfaceRegistry::new();
        registry.register("example.com/plugin/a", resolver_for("example.com/type/doc", "a-doc"));
        registry.register("example.com/plugin/b", resolver_for("example.com/type/doc", "b-doc"));

        assert!(registry.unregister("example.com/plugin/a"));
        assert!(!registry.unregister("example.com/plugin/a"));
        let hit = registry
            .resolve(&json!({"type": "example.com/type/doc"}), "main")
            .unwrap();
        assert_eq!(hit.id(), "b-doc");
        assert_eq!(registry.len(), 1);
    }
}
