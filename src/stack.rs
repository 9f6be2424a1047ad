use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use workbench_plugin::plugin::{StackChooser, StackCreator, StackProvides};

/// Aggregates the "create new" and "choose existing" entries plugins
/// offer for object stacks, in plugin-registration order.
#[derive(Default)]
pub struct StackRegistry {
    entries: RwLock<Vec<(String, StackProvides)>>,
}

impl StackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: impl Into<String>, provides: StackProvides) {
        let plugin = plugin.into();
        debug!(
            plugin = %plugin,
            creators = provides.creators.len(),
            choosers = provides.choosers.len(),
            "stack entries registered",
        );
        self.entries.write().unwrap().push((plugin, provides));
    }

    pub fn unregister(&self, plugin: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|(id, _)| id != plugin);
        before != entries.len()
    }

    pub fn creators(&self) -> Vec<StackCreator> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .flat_map(|(_, provides)| provides.creators.iter().cloned())
            .collect()
    }

    /// The choosers whose filters accept the object.
    pub fn choosers_for(&self, object: &Value) -> Vec<StackChooser> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .flat_map(|(_, provides)| provides.choosers.iter())
            .filter(|chooser| (chooser.filter)(object))
            .cloned()
            .collect()
    }

    pub fn plugins(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl std::fmt::Debug for StackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackRegistry").field("plugins", &self.plugins()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use workbench_plugin::graph::Label;
    use workbench_plugin::intent::Intent;

    fn provides_for(type_name: &str, creator_id: &str) -> StackProvides {
        let wanted = type_name.to_string();
        StackProvides {
            creators: vec![StackCreator {
                id: creator_id.into(),
                test_id: format!("{creator_id}-test"),
                label: Label::text("Create"),
                icon: None,
                intent: Intent::new("example.com/plugin/color", "create"),
            }],
            choosers: vec![StackChooser {
                id: format!("{creator_id}-chooser"),
                test_id: format!("{creator_id}-chooser-test"),
                label: Label::text("Choose"),
                icon: None,
                filter: Arc::new(move |object: &Value| {
                    object.get("type").and_then(Value::as_str) == Some(wanted.as_str())
                }),
            }],
        }
    }

    #[test]
    fn creators_keep_registration_order() {
        let registry = StackRegistry::new();
        registry.register("example.com/plugin/a", provides_for("example.com/type/color", "new-color"));
        registry.register("example.com/plugin/b", provides_for("example.com/type/note", "new-note"));

        let ids: Vec<String> = registry.creators().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["new-color".to_string(), "new-note".to_string()]);
    }

    #[test]
    fn choosers_filter_on_the_object() {
        let registry = StackRegistry::new();
        registry.register("example.com/plugin/a", provides_for("example.com/type/color", "new-color"));
        registry.register("example.com/plugin/b", provides_for("example.com/type/note", "new-note"));

        let matches = registry.choosers_for(&json!({"type": "example.com/type/color"}));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "new-color-chooser");
        assert!(registry.choosers_for(&json!({"type": "example.com/type/task"})).is_empty());
    }

    #[test]
    fn unregister_withdraws_the_plugins_entries() {
        let registry = StackRegistry::new();
        registry.register("example.com/plugin/a", provides_for("example.com/type/color", "new-color"));
        assert!(registry.unregister("example.com/plugin/a"));
        assert!(registry.creators().is_empty());
        assert!(!registry.unregister("example.com/plugin/a"));
    }
}
