use std::sync::RwLock;

use tracing::debug;

use workbench_plugin::plugin::MetadataRecord;

/// How objects of a type present themselves anywhere a full surface is
/// overkill. Records are scanned in plugin-registration order; the first
/// plugin to claim a type wins.
#[derive(Default)]
pub struct MetadataRegistry {
    records: RwLock<Vec<(String, MetadataRecord)>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: impl Into<String>, records: Vec<MetadataRecord>) {
        let plugin = plugin.into();
        debug!(plugin = %plugin, count = records.len(), "metadata records registered");
        let mut all = self.records.write().unwrap();
        for record in records {
            all.push((plugin.clone(), record));
        }
    }

    pub fn unregister(&self, plugin: &str) -> bool {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|(id, _)| id != plugin);
        before != records.len()
    }

    pub fn for_type(&self, object_type: &str) -> Option<MetadataRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .find(|(_, record)| record.object_type == object_type)
            .map(|(_, record)| record.clone())
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .records
            .read()
            .unwrap()
            .iter()
            .map(|(_, record)| record.object_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry").field("types", &self.types()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workbench_plugin::graph::{Icon, Label};

    fn record(object_type: &str, placeholder: &str) -> MetadataRecord {
        MetadataRecord {
            object_type: object_type.into(),
            placeholder: Some(Label::text(placeholder)),
            icon: Some(Icon::named("asterisk")),
        }
    }

    #[test]
    fn first_claim_on_a_type_wins() {
        let registry = MetadataRegistry::new();
        registry.register("example.com/plugin/a", vec![record("example.com/type/color", "Color")]);
        registry.register("example.com/plugin/b", vec![record("example.com/type/color", "Colour")]);

        let hit = registry.for_type("example.com/type/color").unwrap();
        assert_eq!(hit.placeholder, Some(Label::text("Color")));
        assert!(registry.for_type("example.com/type/sound").is_none());
    }

    #[test]
    fn unregister_releases_only_that_plugins_records() {
        let registry = MetadataRegistry::new();
        registry.register("example.com/plugin/a", vec![record("example.com/type/color", "Color")]);
        registry.register("example.com/plugin/b", vec![record("example.com/type/folder", "Folder")]);

        assert!(registry.unregister("example.com/plugin/a"));
        assert!(registry.for_type("example.com/type/color").is_none());
        assert!(registry.for_type("example.com/type/folder").is_some());
        assert_eq!(registry.types(), vec!["example.com/type/folder".to_string()]);
    }
}
