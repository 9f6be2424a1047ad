use std::sync::RwLock;

use tracing::debug;

use workbench_plugin::graph::Label;
use workbench_plugin::plugin::TranslationBundle;

/// Merged view over every plugin's translation fragments. Bundles keep
/// their registration order; on a key collision the later bundle wins.
#[derive(Default)]
pub struct TranslationRegistry {
    bundles: RwLock<Vec<(String, TranslationBundle)>>,
}

impl TranslationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: impl Into<String>, bundle: TranslationBundle) {
        let plugin = plugin.into();
        debug!(plugin = %plugin, "translation bundle registered");
        self.bundles.write().unwrap().push((plugin, bundle));
    }

    pub fn unregister(&self, plugin: &str) -> bool {
        let mut bundles = self.bundles.write().unwrap();
        let before = bundles.len();
        bundles.retain(|(id, _)| id != plugin);
        before != bundles.len()
    }

    /// Exact locale first, then its primary subtag (`en-US` falls back to
    /// `en`). `None` when no bundle knows the key.
    pub fn lookup(&self, locale: &str, ns: &str, key: &str) -> Option<String> {
        let bundles = self.bundles.read().unwrap();
        let exact = bundles
            .iter()
            .rev()
            .find_map(|(_, bundle)| bundle.get(locale)?.get(ns)?.get(key).cloned());
        if exact.is_some() {
            return exact;
        }
        let primary = locale.split('-').next().unwrap_or(locale);
        if primary == locale {
            return None;
        }
        bundles
            .iter()
            .rev()
            .find_map(|(_, bundle)| bundle.get(primary)?.get(ns)?.get(key).cloned())
    }

    /// Turn a label into display text. Untranslatable keys render as the
    /// key itself so missing bundles degrade visibly instead of failing.
    pub fn resolve(&self, label: &Label, locale: &str) -> String {
        match label {
            Label::Text(text) => text.clone(),
            Label::Key(key, opts) => self
                .lookup(locale, &opts.ns, key)
                .unwrap_or_else(|| key.clone()),
        }
    }

    pub fn plugins(&self) -> Vec<String> {
        self.bundles
            .read()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl std::fmt::Debug for TranslationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationRegistry")
            .field("plugins", &self.plugins())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn bundle(lang: &str, ns: &str, pairs: &[(&str, &str)]) -> TranslationBundle {
        let mut keys = HashMap::new();
        for (k, v) in pairs {
            keys.insert(k.to_string(), v.to_string());
        }
        let mut namespaces = HashMap::new();
        namespaces.insert(ns.to_string(), keys);
        let mut languages = HashMap::new();
        languages.insert(lang.to_string(), namespaces);
        languages
    }

    #[test]
    fn plain_text_labels_pass_through() {
        let registry = TranslationRegistry::new();
        assert_eq!(registry.resolve(&Label::text("Local Colors"), "en-US"), "Local Colors");
    }

    #[test]
    fn keyed_labels_resolve_or_fall_back_to_the_key() {
        let registry = TranslationRegistry::new();
        registry.register(
            "example.com/plugin/color",
            bundle("en-US", "example.com/plugin/color", &[("create object label", "Create a Color")]),
        );

        let label = Label::key("create object label", "example.com/plugin/color");
        assert_eq!(registry.resolve(&label, "en-US"), "Create a Color");

        let missing = Label::key("delete object label", "example.com/plugin/color");
        assert_eq!(registry.resolve(&missing, "en-US"), "delete object label");
    }

    #[test]
    fn later_bundles_win_collisions_until_unregistered() {
        let registry = TranslationRegistry::new();
        registry.register(
            "example.com/plugin/base",
            bundle("en-US", "shared", &[("title", "Base")]),
        );
        registry.register(
            "example.com/plugin/skin",
            bundle("en-US", "shared", &[("title", "Skinned")]),
        );

        assert_eq!(registry.lookup("en-US", "shared", "title"), Some("Skinned".into()));
        assert!(registry.unregister("example.com/plugin/skin"));
        assert_eq!(registry.lookup("en-US", "shared", "title"), Some("Base".into()));
    }

    #[test]
    fn regional_locales_fall_back_to_the_primary_subtag() {
        let registry = TranslationRegistry::new();
        registry.register(
            "example.com/plugin/color",
            bundle("en", "colors", &[("title", "Colors")]),
        );
        registry.register(
            "example.com/plugin/color-gb",
            bundle("en-GB", "colors", &[("title", "Colours")]),
        );

        assert_eq!(registry.lookup("en-GB", "colors", "title"), Some("Colours".into()));
        // en-AU has no exact bundle, the bare `en` one answers
        assert_eq!(registry.lookup("en-AU", "colors", "title"), Some("Colors".into()));
        assert_eq!(registry.lookup("fr-FR", "colors", "title"), None);
    }
}
