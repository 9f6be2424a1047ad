pub mod layout;
pub mod spaces;

use std::collections::HashMap;

use workbench_plugin::plugin::{PluginFactory, TranslationBundle};

/// The plugins the shell ships with, in install order.
pub fn first_party() -> Vec<PluginFactory> {
    vec![spaces::spaces_plugin(), layout::layout_plugin()]
}

/// One-language bundle in the nested shape fragments arrive in.
pub(crate) fn en_us(ns: &str, pairs: &[(&str, &str)]) -> TranslationBundle {
    let mut keys = HashMap::new();
    for (key, text) in pairs {
        keys.insert((*key).to_string(), (*text).to_string());
    }
    let mut namespaces = HashMap::new();
    namespaces.insert(ns.to_string(), keys);
    let mut bundle = HashMap::new();
    bundle.insert("en-US".to_string(), namespaces);
    bundle
}
