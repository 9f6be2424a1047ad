use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use workbench_plugin::graph::Icon;
use workbench_plugin::intent::{Intent, IntentError, Resolver};
use workbench_plugin::observe::Observable;
use workbench_plugin::plugin::{PluginDefinition, PluginFactory, PluginMeta};

use super::en_us;

pub const PLUGIN_ID: &str = "workbench.sh/plugin/layout";
pub const ACTION_ACTIVATE: &str = "workbench.sh/plugin/layout/action/activate";
pub const ACTION_CLOSE: &str = "workbench.sh/plugin/layout/action/close";

/// Tracks which object holds the main surface. Activation is an intent
/// like any other, so the last step of a creation chain can hand the new
/// object straight over.
pub fn layout_plugin() -> PluginFactory {
    Arc::new(|| {
        let active: Observable<Option<String>> = Observable::new(None);

        let on_activate = active.clone();
        let on_close = active.clone();
        let on_unload = active.clone();
        PluginDefinition::new(
            PluginMeta::new(PLUGIN_ID)
                .with_name("Layout")
                .with_icon(Icon::named("columns")),
        )
        .with_intent(
            Resolver::new()
                .on(ACTION_ACTIVATE, move |intent: Intent| {
                    let active = on_activate.clone();
                    async move {
                        // a bare object from the previous step works too
                        let id = intent
                            .str_field("id")
                            .or_else(|| {
                                intent
                                    .field("object")
                                    .and_then(|obj| obj.get("id"))
                                    .and_then(Value::as_str)
                            })
                            .ok_or_else(|| {
                                IntentError::InvalidData("activate needs an `id`".into())
                            })?
                            .to_string();
                        let previous = active.get();
                        active.set(Some(id.clone()));
                        debug!(id = %id, "object activated");
                        Ok(Some(json!({"active": id, "previous": previous})))
                    }
                })
                .on(ACTION_CLOSE, move |intent: Intent| {
                    let active = on_close.clone();
                    async move {
                        match intent.str_field("id") {
                            // closing something inactive is a no-op
                            Some(id) if active.get().as_deref() != Some(id) => Ok(None),
                            _ => {
                                active.set(None);
                                Ok(Some(json!({"active": null})))
                            }
                        }
                    }
                }),
        )
        .with_translations(en_us(PLUGIN_ID, &[
            ("open label", "Open"),
            ("close label", "Close"),
        ]))
        .on_unload(move || {
            let active = on_unload.clone();
            async move {
                active.set(None);
                Ok(())
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activate_swaps_the_active_object() {
        let definition = (layout_plugin())();
        let resolver = definition.provides.intent.clone().unwrap();

        let first = resolver
            .resolve(Intent::new(PLUGIN_ID, ACTION_ACTIVATE).with_data(json!({"id": "obj-1"})))
            .await
            .unwrap();
        assert_eq!(first, Some(json!({"active": "obj-1", "previous": null})));

        let second = resolver
            .resolve(Intent::new(PLUGIN_ID, ACTION_ACTIVATE).with_data(json!({"id": "obj-2"})))
            .await
            .unwrap();
        assert_eq!(second, Some(json!({"active": "obj-2", "previous": "obj-1"})));
    }

    #[tokio::test]
    async fn activate_without_an_id_is_invalid() {
        let definition = (layout_plugin())();
        let resolver = definition.provides.intent.clone().unwrap();
        let err = resolver
            .resolve(Intent::new(PLUGIN_ID, ACTION_ACTIVATE))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::InvalidData(_)));
    }

    #[tokio::test]
    async fn activate_accepts_an_object_carrying_its_id() {
        let definition = (layout_plugin())();
        let resolver = definition.provides.intent.clone().unwrap();
        let out = resolver
            .resolve(
                Intent::new(PLUGIN_ID, ACTION_ACTIVATE)
                    .with_data(json!({"object": {"id": "obj-7", "type": "note"}})),
            )
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"active": "obj-7", "previous": null})));
    }

    #[tokio::test]
    async fn close_only_clears_a_matching_activation() {
        let definition = (layout_plugin())();
        let resolver = definition.provides.intent.clone().unwrap();
        resolver
            .resolve(Intent::new(PLUGIN_ID, ACTION_ACTIVATE).with_data(json!({"id": "obj-1"})))
            .await
            .unwrap();

        let miss = resolver
            .resolve(Intent::new(PLUGIN_ID, ACTION_CLOSE).with_data(json!({"id": "obj-9"})))
            .await
            .unwrap();
        assert_eq!(miss, None);

        let hit = resolver
            .resolve(Intent::new(PLUGIN_ID, ACTION_CLOSE).with_data(json!({"id": "obj-1"})))
            .await
            .unwrap();
        assert_eq!(hit, Some(json!({"active": null})));
    }

    #[tokio::test]
    async fn each_install_starts_blank() {
        let factory = layout_plugin();
        let one = (factory)();
        one.provides
            .intent
            .clone()
            .unwrap()
            .resolve(Intent::new(PLUGIN_ID, ACTION_ACTIVATE).with_data(json!({"id": "obj-1"})))
            .await
            .unwrap();

        // a second construction shares nothing with the first
        let two = (factory)();
        let out = two
            .provides
            .intent
            .clone()
            .unwrap()
            .resolve(Intent::new(PLUGIN_ID, ACTION_ACTIVATE).with_data(json!({"id": "obj-2"})))
            .await
            .unwrap();
        assert_eq!(out, Some(json!({"active": "obj-2", "previous": null})));
    }
}
