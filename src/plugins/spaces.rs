// src/plugins/spaces.rs

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use workbench_plugin::graph::{Icon, Label, Node, NodeSpec};
use workbench_plugin::intent::{Intent, IntentError, Resolver};
use workbench_plugin::observe::{effect, Observable, Subscription};
use workbench_plugin::plugin::{
    MetadataRecord, PluginDefinition, PluginFactory, PluginMeta, StackChooser, StackProvides,
};
use workbench_plugin::space::{InMemorySpace, ObjectRef, ObjectStore};
use workbench_plugin::surface::Component;

use super::en_us;

pub const PLUGIN_ID: &str = "workbench.sh/plugin/spaces";
pub const FOLDER_TYPE: &str = "workbench.sh/type/folder";
pub const MAIN_FOLDER_ID: &str = "workbench.sh/spaces/main";
pub const ACTION_ADD_OBJECT: &str = "workbench.sh/plugin/spaces/action/add-object";
pub const ACTION_REMOVE_OBJECT: &str = "workbench.sh/plugin/spaces/action/remove-object";

struct SpacesState {
    store: Arc<dyn ObjectStore>,
    /// Folder contents in insertion order; the tree derives from this.
    contents: Observable<Vec<ObjectRef>>,
    /// Object id to the subscription keeping its tree node current.
    adapters: DashMap<String, Subscription>,
}

/// Owns the main folder and the objects inside it. Other plugins reach it
/// through `add-object` and `remove-object`; the folder's children in the
/// tree follow the store.
pub fn spaces_plugin() -> PluginFactory {
    Arc::new(|| {
        let state = Arc::new(SpacesState {
            store: InMemorySpace::new(),
            contents: Observable::new(Vec::new()),
            adapters: DashMap::new(),
        });

        let graph_state = state.clone();
        let add_state = state.clone();
        let remove_state = state.clone();
        let surface_state = state.clone();
        let unload_state = state.clone();
        PluginDefinition::new(
            PluginMeta::new(PLUGIN_ID)
                .with_name("Spaces")
                .with_icon(Icon::named("folders")),
        )
        .with_graph(move |node: &Node| {
            if node.id() != "root" {
                return None;
            }
            let folder = node.add(
                NodeSpec::new(MAIN_FOLDER_ID)
                    .with_label(Label::key("folder label", PLUGIN_ID))
                    .with_icon(Icon::named("folder"))
                    .with_property("kind", json!("folder")),
            );
            let state = graph_state.clone();
            Some(effect(&[&graph_state.contents], move || {
                sync_children(&folder, &state);
            }))
        })
        .with_intent(
            Resolver::new()
                .on(ACTION_ADD_OBJECT, move |intent: Intent| {
                    let state = add_state.clone();
                    async move {
                        let target =
                            intent.str_field("target").unwrap_or(MAIN_FOLDER_ID).to_string();
                        if target != MAIN_FOLDER_ID {
                            return Err(IntentError::InvalidData(format!(
                                "unknown target `{target}`"
                            )));
                        }
                        let object = intent.field("object").cloned().ok_or_else(|| {
                            IntentError::InvalidData("add-object needs an `object`".into())
                        })?;
                        let handle = state
                            .store
                            .insert(object)
                            .await
                            .map_err(|err| IntentError::InvalidData(err.to_string()))?;
                        let id = handle.id().to_string();
                        state.contents.update(|contents| {
                            if !contents.iter().any(|o| o.id() == id) {
                                contents.push(handle.clone());
                            }
                        });
                        info!(id = %id, "object added to the main folder");
                        Ok(Some(json!({"object": handle.snapshot(), "id": id})))
                    }
                })
                .on(ACTION_REMOVE_OBJECT, move |intent: Intent| {
                    let state = remove_state.clone();
                    async move {
                        let id = intent
                            .str_field("id")
                            .ok_or_else(|| {
                                IntentError::InvalidData("remove-object needs an `id`".into())
                            })?
                            .to_string();
                        if !state.store.remove(&id).await {
                            warn!(id = %id, "remove-object for an id we do not hold");
                            return Ok(None);
                        }
                        state.contents.update(|contents| {
                            contents.retain(|o| o.id() != id);
                        });
                        Ok(Some(json!({"id": id})))
                    }
                }),
        )
        .with_surface(move |data, role| {
            if role != "main" {
                return None;
            }
            if data.get("type").and_then(Value::as_str) != Some(FOLDER_TYPE) {
                return None;
            }
            let contents = surface_state.contents.clone();
            Some(Component::new("folder-main", move |_| {
                let objects: Vec<Value> =
                    contents.get().iter().map(|o| json!(o.id())).collect();
                json!({"kind": "folder", "objects": objects})
            }))
        })
        .with_stack(StackProvides {
            creators: Vec::new(),
            choosers: vec![StackChooser {
                id: "choose-object".into(),
                test_id: "spacesPlugin.chooseObject".into(),
                label: Label::key("choose object label", PLUGIN_ID),
                icon: Some(Icon::named("plus")),
                filter: Arc::new(|object: &Value| {
                    object.get("id").and_then(Value::as_str).is_some()
                }),
            }],
        })
        .with_metadata(MetadataRecord {
            object_type: FOLDER_TYPE.into(),
            placeholder: Some(Label::key("folder label", PLUGIN_ID)),
            icon: Some(Icon::named("folder")),
        })
        .with_translations(en_us(PLUGIN_ID, &[
            ("folder label", "Workbench"),
            ("object title placeholder", "Object"),
            ("choose object label", "Add existing object"),
        ]))
        .on_ready(|set| async move {
            if set.meta_of(super::layout::PLUGIN_ID).is_none() {
                info!("layout plugin absent, activation chains will fall through");
            }
            Ok(())
        })
        .on_unload(move || {
            let state = unload_state.clone();
            async move {
                state.adapters.clear();
                debug!("spaces adapters cleared");
                Ok(())
            }
        })
    })
}

/// Mirror the folder contents into the tree: one child per object, in
/// insertion order, dropping children whose object left the store.
fn sync_children(folder: &Node, state: &Arc<SpacesState>) {
    let contents = state.contents.get();
    let live: HashSet<String> = contents.iter().map(|o| o.id().to_string()).collect();
    folder.retain_children(|info| live.contains(&info.id));
    state.adapters.retain(|id, _| live.contains(id));
    for (index, object) in contents.iter().enumerate() {
        upsert_child(folder, object, index);
        if !state.adapters.contains_key(object.id()) {
            let folder = folder.clone();
            let tracked = object.clone();
            // weak, the adapters live inside the state they would otherwise pin
            let state_ref = Arc::downgrade(state);
            let sub = object.value().subscribe(move |_| {
                let Some(state) = state_ref.upgrade() else { return };
                let position = state
                    .contents
                    .get()
                    .iter()
                    .position(|o| o.id() == tracked.id());
                if let Some(index) = position {
                    upsert_child(&folder, &tracked, index);
                }
            });
            state.adapters.insert(object.id().to_string(), sub);
        }
    }
}

fn upsert_child(folder: &Node, object: &ObjectRef, index: usize) {
    let title = object
        .property("title")
        .and_then(|v| v.as_str().map(String::from))
        .filter(|t| !t.is_empty());
    let label = match title {
        Some(title) => Label::text(title),
        None => Label::key("object title placeholder", PLUGIN_ID),
    };
    folder.add(
        NodeSpec::new(object.id())
            .with_label(label)
            .with_data(object.clone())
            .with_property("index", json!(index)),
    );
}
