//! A color palette plugin, the smallest complete third-party plugin:
//! it keeps private colors under a tree group, offers a create action on
//! folders, claims the `main` surface for color objects and handles its
//! own intents.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde_json::{Value, json};
use tracing::debug;

use workbench_plugin::graph::{ActionSpec, Icon, Label, Node, NodeSpec};
use workbench_plugin::intent::{Intent, Resolver};
use workbench_plugin::observe::{Observable, effect};
use workbench_plugin::plugin::{
    MetadataRecord, PluginDefinition, PluginFactory, PluginMeta, StackCreator, StackProvides,
    TranslationBundle,
};
use workbench_plugin::space::ObjectRef;
use workbench_plugin::surface::Component;

pub const PLUGIN_ID: &str = "example.com/plugin/color";
pub const COLOR_TYPE: &str = "example.com/type/color";
pub const ACTION_CREATE: &str = "example.com/plugin/color/action/create";
pub const ACTION_CREATE_LOCAL: &str = "example.com/plugin/color/action/createLocal";

// well-known shell ids this plugin chains into
const SPACES_PLUGIN: &str = "workbench.sh/plugin/spaces";
const SPACES_ADD_OBJECT: &str = "workbench.sh/plugin/spaces/action/add-object";
const LAYOUT_PLUGIN: &str = "workbench.sh/plugin/layout";
const LAYOUT_ACTIVATE: &str = "workbench.sh/plugin/layout/action/activate";

const NICE_COLORS: [&str; 25] = [
    "royalblue", "skyblue", "lightblue", "deepskyblue", "cadetblue",
    "palevioletred", "orchid", "mediumorchid", "violet", "mediumpurple",
    "rebeccapurple", "mediumseagreen", "seagreen", "limegreen", "palegreen",
    "springgreen", "darkseagreen", "olive", "darkolivegreen", "goldenrod",
    "darkgoldenrod", "chocolate", "saddlebrown", "firebrick", "tomato",
];

const POSITIVE_EXCLAMATIONS: [&str; 10] = [
    "Fantastic!", "Well done!", "Great job!", "Outstanding!", "Impressive!",
    "Bravo!", "Excellent!", "Superb!", "Amazing!", "Incredible!",
];

fn random_color() -> &'static str {
    NICE_COLORS.choose(&mut rand::rng()).copied().unwrap_or("royalblue")
}

fn random_exclamation() -> &'static str {
    POSITIVE_EXCLAMATIONS.choose(&mut rand::rng()).copied().unwrap_or("Bravo!")
}

fn color_value(id: Option<&str>) -> Value {
    let mut value = json!({
        "type": COLOR_TYPE,
        "color": random_color(),
        "exclaim": random_exclamation(),
    });
    if let Some(id) = id {
        value["id"] = json!(id);
    }
    value
}

fn is_color(object: &Value) -> bool {
    object.get("type").and_then(Value::as_str) == Some(COLOR_TYPE)
        && object.get("color").and_then(Value::as_str).is_some()
}

struct PaletteState {
    /// Colors created locally, never handed to the folder.
    colors: Observable<Vec<ObjectRef>>,
}

pub fn color_plugin() -> PluginFactory {
    Arc::new(|| {
        let state = Arc::new(PaletteState { colors: Observable::new(Vec::new()) });

        let graph_state = state.clone();
        let create_state = state.clone();
        let unload_state = state.clone();
        PluginDefinition::new(PluginMeta::new(PLUGIN_ID).with_icon(Icon::named("palette")))
            .with_graph(move |node: &Node| {
                if node.id() == "root" {
                    let group = node.add(
                        NodeSpec::new("local-colors")
                            .with_label(Label::key("local colors label", PLUGIN_ID))
                            .with_icon(Icon::named("palette")),
                    );
                    group.add_action(
                        ActionSpec::intent(
                            "example.com/plugin/color/create-local",
                            vec![
                                Intent::new(PLUGIN_ID, ACTION_CREATE_LOCAL),
                                Intent::new(LAYOUT_PLUGIN, LAYOUT_ACTIVATE),
                            ],
                        )
                        .with_label(Label::key("create object label", PLUGIN_ID))
                        .with_icon(Icon::named("plus")),
                    );
                    let colors = graph_state.colors.clone();
                    return Some(effect(&[&graph_state.colors], move || {
                        for (index, color) in colors.get().iter().enumerate() {
                            add_color_node(&group, color, index);
                        }
                    }));
                }
                if node.property("kind") == Some(json!("folder")) {
                    node.add_action(
                        ActionSpec::intent(
                            "example.com/plugin/color/create",
                            vec![
                                Intent::new(PLUGIN_ID, ACTION_CREATE),
                                Intent::new(SPACES_PLUGIN, SPACES_ADD_OBJECT)
                                    .with_data(json!({"target": node.id()})),
                                Intent::new(LAYOUT_PLUGIN, LAYOUT_ACTIVATE),
                            ],
                        )
                        .with_label(Label::key("create object label", PLUGIN_ID))
                        .with_icon(Icon::named("plus")),
                    );
                }
                None
            })
            .with_intent(
                Resolver::new()
                    .on(ACTION_CREATE, |_intent: Intent| async move {
                        Ok(Some(json!({"object": color_value(None)})))
                    })
                    .on(ACTION_CREATE_LOCAL, move |_intent: Intent| {
                        let state = create_state.clone();
                        async move {
                            let id = state.colors.get().len().to_string();
                            let handle =
                                ObjectRef::new(&id, Observable::new(color_value(Some(&id))));
                            state.colors.update(|colors| colors.push(handle.clone()));
                            debug!(id = %id, "local color created");
                            Ok(Some(json!({"object": handle.snapshot(), "id": id})))
                        }
                    }),
            )
            .with_surface(|data, role| {
                if role != "main" || !is_color(data) {
                    return None;
                }
                Some(Component::new("color-main", |data: &Value| {
                    json!({
                        "kind": "color",
                        "background": data.get("color").cloned().unwrap_or(Value::Null),
                        "exclaim": data.get("exclaim").cloned().unwrap_or(Value::Null),
                    })
                }))
            })
            .with_stack(StackProvides {
                creators: vec![StackCreator {
                    id: "create-color".into(),
                    test_id: "colorPlugin.createObject".into(),
                    label: Label::key("create object label", PLUGIN_ID),
                    icon: Some(Icon::named("plus")),
                    intent: Intent::new(PLUGIN_ID, ACTION_CREATE),
                }],
                choosers: Vec::new(),
            })
            .with_metadata(MetadataRecord {
                object_type: COLOR_TYPE.into(),
                placeholder: Some(Label::key("color title placeholder", PLUGIN_ID)),
                icon: Some(Icon::named("palette")),
            })
            .with_translations(translations())
            .on_unload(move || {
                let state = unload_state.clone();
                async move {
                    state.colors.set(Vec::new());
                    debug!("local colors cleared");
                    Ok(())
                }
            })
    })
}

fn add_color_node(group: &Node, color: &ObjectRef, index: usize) {
    let name = color
        .property("color")
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    group.add(
        NodeSpec::new(index.to_string())
            .with_label(Label::text(name.clone()))
            .with_icon(Icon::named("palette").with_color(name))
            .with_data(color.clone()),
    );
}

fn translations() -> TranslationBundle {
    let keys = [
        ("local colors label", "Local Colors"),
        ("create object label", "Create a Color"),
        ("color title placeholder", "Color"),
    ];
    let mut ns = HashMap::new();
    ns.insert(
        PLUGIN_ID.to_string(),
        keys.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    );
    let mut bundle = HashMap::new();
    bundle.insert("en-US".to_string(), ns);
    bundle
}
