// tests/shell_test.rs
use std::sync::Arc;

use serde_json::{Value, json};

use plugin_palette::{COLOR_TYPE, PLUGIN_ID as PALETTE_ID, color_plugin};
use workbench::apps::App;
use workbench::config::{ConfigManager, MapConfigManager, ON_UNRESOLVED_KEY};
use workbench::host::PluginHost;
use workbench::intent::{DispatchError, StepOutcome, UnresolvedPolicy};
use workbench::plugins::{layout, spaces};
use workbench_plugin::graph::Label;
use workbench_plugin::intent::Intent;
use workbench_plugin::plugin::PluginState;

/// A shell with the first-party plugins plus the color palette.
async fn shell_with_palette() -> (App, Arc<PluginHost>) {
    let mut app = App::new(ConfigManager(MapConfigManager::new()));
    let host = app.bootstrap(vec![color_plugin()]).await.unwrap();
    (app, host)
}

#[tokio::test]
async fn bootstrap_brings_every_plugin_to_active() {
    let (_app, host) = shell_with_palette().await;

    assert_eq!(
        host.installed(),
        vec![
            spaces::PLUGIN_ID.to_string(),
            layout::PLUGIN_ID.to_string(),
            PALETTE_ID.to_string(),
        ]
    );
    let diagnostics = host.diagnostics();
    assert_eq!(diagnostics.len(), 3);
    assert!(diagnostics.values().all(|state| *state == PluginState::Active));

    assert!(host.graph().find_by_id(spaces::MAIN_FOLDER_ID).is_some());
    assert!(host.graph().find_by_id("local-colors").is_some());
}

#[tokio::test]
async fn a_create_chain_threads_through_three_plugins() {
    let (_app, host) = shell_with_palette().await;

    let folder = host.graph().find_by_id(spaces::MAIN_FOLDER_ID).unwrap();
    let create = folder.action("example.com/plugin/color/create").unwrap();
    let chain = create.intent_chain().unwrap();
    assert_eq!(chain.len(), 3);

    let result = host.dispatch(chain).await.unwrap().unwrap();
    let active = result.get("active").and_then(Value::as_str).unwrap().to_string();
    assert_eq!(result.get("previous"), Some(&Value::Null));

    // the activated id names the object the chain stored in the folder
    let children = host.graph().find_by_id(spaces::MAIN_FOLDER_ID).unwrap().children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id(), active);
    assert_eq!(
        children[0].data().unwrap().property("type"),
        Some(json!(COLOR_TYPE))
    );
}

#[tokio::test]
async fn an_unknown_plugin_is_fatal_but_prior_steps_stand() {
    let (_app, host) = shell_with_palette().await;
    let chain = vec![
        Intent::new(spaces::PLUGIN_ID, spaces::ACTION_ADD_OBJECT)
            .with_data(json!({"object": {"type": COLOR_TYPE, "color": "tomato"}})),
        Intent::new(
            "workbench.sh/plugin/vanished",
            "workbench.sh/plugin/vanished/action/go",
        ),
        Intent::new(layout::PLUGIN_ID, layout::ACTION_ACTIVATE),
    ];

    let err = host.dispatch(chain).await.unwrap_err();
    assert_eq!(
        err,
        DispatchError::UnknownPlugin {
            plugin: "workbench.sh/plugin/vanished".into(),
            step: 1,
        }
    );

    // the first step's object landed before the chain stopped
    let folder = host.graph().find_by_id(spaces::MAIN_FOLDER_ID).unwrap();
    assert_eq!(folder.children().len(), 1);
}

#[tokio::test]
async fn the_local_create_action_activates_what_it_made() {
    let (_app, host) = shell_with_palette().await;

    let group = host.graph().find_by_id("local-colors").unwrap();
    let action = group.action("example.com/plugin/color/create-local").unwrap();
    let chain = action.intent_chain().unwrap();

    let result = host.dispatch(chain).await.unwrap().unwrap();
    assert_eq!(result.get("active"), Some(&json!("0")));

    let children = host.graph().find_by_id("local-colors").unwrap().children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id(), "0");
}

#[tokio::test]
async fn uninstalling_the_palette_revokes_every_contribution() {
    let (_app, host) = shell_with_palette().await;
    let color = json!({"type": COLOR_TYPE, "color": "seagreen"});

    assert!(host.graph().find_by_id("local-colors").is_some());
    assert!(host.dispatcher().has_resolver(PALETTE_ID));
    assert!(host.surfaces().resolve(&color, "main").is_some());
    assert!(host.metadata().for_type(COLOR_TYPE).is_some());
    assert!(host.stacks().creators().iter().any(|c| c.id == "create-color"));
    assert_eq!(
        host.translations()
            .resolve(&Label::key("local colors label", PALETTE_ID), "en-US"),
        "Local Colors"
    );

    host.uninstall(PALETTE_ID).await.unwrap();

    assert!(host.graph().find_by_id("local-colors").is_none());
    assert!(!host.dispatcher().has_resolver(PALETTE_ID));
    assert!(host.surfaces().resolve(&color, "main").is_none());
    assert!(host.metadata().for_type(COLOR_TYPE).is_none());
    assert!(host.stacks().creators().iter().all(|c| c.id != "create-color"));
    // unresolvable keys fall back to the key text
    assert_eq!(
        host.translations()
            .resolve(&Label::key("local colors label", PALETTE_ID), "en-US"),
        "local colors label"
    );
    assert_eq!(host.state_of(PALETTE_ID), None);
}

#[tokio::test]
async fn a_reinstall_is_structurally_equivalent() {
    let (_app, host) = shell_with_palette().await;

    let shape = |host: &PluginHost| -> (Vec<String>, Vec<String>) {
        let roots: Vec<String> = host
            .graph()
            .root()
            .children()
            .iter()
            .map(|n| n.id().to_string())
            .collect();
        let actions: Vec<String> = host
            .graph()
            .find_by_id("local-colors")
            .map(|group| group.actions().iter().map(|a| a.id().to_string()).collect())
            .unwrap_or_default();
        (roots, actions)
    };
    let before = shape(&host);

    host.uninstall(PALETTE_ID).await.unwrap();
    assert!(host.graph().find_by_id("local-colors").is_none());

    host.install(&color_plugin()).unwrap();
    host.ready_all().await;

    assert_eq!(shape(&host), before);
    assert_eq!(host.state_of(PALETTE_ID), Some(PluginState::Active));
}

#[tokio::test]
async fn surfaces_scan_in_install_order_and_miss_politely() {
    let (_app, host) = shell_with_palette().await;

    let color = json!({"type": COLOR_TYPE, "color": "orchid"});
    let folder = json!({"type": spaces::FOLDER_TYPE});

    // spaces registered first and passes on colors, so the scan reaches the palette
    assert_eq!(host.surfaces().resolve(&color, "main").unwrap().id(), "color-main");
    assert_eq!(host.surfaces().resolve(&folder, "main").unwrap().id(), "folder-main");
    assert!(host.surfaces().resolve(&color, "toolbar").is_none());
    assert!(
        host.surfaces()
            .resolve(&json!({"type": "example.com/type/sound"}), "main")
            .is_none()
    );
}

#[tokio::test]
async fn the_unresolved_policy_comes_from_config() {
    let config = ConfigManager(MapConfigManager::with(&[(ON_UNRESOLVED_KEY, "halt")]));
    let mut app = App::new(config);
    let host = app.bootstrap(vec![color_plugin()]).await.unwrap();
    assert_eq!(host.dispatcher().policy(), UnresolvedPolicy::Halt);

    let chain = vec![
        Intent::new(PALETTE_ID, "example.com/plugin/color/action/paintEverything"),
        Intent::new(layout::PLUGIN_ID, layout::ACTION_ACTIVATE).with_data(json!({"id": "x"})),
    ];
    let halted = host.execute(chain.clone()).await;
    assert!(halted.error.is_none());
    assert_eq!(halted.records.len(), 1);
    assert_eq!(halted.records[0].outcome, StepOutcome::Unresolved);
    assert_eq!(halted.result, None);

    // the default shell skips the step instead
    let (_app2, lenient) = shell_with_palette().await;
    let report = lenient.execute(chain).await;
    assert!(report.error.is_none());
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.result, Some(json!({"active": "x", "previous": null})));
}
