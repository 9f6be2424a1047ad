// src/schema.rs

use std::{fs, path::PathBuf};

use anyhow::Error;
use schemars::schema_for;
use serde_json::json;

use workbench_plugin::{graph::GraphEvent, intent::Intent, plugin::PluginMeta};

use crate::{
    apps::App,
    config::{ConfigManager, MapConfigManager},
    intent::ChainReport,
};

/// The entry point invoked by `main.rs` for `Commands::Schema`.
pub async fn write_schema(out_dir: PathBuf) -> Result<(), Error> {
    fs::create_dir_all(&out_dir)?;

    // 1) wire shapes
    let chain_schema = schema_for!(Vec<Intent>);
    let chain_json = serde_json::to_string_pretty(&chain_schema)?;
    fs::write(out_dir.join("chain.schema.json"), chain_json)?;

    let report_schema = schema_for!(ChainReport);
    let report_json = serde_json::to_string_pretty(&report_schema)?;
    fs::write(out_dir.join("chain-report.schema.json"), report_json)?;

    let event_schema = schema_for!(GraphEvent);
    let event_json = serde_json::to_string_pretty(&event_schema)?;
    fs::write(out_dir.join("graph-event.schema.json"), event_json)?;

    let meta_schema = schema_for!(PluginMeta);
    let meta_json = serde_json::to_string_pretty(&meta_schema)?;
    fs::write(out_dir.join("plugin-meta.schema.json"), meta_json)?;

    // 2) per-plugin dumps, taken from a throwaway shell
    let config = ConfigManager(MapConfigManager::new());
    let mut app = App::new(config);
    let host = app.bootstrap(Vec::new()).await?;
    for definition in host.plugin_set().iter() {
        let actions = definition
            .provides
            .intent
            .as_ref()
            .map(|resolver| resolver.actions())
            .unwrap_or_default();
        let dump = json!({
            "meta": definition.meta,
            "actions": actions,
            "metadata": definition.provides.metadata,
        });
        let filename = format!("plugin-{}.json", definition.id().replace('/', "-"));
        fs::write(out_dir.join(filename), serde_json::to_string_pretty(&dump)?)?;
    }
    app.shutdown().await;

    Ok(())
}
