use anyhow::{Context, Result, bail};
use schemars::schema_for;
use serde_json::Value as JsonValue;
use serde_yaml_bw::Value as YamlValue;
use std::{fs, path::PathBuf};
use tracing::info;

use workbench_plugin::intent::Intent;

use crate::{apps::App, config::ConfigManager, intent::ChainReport};

/// Parse a YAML or JSON chain file into intents, checking the raw value
/// against the chain schema before deserializing.
pub fn load_chain_file(chain_file: &PathBuf) -> Result<Vec<Intent>> {
    if !chain_file.exists() {
        bail!("File does not exist: {}", chain_file.display());
    }

    let content = fs::read_to_string(chain_file)
        .with_context(|| format!("Failed to read file: {}", chain_file.display()))?;

    let ext = chain_file.extension().and_then(|s| s.to_str());
    let raw: JsonValue = if ext == Some("json") {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in file: {}", chain_file.display()))?
    } else if ext == Some("yaml") || ext == Some("yml") {
        let yaml: YamlValue = serde_yaml_bw::from_str(&content)
            .with_context(|| format!("Invalid YAML in file: {}", chain_file.display()))?;
        serde_json::to_value(yaml)?
    } else {
        bail!("Unsupported file extension for: {}", chain_file.display());
    };

    let schema = serde_json::to_value(schema_for!(Vec<Intent>))?;
    if let Err(err) = jsonschema::validate(&schema, &raw) {
        bail!("Chain file {} is not valid: {err}", chain_file.display());
    }

    let chain: Vec<Intent> = serde_json::from_value(raw)?;
    if chain.is_empty() {
        bail!("Chain file holds no steps: {}", chain_file.display());
    }
    for (i, step) in chain.iter().enumerate() {
        if step.plugin.trim().is_empty() || step.action.trim().is_empty() {
            bail!("Step {} is missing a plugin or action id", i + 1);
        }
    }
    Ok(chain)
}

/// Validate that the provided file is a valid YAML or JSON chain definition.
pub fn validate_chain_file(chain_file: PathBuf) -> Result<()> {
    let chain = load_chain_file(&chain_file)?;
    info!("✅ Valid chain ({} steps): {}", chain.len(), chain_file.display());
    println!(
        "✅ Valid chain ({} steps): {}",
        chain.len(),
        chain_file.display()
    );
    Ok(())
}

/// Run a chain file against a freshly composed shell and print the report.
pub async fn dispatch_chain_file(
    chain_file: PathBuf,
    config: ConfigManager,
) -> Result<ChainReport> {
    let chain = load_chain_file(&chain_file)?;

    let mut app = App::new(config);
    let host = app.bootstrap(Vec::new()).await?;
    let report = host.execute(chain).await;
    app.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn json_and_yaml_chains_both_load() {
        let dir = TempDir::new().unwrap();
        let json_path = write_file(
            &dir,
            "chain.json",
            r#"[{"plugin": "workbench.sh/plugin/layout",
                 "action": "workbench.sh/plugin/layout/action/activate",
                 "data": {"id": "obj-1"}}]"#,
        );
        let yaml_path = write_file(
            &dir,
            "chain.yaml",
            "- plugin: workbench.sh/plugin/layout\n  action: workbench.sh/plugin/layout/action/activate\n  data:\n    id: obj-1\n",
        );

        let from_json = load_chain_file(&json_path).unwrap();
        let from_yaml = load_chain_file(&yaml_path).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.len(), 1);
        assert_eq!(from_json[0].str_field("id"), Some("obj-1"));
    }

    #[test]
    fn broken_files_are_rejected() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("nope.json");
        assert!(load_chain_file(&missing).is_err());

        let bad_ext = write_file(&dir, "chain.toml", "plugin = 'x'");
        let err = load_chain_file(&bad_ext).unwrap_err();
        assert!(err.to_string().contains("Unsupported file extension"));

        let not_a_chain = write_file(&dir, "shape.json", r#"[{"plugin": 7}]"#);
        assert!(load_chain_file(&not_a_chain).is_err());

        let empty = write_file(&dir, "empty.json", "[]");
        let err = load_chain_file(&empty).unwrap_err();
        assert!(err.to_string().contains("holds no steps"));

        let blank_ids = write_file(
            &dir,
            "blank.json",
            r#"[{"plugin": "  ", "action": "a"}]"#,
        );
        let err = load_chain_file(&blank_ids).unwrap_err();
        assert!(err.to_string().contains("Step 1"));
    }

    #[tokio::test]
    async fn dispatching_a_file_reaches_the_shell() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "activate.yaml",
            "- plugin: workbench.sh/plugin/layout\n  action: workbench.sh/plugin/layout/action/activate\n  data:\n    id: obj-9\n",
        );

        let config = ConfigManager(MapConfigManager::new());
        let report = dispatch_chain_file(path, config).await.unwrap();
        assert!(report.error.is_none());
        assert_eq!(report.result, Some(json!({"active": "obj-9", "previous": null})));
    }
}
