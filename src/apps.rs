// src/apps.rs

use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use tracing::info;

use workbench_plugin::plugin::PluginFactory;

use crate::{config::ConfigManager, host::PluginHost, intent::UnresolvedPolicy, plugins};

/// Owns the composed shell for one process: the host plus whatever
/// bootstrap wired into it.
pub struct App {
    config: ConfigManager,
    host: Option<Arc<PluginHost>>,
}

impl App {
    pub fn new(config: ConfigManager) -> Self {
        Self { config, host: None }
    }

    /// Build the host from config, install the first-party plugins plus
    /// `extra`, and run everyone's ready hooks.
    pub async fn bootstrap(&mut self, extra: Vec<PluginFactory>) -> Result<Arc<PluginHost>> {
        let raw = self.config.on_unresolved().await;
        let policy: UnresolvedPolicy = raw.parse().map_err(|err: String| anyhow!(err))?;
        let host = PluginHost::new(policy)?;

        let mut factories = plugins::first_party();
        factories.extend(extra);
        let ids = host.install_all(&factories).await?;
        info!(plugins = ids.len(), "shell composed");

        self.host = Some(host.clone());
        Ok(host)
    }

    pub fn host(&self) -> Option<Arc<PluginHost>> {
        self.host.clone()
    }

    pub async fn shutdown(&self) {
        if let Some(host) = &self.host {
            host.shutdown().await;
        }
    }
}

/// Called when the user runs `workbench init --root <dir>`.
pub fn cmd_init(root: PathBuf) -> Result<()> {
    let dirs = ["config", "logs", "chains"];
    for d in &dirs {
        let path = root.join(d);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }

    let conf_path = root.join("config/.env");
    if !conf_path.exists() {
        let default_cfg = concat!(
            "WORKBENCH_LOCALE=en-US\n",
            "WORKBENCH_LOG_LEVEL=info\n",
            "WORKBENCH_ON_UNRESOLVED=continue\n",
        );
        fs::write(&conf_path, default_cfg)
            .with_context(|| format!("failed to write {}", conf_path.display()))?;
        println!("Created {}", conf_path.display());
    } else {
        println!("Skipping {}, already exists", conf_path.display());
    }

    println!("Workbench directory initialized at {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigManager;
    use tempfile::tempdir;

    #[tokio::test]
    async fn bootstrap_installs_the_first_party_set() {
        let config = ConfigManager(MapConfigManager::new());
        let mut app = App::new(config);
        let host = app.bootstrap(Vec::new()).await.unwrap();

        assert!(host.dispatcher().has_resolver(plugins::spaces::PLUGIN_ID));
        assert!(host.dispatcher().has_resolver(plugins::layout::PLUGIN_ID));
        assert!(host.graph().find_by_id(plugins::spaces::MAIN_FOLDER_ID).is_some());

        app.shutdown().await;
        assert!(host.installed().is_empty());
        assert!(host.graph().find_by_id(plugins::spaces::MAIN_FOLDER_ID).is_none());
    }

    #[tokio::test]
    async fn bootstrap_reads_the_unresolved_policy() {
        let config =
            ConfigManager(MapConfigManager::with(&[("WORKBENCH_ON_UNRESOLVED", "halt")]));
        let mut app = App::new(config);
        let host = app.bootstrap(Vec::new()).await.unwrap();
        assert_eq!(host.dispatcher().policy(), UnresolvedPolicy::Halt);

        let config =
            ConfigManager(MapConfigManager::with(&[("WORKBENCH_ON_UNRESOLVED", "shrug")]));
        let mut app = App::new(config);
        assert!(app.bootstrap(Vec::new()).await.is_err());
    }

    #[test]
    fn init_lays_out_the_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("workbench");
        cmd_init(root.clone()).unwrap();
        assert!(root.join("config/.env").exists());
        assert!(root.join("logs").is_dir());
        assert!(root.join("chains").is_dir());

        // second run leaves the file alone
        fs::write(root.join("config/.env"), "WORKBENCH_LOCALE=de-DE\n").unwrap();
        cmd_init(root.clone()).unwrap();
        let kept = fs::read_to_string(root.join("config/.env")).unwrap();
        assert!(kept.contains("de-DE"));
    }
}
