use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};
use tracing::{info, warn};

/// Key the shell reads the UI locale from.
pub const LOCALE_KEY: &str = "WORKBENCH_LOCALE";
/// Key the shell reads the log filter from.
pub const LOG_LEVEL_KEY: &str = "WORKBENCH_LOG_LEVEL";
/// Key deciding what a chain does when a step resolves to nothing.
pub const ON_UNRESOLVED_KEY: &str = "WORKBENCH_ON_UNRESOLVED";

#[async_trait::async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn del(&self, key: &str);
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub fn into_inner(self) -> Box<dyn ConfigManagerType> {
        self.0
    }

    /// Locale used to resolve translated labels, `en-US` when unset.
    pub async fn locale(&self) -> String {
        self.0
            .get(LOCALE_KEY)
            .await
            .unwrap_or_else(|| "en-US".to_string())
    }

    /// EnvFilter directive for logging, `info` when unset.
    pub async fn log_level(&self) -> String {
        self.0
            .get(LOG_LEVEL_KEY)
            .await
            .unwrap_or_else(|| "info".to_string())
    }

    /// `continue` (default) or `halt`; the dispatcher parses it.
    pub async fn on_unresolved(&self) -> String {
        self.0
            .get(ON_UNRESOLVED_KEY)
            .await
            .unwrap_or_else(|| "continue".to_string())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Backed by process environment variables, loading an `.env` file up
/// front and writing changes back to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            dotenvy::from_path(env_file.clone()).ok();
            info!("loaded .env from {}", env_file.display());
        } else {
            warn!("no .env at {}, starting from process environment", env_file.display());
        }

        Box::new(Self { env_file })
    }

    /// Rewrite the `.env` line for `key`: `Some` updates or appends,
    /// `None` drops it. Unparseable lines pass through untouched.
    fn write_back(&self, key: &str, value: Option<&str>) -> Result<(), String> {
        let content = fs::read_to_string(&self.env_file).unwrap_or_default();
        let mut lines: Vec<String> = Vec::new();
        let mut found = false;
        for line in content.lines() {
            match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    found = true;
                    if let Some(value) = value {
                        lines.push(format!("{key}={value}"));
                    }
                }
                _ => lines.push(line.to_string()),
            }
        }
        if !found {
            if let Some(value) = value {
                lines.push(format!("{key}={value}"));
            }
        }
        fs::write(&self.env_file, lines.join("\n")).map_err(|e| e.to_string())
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        self.write_back(key, Some(value))
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
        // best effort; the process environment is already clean
        let _ = self.write_back(key, None);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "EnvConfigManager".to_string()
    }
}

/// Plain in-memory settings, for tests and embedded use.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self { map: DashMap::new() })
    }

    pub fn with(entries: &[(&str, &str)]) -> Box<Self> {
        let map = DashMap::new();
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Box::new(Self { map })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}
