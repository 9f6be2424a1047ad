// src/intent.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use workbench_plugin::intent::{Intent, Resolver};

/// What a chain does when a step's resolver has no handler for the
/// action: skip the step (default) or end the chain with the result so
/// far. Either way the step is recorded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    #[default]
    Continue,
    Halt,
}

impl std::str::FromStr for UnresolvedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "halt" => Ok(Self::Halt),
            other => Err(format!("unknown unresolved-action policy `{other}`")),
        }
    }
}

/// Errors that end a chain early. Steps before the failing one keep
/// their side effects; steps after it never run.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum DispatchError {
    /// The step named a plugin nobody registered a resolver for.
    #[error("step {step}: no resolver for plugin `{plugin}`")]
    UnknownPlugin { plugin: String, step: usize },

    /// A handler ran and failed.
    #[error("step {step}: `{plugin}` failed on `{action}`: {message}")]
    Resolver { plugin: String, action: String, step: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum StepOutcome {
    /// Handler produced a result object.
    Contributed(Value),
    /// Handler matched and chose to stay silent.
    Silent,
    /// No handler for the action; policy decided what happened next.
    Unresolved,
    /// The step ended the chain.
    Failed(String),
}

/// One record per step, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub plugin: String,
    pub action: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChainReport {
    pub records: Vec<StepRecord>,
    /// If we stopped early, why.
    pub error: Option<DispatchError>,
    /// Last non-empty result a step produced.
    pub result: Option<Value>,
    /// Total elapsed wall time in milliseconds.
    pub total_ms: i64,
}

/// Previous result threads into the next step: an object result merges
/// under the step's literal data with literal keys winning; with no
/// literal data the result passes through untouched.
fn thread_data(literal: Option<Value>, prior: Option<&Value>) -> Option<Value> {
    match (literal, prior) {
        (None, prior) => prior.cloned(),
        (Some(lit), None) => Some(lit),
        (Some(Value::Object(lit_map)), Some(Value::Object(prev_map))) => {
            let mut merged = prev_map.clone();
            merged.extend(lit_map);
            Some(Value::Object(merged))
        }
        (Some(lit), Some(_)) => Some(lit),
    }
}

/// Routes chains to per-plugin resolvers. Chains run strictly
/// sequentially within themselves; concurrent chains interleave however
/// the resolvers let them.
#[derive(Clone)]
pub struct IntentDispatcher {
    resolvers: Arc<DashMap<String, Arc<Resolver>>>,
    policy: UnresolvedPolicy,
}

impl IntentDispatcher {
    pub fn new() -> Self {
        Self::with_policy(UnresolvedPolicy::default())
    }

    pub fn with_policy(policy: UnresolvedPolicy) -> Self {
        Self { resolvers: Arc::new(DashMap::new()), policy }
    }

    pub fn policy(&self) -> UnresolvedPolicy {
        self.policy
    }

    pub fn register(&self, plugin: impl Into<String>, resolver: Resolver) {
        let plugin = plugin.into();
        if self.resolvers.insert(plugin.clone(), Arc::new(resolver)).is_some() {
            warn!(plugin = %plugin, "intent resolver replaced");
        }
    }

    pub fn unregister(&self, plugin: &str) -> bool {
        self.resolvers.remove(plugin).is_some()
    }

    pub fn has_resolver(&self, plugin: &str) -> bool {
        self.resolvers.contains_key(plugin)
    }

    pub fn plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> =
            self.resolvers.iter().map(|kv| kv.key().clone()).collect();
        plugins.sort();
        plugins
    }

    /// Run the chain and keep the full per-step record.
    pub async fn execute(&self, chain: Vec<Intent>) -> ChainReport {
        let run_start = Utc::now();
        let mut records: Vec<StepRecord> = Vec::new();
        let mut result: Option<Value> = None;
        let mut error: Option<DispatchError> = None;

        for (step, intent) in chain.into_iter().enumerate() {
            let started = Utc::now();
            // clone the Arc out of the map before any await
            let resolver = self.resolvers.get(&intent.plugin).map(|kv| kv.value().clone());
            let Some(resolver) = resolver else {
                warn!(plugin = %intent.plugin, step, "chain hit an unknown plugin, stopping");
                error = Some(DispatchError::UnknownPlugin { plugin: intent.plugin.clone(), step });
                records.push(StepRecord {
                    plugin: intent.plugin,
                    action: intent.action,
                    started,
                    finished: Utc::now(),
                    outcome: StepOutcome::Failed("no resolver".into()),
                });
                break;
            };

            if !resolver.handles(&intent.action) {
                records.push(StepRecord {
                    plugin: intent.plugin,
                    action: intent.action,
                    started,
                    finished: Utc::now(),
                    outcome: StepOutcome::Unresolved,
                });
                match self.policy {
                    UnresolvedPolicy::Continue => continue,
                    UnresolvedPolicy::Halt => break,
                }
            }

            let effective = Intent {
                plugin: intent.plugin.clone(),
                action: intent.action.clone(),
                data: thread_data(intent.data, result.as_ref()),
            };
            match resolver.resolve(effective).await {
                Ok(Some(value)) => {
                    records.push(StepRecord {
                        plugin: intent.plugin,
                        action: intent.action,
                        started,
                        finished: Utc::now(),
                        outcome: StepOutcome::Contributed(value.clone()),
                    });
                    result = Some(value);
                }
                Ok(None) => {
                    records.push(StepRecord {
                        plugin: intent.plugin,
                        action: intent.action,
                        started,
                        finished: Utc::now(),
                        outcome: StepOutcome::Silent,
                    });
                }
                Err(err) => {
                    warn!(plugin = %intent.plugin, action = %intent.action, step, error = %err, "chain step failed, stopping");
                    error = Some(DispatchError::Resolver {
                        plugin: intent.plugin.clone(),
                        action: intent.action.clone(),
                        step,
                        message: err.to_string(),
                    });
                    records.push(StepRecord {
                        plugin: intent.plugin,
                        action: intent.action,
                        started,
                        finished: Utc::now(),
                        outcome: StepOutcome::Failed(err.to_string()),
                    });
                    break;
                }
            }
        }

        let total_ms = (Utc::now() - run_start).num_milliseconds();
        tracing::event!(
            target: "chain",
            tracing::Level::INFO,
            steps = records.len(),
            latency_ms = total_ms,
            status = if error.is_none() { "ok" } else { "error" },
        );
        ChainReport { records, error, result, total_ms }
    }

    /// Run the chain; the last non-empty result is the chain's result.
    #[tracing::instrument(skip(self, chain), fields(steps = chain.len()))]
    pub async fn dispatch(&self, chain: Vec<Intent>) -> Result<Option<Value>, DispatchError> {
        let report = self.execute(chain).await;
        match report.error {
            Some(err) => Err(err),
            None => Ok(report.result),
        }
    }
}

impl Default for IntentDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IntentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentDispatcher")
            .field("plugins", &self.plugins())
            .field("policy", &self.policy)
            .finish()
    }
}
