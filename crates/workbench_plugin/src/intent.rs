use std::{collections::HashMap, future::Future, sync::Arc};

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One step of a chain: which plugin, which of its actions, and an
/// optional data payload. This wire shape is the only cross-plugin
/// invocation protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Intent {
    /// Target plugin id, e.g. `example.com/plugin/palette`.
    pub plugin: String,
    /// Action name the target's resolver maps to a handler.
    pub action: String,
    /// Payload; the previous step's result threads into it at dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Intent {
    pub fn new(plugin: impl Into<String>, action: impl Into<String>) -> Self {
        Self { plugin: plugin.into(), action: action.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }
}

/// Errors a resolver handler can return.
#[derive(Error, Debug, Serialize, Deserialize, JsonSchema)]
pub enum IntentError {
    /// Something went wrong reading or writing JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// The payload is missing or malformed for this action.
    #[error("invalid intent data: {0}")]
    InvalidData(String),

    /// The handler ran and failed.
    #[error("intent failed: {0}")]
    Failed(String),
}

impl From<serde_json::Error> for IntentError {
    fn from(err: serde_json::Error) -> IntentError {
        IntentError::Json(err.to_string())
    }
}

impl From<anyhow::Error> for IntentError {
    fn from(err: anyhow::Error) -> IntentError {
        IntentError::Failed(err.to_string())
    }
}

/// `Ok(None)` means "no contribution": the handler matched nothing or
/// chose to stay silent, and the chain keeps whatever result it had.
pub type IntentResult = Result<Option<Value>, IntentError>;

pub type IntentHandler = Arc<dyn Fn(Intent) -> BoxFuture<'static, IntentResult> + Send + Sync>;

/// A plugin's intent resolver: action names mapped to async handlers.
/// Built once at plugin construction; actions nobody registered resolve
/// to `Ok(None)`.
#[derive(Clone, Default)]
pub struct Resolver {
    handlers: HashMap<String, IntentHandler>,
}

impl Resolver {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn on<F, Fut>(mut self, action: impl Into<String>, f: F) -> Self
    where
        F: Fn(Intent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = IntentResult> + Send + 'static,
    {
        let handler: IntentHandler = Arc::new(move |intent: Intent| {
            let fut: BoxFuture<'static, IntentResult> = Box::pin(f(intent));
            fut
        });
        self.handlers.insert(action.into(), handler);
        self
    }

    pub fn handles(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }

    pub async fn resolve(&self, intent: Intent) -> IntentResult {
        match self.handlers.get(&intent.action) {
            Some(handler) => {
                let handler = handler.clone();
                handler(intent).await
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").field("actions", &self.actions()).finish()
    }
}
