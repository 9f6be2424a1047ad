use std::{fmt, sync::{Arc, Mutex}};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::observe::Observable;

#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("object is not a JSON object")]
    NotAnObject,
    #[error("object `{0}` not found")]
    NotFound(String),
}

/// Cheap handle to one stored object: its id plus the observable value.
/// The tree holds these as read-only projections; writes go through the
/// observable and reach every subscriber.
#[derive(Clone)]
pub struct ObjectRef {
    id: Arc<str>,
    value: Observable<Value>,
}

impl ObjectRef {
    pub fn new(id: impl Into<String>, value: Observable<Value>) -> Self {
        Self { id: id.into().into(), value }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &Observable<Value> {
        &self.value
    }

    pub fn snapshot(&self) -> Value {
        self.value.get()
    }

    /// The `type` discriminant, when the object carries one.
    pub fn type_name(&self) -> Option<String> {
        match self.value.get() {
            Value::Object(map) => map.get("type").and_then(Value::as_str).map(String::from),
            _ => None,
        }
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        match self.value.get() {
            Value::Object(map) => map.get(key).cloned(),
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef").field("id", &self.id).finish()
    }
}

/// Where domain objects live. The shell only ever talks to this contract;
/// the demo runs on [`InMemorySpace`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a JSON object, assigning an id when it carries none. An
    /// existing id is an upsert through the same observable, so
    /// subscribers of the old handle see the new value.
    async fn insert(&self, object: Value) -> Result<ObjectRef, SpaceError>;
    async fn get(&self, id: &str) -> Option<ObjectRef>;
    async fn remove(&self, id: &str) -> bool;
    /// Handles in insertion order.
    async fn list(&self) -> Vec<ObjectRef>;

    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("impl", &self.name())
            .finish()
    }
}

pub struct InMemorySpace {
    objects: DashMap<String, ObjectRef>,
    order: Mutex<Vec<String>>,
}

impl InMemorySpace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { objects: DashMap::new(), order: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl ObjectStore for InMemorySpace {
    async fn insert(&self, object: Value) -> Result<ObjectRef, SpaceError> {
        let mut object = object;
        let map = object.as_object_mut().ok_or(SpaceError::NotAnObject)?;
        let id = match map.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        map.insert("id".to_string(), Value::String(id.clone()));
        let existing = self.objects.get(&id).map(|r| r.clone());
        if let Some(handle) = existing {
            handle.value().set(object);
            return Ok(handle);
        }
        let handle = ObjectRef::new(id.clone(), Observable::new(object));
        self.objects.insert(id.clone(), handle.clone());
        self.order.lock().unwrap().push(id);
        Ok(handle)
    }

    async fn get(&self, id: &str) -> Option<ObjectRef> {
        self.objects.get(id).map(|r| r.clone())
    }

    async fn remove(&self, id: &str) -> bool {
        let gone = self.objects.remove(id).is_some();
        if gone {
            self.order.lock().unwrap().retain(|o| o != id);
        }
        gone
    }

    async fn list(&self) -> Vec<ObjectRef> {
        let order = self.order.lock().unwrap().clone();
        order
            .into_iter()
            .filter_map(|id| self.objects.get(&id).map(|r| r.clone()))
            .collect()
    }

    fn name(&self) -> &'static str {
        "InMemorySpace"
    }
}
