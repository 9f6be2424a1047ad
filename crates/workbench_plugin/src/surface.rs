use std::{fmt, sync::Arc};

use serde_json::Value;

/// Renders a datum into a view description. What the description means is
/// the renderer's business; the shell only routes it.
pub type RenderFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A renderable a plugin offers for some `(data, role)` pair. The id gives
/// resolution an observable identity.
#[derive(Clone)]
pub struct Component {
    id: String,
    render: RenderFn,
}

impl Component {
    pub fn new(id: impl Into<String>, render: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self { id: id.into(), render: Arc::new(render) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn render(&self, data: &Value) -> Value {
        (self.render)(data)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("id", &self.id).finish()
    }
}

/// A plugin's surface fragment: datum plus role in, maybe a component out.
/// `None` means "not mine", and the next plugin in registration order gets
/// a look.
pub type ComponentResolver = Arc<dyn Fn(&Value, &str) -> Option<Component> + Send + Sync>;
