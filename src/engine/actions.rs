use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::EngineResult;

use super::context::ExecutionContext;

/// Contract for concrete business actions (send email, create record,
/// call external API, ...). Handlers receive the node's config with every
/// template already resolved, plus a read view of the run context, and
/// return the output map the node may publish from.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        config: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> EngineResult<Map<String, Value>>;
}

/// Registry of action handlers by name. Owned by the engine instance;
/// registration is expected at process start but is safe at any time.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}
