use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::Flow;

/// External collaborator responsible for Flow persistence. The coordinator
/// only ever calls `save`; `list`/`get`/`delete` exist for whatever consumes
/// saved Flows later. Real persistence (a database, the filesystem, a
/// network service) is out of scope here.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn save(&self, flow: &Flow) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<Flow>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Flow>>;
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;
}

/// Placeholder store for local development and tests. Not a substitute for
/// real persistence - it forgets everything on restart.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<String, Flow>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn save(&self, flow: &Flow) -> anyhow::Result<()> {
        self.flows.insert(flow.id.clone(), flow.clone());
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Flow>> {
        Ok(self.flows.iter().map(|e| e.value().clone()).collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Flow>> {
        Ok(self.flows.get(id).map(|e| e.value().clone()))
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.flows.remove(id).is_some())
    }
}
