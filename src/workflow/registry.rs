/// Versioned workflow registry using ArcSwap
///
/// Holds every published version of every workflow in memory. Readers get a
/// lock-free snapshot; publishing swaps in a new map. A published version is
/// never modified, so a run that loaded version N keeps seeing version N even
/// if version N+1 is published mid-run.

use crate::workflow::storage::SqliteStore;
use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Read access to workflow definitions, by id and optional version
///
/// `version = None` means the latest published version.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_workflow(&self, id: &str, version: Option<u32>) -> Result<Option<Arc<WorkflowDefinition>>>;
}

type VersionMap = BTreeMap<u32, Arc<WorkflowDefinition>>;

/// Lock-free in-memory registry of workflow versions
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: versions ordered ascending
    workflows: ArcSwap<HashMap<String, VersionMap>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the registry with every version persisted in storage
    pub async fn init_from_storage(&self, storage: &SqliteStore) -> Result<()> {
        let stored = storage.load_all_versions().await?;
        let mut map: HashMap<String, VersionMap> = HashMap::new();
        for definition in stored {
            map.entry(definition.id.clone())
                .or_default()
                .insert(definition.version, Arc::new(definition));
        }

        let count = map.len();
        self.workflows.store(Arc::new(map));
        tracing::info!("📥 Initialized workflow registry with {} workflows", count);
        Ok(())
    }

    /// Publish a definition as the next version of its workflow
    ///
    /// The `version` field of the argument is ignored and overwritten.
    /// Returns the stored definition with its assigned version.
    pub fn publish(&self, mut definition: WorkflowDefinition) -> Arc<WorkflowDefinition> {
        let mut published = None;
        self.workflows.rcu(|current| {
            let mut next = HashMap::clone(current);
            let versions = next.entry(definition.id.clone()).or_default();
            definition.version = versions.keys().next_back().map_or(1, |v| v + 1);
            let stored = Arc::new(definition.clone());
            versions.insert(stored.version, Arc::clone(&stored));
            published = Some(stored);
            next
        });

        // rcu always runs the closure at least once
        let published = published.unwrap_or_else(|| Arc::new(definition));
        tracing::info!("🔥 Published workflow {} version {}", published.id, published.version);
        published
    }

    /// Insert an already-versioned definition (used when replaying storage)
    pub fn insert_version(&self, definition: WorkflowDefinition) {
        let definition = Arc::new(definition);
        self.workflows.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(definition.id.clone())
                .or_default()
                .insert(definition.version, Arc::clone(&definition));
            next
        });
    }

    pub fn get(&self, id: &str, version: Option<u32>) -> Option<Arc<WorkflowDefinition>> {
        let workflows = self.workflows.load();
        let versions = workflows.get(id)?;
        match version {
            Some(v) => versions.get(&v).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }

    pub fn latest_version(&self, id: &str) -> Option<u32> {
        self.workflows.load().get(id)?.keys().next_back().copied()
    }

    /// Latest version of every workflow (used by the scheduler)
    pub fn latest_all(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.workflows
            .load()
            .values()
            .filter_map(|versions| versions.values().next_back().cloned())
            .collect()
    }

    /// Remove every version of a workflow; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        self.workflows.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(id).is_some();
            next
        });
        if removed {
            tracing::info!("🗑️ Removed workflow from registry: {}", id);
        }
        removed
    }
}

#[async_trait]
impl WorkflowStore for WorkflowRegistry {
    async fn load_workflow(&self, id: &str, version: Option<u32>) -> Result<Option<Arc<WorkflowDefinition>>> {
        Ok(self.get(id, version))
    }
}
