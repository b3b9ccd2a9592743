//! In-process agent registry. Serves lookups on the hot path without a
//! store round-trip, reconciled against the store on a timer and after
//! observed writes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use relay_core::domain::agent::{Agent, AgentId, SubAgent};
use relay_db::repositories::{AgentStore, RepositoryError};

#[derive(Clone, Debug, PartialEq)]
pub struct RegistryEntry {
    pub agent: Agent,
    pub sub_agents: Vec<SubAgent>,
}

/// Reconciliation statistics from one `sync()` pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub total: usize,
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent store unavailable: {0}")]
    Store(#[from] RepositoryError),
}

pub struct AgentRegistry {
    store: Arc<dyn AgentStore>,
    inner: RwLock<HashMap<AgentId, RegistryEntry>>,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self { store, inner: RwLock::new(HashMap::new()), last_sync: RwLock::new(None) }
    }

    /// Replace the registry contents with a fresh store snapshot. The
    /// snapshot is assembled before the write lock is taken, so readers see
    /// either the old or the new complete state, never a partial one.
    pub async fn load_all(&self) -> Result<usize, RegistryError> {
        let snapshot = self.fetch_snapshot().await?;
        let total = snapshot.len();

        let mut inner = self.inner.write().await;
        *inner = snapshot;
        drop(inner);
        *self.last_sync.write().await = Some(Utc::now());

        info!(event_name = "registry.loaded", total, "agent registry snapshot replaced");
        Ok(total)
    }

    /// Incremental reconciliation: store-only ids are added, local-only ids
    /// are removed, ids present in both are replaced by the store version.
    /// The previous snapshot stays live if the store read fails.
    pub async fn sync(&self) -> Result<SyncStats, RegistryError> {
        let snapshot = self.fetch_snapshot().await?;

        let mut inner = self.inner.write().await;
        let added = snapshot.keys().filter(|id| !inner.contains_key(*id)).count();
        let removed = inner.keys().filter(|id| !snapshot.contains_key(*id)).count();
        let kept = snapshot.len() - added;
        *inner = snapshot;
        let total = inner.len();
        drop(inner);
        *self.last_sync.write().await = Some(Utc::now());

        let stats = SyncStats { total, added, removed, kept };
        debug!(
            event_name = "registry.synced",
            total = stats.total,
            added = stats.added,
            removed = stats.removed,
            kept = stats.kept,
            "agent registry reconciled"
        );
        Ok(stats)
    }

    pub async fn get(&self, id: &AgentId) -> Option<Agent> {
        self.inner.read().await.get(id).map(|entry| entry.agent.clone())
    }

    pub async fn get_entry(&self, id: &AgentId) -> Option<RegistryEntry> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn get_sub_agents(&self, id: &AgentId) -> Vec<SubAgent> {
        self.inner
            .read()
            .await
            .get(id)
            .map(|entry| entry.sub_agents.clone())
            .unwrap_or_default()
    }

    pub async fn list_all(&self) -> Vec<Agent> {
        let inner = self.inner.read().await;
        let mut agents: Vec<Agent> = inner.values().map(|entry| entry.agent.clone()).collect();
        agents.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        agents
    }

    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.read().await
    }

    async fn fetch_snapshot(&self) -> Result<HashMap<AgentId, RegistryEntry>, RegistryError> {
        let agents = self.store.list_agents().await?;
        let mut snapshot = HashMap::with_capacity(agents.len());
        for agent in agents {
            let sub_agents = self.store.list_sub_agents(&agent.id).await?;
            snapshot.insert(agent.id.clone(), RegistryEntry { agent, sub_agents });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use chrono::Utc;

    use relay_core::domain::agent::{
        Agent, AgentConfig, AgentId, AgentRole, AgentStatus, ClientId, SubAgent,
    };
    use relay_db::repositories::{AgentStore, InMemoryAgentStore, RepositoryError};

    use super::{AgentRegistry, SyncStats};

    fn agent(id: &str) -> Agent {
        Agent {
            id: AgentId(id.to_string()),
            name: id.to_string(),
            slug: None,
            client_id: Some(ClientId("client-1".to_string())),
            role: AgentRole::ClientAgent,
            is_template: false,
            status: AgentStatus::Active,
            config: AgentConfig::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Store wrapper that can be switched into a failing mode.
    struct FlakyStore {
        inner: InMemoryAgentStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new(inner: InMemoryAgentStore) -> Self {
            Self { inner, failing: AtomicBool::new(false) }
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), RepositoryError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(RepositoryError::Constraint("store offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl AgentStore for FlakyStore {
        async fn list_agents(&self) -> Result<Vec<Agent>, RepositoryError> {
            self.check()?;
            self.inner.list_agents().await
        }

        async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
            self.check()?;
            self.inner.find_agent(id).await
        }

        async fn list_sub_agents(
            &self,
            parent_id: &AgentId,
        ) -> Result<Vec<SubAgent>, RepositoryError> {
            self.check()?;
            self.inner.list_sub_agents(parent_id).await
        }

        async fn save_agent(&self, agent: Agent) -> Result<(), RepositoryError> {
            self.inner.save_agent(agent).await
        }

        async fn save_sub_agent(&self, sub_agent: SubAgent) -> Result<(), RepositoryError> {
            self.inner.save_sub_agent(sub_agent).await
        }

        async fn delete_agent(&self, id: &AgentId) -> Result<(), RepositoryError> {
            self.inner.delete_agent(id).await
        }
    }

    #[tokio::test]
    async fn load_all_replaces_the_snapshot() {
        let store = Arc::new(InMemoryAgentStore::new());
        store.save_agent(agent("agent-1")).await.expect("save agent");

        let registry = AgentRegistry::new(store.clone());
        let total = registry.load_all().await.expect("load_all");
        assert_eq!(total, 1);
        assert!(registry.get(&AgentId("agent-1".to_string())).await.is_some());
        assert!(registry.last_sync().await.is_some());
    }

    #[tokio::test]
    async fn sync_reconciles_added_removed_and_kept() {
        let store = Arc::new(InMemoryAgentStore::new());
        store.save_agent(agent("agent-1")).await.expect("save agent");
        store.save_agent(agent("agent-2")).await.expect("save agent");

        let registry = AgentRegistry::new(store.clone());
        registry.load_all().await.expect("load_all");

        store.delete_agent(&AgentId("agent-1".to_string())).await.expect("delete agent");
        store.save_agent(agent("agent-3")).await.expect("save agent");

        let stats = registry.sync().await.expect("sync");
        assert_eq!(stats, SyncStats { total: 2, added: 1, removed: 1, kept: 1 });
        assert!(registry.get(&AgentId("agent-1".to_string())).await.is_none());
        assert!(registry.get(&AgentId("agent-3".to_string())).await.is_some());
    }

    #[tokio::test]
    async fn sync_is_idempotent_against_an_unchanged_store() {
        let store = Arc::new(InMemoryAgentStore::new());
        store.save_agent(agent("agent-1")).await.expect("save agent");

        let registry = AgentRegistry::new(store);
        registry.sync().await.expect("first sync");
        let second = registry.sync().await.expect("second sync");
        assert_eq!(second, SyncStats { total: 1, added: 0, removed: 0, kept: 1 });
    }

    #[tokio::test]
    async fn failed_sync_keeps_the_previous_snapshot_live() {
        let inner = InMemoryAgentStore::new();
        inner.save_agent(agent("agent-1")).await.expect("save agent");
        let store = Arc::new(FlakyStore::new(inner));

        let registry = AgentRegistry::new(store.clone());
        registry.load_all().await.expect("load_all");

        store.fail(true);
        assert!(registry.sync().await.is_err());
        assert!(
            registry.get(&AgentId("agent-1".to_string())).await.is_some(),
            "stale snapshot must survive a failed sync"
        );
    }
}
