//! Explicit project registry.
//!
//! One [`ProjectRegistry`] owns every loaded [`ProjectHandle`] for a given
//! event log. There is no process-global state: tests open as many isolated
//! registries as they like.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use convoy_core::{
    generate_slug, Clock, ConvoyError, ConvoyResult, LeaseConfig, Project, StorageError,
    StoreConfig,
};
use convoy_events::EventLog;
use dashmap::DashMap;

use crate::lease::LeaseManager;
use crate::project::ProjectHandle;

/// Settings for a registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryConfig {
    pub store: StoreConfig,
    pub lease: LeaseConfig,
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            lease: LeaseConfig::from_env(),
        }
    }

    pub fn validate(&self) -> ConvoyResult<()> {
        self.store.validate()?;
        self.lease.validate()
    }
}

pub struct ProjectRegistry {
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    projects: DashMap<String, Arc<ProjectHandle>>,
    leases: LeaseManager,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRegistry")
            .field("projects", &self.projects.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ProjectRegistry {
    /// Open a registry over `log`, loading every project it already holds.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid settings, or a `StorageError` if
    /// the log is unreachable or a project's history cannot be replayed.
    pub async fn open(
        log: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
        config: RegistryConfig,
    ) -> ConvoyResult<Self> {
        config.validate()?;
        log.health_check().await?;

        let registry = Self {
            leases: LeaseManager::new(config.lease.clone()),
            log,
            clock,
            config,
            projects: DashMap::new(),
            closed: AtomicBool::new(false),
        };

        let keys = registry.log.projects().await?;
        for key in &keys {
            registry.load(key).await?;
        }
        tracing::info!(projects = keys.len(), "project registry opened");
        Ok(registry)
    }

    /// Drop every loaded project. Later calls fail with
    /// `StorageError::Unavailable`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.projects.clear();
        tracing::info!("project registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> ConvoyResult<()> {
        if self.is_closed() {
            return Err(StorageError::Unavailable {
                reason: "project registry is closed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Slugs of every loaded project, sorted.
    pub fn project_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.projects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    async fn load(&self, slug: &str) -> ConvoyResult<Arc<ProjectHandle>> {
        let handle = ProjectHandle::load(
            slug,
            Arc::clone(&self.log),
            Arc::clone(&self.clock),
            &self.config.store,
        )
        .await?;
        // A concurrent loader may have won; keep whichever landed first.
        let entry = self
            .projects
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(handle));
        Ok(Arc::clone(entry.value()))
    }

    fn loaded(&self, slug: &str) -> Option<Arc<ProjectHandle>> {
        self.projects.get(slug).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a project by slug.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when the log has no events for it.
    pub async fn project(&self, slug: &str) -> ConvoyResult<Arc<ProjectHandle>> {
        self.ensure_open()?;
        if let Some(handle) = self.loaded(slug) {
            return Ok(handle);
        }
        if self.log.latest_offset(slug).await? == 0 {
            return Err(ConvoyError::not_found("project", slug));
        }
        self.load(slug).await
    }

    /// Create the project for `human_key` if it does not exist yet.
    ///
    /// Idempotent: a second call returns the existing project without
    /// appending anything.
    pub async fn ensure_project(&self, human_key: &str) -> ConvoyResult<Project> {
        self.ensure_open()?;
        if human_key.trim().is_empty() {
            return Err(ConvoyError::missing("human_key"));
        }
        let slug = generate_slug(human_key);
        if slug.is_empty() {
            return Err(ConvoyError::invalid(
                "human_key",
                "contains no characters usable in a slug",
            ));
        }

        let handle = match self.loaded(&slug) {
            Some(handle) => handle,
            None => self.load(&slug).await?,
        };
        let project = handle.ensure_created(human_key).await?;
        tracing::debug!(slug = %project.slug, human_key, "project ensured");
        Ok(project)
    }

    /// Every loaded project that has a `project_created` event.
    pub async fn projects(&self) -> Vec<Project> {
        let handles: Vec<Arc<ProjectHandle>> =
            self.projects.iter().map(|e| Arc::clone(e.value())).collect();
        let mut projects = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(project) = handle.read().await.project() {
                projects.push(project.clone());
            }
        }
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        projects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::SystemClock;
    use convoy_events::InMemoryEventLog;

    async fn open_registry(log: Arc<InMemoryEventLog>) -> ProjectRegistry {
        ProjectRegistry::open(log, Arc::new(SystemClock), RegistryConfig::default())
            .await
            .expect("open should succeed")
    }

    #[tokio::test]
    async fn test_ensure_project_is_idempotent() {
        let log = Arc::new(InMemoryEventLog::new());
        let registry = open_registry(Arc::clone(&log)).await;

        let first = registry.ensure_project("/work/Backend API").await.expect("ensure");
        let second = registry.ensure_project("/work/Backend API").await.expect("ensure");
        assert_eq!(first, second);
        assert_eq!(first.slug, "_work_backend_api");
        assert_eq!(log.latest_offset(&first.slug).await.expect("latest"), 1);
    }

    #[tokio::test]
    async fn test_unknown_project_not_found() {
        let registry = open_registry(Arc::new(InMemoryEventLog::new())).await;
        let err = registry.project("nope").await.expect_err("missing project");
        assert!(matches!(err, ConvoyError::Storage(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reopen_loads_existing_projects() {
        let log = Arc::new(InMemoryEventLog::new());
        {
            let registry = open_registry(Arc::clone(&log)).await;
            registry.ensure_project("/alpha").await.expect("ensure");
            registry.close();
            assert!(registry.project("_alpha").await.is_err());
        }
        let registry = open_registry(log).await;
        assert_eq!(registry.project_keys(), vec!["_alpha".to_string()]);
        let projects = registry.projects().await;
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].human_key, "/alpha");
    }
}
