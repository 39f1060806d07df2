//! Wires the configured components together for the commands.

use std::sync::Arc;

use anyhow::Context;
use orion_agent::Orchestrator;
use orion_channels::{NotificationManager, manager_from_config};
use orion_config::AppConfig;
use orion_memory::SqliteStore;
use orion_providers::{OpenAiCompatModel, RateLimiter};
use orion_tools::{ResponseCache, default_dispatcher};
use orion_workflow::{Drainer, Maintenance};

pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
}

impl Runtime {
    /// Open the database named in the config.
    pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let path = config.memory.database_path();
        let store = SqliteStore::open(&path)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// The orchestrator needs an API key; the store-only commands do not.
    pub fn orchestrator(&self) -> anyhow::Result<Arc<Orchestrator>> {
        if !self.config.has_api_key() {
            anyhow::bail!(
                "No API key configured. Set ORION_API_KEY (or GROQ_API_KEY) or add model.api_key to {}",
                AppConfig::config_dir().join("config.toml").display()
            );
        }

        let worker = OpenAiCompatModel::worker_from_config(&self.config.model)
            .context("Failed to build worker model")?;
        let evaluator = OpenAiCompatModel::evaluator_from_config(&self.config.model)
            .context("Failed to build evaluator model")?;
        let cache = Arc::new(ResponseCache::from_config(&self.config.cache));
        let tools = default_dispatcher().with_cache(cache);

        let orchestrator = Orchestrator::new(
            Arc::new(worker),
            Arc::new(evaluator),
            Arc::new(tools),
            self.store.clone(),
            Arc::new(RateLimiter::from_config(&self.config.rate_limit)),
        )
        .with_config(&self.config)
        .with_queue(self.store.clone());
        Ok(Arc::new(orchestrator))
    }

    pub fn notifier(&self) -> Arc<NotificationManager> {
        Arc::new(manager_from_config(
            &self.config.notifications,
            self.store.clone(),
        ))
    }

    pub fn drainer(&self, orchestrator: Arc<Orchestrator>) -> Drainer {
        Drainer::new(orchestrator, self.store.clone(), self.notifier()).with_config(&self.config.queue)
    }

    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(self.store.clone(), self.store.clone()).with_config(&self.config)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
