//! Lifecycle-managed service bundle.
//!
//! Everything with global lifetime (the sandbox pool, the store, the
//! model client, the workflow) is constructed here once at process start
//! and torn down through [`Service::shutdown`]. Tests wire the same
//! workflow from test implementations instead of mutating any global.

use crate::config::ServiceConfig;
use crate::error::WorkflowError;
use crate::journal::FsJournal;
use crate::workflow::{CatalogWorkflow, WorkflowPrompts};
use cataloger_agent::AgentConfig;
use cataloger_anthropic::Anthropic;
use cataloger_sandbox::{DockerSandboxFactory, SandboxPool, SandboxSpec};
use cataloger_store::{CatalogStore, S3Config, S3Store, StoreCredentials};
use std::sync::Arc;

/// The assembled service.
pub struct Service {
    pool: Arc<SandboxPool>,
    workflow: CatalogWorkflow<S3Store, Anthropic>,
}

impl Service {
    /// Construct the bundle from the process environment.
    pub async fn from_env() -> Result<Self, WorkflowError> {
        Self::new(ServiceConfig::from_env()?).await
    }

    /// Construct the bundle from explicit configuration.
    pub async fn new(config: ServiceConfig) -> Result<Self, WorkflowError> {
        let store = S3Store::new(S3Config {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            endpoint: config.endpoint.clone(),
        })
        .await;
        let credentials = StoreCredentials {
            access_key_id: config.access_key_id.clone().unwrap_or_default(),
            secret_access_key: config.secret_access_key.clone().unwrap_or_default(),
            region: config.region.clone(),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
        };
        let catalog_store = Arc::new(CatalogStore::new(store, credentials.clone()));

        // Sandboxes get the store credentials at the container level too, so
        // agent code can reach the bucket without any kernel cooperation.
        let factory = DockerSandboxFactory::new(SandboxSpec {
            image: config.sandbox_image.clone(),
            network_mode: config.docker_network.clone(),
            data_dir: config.data_dir.clone(),
            env: vec![
                format!("S3_ENDPOINT_URL={}", credentials.endpoint.clone().unwrap_or_default()),
                format!("AWS_ACCESS_KEY_ID={}", credentials.access_key_id),
                format!("AWS_SECRET_ACCESS_KEY={}", credentials.secret_access_key),
                format!("AWS_DEFAULT_REGION={}", credentials.region),
                format!("S3_BUCKET={}", credentials.bucket),
            ],
            ..SandboxSpec::default()
        })
        .await?;
        let pool = Arc::new(SandboxPool::new(Arc::new(factory), config.pool_size));

        let provider = match &config.model_name {
            Some(model) => Anthropic::new(config.llm_api_key.clone()).model(model.clone()),
            None => Anthropic::new(config.llm_api_key.clone()),
        };

        let workflow = CatalogWorkflow::new(
            Arc::clone(&pool),
            catalog_store,
            Arc::new(provider),
            Arc::new(FsJournal::new(&config.journal_dir)),
            WorkflowPrompts {
                cataloging: config.cataloging_prompt.clone(),
                summary: config.summary_prompt.clone(),
            },
            AgentConfig {
                model: config.model_name.clone(),
                ..AgentConfig::default()
            },
        );

        tracing::info!(
            pool_size = config.pool_size,
            bucket = %config.bucket,
            "service constructed"
        );
        Ok(Self { pool, workflow })
    }

    /// The workflow, ready to serve requests.
    pub fn workflow(&self) -> &CatalogWorkflow<S3Store, Anthropic> {
        &self.workflow
    }

    /// Tear down every sandbox. Called once at process shutdown.
    pub async fn shutdown(&self) {
        tracing::info!("service shutting down");
        self.pool.cleanup().await;
    }
}
