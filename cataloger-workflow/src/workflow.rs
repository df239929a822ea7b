//! The catalog workflow: acquire → catalog agent → persist → reset →
//! summary agent → persist → release.

use crate::error::WorkflowError;
use crate::journal::Journal;
use cataloger_agent::{AgentConfig, AgentLoop, CatalogContext, SummaryContext};
use cataloger_context::strip_tags;
use cataloger_model::Provider;
use cataloger_sandbox::{RunEnv, SandboxPool, SandboxRuntime};
use cataloger_store::{CatalogStore, ObjectStore, now_timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One catalog request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Read-only database connection string, injected into the sandbox.
    pub db_connection_string: String,
    /// Tables the cataloging agent should explore.
    pub tables: Vec<String>,
    /// Object-store prefix grouping this database's runs.
    pub prefix: String,
    /// Identity for durable retries. Retrying with the same key resumes the
    /// same run: the timestamp is reused and completed units are skipped.
    /// `None` gives the invocation a fresh identity.
    pub invocation_key: Option<String>,
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReceipt {
    /// Run timestamp (the version directory).
    pub timestamp: String,
    /// URI of `catalog.html`.
    pub catalog_uri: String,
    /// URI of `catalog_script.py`.
    pub catalog_script_uri: String,
    /// URI of `recent_summary.html`.
    pub summary_uri: String,
    /// URI of `summary_script.py`.
    pub summary_script_uri: String,
    /// The prefix the run was stored under.
    pub prefix: String,
}

/// The two agent system prompts.
#[derive(Debug, Clone)]
pub struct WorkflowPrompts {
    /// System prompt for the cataloging agent.
    pub cataloging: String,
    /// System prompt for the summary agent.
    pub summary: String,
}

/// Journal record for one persisted agent phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhaseRecord {
    uri: String,
    script_uri: String,
}

/// Orchestrates one database catalog run end to end.
pub struct CatalogWorkflow<S, P> {
    pool: Arc<SandboxPool>,
    store: Arc<CatalogStore<S>>,
    provider: Arc<P>,
    journal: Arc<dyn Journal>,
    prompts: WorkflowPrompts,
    agent_config: AgentConfig,
}

impl<S: ObjectStore, P: Provider> CatalogWorkflow<S, P> {
    /// Wire a workflow over its collaborators.
    pub fn new(
        pool: Arc<SandboxPool>,
        store: Arc<CatalogStore<S>>,
        provider: Arc<P>,
        journal: Arc<dyn Journal>,
        prompts: WorkflowPrompts,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            pool,
            store,
            provider,
            journal,
            prompts,
            agent_config,
        }
    }

    /// Run the workflow.
    ///
    /// The runtime is released on every exit path. A runtime whose sandbox
    /// was lost is discarded instead of reused.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReceipt, WorkflowError> {
        if request.prefix.is_empty() {
            return Err(WorkflowError::BadRequest("prefix must not be empty".into()));
        }
        if request.tables.is_empty() {
            return Err(WorkflowError::BadRequest(
                "at least one table is required".into(),
            ));
        }

        let invocation = request
            .invocation_key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let unit_key = |unit: &str| format!("{}/{}/{}", request.prefix, invocation, unit);

        // The timestamp is assigned exactly once per invocation identity and
        // reused across retries.
        let timestamp = match self.journal.lookup(&unit_key("timestamp")).await? {
            Some(recorded) => recorded
                .as_str()
                .ok_or_else(|| WorkflowError::Journal("timestamp record is not a string".into()))?
                .to_string(),
            None => {
                let ts = now_timestamp();
                self.journal
                    .record(&unit_key("timestamp"), serde_json::json!(ts))
                    .await?;
                ts
            }
        };

        tracing::info!(
            prefix = %request.prefix,
            timestamp = %timestamp,
            tables = ?request.tables,
            "workflow starting"
        );

        let catalog_done: Option<PhaseRecord> = self
            .lookup_phase(&unit_key("catalog"))
            .await?;
        let summary_done: Option<PhaseRecord> = self
            .lookup_phase(&unit_key("summary"))
            .await?;

        // A fully recorded invocation needs no sandbox at all.
        if let (Some(catalog), Some(summary)) = (&catalog_done, &summary_done) {
            return Ok(self.receipt(request, &timestamp, catalog, summary));
        }

        let mut guard = self.pool.acquire(self.run_env(request)).await?;
        let result = self
            .run_phases(
                guard.runtime_mut(),
                request,
                &timestamp,
                &unit_key("catalog"),
                &unit_key("summary"),
                catalog_done,
                summary_done,
            )
            .await;

        match &result {
            Err(e) if e.lost_sandbox() => self.pool.discard(guard).await,
            _ => {
                if let Err(e) = self.pool.release(guard).await {
                    tracing::warn!(error = %e, "failed to release runtime");
                }
            }
        }

        if let Ok(receipt) = &result {
            tracing::info!(
                catalog_uri = %receipt.catalog_uri,
                summary_uri = %receipt.summary_uri,
                "workflow complete"
            );
        }
        result
    }

    /// Both agent phases against one issued runtime.
    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        runtime: &mut SandboxRuntime,
        request: &RunRequest,
        timestamp: &str,
        catalog_key: &str,
        summary_key: &str,
        catalog_done: Option<PhaseRecord>,
        summary_done: Option<PhaseRecord>,
    ) -> Result<RunReceipt, WorkflowError> {
        let previous_context = self.previous_context(&request.prefix, timestamp).await?;

        let catalog = match catalog_done {
            Some(record) => record,
            None => {
                let context = CatalogContext {
                    tables: request.tables.clone(),
                    previous_context: previous_context.clone(),
                };
                let html = AgentLoop::new(&*self.provider, runtime, self.agent_config.clone())
                    .run(&self.prompts.cataloging, &context)
                    .await?;

                // Script before artifact, both before reset: the artifacts of
                // this phase must be durable before kernel state is gone.
                let script_uri = self
                    .store
                    .write_script(&request.prefix, timestamp, "catalog_script.py", &runtime.session_script())
                    .await?;
                let uri = self
                    .store
                    .write_html(&request.prefix, timestamp, "catalog.html", &html)
                    .await?;

                let record = PhaseRecord { uri, script_uri };
                self.record_phase(catalog_key, &record).await?;
                record
            }
        };

        runtime.reset().await?;

        let summary = match summary_done {
            Some(record) => record,
            None => {
                let context = SummaryContext {
                    s3_prefix: request.prefix.clone(),
                    current_timestamp: timestamp.to_string(),
                    previous_context,
                };
                let html = AgentLoop::new(&*self.provider, runtime, self.agent_config.clone())
                    .run(&self.prompts.summary, &context)
                    .await?;

                let script_uri = self
                    .store
                    .write_script(&request.prefix, timestamp, "summary_script.py", &runtime.session_script())
                    .await?;
                // The publication barrier: recent_summary.html is the last
                // object written for the run.
                let uri = self
                    .store
                    .write_html(&request.prefix, timestamp, "recent_summary.html", &html)
                    .await?;

                let record = PhaseRecord { uri, script_uri };
                self.record_phase(summary_key, &record).await?;
                record
            }
        };

        Ok(self.receipt(request, timestamp, &catalog, &summary))
    }

    /// Tag-stripped digest of the newest run strictly older than this one,
    /// or `None` on a first run.
    async fn previous_context(
        &self,
        prefix: &str,
        timestamp: &str,
    ) -> Result<Option<String>, WorkflowError> {
        let previous = self
            .store
            .list_timestamps(prefix, 10)
            .await?
            .into_iter()
            .find(|ts| ts.as_str() < timestamp);
        match previous {
            Some(ts) => {
                let document = cataloger_context::assemble(&self.store, prefix, Some(&ts)).await?;
                Ok(Some(strip_tags(&document)))
            }
            None => Ok(None),
        }
    }

    fn run_env(&self, request: &RunRequest) -> RunEnv {
        let creds = self.store.credentials();
        RunEnv {
            db_connection_string: Some(request.db_connection_string.clone()),
            store_access_key_id: creds.access_key_id.clone(),
            store_secret_access_key: creds.secret_access_key.clone(),
            store_region: creds.region.clone(),
            store_bucket: creds.bucket.clone(),
            store_endpoint: creds.endpoint.clone(),
        }
    }

    async fn lookup_phase(&self, key: &str) -> Result<Option<PhaseRecord>, WorkflowError> {
        match self.journal.lookup(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| WorkflowError::Journal(format!("corrupt record {key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn record_phase(&self, key: &str, record: &PhaseRecord) -> Result<(), WorkflowError> {
        let value = serde_json::to_value(record)
            .map_err(|e| WorkflowError::Journal(e.to_string()))?;
        self.journal.record(key, value).await
    }

    fn receipt(
        &self,
        request: &RunRequest,
        timestamp: &str,
        catalog: &PhaseRecord,
        summary: &PhaseRecord,
    ) -> RunReceipt {
        RunReceipt {
            timestamp: timestamp.to_string(),
            catalog_uri: catalog.uri.clone(),
            catalog_script_uri: catalog.script_uri.clone(),
            summary_uri: summary.uri.clone(),
            summary_script_uri: summary.script_uri.clone(),
            prefix: request.prefix.clone(),
        }
    }
}
