//! End-to-end workflow tests over test implementations of every seam:
//! in-memory store, fake sandboxes, scripted provider, memory journal.

use cataloger_agent::{AgentConfig, AgentError};
use cataloger_model::{
    ContentPart, Provider, ProviderError, ProviderRequest, ProviderResponse, StopReason,
    TokenUsage,
};
use cataloger_sandbox::test_utils::FakeSandboxFactory;
use cataloger_sandbox::{SandboxError, SandboxPool};
use cataloger_store::{CatalogStore, MemoryStore, StoreCredentials};
use cataloger_workflow::{
    CatalogWorkflow, Journal, MemoryJournal, RunRequest, WorkflowError, WorkflowPrompts,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// -- Scripted provider --

struct MockProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl MockProvider {
    fn new(responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for MockProvider {
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl std::future::Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        self.requests.lock().unwrap().push(request);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockProvider: no more responses queued");
        async move { Ok(response) }
    }
}

fn execute_code(code: &str) -> ProviderResponse {
    ProviderResponse {
        content: vec![ContentPart::ToolUse {
            id: "tu_exec".into(),
            name: "execute_code".into(),
            input: json!({ "code": code }),
        }],
        stop_reason: StopReason::ToolUse,
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 15,
        },
        model: "mock-model".into(),
    }
}

fn submit(html: &str) -> ProviderResponse {
    ProviderResponse {
        content: vec![ContentPart::ToolUse {
            id: "tu_submit".into(),
            name: "submit_artifact".into(),
            input: json!({ "content": html }),
        }],
        stop_reason: StopReason::ToolUse,
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
        },
        model: "mock-model".into(),
    }
}

fn end_turn() -> ProviderResponse {
    ProviderResponse {
        content: vec![ContentPart::Text {
            text: "I think I'm finished.".into(),
        }],
        stop_reason: StopReason::EndTurn,
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        },
        model: "mock-model".into(),
    }
}

// -- Wiring --

struct Harness {
    workflow: CatalogWorkflow<MemoryStore, MockProvider>,
    provider: Arc<MockProvider>,
    factory: Arc<FakeSandboxFactory>,
    pool: Arc<SandboxPool>,
    store: Arc<CatalogStore<MemoryStore>>,
}

fn harness(responses: Vec<ProviderResponse>) -> Harness {
    harness_with(
        responses,
        Arc::new(CatalogStore::new(
            MemoryStore::new("catalogs"),
            StoreCredentials::default(),
        )),
        Arc::new(MemoryJournal::new()),
        1,
    )
}

fn harness_with(
    responses: Vec<ProviderResponse>,
    store: Arc<CatalogStore<MemoryStore>>,
    journal: Arc<dyn Journal>,
    pool_size: usize,
) -> Harness {
    let provider = MockProvider::new(responses);
    let factory = FakeSandboxFactory::new();
    let pool = Arc::new(SandboxPool::new(factory.clone(), pool_size));
    let workflow = CatalogWorkflow::new(
        pool.clone(),
        store.clone(),
        provider.clone(),
        journal,
        WorkflowPrompts {
            cataloging: "Explore the tables and produce a catalog.".into(),
            summary: "Summarize trends across recent catalogs.".into(),
        },
        AgentConfig::default(),
    );
    Harness {
        workflow,
        provider,
        factory,
        pool,
        store,
    }
}

fn request(prefix: &str) -> RunRequest {
    RunRequest {
        db_connection_string: "postgres://ro@host/db".into(),
        tables: vec!["orders".into(), "users".into()],
        prefix: prefix.into(),
        invocation_key: None,
    }
}

// -- Tests --

#[tokio::test(start_paused = true)]
async fn happy_path_places_four_artifacts() {
    let h = harness(vec![
        execute_code("print(len(tables))"),
        submit("<html>catalog</html>"),
        execute_code("print('trend')"),
        submit("<html>summary</html>"),
    ]);

    let receipt = h.workflow.run(&request("cust/db")).await.unwrap();
    assert_eq!(receipt.prefix, "cust/db");
    let ts = &receipt.timestamp;
    assert_eq!(
        receipt.catalog_uri,
        format!("s3://catalogs/cust/db/{ts}/catalog.html")
    );
    assert_eq!(
        receipt.summary_uri,
        format!("s3://catalogs/cust/db/{ts}/recent_summary.html")
    );

    // Exactly the four run objects exist under the timestamp.
    let keys = h.store.inner().keys();
    assert_eq!(
        keys,
        vec![
            format!("cust/db/{ts}/catalog.html"),
            format!("cust/db/{ts}/catalog_script.py"),
            format!("cust/db/{ts}/recent_summary.html"),
            format!("cust/db/{ts}/summary_script.py"),
        ]
    );

    // Artifacts round-trip verbatim.
    let catalog = h.store.read_html("cust/db", ts, "catalog.html").await.unwrap();
    assert_eq!(catalog, "<html>catalog</html>");

    // Each replay script records its agent's single code block; the fake
    // kernel answered with empty output.
    let script = h
        .store
        .read_script("cust/db", ts, "catalog_script.py")
        .await
        .unwrap()
        .unwrap();
    assert!(script.contains("# === Code Block 1 ==="));
    assert!(script.contains("print(len(tables))"));
    assert!(script.contains("# (no output)"));

    let summary_script = h
        .store
        .read_script("cust/db", ts, "summary_script.py")
        .await
        .unwrap()
        .unwrap();
    assert!(summary_script.contains("print('trend')"));
    assert!(!summary_script.contains("print(len(tables))"));

    // One sandbox served both agents and went back to the idle set.
    assert_eq!(h.factory.create_count(), 1);
    assert_eq!(h.pool.idle_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn first_run_omits_previous_context() {
    let h = harness(vec![submit("<html>c</html>"), submit("<html>s</html>")]);
    h.workflow.run(&request("cust/db")).await.unwrap();

    let requests = h.provider.requests();
    let ContentPart::Text { text } = &requests[0].messages[0].content[0] else {
        panic!("expected text opening message");
    };
    assert!(text.contains("\"tables\""));
    assert!(!text.contains("previous_context"));
}

#[tokio::test(start_paused = true)]
async fn second_run_context_embeds_prior_catalog_and_empty_comments_notice() {
    let store = Arc::new(CatalogStore::new(
        MemoryStore::new("catalogs"),
        StoreCredentials::default(),
    ));
    // A prior run, safely older than anything now_timestamp can produce.
    let old_ts = "2020-01-01T00:00:00Z";
    store
        .write_html("cust/db", old_ts, "catalog.html", "<b>prior catalog body</b>")
        .await
        .unwrap();
    store
        .write_html("cust/db", old_ts, "recent_summary.html", "<i>prior summary</i>")
        .await
        .unwrap();

    let h = harness_with(
        vec![submit("<html>c</html>"), submit("<html>s</html>")],
        store,
        Arc::new(MemoryJournal::new()),
        1,
    );
    h.workflow.run(&request("cust/db")).await.unwrap();

    let requests = h.provider.requests();
    let ContentPart::Text { text } = &requests[0].messages[0].content[0] else {
        panic!("expected text opening message");
    };
    // The context document was tag-stripped before injection.
    assert!(text.contains("previous_context"));
    assert!(text.contains("prior catalog body"));
    assert!(!text.contains("<b>prior catalog body</b>"));
    assert!(text.contains("No comments on previous catalog."));

    // The summary agent received the run coordinates plus the same digest.
    let ContentPart::Text { text } = &requests[1].messages[0].content[0] else {
        panic!("expected text opening message");
    };
    assert!(text.contains("\"s3_prefix\": \"cust/db\""));
    assert!(text.contains("current_timestamp"));
    assert!(text.contains("prior catalog body"));
}

#[tokio::test]
async fn successive_runs_get_later_timestamps() {
    let store = Arc::new(CatalogStore::new(
        MemoryStore::new("catalogs"),
        StoreCredentials::default(),
    ));
    let journal: Arc<dyn Journal> = Arc::new(MemoryJournal::new());

    let h1 = harness_with(
        vec![submit("<html>c1</html>"), submit("<html>s1</html>")],
        store.clone(),
        journal.clone(),
        1,
    );
    let first = h1.workflow.run(&request("cust/db")).await.unwrap();

    // Timestamps have second granularity; cross the boundary.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let h2 = harness_with(
        vec![submit("<html>c2</html>"), submit("<html>s2</html>")],
        store.clone(),
        journal,
        1,
    );
    let second = h2.workflow.run(&request("cust/db")).await.unwrap();

    assert!(second.timestamp > first.timestamp);
    let timestamps = store.list_timestamps("cust/db", 10).await.unwrap();
    assert_eq!(timestamps, vec![second.timestamp.clone(), first.timestamp.clone()]);
}

#[tokio::test(start_paused = true)]
async fn failed_run_still_releases_runtime_and_leaves_no_summary() {
    let h = harness(vec![end_turn()]);

    let err = h.workflow.run(&request("cust/db")).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Agent(AgentError::EndedWithoutSubmit)
    ));

    // Released on the failure path.
    assert_eq!(h.pool.idle_count(), 1);
    // Nothing was published: the summary barrier is absent.
    assert!(h.store.inner().keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_run_is_visible_but_unpublished() {
    // Catalog phase completes; summary agent dies.
    let h = harness(vec![submit("<html>c</html>"), end_turn()]);

    let err = h.workflow.run(&request("cust/db")).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Agent(AgentError::EndedWithoutSubmit)
    ));

    let keys = h.store.inner().keys();
    assert!(keys.iter().any(|k| k.ends_with("catalog.html")));
    assert!(!keys.iter().any(|k| k.ends_with("recent_summary.html")));
}

#[tokio::test(start_paused = true)]
async fn retry_resumes_from_recorded_units() {
    let store = Arc::new(CatalogStore::new(
        MemoryStore::new("catalogs"),
        StoreCredentials::default(),
    ));
    let journal: Arc<dyn Journal> = Arc::new(MemoryJournal::new());
    let mut req = request("cust/db");
    req.invocation_key = Some("retry-1".into());

    // First attempt: catalog lands, summary fails.
    let h1 = harness_with(
        vec![submit("<html>c</html>"), end_turn()],
        store.clone(),
        journal.clone(),
        1,
    );
    h1.workflow.run(&req).await.unwrap_err();
    assert_eq!(h1.provider.requests().len(), 2);

    // Retry with the same invocation key: only the summary agent runs.
    let h2 = harness_with(
        vec![submit("<html>s</html>")],
        store.clone(),
        journal.clone(),
        1,
    );
    let receipt = h2.workflow.run(&req).await.unwrap();
    assert_eq!(h2.provider.requests().len(), 1);

    // Same run identity: the catalog from attempt one is part of it.
    let keys = store.inner().keys();
    assert!(keys.contains(&format!("cust/db/{}/catalog.html", receipt.timestamp)));
    assert!(keys.contains(&format!(
        "cust/db/{}/recent_summary.html",
        receipt.timestamp
    )));

    // A third call with the same key is served from the journal alone:
    // no model calls, no sandbox.
    let h3 = harness_with(vec![], store, journal, 1);
    let replay = h3.workflow.run(&req).await.unwrap();
    assert_eq!(replay, receipt);
    assert!(h3.provider.requests().is_empty());
    assert_eq!(h3.factory.create_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_tables_is_bad_request() {
    let h = harness(vec![]);
    let mut req = request("cust/db");
    req.tables.clear();

    let err = h.workflow.run(&req).await.unwrap_err();
    assert!(matches!(err, WorkflowError::BadRequest(_)));
}

#[tokio::test(start_paused = true)]
async fn empty_prefix_is_bad_request() {
    let h = harness(vec![]);
    let req = request("");

    let err = h.workflow.run(&req).await.unwrap_err();
    assert!(matches!(err, WorkflowError::BadRequest(_)));
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_is_terminal_for_admission() {
    let h = harness_with(
        vec![],
        Arc::new(CatalogStore::new(
            MemoryStore::new("catalogs"),
            StoreCredentials::default(),
        )),
        Arc::new(MemoryJournal::new()),
        0,
    );

    let err = h.workflow.run(&request("cust/db")).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Sandbox(SandboxError::PoolExhausted { size: 0 })
    ));
}
