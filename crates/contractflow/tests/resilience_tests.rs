//! Retries, rate limiting, cancellation, concurrency and degraded storage
//! across whole jobs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use contractflow::client::{ApiClient, ClientConfig};
use contractflow::processor::Processors;
use contractflow::router::ModelRouter;
use contractflow::validation::ContractValidator;
use contractflow::worker::{JobInput, WorkerPool};
use contractflow::{Config, LlmExtractor, MemoryStore, Pipeline, PipelineParts, TransportError};

use common::transport::{reply_for, ANTHROPIC_HOST, DEEPSEEK_HOST};
use common::{
    sample_pdf, sample_png, ConfigBuilder, ScriptedTransport, TestHarness, COMPLETE_RECORD,
    CONTRACT_XML,
};

fn lease_pdf() -> Vec<u8> {
    sample_pdf(&["This Lease Agreement is made between Acme GmbH and Beta Ltd."])
}

/// The default backend never connects; every other backend answers.
fn flaky_default() -> Arc<ScriptedTransport> {
    ScriptedTransport::new(|host, _| {
        if host == DEEPSEEK_HOST {
            Err(TransportError::Connect("connection refused".into()))
        } else {
            Ok(reply_for(host, COMPLETE_RECORD))
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_backoff_exhausted_before_fallback() {
    let harness = TestHarness::with_config(ConfigBuilder::new().retries(3, 1000), flaky_default());

    let started = Instant::now();
    let result = harness.process("lease.pdf", lease_pdf()).await;

    assert!(result.success, "{:?}", result.error);
    // 1 + 2 + 4 seconds of backoff on the default worker.
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert_eq!(
        harness.transport.hosts(),
        vec![
            DEEPSEEK_HOST,
            DEEPSEEK_HOST,
            DEEPSEEK_HOST,
            DEEPSEEK_HOST,
            ANTHROPIC_HOST
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spans_jobs() {
    let harness = TestHarness::with_config(
        ConfigBuilder::new().rate_limit(2, 1.0),
        ScriptedTransport::always(COMPLETE_RECORD),
    );

    for _ in 0..4 {
        let result = harness.process("lease.pdf", lease_pdf()).await;
        assert!(result.success, "{:?}", result.error);
    }

    let sent = harness.transport.sent_at();
    assert_eq!(sent.len(), 4);
    let first = sent[0];
    assert!(sent[1].duration_since(first) < Duration::from_millis(100));
    assert!(sent[2].duration_since(first) >= Duration::from_secs(1));
    assert!(sent[3].duration_since(first) >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_job() {
    let harness = TestHarness::with_config(ConfigBuilder::new().retries(3, 1000), flaky_default());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let result = harness
        .pipeline()
        .process_document(JobInput::new("doc", "lease.pdf", lease_pdf()), &cancel)
        .await;
    canceller.await.unwrap();

    assert!(!result.success);
    assert!(started.elapsed() < Duration::from_secs(7));
    assert!(result.error.as_deref().unwrap().contains("cancelled"));
    assert_eq!(result.stages.last().unwrap().stage.as_str(), "entity_extraction");
    assert!(harness
        .transport
        .hosts()
        .iter()
        .all(|host| host == DEEPSEEK_HOST));

    let job = harness.store.find_job(&result.job_id).unwrap().unwrap();
    assert_eq!(job.status, "failed");
}

#[tokio::test]
async fn test_cancelled_before_start_runs_no_stage() {
    let harness = TestHarness::new(ScriptedTransport::always(COMPLETE_RECORD));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = harness
        .pipeline()
        .process_document(JobInput::new("doc", "supply.xml", CONTRACT_XML.into()), &cancel)
        .await;

    assert!(!result.success);
    assert!(result.stages.is_empty());
    assert!(harness.logged_stages(&result.job_id).is_empty());
    assert!(result
        .error
        .unwrap()
        .contains("Job cancelled before stage 'classification'"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_keeps_jobs_apart() {
    let harness = TestHarness::with_config(
        ConfigBuilder::new().worker_count(3),
        ScriptedTransport::always(COMPLETE_RECORD),
    );
    let mut pool = WorkerPool::new(harness.pipeline(), harness.config.worker_count);

    let documents: Vec<(&str, Vec<u8>, usize)> = vec![
        ("a.xml", CONTRACT_XML.as_bytes().to_vec(), 4),
        ("b.pdf", lease_pdf(), 5),
        ("c.png", sample_png(), 6),
        ("d.xml", CONTRACT_XML.as_bytes().to_vec(), 4),
        ("e.pdf", lease_pdf(), 5),
        ("f.png", sample_png(), 6),
    ];
    for (name, bytes, _) in &documents {
        pool.submit(JobInput::new(*name, *name, bytes.clone()))
            .await
            .unwrap();
    }

    let mut results = Vec::new();
    for _ in 0..documents.len() {
        results.push(pool.recv_result().await.unwrap());
    }
    pool.shutdown();
    pool.wait().await;

    assert!(results.iter().all(|r| r.success), "{:?}", results);
    for result in &results {
        let job = harness.store.find_job(&result.job_id).unwrap().unwrap();
        let expected = documents
            .iter()
            .find(|(name, _, _)| *name == job.document_id)
            .map(|(_, _, stages)| *stages)
            .unwrap();
        assert_eq!(harness.logged_stages(&result.job_id).len(), expected);
        assert_eq!(result.stages.len(), expected);
    }

    let mut ids: Vec<_> = results.iter().map(|r| r.job_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), documents.len());
}

fn memory_pipeline(
    config: &Config,
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryStore>,
) -> Pipeline {
    let router = Arc::new(ModelRouter::from_config(config));
    let client = Arc::new(ApiClient::with_transport(
        ClientConfig::from_settings(&config.client),
        transport,
    ));
    let parts = PipelineParts {
        processors: Processors::from_settings(&config.pipeline).unwrap(),
        extractor: Arc::new(LlmExtractor::new(
            Arc::clone(&router),
            client,
            &config.backends,
            100,
        )),
        validator: Arc::new(ContractValidator::new()),
        audit: store.clone(),
        records: store,
        router,
    };
    Pipeline::new(parts, config.pipeline.clone(), false)
}

#[tokio::test]
async fn test_job_row_outage_rejects_job() {
    let config = ConfigBuilder::new().build();
    let transport = ScriptedTransport::always(COMPLETE_RECORD);
    let store = Arc::new(MemoryStore::new());
    store.fail_audit_writes(true);
    let pipeline = memory_pipeline(&config, transport.clone(), store.clone());

    let result = pipeline
        .process_document(
            JobInput::new("doc", "lease.pdf", lease_pdf()),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("Audit trail write failed (create job)"));
    assert!(result.stages.is_empty());
    assert!(result.record_id.is_none());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_stage_log_outage_stops_job() {
    let config = ConfigBuilder::new().build();
    let transport = ScriptedTransport::always(COMPLETE_RECORD);
    let store = Arc::new(MemoryStore::new());
    store.fail_stage_writes(true);
    let pipeline = memory_pipeline(&config, transport.clone(), store.clone());

    let result = pipeline
        .process_document(
            JobInput::new("doc", "lease.pdf", lease_pdf()),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert!(result.error.as_ref().unwrap().contains("append stage log"));
    assert_eq!(result.stage_names(), vec!["classification"]);
    assert_eq!(transport.calls(), 0);
    let job = store.job(&result.job_id).unwrap();
    assert_eq!(job.status.as_str(), "failed");
    assert!(job.record_id.is_none());
}

#[tokio::test]
async fn test_record_store_outage_fails_storage_stage() {
    let config = ConfigBuilder::new().build();
    let store = Arc::new(MemoryStore::new());
    store.fail_record_saves(true);
    let pipeline = memory_pipeline(
        &config,
        ScriptedTransport::always(COMPLETE_RECORD),
        store.clone(),
    );

    let result = pipeline
        .process_document(
            JobInput::new("doc", "supply.xml", CONTRACT_XML.into()),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    let last = result.stages.last().unwrap();
    assert_eq!(last.stage.as_str(), "storage");
    assert_eq!(last.status.as_str(), "failed");
    assert_eq!(store.stages(&result.job_id).len(), 4);
}
