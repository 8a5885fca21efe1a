//! Download lifecycle against a scripted artifact source

mod support;

use futures_util::StreamExt;
use modeld::fetch::{ArtifactFetcher, ArtifactLocator, FetchRequest, FetchStatus, ProgressEvent};
use modeld::registry::{MemoryStore, ModelRegistry};
use modeld::AgentError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::{ScriptedSource, CHUNK};
use tempfile::TempDir;

fn fetcher(source: Arc<ScriptedSource>) -> (ArtifactFetcher, Arc<ModelRegistry>) {
    let registry = Arc::new(ModelRegistry::open(Arc::new(MemoryStore::new())).unwrap());
    let fetcher = ArtifactFetcher::new(source, Arc::clone(&registry), Duration::from_millis(20));
    (fetcher, registry)
}

fn terminal_count(events: &[ProgressEvent]) -> usize {
    events.iter().filter(|e| e.status.is_terminal()).count()
}

#[tokio::test]
async fn test_stream_completes_and_registers() {
    let weights = vec![7u8; 1024];
    let source = Arc::new(ScriptedSource::new(
        &[("tiny.Q4_K_M.gguf", &weights[..]), ("tokenizer.json", &b"{}"[..])],
        Duration::from_millis(2),
    ));
    let (fetcher, registry) = fetcher(source);
    let dir = TempDir::new().unwrap();

    let request = FetchRequest::new(ArtifactLocator::new("acme/Tiny-GGUF", "tiny.Q4_K_M.gguf"), dir.path());
    let events: Vec<ProgressEvent> = fetcher.fetch_stream(request).await.unwrap().collect().await;

    assert_eq!(events.first().unwrap().status, FetchStatus::Downloading);
    assert_eq!(terminal_count(&events), 1);
    let last = events.last().unwrap();
    assert_eq!(last.status, FetchStatus::Complete);
    assert_eq!(last.progress, 100.0);

    let record = registry.get("tiny.q4_k_m").expect("registered under the default id");
    assert_eq!(record.name, "Tiny-GGUF");
    assert_eq!(record.provider.as_deref(), Some("huggingface"));
    let artifact = record.artifact_path().unwrap();
    assert_eq!(std::fs::read(&artifact).unwrap(), weights);
    assert!(artifact.parent().unwrap().join("tokenizer.json").exists());
    assert!(fetcher.in_flight().is_empty());
}

#[tokio::test]
async fn test_cancel_ends_with_single_cancelled_event() {
    let weights = vec![1u8; CHUNK * 200];
    let source = Arc::new(ScriptedSource::new(
        &[("big.gguf", &weights[..])],
        Duration::from_millis(10),
    ));
    let (fetcher, registry) = fetcher(source);
    let dir = TempDir::new().unwrap();

    let request = FetchRequest::new(ArtifactLocator::new("acme/Big-GGUF", "big.gguf"), dir.path())
        .with_model_id("big");
    let mut stream = fetcher.fetch_stream(request).await.unwrap();

    let first = stream.next().await.unwrap();
    assert_eq!(first.status, FetchStatus::Downloading);
    assert!(fetcher.cancel("big"));

    let mut events = vec![first];
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last().unwrap().status, FetchStatus::Cancelled);
    assert!(registry.get("big").is_none());
    assert!(!fetcher.cancel("big"));

    // the partial file stays for a later resume
    let part = dir.path().join("big").join("big.gguf.part");
    let kept = std::fs::metadata(&part).map(|m| m.len()).unwrap_or(0);
    assert!(kept < weights.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_racing_completion_reports_registry_state() {
    let weights = vec![3u8; CHUNK * 4];
    let source = Arc::new(ScriptedSource::new(&[("quick.gguf", &weights[..])], Duration::ZERO));
    let (fetcher, registry) = fetcher(source);
    let dir = TempDir::new().unwrap();

    for round in 0..10 {
        let id = format!("quick-{}", round);
        let request = FetchRequest::new(ArtifactLocator::new("acme/Quick-GGUF", "quick.gguf"), dir.path())
            .with_model_id(&id);
        let stream = fetcher.fetch_stream(request).await.unwrap();
        fetcher.cancel(&id);

        let events: Vec<ProgressEvent> = stream.collect().await;
        assert_eq!(terminal_count(&events), 1, "round {}", round);
        match events.last().unwrap().status {
            FetchStatus::Complete => assert!(registry.contains(&id), "round {}", round),
            FetchStatus::Cancelled => assert!(!registry.contains(&id), "round {}", round),
            other => panic!("unexpected terminal status {:?}", other),
        }
        assert!(fetcher.in_flight().is_empty());
    }
}

#[tokio::test]
async fn test_second_fetch_of_same_id_is_rejected() {
    let weights = vec![2u8; CHUNK * 100];
    let source = Arc::new(ScriptedSource::new(
        &[("slow.gguf", &weights[..])],
        Duration::from_millis(10),
    ));
    let (fetcher, _registry) = fetcher(source);
    let dir = TempDir::new().unwrap();
    let request = || {
        FetchRequest::new(ArtifactLocator::new("acme/Slow-GGUF", "slow.gguf"), dir.path())
            .with_model_id("slow")
    };

    let mut stream = fetcher.fetch_stream(request()).await.unwrap();
    let err = fetcher.fetch_stream(request()).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidState(_)));
    assert_eq!(fetcher.in_flight(), vec!["slow".to_string()]);

    fetcher.cancel("slow");
    while stream.next().await.is_some() {}

    // the id is free again once the terminal event has been delivered
    assert!(fetcher.in_flight().is_empty());
}

#[tokio::test]
async fn test_partial_download_resumes() {
    let weights: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let source = Arc::new(ScriptedSource::new(&[("r.gguf", &weights[..])], Duration::ZERO));
    let (fetcher, _registry) = fetcher(source.clone());
    let dir = TempDir::new().unwrap();

    let model_dir = dir.path().join("resumed");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("r.gguf.part"), &weights[..400]).unwrap();

    let request = FetchRequest::new(ArtifactLocator::new("acme/R-GGUF", "r.gguf"), dir.path())
        .with_model_id("resumed");
    let record = fetcher.fetch(request).await.unwrap();

    assert_eq!(std::fs::read(record.artifact_path().unwrap()).unwrap(), weights);
    assert!(!model_dir.join("r.gguf.part").exists());
}

#[tokio::test]
async fn test_existing_artifact_is_not_downloaded_again() {
    let source = Arc::new(ScriptedSource::new(&[("done.gguf", &b"GGUF"[..])], Duration::ZERO));
    let (fetcher, registry) = fetcher(source.clone());
    let dir = TempDir::new().unwrap();

    let model_dir = dir.path().join("done");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("done.gguf"), b"GGUF").unwrap();

    let request = FetchRequest::new(ArtifactLocator::new("acme/Done-GGUF", "done.gguf"), dir.path());
    fetcher.fetch(request).await.unwrap();

    assert_eq!(source.downloads.load(Ordering::SeqCst), 0);
    assert!(registry.contains("done"));
}

#[tokio::test]
async fn test_repository_locator_needs_a_single_gguf() {
    let source = Arc::new(ScriptedSource::new(
        &[("a.Q4.gguf", &b"a"[..]), ("a.Q8.gguf", &b"b"[..]), ("README.md", &b"c"[..])],
        Duration::ZERO,
    ));
    let (fetcher, _registry) = fetcher(source);
    let dir = TempDir::new().unwrap();

    let locator = ArtifactLocator::parse("acme/A-GGUF").unwrap();
    let err = fetcher
        .fetch(FetchRequest::new(locator, dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidLocator(ref msg) if msg.contains("a.Q4.gguf")));
}

#[tokio::test]
async fn test_missing_file_reports_error_event() {
    let source = Arc::new(ScriptedSource::new(&[], Duration::ZERO));
    let (fetcher, registry) = fetcher(source);
    let dir = TempDir::new().unwrap();

    let request = FetchRequest::new(ArtifactLocator::new("acme/None", "none.gguf"), dir.path());
    let events: Vec<ProgressEvent> = fetcher.fetch_stream(request).await.unwrap().collect().await;

    assert_eq!(terminal_count(&events), 1);
    let last = events.last().unwrap();
    assert_eq!(last.status, FetchStatus::Error);
    assert!(last.error.is_some());
    assert!(registry.list().is_empty());
}
