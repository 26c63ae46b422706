use async_trait::async_trait;
use extract::{ChatRequest, ChatResponse, ExtractionConfig, Extractor, LlmTransport, TransportError};
use ingest::MemoryDocuments;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Replies with a one-entity graph named after the document text; panics
/// on text containing `PANIC` and errors on text containing `FAIL`.
#[derive(Default)]
struct EchoTransport {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl LlmTransport for EchoTransport {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let prompt = &request.messages[1].content;
        if prompt.contains("PANIC") {
            panic!("transport blew up");
        }
        if prompt.contains("FAIL") {
            return Err(TransportError::Status {
                status: 503,
                body: "overloaded".to_string(),
            });
        }
        let name = prompt
            .lines()
            .find(|line| line.starts_with("Machine "))
            .unwrap_or("Machine ?");
        Ok(ChatResponse::from_text(format!(
            r#"{{"entities": [{{"id": "m", "name": "{name}", "type": "machine"}}], "relations": []}}"#
        )))
    }
}

fn documents() -> MemoryDocuments {
    MemoryDocuments::new()
        .with_document("doc1", "Machine One")
        .with_document("doc2", "Machine Two PANIC")
        .with_document("doc3", "Machine Three")
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn failing_document_does_not_affect_siblings() {
    let transport = Arc::new(EchoTransport::default());
    let extractor = Extractor::new(transport, Arc::new(documents()), ExtractionConfig::default());

    let outcome = extractor.extract_batch(&ids(&["doc1", "doc2", "doc3"]), 2).await;

    assert_eq!(outcome.graphs.len(), 2);
    assert!(outcome.graphs.contains_key("doc1"));
    assert!(outcome.graphs.contains_key("doc3"));
    assert!(!outcome.graphs.contains_key("doc2"));
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].document_id, "doc2");

    let doc3 = &outcome.graphs["doc3"];
    assert_eq!(doc3.entities[0].name, "Machine Three");
}

#[tokio::test]
async fn transport_errors_are_degraded_successes() {
    let docs = MemoryDocuments::new()
        .with_document("ok", "Machine Ok")
        .with_document("busy", "Machine Busy FAIL");
    let extractor = Extractor::new(
        Arc::new(EchoTransport::default()),
        Arc::new(docs),
        ExtractionConfig::default(),
    );

    let outcome = extractor.extract_batch(&ids(&["ok", "busy"]), 3).await;
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.degraded_ids(), vec!["busy"]);
    assert!(outcome.graphs["busy"].error().unwrap().contains("503"));
}

#[tokio::test]
async fn unknown_documents_are_reported_as_failures() {
    let extractor = Extractor::new(
        Arc::new(EchoTransport::default()),
        Arc::new(documents()),
        ExtractionConfig::default(),
    );
    let outcome = extractor.extract_batch(&ids(&["doc1", "missing"]), 3).await;
    assert_eq!(outcome.graphs.len(), 1);
    assert_eq!(outcome.failures[0].document_id, "missing");
    assert!(outcome.failures[0].reason.contains("missing"));
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let docs = MemoryDocuments::new();
    let names: Vec<String> = (0..12).map(|i| format!("d{i}")).collect();
    for name in &names {
        docs.insert(name.clone(), format!("Machine {name}"));
    }
    let transport = Arc::new(EchoTransport::default());
    let extractor = Extractor::new(transport.clone(), Arc::new(docs), ExtractionConfig::default());

    let outcome = extractor.extract_batch(&names, 3).await;
    assert_eq!(outcome.graphs.len(), 12);
    assert!(transport.peak.load(Ordering::SeqCst) <= 3);

    // Out-of-range requests are clamped to a single permit.
    let transport = Arc::new(EchoTransport::default());
    let extractor = Extractor::new(transport.clone(), Arc::new(documents()), ExtractionConfig::default());
    extractor.extract_batch(&ids(&["doc1", "doc3"]), 0).await;
    assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
}
