mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use extract::{
    BatchFailure, ChatCompletionClient, Extractor, GraphStats, KnowledgeGraph, LlmTransport, MergeOptions,
    OllamaClient, RetryingTransport, merge_all,
};
use index::{DatabaseStats, GraphSink, GraphStore, Indexer, Neo4jIndexer};
use ingest::DocumentStore;
use query::{HistoryEntry, QueryResponse, QueryService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Level, info, warn};

use crate::config::{AppConfig, LlmProvider, LoggingConfig};
use crate::error::ApiError;
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    config: AppConfig,
    documents: Arc<DocumentStore>,
    extractor: Extractor,
    indexer: Indexer,
    query: QueryService,
    neo4j: Option<Arc<Neo4jIndexer>>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;
    info!(mode = ?config.mode, provider = ?config.llm.provider, "Starting knowledge graph service");

    let bind = config.server.bind.clone();
    let state = Arc::new(build_state(config).await?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(address = %bind, "Server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let level: Level = logging
        .level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", logging.level))?;
    let builder = tracing_subscriber::fmt().with_max_level(level).with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn build_transport(config: &AppConfig) -> Result<Arc<dyn LlmTransport>> {
    let llm = &config.llm;
    let timeout = config.attempt_timeout();
    let policy = config.retry.policy();

    let transport: Arc<dyn LlmTransport> = match llm.provider {
        LlmProvider::OpenAi => {
            if llm.api_key.is_none() {
                warn!("No LLM API key configured; set LLM_API_KEY");
            }
            let client = ChatCompletionClient::new(
                llm.base_url.clone(),
                llm.model.clone(),
                llm.api_key.clone(),
                timeout,
            )?;
            Arc::new(RetryingTransport::new(client, policy))
        }
        LlmProvider::Ollama => {
            let client = OllamaClient::new(llm.base_url.clone(), llm.model.clone(), timeout)?;
            Arc::new(RetryingTransport::new(client, policy))
        }
    };

    info!(
        provider = ?llm.provider,
        model = %llm.model,
        attempt_timeout_secs = timeout.as_secs(),
        "LLM transport ready"
    );
    Ok(transport)
}

async fn build_state(config: AppConfig) -> Result<AppState> {
    let transport = build_transport(&config)?;

    tokio::fs::create_dir_all(&config.storage.documents_dir)
        .await
        .context("Failed to create documents directory")?;
    let documents = Arc::new(
        DocumentStore::open(&config.storage.documents_dir)
            .await
            .context("Failed to open document store")?,
    );
    let store = Arc::new(
        GraphStore::open(&config.storage.graphs_dir)
            .await
            .context("Failed to open graph store")?,
    );

    let neo4j = if config.neo4j.enabled {
        let indexer = Neo4jIndexer::connect(&config.neo4j.uri, &config.neo4j.user, &config.neo4j.password)
            .await
            .context("Failed to connect to Neo4j")?;
        indexer.init_schema().await.context("Failed to create Neo4j indexes")?;
        Some(Arc::new(indexer))
    } else {
        info!("Neo4j disabled, graphs are stored locally only");
        None
    };

    Ok(assemble(config, transport, documents, store, neo4j))
}

fn assemble(
    config: AppConfig,
    transport: Arc<dyn LlmTransport>,
    documents: Arc<DocumentStore>,
    store: Arc<GraphStore>,
    neo4j: Option<Arc<Neo4jIndexer>>,
) -> AppState {
    let extractor = Extractor::new(transport.clone(), documents.clone(), config.extraction.clone());
    let sink = neo4j.clone().map(|n| n as Arc<dyn GraphSink>);
    let indexer = Indexer::new(store.clone(), sink);
    let query = QueryService::new(store, transport).with_history_limit(config.query.history_limit);

    AppState {
        config,
        documents,
        extractor,
        indexer,
        query,
        neo4j,
        metrics: Metrics::new(),
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/stats", get(get_stats))
        .route("/documents", get(list_documents))
        .route("/extract", post(extract_documents))
        .route("/merge", post(merge_graphs))
        .route("/graphs", get(list_graphs))
        .route("/graphs/:id", get(get_graph))
        .route("/graphs/:id/stats", get(get_graph_stats))
        .route("/query", post(run_query))
        .route("/query/history", get(query_history).delete(clear_query_history))
        .route("/cypher", post(run_cypher))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(state.clone(), track_requests)),
        )
        .with_state(state)
}

async fn track_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    state
        .metrics
        .record_request(!status.is_client_error() && !status.is_server_error());
    response
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    documents: usize,
    graphs: usize,
    neo4j: String,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let neo4j = match &state.neo4j {
        Some(db) => match db.get_stats().await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        },
        None => "disabled".to_string(),
    };

    Json(HealthResponse {
        status: "ok",
        documents: state.documents.len(),
        graphs: state.indexer.store().len(),
        neo4j,
    })
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[derive(Serialize)]
struct StatsResponse {
    documents: usize,
    graphs: usize,
    database: Option<DatabaseStats>,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let database = match &state.neo4j {
        Some(db) => Some(db.get_stats().await?),
        None => None,
    };

    Ok(Json(StatsResponse {
        documents: state.documents.len(),
        graphs: state.indexer.store().len(),
        database,
    }))
}

async fn list_documents(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.documents.ids())
}

#[derive(Default, Deserialize)]
struct ExtractRequest {
    /// Defaults to every document in the store.
    document_ids: Option<Vec<String>>,
    concurrency: Option<usize>,
    persist: Option<bool>,
}

#[derive(Serialize)]
struct ExtractedGraph {
    document_id: String,
    graph_id: String,
    entities: usize,
    relations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ExtractResponse {
    graphs: Vec<ExtractedGraph>,
    failures: Vec<BatchFailure>,
    persisted: usize,
}

async fn extract_documents(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    // A request without a JSON body extracts everything; a malformed one is rejected.
    let req = match payload {
        Ok(Json(req)) => req,
        Err(JsonRejection::MissingJsonContentType(_)) => ExtractRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let ExtractRequest {
        document_ids,
        concurrency,
        persist,
    } = req;
    let persist = persist.unwrap_or(true);
    let document_ids = document_ids.unwrap_or_else(|| state.documents.ids());
    if document_ids.is_empty() {
        return Err(ApiError::BadRequest("No documents to extract".to_string()));
    }
    let concurrency = concurrency.unwrap_or(state.config.extraction.max_concurrency);

    let timer = TimedOperation::start();
    let outcome = state.extractor.extract_batch(&document_ids, concurrency).await;
    let degraded = outcome.degraded_ids().len();
    state
        .metrics
        .record_extraction(timer.elapsed(), outcome.graphs.len(), degraded, outcome.failures.len());

    let mut entries: Vec<(&String, &KnowledgeGraph)> = outcome.graphs.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut graphs = Vec::with_capacity(entries.len());
    let mut persisted = 0;
    for (document_id, graph) in entries {
        state.metrics.record_graph(graph.entities.len(), graph.relations.len());

        if persist && !graph.is_degraded() {
            match state.indexer.index_graph(graph).await {
                Ok(_) => persisted += 1,
                Err(e) => warn!(graph_id = %graph.id, error = %e, "Failed to persist graph"),
            }
        }

        graphs.push(ExtractedGraph {
            document_id: document_id.clone(),
            graph_id: graph.id.clone(),
            entities: graph.entities.len(),
            relations: graph.relations.len(),
            error: graph.error().map(str::to_string),
        });
    }

    Ok(Json(ExtractResponse {
        graphs,
        failures: outcome.failures,
        persisted,
    }))
}

#[derive(Deserialize)]
struct MergeRequest {
    graph_ids: Vec<String>,
    merge_entities: Option<bool>,
    merge_relations: Option<bool>,
}

async fn merge_graphs(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MergeRequest>,
) -> Result<Json<GraphStats>, ApiError> {
    if req.graph_ids.is_empty() {
        return Err(ApiError::BadRequest("graph_ids must not be empty".to_string()));
    }

    let mut graphs = Vec::with_capacity(req.graph_ids.len());
    for id in &req.graph_ids {
        graphs.push(state.indexer.store().load(id).await?);
    }

    let defaults = MergeOptions::default();
    let options = MergeOptions {
        merge_entities: req.merge_entities.unwrap_or(defaults.merge_entities),
        merge_relations: req.merge_relations.unwrap_or(defaults.merge_relations),
    };
    let merged = merge_all(&graphs, options)
        .ok_or_else(|| ApiError::BadRequest("Nothing to merge".to_string()))?;

    state.indexer.index_graph(&merged).await?;
    state.metrics.record_graph(merged.entities.len(), merged.relations.len());
    info!(graph_id = %merged.id, sources = graphs.len(), "Merged graphs");
    Ok(Json(merged.stats()))
}

async fn list_graphs(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.indexer.store().list_ids())
}

async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<KnowledgeGraph>, ApiError> {
    Ok(Json(state.indexer.store().load(&id).await?))
}

async fn get_graph_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<GraphStats>, ApiError> {
    let graph = state.indexer.store().load(&id).await?;
    Ok(Json(graph.stats()))
}

#[derive(Deserialize)]
struct QueryRequest {
    /// Natural-language question, translated by the LLM.
    text: Option<String>,
    /// Cypher, run as-is.
    query: Option<String>,
    graph_ids: Option<Vec<String>>,
    max_results: Option<usize>,
}

async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let max_results = req.max_results.unwrap_or(state.config.query.default_max_results);
    let graph_ids = req.graph_ids.as_deref();
    let timer = TimedOperation::start();

    let response = match (&req.text, &req.query) {
        (Some(text), _) => state.query.query_natural_language(text, graph_ids, max_results).await?,
        (None, Some(query)) => state.query.query(query, graph_ids, max_results).await,
        (None, None) => return Err(ApiError::BadRequest("Either text or query is required".to_string())),
    };

    state.metrics.record_query(timer.elapsed());
    Ok(Json(response))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn query_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<HistoryEntry>> {
    Json(state.query.history(params.limit.unwrap_or(20)))
}

async fn clear_query_history(State(state): State<Arc<AppState>>) -> StatusCode {
    state.query.clear_history();
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct CypherRequest {
    script: String,
}

#[derive(Serialize)]
struct CypherResponse {
    executed: usize,
}

async fn run_cypher(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CypherRequest>,
) -> Result<Json<CypherResponse>, ApiError> {
    if !state.indexer.has_sink() {
        return Err(ApiError::Unavailable("Neo4j is not configured".to_string()));
    }
    let executed = state.indexer.run_script(&req.script).await?;
    Ok(Json(CypherResponse { executed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request as HttpRequest;
    use extract::{ChatRequest, ChatResponse, TransportError};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct PumpTransport;

    #[async_trait]
    impl LlmTransport for PumpTransport {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, TransportError> {
            let prompt = &request.messages[1].content;
            if prompt.contains("QUESTION:") {
                return Ok(ChatResponse::from_text("MATCH (n:equipment) RETURN n"));
            }
            Ok(ChatResponse::from_text(
                r#"{"entities": [{"id": "pump", "name": "Feed Pump", "type": "pump"},
                                 {"id": "seal", "name": "Seal", "type": "part"}],
                    "relations": [{"from": "seal", "to": "pump", "type": "PART_OF"}]}"#,
            ))
        }
    }

    struct TestApp {
        app: Router,
        _docs: tempfile::TempDir,
        _graphs: tempfile::TempDir,
    }

    async fn test_app() -> TestApp {
        let docs = tempfile::tempdir().unwrap();
        std::fs::write(docs.path().join("a.txt"), "Feed pump manual").unwrap();
        std::fs::write(docs.path().join("b.md"), "Seal replacement procedure").unwrap();
        let graphs = tempfile::tempdir().unwrap();

        let documents = Arc::new(DocumentStore::open(docs.path()).await.unwrap());
        let store = Arc::new(GraphStore::open(graphs.path()).await.unwrap());
        let state = assemble(AppConfig::default(), Arc::new(PumpTransport), documents, store, None);

        TestApp {
            app: router(Arc::new(state)),
            _docs: docs,
            _graphs: graphs,
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = HttpRequest::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_store_sizes() {
        let t = test_app().await;
        let (status, body) = call(&t.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents"], 2);
        assert_eq!(body["graphs"], 0);
        assert_eq!(body["neo4j"], "disabled");
    }

    #[tokio::test]
    async fn extract_merge_and_query() {
        let t = test_app().await;

        let (status, body) = call(&t.app, "POST", "/extract", Some(json!({"concurrency": 2}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["persisted"], 2);
        assert_eq!(body["graphs"][0]["entities"], 2);
        assert!(body["failures"].as_array().unwrap().is_empty());

        let (_, ids) = call(&t.app, "GET", "/graphs", None).await;
        let ids: Vec<String> = serde_json::from_value(ids).unwrap();
        assert_eq!(ids.len(), 2);

        let (status, stats) = call(&t.app, "POST", "/merge", Some(json!({"graph_ids": ids}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["entities"], 2);
        assert_eq!(stats["relations"], 1);

        let (_, body) = call(
            &t.app,
            "POST",
            "/query",
            Some(json!({"query": "MATCH (n:equipment) RETURN n"})),
        )
        .await;
        assert_eq!(body["count"], 3);

        let (_, body) = call(&t.app, "POST", "/query", Some(json!({"text": "which pumps?", "max_results": 1}))).await;
        assert_eq!(body["generated_query"], "MATCH (n:equipment) RETURN n");
        assert_eq!(body["count"], 1);

        let (_, history) = call(&t.app, "GET", "/query/history?limit=5", None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (status, _) = call(&t.app, "DELETE", "/query/history", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, metrics) = call(&t.app, "GET", "/metrics", None).await;
        assert_eq!(metrics["documents_extracted"], 2);
        assert_eq!(metrics["queries"], 2);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let t = test_app().await;

        let (status, body) = call(&t.app, "GET", "/graphs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));

        let (status, _) = call(&t.app, "POST", "/query", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&t.app, "POST", "/cypher", Some(json!({"script": "RETURN 1;"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = call(&t.app, "POST", "/merge", Some(json!({"graph_ids": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_extract_body_is_rejected_without_extracting() {
        let t = test_app().await;

        let (status, body) = call(&t.app, "POST", "/extract", Some(json!({"document_ids": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("document_ids"));

        let (_, ids) = call(&t.app, "GET", "/graphs", None).await;
        assert!(ids.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn extract_without_body_covers_every_document() {
        let t = test_app().await;
        let (status, body) = call(&t.app, "POST", "/extract", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["persisted"], 2);
    }
}
