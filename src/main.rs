mod config;
mod indexer;
mod models;
mod rag;
mod store;
mod tasks;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use config::Config;
use models::{
    CreateMessageRequest, Knowledge, Message, MessageTurnResponse, UploadAck, AUTHOR_SYSTEM,
    AUTHOR_USER,
};
use rag::completion::LlmClient;
use rag::embeddings::FastembedEmbedder;
use rag::vector_store::QdrantIndex;
use rag::RagEngine;
use store::MetadataStore;
use tasks::{schedule_ingest, RetryPolicy};

const PDF_CONTENT_TYPES: [&str; 2] = ["application/pdf", "application/x-pdf"];

struct AppState {
    store: Arc<MetadataStore>,
    rag_engine: Option<Arc<RagEngine>>,
    llm_client: Arc<LlmClient>,
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("Connecting to database: {}", config.database_url);
    tracing::info!("Connecting to Qdrant: {}", config.qdrant_url);
    tracing::info!("Connecting to LLM endpoint: {}", config.llm_url);

    let store = Arc::new(MetadataStore::new(&config.database_url).await?);
    store.init_schema().await?;

    let llm_client = Arc::new(LlmClient::new(
        config.llm_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    ));

    let rag_engine = match init_rag_engine(&config, llm_client.clone()).await {
        Ok(engine) => {
            tracing::info!("RAG engine initialized successfully");
            Some(Arc::new(engine))
        }
        Err(e) => {
            tracing::warn!("RAG engine initialization failed (continuing without RAG): {}", e);
            None
        }
    };

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        store,
        rag_engine,
        llm_client,
        config,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/knowledge/upload", post(upload_knowledge_handler))
        .route("/api/knowledge", get(list_knowledge_handler))
        .route("/api/knowledge/:id", delete(delete_knowledge_handler))
        .route(
            "/api/message",
            post(create_message_handler).get(list_messages_handler),
        )
        .route("/api/health", get(health_check))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Knowledge RAG server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn init_rag_engine(config: &Config, llm_client: Arc<LlmClient>) -> Result<RagEngine> {
    let embedder = Arc::new(FastembedEmbedder::load(&config.embedding_model_dir)?);
    let index = Arc::new(QdrantIndex::connect(
        &config.qdrant_url,
        &config.collection_name,
    )?);
    Ok(RagEngine::new(embedder, index, llm_client))
}

/// Tenant identity, injected by the upstream auth gateway.
fn tenant_id(headers: &HeaderMap) -> Result<Uuid, (StatusCode, String)> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Missing or invalid X-User-Id header".to_string(),
        ))
}

/// Accepts a PDF, stores it under the upload dir and schedules the
/// ingestion task. Responds 202 immediately; the Knowledge record only
/// appears once ingestion completes in the background.
async fn upload_knowledge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAck>), (StatusCode, String)> {
    let tenant = tenant_id(&headers)?;

    let Some(ref rag_engine) = state.rag_engine else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "RAG engine not available".to_string(),
        ));
    };

    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart body: {}", e)))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("file") => {
                let content_type = field.content_type().unwrap_or("").to_string();
                if !PDF_CONTENT_TYPES.contains(&content_type.as_str()) {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        "Please send a valid PDF file".to_string(),
                    ));
                }
                let file_name = field
                    .file_name()
                    .map(stored_file_name)
                    .unwrap_or_else(|| "upload.pdf".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("title") => {
                title = field.text().await.ok().filter(|t| !t.trim().is_empty());
            }
            _ => {}
        }
    }

    let (file_name, bytes) = file.ok_or((
        StatusCode::BAD_REQUEST,
        "Missing 'file' field".to_string(),
    ))?;
    if bytes.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Empty file".to_string()));
    }

    let title = title.unwrap_or_else(|| {
        Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone())
    });

    // Uuid prefix keeps concurrent uploads of the same file name apart.
    let stored_path = state
        .config
        .upload_dir
        .join(format!("{}_{}", Uuid::new_v4(), file_name));
    tokio::fs::write(&stored_path, &bytes).await.map_err(|e| {
        tracing::error!("Failed to persist upload: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to store uploaded file".to_string(),
        )
    })?;

    // Fire and forget; the outcome is reported through logs.
    let _ = schedule_ingest(
        rag_engine.clone(),
        state.store.clone(),
        tenant,
        stored_path,
        title,
        RetryPolicy::default(),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAck {
            detail: "Ingestion started".to_string(),
        }),
    ))
}

async fn list_knowledge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Knowledge>>, (StatusCode, String)> {
    let tenant = tenant_id(&headers)?;

    let rows = state.store.list_knowledge(tenant).await.map_err(|e| {
        tracing::error!("Failed to list knowledge: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {}", e))
    })?;

    Ok(Json(rows))
}

async fn delete_knowledge_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let tenant = tenant_id(&headers)?;

    let deleted = state
        .store
        .soft_delete_knowledge(tenant, id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete knowledge {}: {}", id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {}", e))
        })?;

    Ok(soft_delete_status(deleted))
}

/// Deletion is tenant-scoped: an id owned by another tenant reports
/// not-found rather than leaking its existence.
fn soft_delete_status(deleted: bool) -> StatusCode {
    if deleted {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Persists the user message, runs the answer pipeline and persists the
/// system reply. A pipeline failure degrades gracefully: the user
/// message survives and the error rides along in the 201 response.
async fn create_message_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageTurnResponse>), (StatusCode, String)> {
    let tenant = tenant_id(&headers)?;

    let content = request.content.trim().to_string();
    if content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message content is required".to_string()));
    }

    let user_message = state
        .store
        .create_message(tenant, &content, AUTHOR_USER)
        .await
        .map_err(|e| {
            tracing::error!("Failed to persist user message: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Storage error: {}", e))
        })?;

    match run_answer_pipeline(&state, &content, tenant).await {
        Ok(answer) => {
            let system_message = state
                .store
                .create_message(tenant, &answer, AUTHOR_SYSTEM)
                .await;

            match system_message {
                Ok(system_message) => Ok((
                    StatusCode::CREATED,
                    Json(MessageTurnResponse {
                        user_message: None,
                        system_message: Some(system_message),
                        error: None,
                    }),
                )),
                Err(e) => {
                    tracing::error!("Failed to persist system message: {}", e);
                    Ok(degraded_turn(user_message, format!("Storage error: {}", e)))
                }
            }
        }
        Err(error) => {
            tracing::error!("Answer pipeline failed: {}", error);
            Ok(degraded_turn(user_message, error))
        }
    }
}

async fn run_answer_pipeline(
    state: &AppState,
    question: &str,
    tenant: Uuid,
) -> Result<String, String> {
    let Some(ref rag_engine) = state.rag_engine else {
        return Err("RAG engine not available".to_string());
    };

    let timeout = Duration::from_secs(state.config.answer_timeout_secs);
    match tokio::time::timeout(timeout, rag_engine.answer(question, tenant)).await {
        Ok(Ok(answer)) => Ok(answer),
        Ok(Err(e)) => Err(format!("RAG query failed: {}", e)),
        Err(_) => Err(format!("RAG query timed out after {}s", timeout.as_secs())),
    }
}

fn degraded_turn(
    user_message: Message,
    error: String,
) -> (StatusCode, Json<MessageTurnResponse>) {
    (
        StatusCode::CREATED,
        Json(MessageTurnResponse {
            user_message: Some(user_message),
            system_message: None,
            error: Some(error),
        }),
    )
}

async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    let tenant = tenant_id(&headers)?;

    let rows = state.store.list_messages(tenant).await.map_err(|e| {
        tracing::error!("Failed to list messages: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {}", e))
    })?;

    Ok(Json(rows))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let llm_healthy = state.llm_client.health_check().await.unwrap_or(false);

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "llm": llm_healthy,
            "rag": state.rag_engine.is_some(),
        }
    }))
}

fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload.pdf".to_string())
}

/// The content type is validated at upload, but ingestion detects the
/// format from the stored file's extension; force `.pdf` so a client
/// name without the suffix cannot fail ingestion later.
fn stored_file_name(original: &str) -> String {
    let name = sanitize_file_name(original);
    match Path::new(&name).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => name,
        _ => format!("{}.pdf", name),
    }
}
