//! HTTP API.
//!
//! Generation handlers always await the generator first and only then hand
//! the finished payload to the [`TreeSynchronizer`], so no request holds the
//! store's write gate across a network call.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/topics/` | All topics |
//! | `GET` | `/topics/models` | Models offered by the generation backend |
//! | `POST` | `/topics/generate` | Generate and store a syllabus tree |
//! | `GET` | `/topics/{id}` | One topic |
//! | `GET` | `/topics/{id}/children` | Direct children, by order index |
//! | `GET` | `/topics/{id}/tree` | Topic with all descendants |
//! | `POST` | `/topics/{id}/elaborate` | Generate and merge an elaboration |
//! | `POST` | `/topics/{id}/ask` | Ask the tutor a question |
//! | `PATCH` | `/topics/{id}/status` | Set `pending` / `completed` |
//! | `GET`/`POST` | `/concepts` | List by `topic_id` / create one |
//! | `POST` | `/concepts/generate` | Generate and append concepts |
//! | `GET`/`POST` | `/activities` | List by `concept_id` / create one |
//! | `POST` | `/activities/generate` | Generate and append activities |
//! | `PATCH` | `/activities/{id}/complete` | Complete with a 1-5 score |
//! | `POST` | `/resources/upload/pdf` | Multipart PDF upload |
//! | `POST` | `/resources/add/url` | Fetch and store a web page |
//! | `GET` | `/resources/topic/{id}` | Resources of a topic |
//! | `POST` | `/notes`, `/links` | Annotate and cross-reference |
//!
//! Errors use the body `{"detail": "..."}`; see [`crate::error`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::HeaderValue,
    routing::{get, patch, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use autodidact_core::models::{
    Activity, Concept, Link, LinkKind, Note, Resource, ResourceKind, Topic, TopicStatus,
    TopicTree,
};
use autodidact_core::payload::{ActivityDraft, ConceptDraft};

use crate::config::{Config, ServerConfig};
use crate::error::{AppError, Result};
use crate::generation::{create_backend, GenerationBackend, Generator, ModelInfo};
use crate::ingest;
use crate::query;
use crate::store::{NewResource, Store};
use crate::synchronizer::TreeSynchronizer;

/// Headroom for multipart framing on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    sync: TreeSynchronizer,
    generator: Generator,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(config: &Config, store: Store, generator: Generator) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ingest.fetch_timeout_secs))
            .user_agent(concat!("autodidact/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config: Arc::new(config.clone()),
            sync: TreeSynchronizer::new(store),
            generator,
            http,
        })
    }

    fn store(&self) -> &Store {
        self.sync.store()
    }

    fn pool(&self) -> &SqlitePool {
        self.store().pool()
    }
}

/// Starts the HTTP server with the backend named in `[generation]`.
///
/// Binds to `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backend = create_backend(&config.generation)?;
    run_server_with_backend(config, backend).await
}

/// Like [`run_server`], but with an explicit generation backend.
///
/// ```rust,no_run
/// use autodidact::generation::MockBackend;
/// use autodidact::server::run_server_with_backend;
/// use std::sync::Arc;
///
/// # async fn example(config: &autodidact::config::Config) -> anyhow::Result<()> {
/// run_server_with_backend(config, Arc::new(MockBackend)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_backend(
    config: &Config,
    backend: Arc<dyn GenerationBackend>,
) -> anyhow::Result<()> {
    let store = Store::open(config).await?;
    let generator = Generator::new(backend, &config.generation);
    tracing::info!(backend = generator.backend_name(), "generation backend ready");

    let state = AppState::new(config, store.clone(), generator)?;
    let app = router(state)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "autodidact server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Builds the application router.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.server)?;
    let body_limit = state.config.ingest.max_upload_bytes + MULTIPART_OVERHEAD;

    let app = Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/topics", get(handle_list_topics))
        .route("/topics/", get(handle_list_topics))
        .route("/topics/models", get(handle_list_models))
        .route("/topics/generate", post(handle_generate_topic))
        .route("/topics/{id}", get(handle_get_topic))
        .route("/topics/{id}/children", get(handle_topic_children))
        .route("/topics/{id}/tree", get(handle_topic_tree))
        .route("/topics/{id}/elaborate", post(handle_elaborate))
        .route("/topics/{id}/ask", post(handle_ask))
        .route("/topics/{id}/status", patch(handle_set_status))
        .route(
            "/concepts",
            get(handle_list_concepts).post(handle_create_concept),
        )
        .route(
            "/concepts/",
            get(handle_list_concepts).post(handle_create_concept),
        )
        .route("/concepts/generate", post(handle_generate_concepts))
        .route("/concepts/{id}", get(handle_get_concept))
        .route(
            "/activities",
            get(handle_list_activities).post(handle_create_activity),
        )
        .route(
            "/activities/",
            get(handle_list_activities).post(handle_create_activity),
        )
        .route("/activities/generate", post(handle_generate_activities))
        .route("/activities/{id}", get(handle_get_activity))
        .route("/activities/{id}/complete", patch(handle_complete_activity))
        .route("/resources/upload/pdf", post(handle_upload_pdf))
        .route("/resources/add/url", post(handle_add_url))
        .route("/resources/topic/{id}", get(handle_topic_resources))
        .route("/resources/{id}", get(handle_get_resource))
        .route("/notes", post(handle_create_note))
        .route("/notes/topic/{id}", get(handle_topic_notes))
        .route("/notes/resource/{id}", get(handle_resource_notes))
        .route("/links", post(handle_create_link))
        .route("/links/topic/{id}", get(handle_topic_links))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Any origin when none are configured, otherwise exactly the listed ones.
fn cors_layer(config: &ServerConfig) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let origins = config
        .cors_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| anyhow::anyhow!("invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Parses a JSON body that may be absent entirely.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("invalid JSON body: {}", e)))
}

fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============ Meta ============

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Autodidact API is running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Topics ============

async fn handle_list_topics(State(state): State<AppState>) -> Result<Json<Vec<Topic>>> {
    Ok(Json(query::list_topics(state.pool()).await?))
}

/// Backend failures yield an empty list rather than an error.
async fn handle_list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    match state.generator.list_models().await {
        Ok(models) => Json(models),
        Err(e) => {
            tracing::warn!(error = %e, "failed to list models");
            Json(Vec::new())
        }
    }
}

#[derive(Deserialize)]
struct GenerateTopicRequest {
    prompt: String,
    model_name: Option<String>,
    parent_id: Option<String>,
}

async fn handle_generate_topic(
    State(state): State<AppState>,
    body: std::result::Result<Json<GenerateTopicRequest>, JsonRejection>,
) -> Result<Json<Topic>> {
    let Json(req) = body?;
    require_text(&req.prompt, "prompt")?;
    if let Some(parent_id) = &req.parent_id {
        query::get_topic(state.pool(), parent_id).await?;
    }

    let tree = state
        .generator
        .generate_tree(req.prompt.trim(), req.model_name.as_deref())
        .await?;
    let root = state
        .sync
        .materialize_tree(&tree, req.parent_id.as_deref(), None)
        .await?;
    Ok(Json(root))
}

async fn handle_get_topic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Topic>> {
    Ok(Json(query::get_topic(state.pool(), &id).await?))
}

async fn handle_topic_children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Topic>>> {
    Ok(Json(query::list_child_topics(state.pool(), &id).await?))
}

async fn handle_topic_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TopicTree>> {
    Ok(Json(query::topic_tree(state.pool(), &id).await?))
}

#[derive(Deserialize, Default)]
struct ElaborateRequest {
    #[serde(default)]
    instruction: String,
    model_name: Option<String>,
}

async fn handle_elaborate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Topic>> {
    let req: ElaborateRequest = optional_body(&body)?;
    let topic = query::get_topic(state.pool(), &id).await?;

    let elaboration = state
        .generator
        .generate_elaboration(
            &topic.title,
            topic.description.as_deref().unwrap_or(""),
            &req.instruction,
            req.model_name.as_deref(),
        )
        .await?;
    let updated = state.sync.merge_elaboration(&id, &elaboration).await?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    model_name: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>> {
    let Json(req) = body?;
    require_text(&req.question, "question")?;
    let topic = query::get_topic(state.pool(), &id).await?;

    let answer = state
        .generator
        .answer_question(
            &topic.title,
            topic.description.as_deref().unwrap_or(""),
            &req.question,
            req.model_name.as_deref(),
        )
        .await?;
    Ok(Json(AskResponse { answer }))
}

#[derive(Deserialize)]
struct StatusRequest {
    status: String,
}

async fn handle_set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Topic>> {
    let Json(req) = body?;
    let status: TopicStatus = req.status.parse()?;
    Ok(Json(state.sync.set_topic_status(&id, status).await?))
}

// ============ Concepts ============

#[derive(Deserialize)]
struct TopicFilter {
    topic_id: String,
}

async fn handle_list_concepts(
    State(state): State<AppState>,
    filter: std::result::Result<Query<TopicFilter>, QueryRejection>,
) -> Result<Json<Vec<Concept>>> {
    let Query(filter) = filter?;
    Ok(Json(query::list_concepts(state.pool(), &filter.topic_id).await?))
}

#[derive(Deserialize)]
struct CreateConceptRequest {
    topic_id: String,
    title: String,
    #[serde(default)]
    description: String,
    order_index: Option<i64>,
}

/// Appends a single concept; `order_index` is relative to the current last.
async fn handle_create_concept(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateConceptRequest>, JsonRejection>,
) -> Result<Json<Concept>> {
    let Json(req) = body?;
    require_text(&req.title, "title")?;
    let draft = ConceptDraft {
        title: req.title.trim().to_string(),
        description: req.description,
        order_index: req.order_index,
        activities: Vec::new(),
    };
    let mut created = state.sync.append_concepts(&req.topic_id, &[draft]).await?;
    created
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::Internal("concept insert returned nothing".into()))
}

#[derive(Deserialize)]
struct GenerateConceptsRequest {
    topic_id: String,
    model_name: Option<String>,
}

async fn handle_generate_concepts(
    State(state): State<AppState>,
    body: std::result::Result<Json<GenerateConceptsRequest>, JsonRejection>,
) -> Result<Json<Vec<Concept>>> {
    let Json(req) = body?;
    let topic = query::get_topic(state.pool(), &req.topic_id).await?;

    let drafts = state
        .generator
        .generate_concept_list(
            &topic.title,
            topic.description.as_deref().unwrap_or(""),
            req.model_name.as_deref(),
        )
        .await?;
    Ok(Json(state.sync.append_concepts(&topic.id, &drafts).await?))
}

async fn handle_get_concept(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Concept>> {
    Ok(Json(query::get_concept(state.pool(), &id).await?))
}

// ============ Activities ============

#[derive(Deserialize)]
struct ConceptFilter {
    concept_id: String,
}

async fn handle_list_activities(
    State(state): State<AppState>,
    filter: std::result::Result<Query<ConceptFilter>, QueryRejection>,
) -> Result<Json<Vec<Activity>>> {
    let Query(filter) = filter?;
    Ok(Json(
        query::list_activities(state.pool(), &filter.concept_id).await?,
    ))
}

/// Body: `{"concept_id", "type", "instructions", "content"}`; `content` may
/// be text or any JSON value.
async fn handle_create_activity(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Activity>> {
    let Json(body) = body?;
    let concept_id = body
        .get("concept_id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("concept_id is required".into()))?
        .to_string();
    let draft =
        ActivityDraft::from_value(&body).map_err(|e| AppError::Validation(e.to_string()))?;

    let mut created = state.sync.append_activities(&concept_id, &[draft]).await?;
    created
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::Internal("activity insert returned nothing".into()))
}

#[derive(Deserialize)]
struct GenerateActivitiesRequest {
    concept_id: String,
    model_name: Option<String>,
}

async fn handle_generate_activities(
    State(state): State<AppState>,
    body: std::result::Result<Json<GenerateActivitiesRequest>, JsonRejection>,
) -> Result<Json<Vec<Activity>>> {
    let Json(req) = body?;
    let concept = query::get_concept(state.pool(), &req.concept_id).await?;
    let topic = query::get_topic(state.pool(), &concept.topic_id).await?;
    let context = format!(
        "Topic: {}\nConcept: {}\nConcept Description: {}",
        topic.title, concept.title, concept.description
    );

    let drafts = state
        .generator
        .generate_activity_list(&concept.title, &context, req.model_name.as_deref())
        .await?;
    Ok(Json(
        state.sync.append_activities(&concept.id, &drafts).await?,
    ))
}

async fn handle_get_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Activity>> {
    Ok(Json(query::get_activity(state.pool(), &id).await?))
}

#[derive(Deserialize)]
struct CompleteRequest {
    #[serde(alias = "user_score")]
    score: i64,
}

async fn handle_complete_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: std::result::Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<Activity>> {
    let Json(req) = body?;
    Ok(Json(state.sync.complete_activity(&id, req.score).await?))
}

// ============ Resources ============

/// Multipart fields: `file` (required), `topic_id` (required), `model_name`.
async fn handle_upload_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Resource>> {
    let max_bytes = state.config.ingest.max_upload_bytes;
    let mut topic_id: Option<String> = None;
    let mut model_name: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("topic_id") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    topic_id = Some(value.trim().to_string());
                }
            }
            Some("model_name") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    model_name = Some(value.trim().to_string());
                }
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or("upload.pdf")
                    .to_string();
                let bytes = field.bytes().await?;
                if bytes.len() > max_bytes {
                    return Err(AppError::Validation(format!(
                        "file exceeds max size of {} bytes",
                        max_bytes
                    )));
                }
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let topic_id =
        topic_id.ok_or_else(|| AppError::Validation("topic_id field is required".into()))?;
    let (filename, bytes) =
        file.ok_or_else(|| AppError::Validation("file field is required".into()))?;
    query::get_topic(state.pool(), &topic_id).await?;

    let text = ingest::extract_pdf_blocking(bytes).await?;
    let summary = state
        .generator
        .generate_summary(&text, model_name.as_deref())
        .await?;

    let resource = state
        .store()
        .add_resource(NewResource {
            topic_id: Some(topic_id),
            kind: ResourceKind::Pdf,
            location: filename,
            raw_content: Some(text),
            summary: Some(summary),
        })
        .await?;
    Ok(Json(resource))
}

#[derive(Deserialize)]
struct AddUrlRequest {
    topic_id: String,
    url: String,
    model_name: Option<String>,
}

async fn handle_add_url(
    State(state): State<AppState>,
    body: std::result::Result<Json<AddUrlRequest>, JsonRejection>,
) -> Result<Json<Resource>> {
    let Json(req) = body?;
    let url = req.url.trim();
    require_text(url, "url")?;
    query::get_topic(state.pool(), &req.topic_id).await?;

    let text = ingest::extract_text_from_url(&state.http, url).await?;
    let summary = state
        .generator
        .generate_summary(&text, req.model_name.as_deref())
        .await?;

    let resource = state
        .store()
        .add_resource(NewResource {
            topic_id: Some(req.topic_id),
            kind: ResourceKind::Url,
            location: url.to_string(),
            raw_content: Some(text),
            summary: Some(summary),
        })
        .await?;
    Ok(Json(resource))
}

async fn handle_topic_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Resource>>> {
    Ok(Json(query::list_resources(state.pool(), &id).await?))
}

async fn handle_get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource>> {
    Ok(Json(query::get_resource(state.pool(), &id).await?))
}

// ============ Notes and links ============

#[derive(Deserialize)]
struct CreateNoteRequest {
    topic_id: Option<String>,
    resource_id: Option<String>,
    content: String,
}

async fn handle_create_note(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateNoteRequest>, JsonRejection>,
) -> Result<Json<Note>> {
    let Json(req) = body?;
    let note = state
        .store()
        .add_note(
            req.topic_id.as_deref(),
            req.resource_id.as_deref(),
            &req.content,
        )
        .await?;
    Ok(Json(note))
}

async fn handle_topic_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Note>>> {
    Ok(Json(query::list_notes_for_topic(state.pool(), &id).await?))
}

async fn handle_resource_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Note>>> {
    Ok(Json(query::list_notes_for_resource(state.pool(), &id).await?))
}

#[derive(Deserialize)]
struct CreateLinkRequest {
    source_id: String,
    target_id: String,
    #[serde(rename = "type", alias = "kind")]
    kind: String,
}

async fn handle_create_link(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateLinkRequest>, JsonRejection>,
) -> Result<Json<Link>> {
    let Json(req) = body?;
    let kind: LinkKind = req.kind.parse()?;
    let link = state
        .store()
        .add_link(&req.source_id, &req.target_id, kind)
        .await?;
    Ok(Json(link))
}

async fn handle_topic_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Link>>> {
    Ok(Json(query::list_links(state.pool(), &id).await?))
}
