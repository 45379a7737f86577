use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

use autodidact::config::{parse_config, Config};
use autodidact::generation::{
    GenerationBackend, GenerationError, GenerationRequest, MockBackend, ModelInfo, MOCK_SUMMARY,
};
use autodidact::server::run_server_with_backend;

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn test_config(tmp: &TempDir, port: u16) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"

[generation]
provider = "mock"
"#,
        tmp.path().join("data/api.sqlite").display(),
        port
    ))
    .unwrap()
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(backend: Arc<dyn GenerationBackend>) -> Self {
        let port = find_free_port();
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, port);
        tokio::spawn(async move {
            run_server_with_backend(&cfg, backend).await.unwrap();
        });
        wait_for_server(port).await;
        Self {
            _tmp: tmp,
            base: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
        }
    }

    async fn mock() -> Self {
        Self::start(Arc::new(MockBackend)).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn patch(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .patch(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn generate(&self, prompt: &str) -> Value {
        let (status, topic) = self
            .post("/topics/generate", json!({ "prompt": prompt }))
            .await;
        assert_eq!(status, StatusCode::OK, "{topic}");
        topic
    }
}

fn id(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

/// Returns a syllabus whose nested node has no title.
struct UntitledBackend;

#[async_trait]
impl GenerationBackend for UntitledBackend {
    fn name(&self) -> &str {
        "untitled"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        Ok(Vec::new())
    }

    async fn complete(
        &self,
        _request: &GenerationRequest<'_>,
        _model: Option<&str>,
    ) -> Result<String, GenerationError> {
        Ok(r#"{"title": "Root", "subtopics": [{"description": "missing"}]}"#.to_string())
    }
}

/// Minimal single-page PDF with the text "shutter speed basics".
fn minimal_pdf() -> Vec<u8> {
    let content = b"BT /F1 12 Tf 100 700 Td (shutter speed basics) Tj ET";
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(format!("4 0 obj << /Length {} >> stream\n", content.len()).as_bytes());
    out.extend_from_slice(content);
    out.extend_from_slice(b"\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

async fn pdf_upload(server: &TestServer, topic_id: &str, bytes: Vec<u8>) -> (StatusCode, Value) {
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name("notes.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let form = reqwest::multipart::Form::new()
        .text("topic_id", topic_id.to_string())
        .part("file", part);
    let resp = server
        .client
        .post(server.url("/resources/upload/pdf"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_banner() {
    let server = TestServer::mock().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    let (_, banner) = server.get("/").await;
    assert_eq!(banner["message"], "Autodidact API is running");
}

#[tokio::test]
async fn test_generate_returns_root_and_builds_tree() {
    let server = TestServer::mock().await;
    let root = server.generate("Astronomy").await;
    assert_eq!(root["title"], "Astronomy");
    assert_eq!(root["order_index"], 0);
    assert!(root["parent_id"].is_null());
    assert_eq!(root["status"], "pending");

    let root_id = id(&root);
    let (_, kids) = server.get(&format!("/topics/{}/children", root_id)).await;
    let titles: Vec<_> = kids
        .as_array()
        .unwrap()
        .iter()
        .map(|k| (k["title"].as_str().unwrap(), k["order_index"].as_i64().unwrap()))
        .collect();
    assert_eq!(titles, [("Fundamentals", 0), ("Advanced Application", 1)]);

    let (_, tree) = server.get(&format!("/topics/{}/tree", root_id)).await;
    assert_eq!(tree["title"], "Astronomy");
    assert_eq!(tree["children"][0]["children"][1]["title"], "Core Theory");

    let (_, all) = server.get("/topics/").await;
    assert_eq!(all.as_array().unwrap().len(), 6);

    let (status, child) = server
        .post(
            "/topics/generate",
            json!({ "prompt": "Telescopes", "parent_id": root_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(child["parent_id"], root_id.as_str());
    assert_eq!(child["order_index"], 2);
}

#[tokio::test]
async fn test_malformed_generation_is_server_error() {
    let server = TestServer::start(Arc::new(UntitledBackend)).await;
    let (status, body) = server
        .post("/topics/generate", json!({ "prompt": "Anything" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("title"));

    let (_, all) = server.get("/topics/").await;
    assert!(all.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let server = TestServer::mock().await;
    let (status, body) = server.get("/topics/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Topic not found: nope");

    let (status, _) = server.post("/topics/nope/elaborate", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server.get("/activities/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server
        .post("/concepts/generate", json!({ "topic_id": "nope" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_elaborate_without_body_appends() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Drawing").await);

    let resp = server
        .client
        .post(server.url(&format!("/topics/{}/elaborate", root_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let topic: Value = resp.json().await.unwrap();
    assert!(topic["description"]
        .as_str()
        .unwrap()
        .starts_with("Mock explanation"));

    let (status, _) = server
        .post(
            &format!("/topics/{}/elaborate", root_id),
            json!({ "instruction": "More on shading" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, kids) = server.get(&format!("/topics/{}/children", root_id)).await;
    let indices: Vec<_> = kids
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k["order_index"].as_i64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    let (_, resources) = server.get(&format!("/resources/topic/{}", root_id)).await;
    assert_eq!(resources.as_array().unwrap().len(), 2);
    assert_eq!(resources[0]["type"], "url");
    assert_eq!(resources[0]["content_summary"], "Recommended: Drawing overview");

    let (_, concepts) = server
        .get(&format!("/concepts?topic_id={}", root_id))
        .await;
    assert_eq!(concepts.as_array().unwrap().len(), 2);
    let concept_id = id(&concepts[0]);
    let (_, activities) = server
        .get(&format!("/activities?concept_id={}", concept_id))
        .await;
    assert_eq!(activities[0]["type"], "quiz");
    let content: Value = serde_json::from_str(activities[0]["content"].as_str().unwrap()).unwrap();
    assert_eq!(content["correct"], "A");
}

#[tokio::test]
async fn test_generated_concepts_and_activities() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Knitting").await);

    let (status, concepts) = server
        .post("/concepts/generate", json!({ "topic_id": root_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let indices: Vec<_> = concepts
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["order_index"].as_i64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let (_, again) = server
        .post("/concepts/generate", json!({ "topic_id": root_id }))
        .await;
    assert_eq!(again[0]["order_index"], 3);

    let concept_id = id(&concepts[0]);
    let (_, concept) = server.get(&format!("/concepts/{}", concept_id)).await;
    assert_eq!(concept["title"], "Introduction to Knitting");

    let (status, activities) = server
        .post("/activities/generate", json!({ "concept_id": concept_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<_> = activities
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["flashcard", "read", "project"]);
    assert!(activities.as_array().unwrap().iter().all(|a| a["status"] == "pending"));
}

#[tokio::test]
async fn test_manual_concept_and_activity_creation() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Origami").await);

    let (status, concept) = server
        .post(
            "/concepts",
            json!({ "topic_id": root_id, "title": "Valley fold" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(concept["order_index"], 0);
    let concept_id = id(&concept);

    let (status, body) = server
        .post(
            "/concepts",
            json!({ "topic_id": root_id, "title": "Far away", "order_index": i64::MAX }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("out of range"));

    let (status, activity) = server
        .post(
            "/activities",
            json!({
                "concept_id": concept_id,
                "type": "quiz",
                "instructions": "Which way does the paper bend?",
                "content": {"options": ["up", "down"], "correct": "down"}
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activity["content"], r#"{"correct":"down","options":["up","down"]}"#);

    let (status, body) = server
        .post(
            "/activities",
            json!({ "concept_id": concept_id, "type": "essay", "instructions": "x" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("essay"));

    let (status, _) = server
        .post("/concepts", json!({ "topic_id": root_id, "title": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_complete_activity_over_http() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Typing").await);
    let (_, concepts) = server
        .post("/concepts/generate", json!({ "topic_id": root_id }))
        .await;
    let (_, activities) = server
        .post(
            "/activities/generate",
            json!({ "concept_id": id(&concepts[0]) }),
        )
        .await;
    let path = format!("/activities/{}/complete", id(&activities[0]));

    for bad in [0, 6] {
        let (status, body) = server.patch(&path, json!({ "score": bad })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("between 1 and 5"));
    }

    let (status, done) = server.patch(&path, json!({ "score": 5 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["user_score"], 5);

    let (status, redone) = server.patch(&path, json!({ "user_score": 1 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(redone["user_score"], 1);

    let (status, _) = server
        .patch("/activities/missing/complete", json!({ "score": 3 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_topic_status_patch() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Baking").await);
    let path = format!("/topics/{}/status", root_id);

    let (status, topic) = server.patch(&path, json!({ "status": "completed" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(topic["status"], "completed");

    let (status, body) = server.patch(&path, json!({ "status": "done" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("done"));

    let (status, _) = server.patch(&path, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ask_and_models() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Sailing").await);

    let (status, body) = server
        .post(
            &format!("/topics/{}/ask", root_id),
            json!({ "question": "How do I tack?" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["answer"].as_str().unwrap().contains("Sailing"));

    let (_, models) = server.get("/topics/models").await;
    assert_eq!(models[0]["name"], "mock-model");
}

#[tokio::test]
async fn test_pdf_upload() {
    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Reading").await);

    let (status, body) = pdf_upload(&server, &root_id, b"not a pdf".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("PDF"));

    let (status, _) = pdf_upload(&server, "missing", minimal_pdf()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, resource) = pdf_upload(&server, &root_id, minimal_pdf()).await;
    if status == StatusCode::OK {
        assert_eq!(resource["type"], "pdf");
        assert_eq!(resource["path_or_url"], "notes.pdf");
        assert_eq!(resource["content_summary"], MOCK_SUMMARY);
        let (_, listed) = server.get(&format!("/resources/{}", id(&resource))).await;
        assert_eq!(listed["topic_id"], root_id.as_str());
    } else {
        // extractor could not read the fixture; must still be an ingestion error
        assert_eq!(status, StatusCode::BAD_REQUEST, "{resource}");
    }
}

#[tokio::test]
async fn test_url_ingestion() {
    use axum::{response::Html, routing::get, Router};

    let page_port = find_free_port();
    let page = Router::new().route(
        "/article",
        get(|| async {
            Html("<html><head><style>p{}</style></head><body><h1>Tides</h1><p>The moon pulls the sea.</p></body></html>")
        }),
    );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", page_port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, page).await.unwrap();
    });

    let server = TestServer::mock().await;
    let root_id = id(&server.generate("Oceans").await);

    let url = format!("http://127.0.0.1:{}/article", page_port);
    let (status, resource) = server
        .post("/resources/add/url", json!({ "topic_id": root_id, "url": url }))
        .await;
    assert_eq!(status, StatusCode::OK, "{resource}");
    assert_eq!(resource["type"], "url");
    assert_eq!(resource["raw_content"], "Tides\nThe moon pulls the sea.");
    assert_eq!(resource["content_summary"], MOCK_SUMMARY);

    let missing = format!("http://127.0.0.1:{}/missing", page_port);
    let (status, body) = server
        .post("/resources/add/url", json!({ "topic_id": root_id, "url": missing }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("404"));

    let (status, _) = server
        .post(
            "/resources/add/url",
            json!({ "topic_id": root_id, "url": "ftp://example.com/x" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notes_and_links() {
    let server = TestServer::mock().await;
    let a = id(&server.generate("Algebra").await);
    let b = id(&server.generate("Geometry").await);

    let (status, note) = server
        .post("/notes", json!({ "topic_id": a, "content": "Revisit factoring." }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(note["topic_id"], a.as_str());
    let (_, notes) = server.get(&format!("/notes/topic/{}", a)).await;
    assert_eq!(notes[0]["content"], "Revisit factoring.");

    let (status, _) = server.post("/notes", json!({ "content": "orphan" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, link) = server
        .post(
            "/links",
            json!({ "source_id": a, "target_id": b, "type": "prerequisite" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(link["type"], "prerequisite");

    let (_, from_b) = server.get(&format!("/links/topic/{}", b)).await;
    assert_eq!(from_b.as_array().unwrap().len(), 1);
    assert_eq!(from_b[0]["source_id"], a.as_str());

    let (status, _) = server
        .post(
            "/links",
            json!({ "source_id": a, "target_id": b, "type": "sibling" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = server
        .post(
            "/links",
            json!({ "source_id": a, "target_id": "missing", "type": "related" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
