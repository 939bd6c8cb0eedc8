//! Backend de análisis simulado para los tests: un servidor axum en
//! `127.0.0.1:0` con comportamiento configurable por endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Ok,
    Status(u16),
    /// JSON válido pero sin los campos esperados.
    Malformed,
    /// JSON bien formado con valores fuera de rango.
    OutOfContract,
    Delay(Duration),
}

#[derive(Default)]
struct MockState {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    hits: Mutex<HashMap<String, usize>>,
    explanations: AtomicUsize,
}

impl MockState {
    fn enter(&self, endpoint: &str) -> MockBehavior {
        *self
            .hits
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default() += 1;
        self.behaviors
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or(MockBehavior::Ok)
    }
}

pub struct MockBackend {
    url: Url,
    state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/upload", post(upload))
            .route("/profile", get(profile))
            .route("/risk", get(risk))
            .route("/explain", get(explain))
            .route("/script", get(script))
            .route("/compare", get(compare))
            .route("/health", get(health))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            state,
        }
    }

    /// URL de un puerto que nadie escucha.
    pub async fn unused_url() -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    pub fn set_behavior(&self, endpoint: &str, behavior: MockBehavior) {
        self.state
            .behaviors
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), behavior);
    }

    pub fn hits(&self, endpoint: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

/// Aplica el comportamiento configurado; `None` significa responder con normalidad.
async fn apply(behavior: MockBehavior, out_of_contract: Value) -> Option<Response> {
    match behavior {
        MockBehavior::Ok => None,
        MockBehavior::Delay(d) => {
            tokio::time::sleep(d).await;
            None
        }
        MockBehavior::Status(code) => Some(
            (
                StatusCode::from_u16(code).unwrap(),
                Json(json!({"detail": "fallo simulado"})),
            )
                .into_response(),
        ),
        MockBehavior::Malformed => Some(Json(json!({"unexpected": true})).into_response()),
        MockBehavior::OutOfContract => Some(Json(out_of_contract).into_response()),
    }
}

async fn upload(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    let behavior = state.enter("upload");
    if let Some(resp) = apply(behavior, json!({"success": false})).await {
        return resp;
    }

    let mut filename = String::new();
    let mut text = String::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.unwrap_or_default();
            text = String::from_utf8_lossy(&bytes).to_string();
        }
    }
    if filename.is_empty() {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let column_names: Vec<String> = lines
        .next()
        .map(|h| h.split(',').map(|c| c.trim().to_string()).collect())
        .unwrap_or_default();
    let rows = lines.count();

    Json(json!({
        "success": true,
        "session_id": Uuid::new_v4().to_string(),
        "filename": filename,
        "rows": rows,
        "columns": column_names.len(),
        "column_names": column_names,
        "preview": []
    }))
    .into_response()
}

async fn profile(State(state): State<Arc<MockState>>, Query(q): Query<SessionQuery>) -> Response {
    let bad = json!({
        "rows": 3, "columns": 0, "duplicates": 0, "duplicate_percentage": 250.0,
        "memory_usage_mb": 0.0, "columns_analysis": []
    });
    if let Some(resp) = apply(state.enter("profile"), bad).await {
        return resp;
    }
    Json(json!({
        "session_id": q.session_id,
        "rows": 3,
        "columns": 2,
        "duplicates": 0,
        "duplicate_percentage": 0.0,
        "memory_usage_mb": 0.001,
        "columns_analysis": [
            {"name": "a", "dtype": "int64", "missing_count": 0, "missing_percentage": 0.0,
             "unique_count": 3, "unique_percentage": 100.0, "mean": 3.0, "median": 3.0,
             "std": 2.0, "min": 1.0, "max": 5.0},
            {"name": "b", "dtype": "int64", "missing_count": 0, "missing_percentage": 0.0,
             "unique_count": 3, "unique_percentage": 100.0, "mean": 4.0, "median": 4.0,
             "std": 2.0, "min": 2.0, "max": 6.0}
        ],
        "generated_at": "2025-01-01T00:00:00"
    }))
    .into_response()
}

async fn risk(State(state): State<Arc<MockState>>, Query(q): Query<SessionQuery>) -> Response {
    let bad = json!({
        "risk_score": 180.0, "risk_level": "High",
        "components": {"missing_value_rate": 0.0, "duplicate_rate": 0.0, "datatype_issue_score": 0.0},
        "issues": []
    });
    if let Some(resp) = apply(state.enter("risk"), bad).await {
        return resp;
    }
    Json(json!({
        "session_id": q.session_id,
        "risk_score": 12.5,
        "risk_level": "Low",
        "components": {"missing_value_rate": 0.0, "duplicate_rate": 0.0, "datatype_issue_score": 12.5},
        "issues": [
            {"severity": "info", "type": "dtype", "column": "b", "message": "columna numérica"}
        ],
        "generated_at": "2025-01-01T00:00:00"
    }))
    .into_response()
}

async fn explain(State(state): State<Arc<MockState>>, Query(q): Query<SessionQuery>) -> Response {
    if let Some(resp) = apply(state.enter("explain"), json!({"explanation": ""})).await {
        return resp;
    }
    let n = state.explanations.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"explanation": format!("Explicación #{n} para {}", q.session_id)})).into_response()
}

async fn script(State(state): State<Arc<MockState>>, Query(q): Query<SessionQuery>) -> Response {
    if let Some(resp) = apply(state.enter("script"), json!({"script": ""})).await {
        return resp;
    }
    Json(json!({
        "script": format!("import pandas as pd\n# sesión {}\ndf = df.drop_duplicates()\n", q.session_id)
    }))
    .into_response()
}

async fn compare(State(state): State<Arc<MockState>>, Query(q): Query<SessionQuery>) -> Response {
    let metrics = |rows: u64, dups: u64| {
        json!({
            "rows": rows, "columns": 2, "missing_values": 0, "missing_percentage": 0.0,
            "duplicates": dups, "duplicate_percentage": 0.0, "memory_mb": 0.001
        })
    };
    let bad = json!({
        "before": {"rows": 1, "columns": 1, "missing_values": 0, "missing_percentage": -5.0,
                   "duplicates": 0, "duplicate_percentage": 0.0, "memory_mb": 0.0},
        "after": metrics(1, 0),
        "improvements": {"rows_removed": 0, "missing_values_fixed": 0, "duplicates_removed": 0}
    });
    if let Some(resp) = apply(state.enter("compare"), bad).await {
        return resp;
    }
    Json(json!({
        "session_id": q.session_id,
        "before": metrics(4, 1),
        "after": metrics(3, 0),
        "improvements": {"rows_removed": 1, "missing_values_fixed": 0, "duplicates_removed": 1},
        "generated_at": "2025-01-01T00:00:00"
    }))
    .into_response()
}

async fn health(State(state): State<Arc<MockState>>) -> Response {
    let out_of_contract = json!({"status": "", "version": "1.0"});
    if let Some(resp) = apply(state.enter("health"), out_of_contract).await {
        return resp;
    }
    Json(json!({"status": "ok", "version": "1.0"})).into_response()
}
