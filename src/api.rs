use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::{
    app_state::AppState,
    models::{
        ArtifactKind, CleaningScript, Comparison, Dataset, HealthStatus, ProfilingResult,
        RiskAssessment, Severity, UploadFile,
    },
    session::{ArtifactStatus, ArtifactView, FetchOutcome, SessionSnapshot, UploadOutcome},
    upload::{build_preview, validate_upload, Preview, MAX_UPLOAD_BYTES},
};

// El multipart añade cabeceras y separadores al fichero; se deja margen para
// que los ficheros algo mayores del límite lleguen a la validación local.
const UPLOAD_BODY_LIMIT: usize = (MAX_UPLOAD_BYTES + 1024 * 1024) as usize;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// --- Respuestas de la API ---

/// Lo que una página necesita para pintarse: su artefacto y el contexto común.
#[derive(Serialize)]
pub struct PageView<T> {
    dataset: Option<Dataset>,
    status: ArtifactStatus,
    loading: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> PageView<T> {
    fn new(snapshot: &SessionSnapshot, view: ArtifactView<T>) -> Self {
        Self {
            dataset: snapshot.dataset.clone(),
            status: view.status,
            loading: view.status == ArtifactStatus::Loading,
            data: view.data,
            error: view.error,
        }
    }
}

#[derive(Serialize)]
pub struct UploadView {
    dataset: Dataset,
    preview: Preview,
}

#[derive(Serialize)]
pub struct OverviewView {
    dataset: Option<Dataset>,
    profiling: ArtifactView<ProfilingResult>,
    risk: ArtifactView<RiskAssessment>,
    numeric_columns: Option<usize>,
    critical_issues: Option<usize>,
    loading: bool,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/state", get(state_handler))
        .route("/api/overview", get(overview_handler))
        .route("/api/profiling", get(profiling_page))
        .route("/api/risk", get(risk_page))
        .route("/api/explanation", get(explanation_page))
        .route("/api/explanation/regenerate", post(regenerate_explanation_handler))
        .route("/api/script", get(script_page))
        .route("/api/script/download", get(script_download_handler))
        .route("/api/comparison", get(comparison_page))
        .route("/api/reset", post(reset_handler))
        .route("/api/health", get(health_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Subida ---

async fn read_file_field(multipart: &mut Multipart) -> Result<UploadFile, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Formulario inválido: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Error leyendo el fichero: {e}")))?;
        return Ok(UploadFile::new(filename, bytes.to_vec()));
    }
    Err(api_error(StatusCode::BAD_REQUEST, "Falta el campo 'file' en el formulario"))
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadView>, ApiError> {
    let file = read_file_field(&mut multipart).await?;

    // Validación local: nunca llega al backend ni al slot de error.
    validate_upload(&file.filename, file.size())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let preview = build_preview(&String::from_utf8_lossy(&file.bytes));

    match state.session.upload_dataset(file).await {
        UploadOutcome::Uploaded(dataset) => Ok(Json(UploadView { dataset, preview })),
        UploadOutcome::Failed(message) => Err(api_error(StatusCode::BAD_GATEWAY, message)),
        UploadOutcome::Superseded => Err(api_error(
            StatusCode::CONFLICT,
            "La subida fue sustituida por otra más reciente",
        )),
    }
}

// --- Páginas ---

/// Si hay dataset activo, pide el artefacto (el controlador decide si hace
/// falta ir a la red) y devuelve el estado resultante.
async fn ensure_artifact(state: &AppState, kind: ArtifactKind) -> SessionSnapshot {
    if let Some(id) = state.session.active_dataset_id() {
        let outcome = state.session.fetch_kind(kind, &id).await;
        debug!(%kind, ?outcome, "Página consultada");
    }
    state.session.snapshot()
}

#[axum::debug_handler]
async fn state_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot())
}

#[axum::debug_handler]
async fn overview_handler(State(state): State<AppState>) -> Json<OverviewView> {
    if let Some(id) = state.session.active_dataset_id() {
        let (profiling, risk) = futures::join!(
            state.session.fetch_profiling(&id),
            state.session.fetch_risk(&id)
        );
        debug!(?profiling, ?risk, "Resumen consultado");
    }
    let snapshot = state.session.snapshot();
    let numeric_columns = snapshot
        .profiling
        .data
        .as_ref()
        .map(|p| p.columns_analysis.iter().filter(|c| c.is_numeric()).count());
    let critical_issues = snapshot
        .risk
        .data
        .as_ref()
        .map(|r| r.count_by_severity(Severity::Critical));
    Json(OverviewView {
        dataset: snapshot.dataset,
        profiling: snapshot.profiling,
        risk: snapshot.risk,
        numeric_columns,
        critical_issues,
        loading: snapshot.loading,
    })
}

#[axum::debug_handler]
async fn profiling_page(State(state): State<AppState>) -> Json<PageView<ProfilingResult>> {
    let snapshot = ensure_artifact(&state, ArtifactKind::Profiling).await;
    Json(PageView::new(&snapshot, snapshot.profiling.clone()))
}

#[axum::debug_handler]
async fn risk_page(State(state): State<AppState>) -> Json<PageView<RiskAssessment>> {
    let snapshot = ensure_artifact(&state, ArtifactKind::Risk).await;
    Json(PageView::new(&snapshot, snapshot.risk.clone()))
}

#[axum::debug_handler]
async fn explanation_page(State(state): State<AppState>) -> Json<PageView<String>> {
    let snapshot = ensure_artifact(&state, ArtifactKind::Explanation).await;
    Json(PageView::new(&snapshot, snapshot.explanation.clone()))
}

#[axum::debug_handler]
async fn script_page(State(state): State<AppState>) -> Json<PageView<CleaningScript>> {
    let snapshot = ensure_artifact(&state, ArtifactKind::Script).await;
    Json(PageView::new(&snapshot, snapshot.script.clone()))
}

/// Descarga el script como `clean_data.py`, pidiéndolo si aún no existe.
#[axum::debug_handler]
async fn script_download_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .session
        .active_dataset_id()
        .ok_or_else(|| api_error(StatusCode::CONFLICT, "No hay ningún dataset activo"))?;

    let outcome = state.session.fetch_script(&id).await;
    debug!(?outcome, "Descarga de script solicitada");

    let view = state.session.snapshot().script;
    match (view.data, view.status) {
        (Some(script), _) => Ok((
            [
                (header::CONTENT_TYPE, "text/x-python"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"clean_data.py\""),
            ],
            script.code,
        )),
        (None, ArtifactStatus::Failed) => Err(api_error(
            StatusCode::BAD_GATEWAY,
            view.error.unwrap_or_else(|| "No se pudo generar el script".to_string()),
        )),
        (None, _) => Err(api_error(
            StatusCode::CONFLICT,
            "El script todavía no está disponible",
        )),
    }
}

#[axum::debug_handler]
async fn comparison_page(State(state): State<AppState>) -> Json<PageView<Comparison>> {
    let snapshot = ensure_artifact(&state, ArtifactKind::Comparison).await;
    Json(PageView::new(&snapshot, snapshot.comparison.clone()))
}

#[axum::debug_handler]
async fn regenerate_explanation_handler(
    State(state): State<AppState>,
) -> Result<Json<PageView<String>>, ApiError> {
    let id = state
        .session
        .active_dataset_id()
        .ok_or_else(|| api_error(StatusCode::CONFLICT, "No hay ningún dataset activo"))?;

    let outcome = state.session.regenerate_explanation(&id).await;
    if outcome == FetchOutcome::Superseded {
        info!("Regeneración sustituida por una petición posterior");
    }
    let snapshot = state.session.snapshot();
    Ok(Json(PageView::new(&snapshot, snapshot.explanation.clone())))
}

#[axum::debug_handler]
async fn reset_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    state.session.reset();
    Json(state.session.snapshot())
}

// --- Health y apagado ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    state.session.gateway().health_check().await.map(Json).map_err(|e| {
        error!("Health check del backend fallido: {e}");
        api_error(StatusCode::SERVICE_UNAVAILABLE, e.user_message())
    })
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::gateway::Gateway;
    use crate::mock_backend::{MockBackend, MockBehavior};
    use crate::session::SessionController;
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;
    use tokio::sync::oneshot;

    struct Harness {
        backend: MockBackend,
        base: String,
        client: reqwest::Client,
    }

    impl Harness {
        async fn start() -> Self {
            let backend = MockBackend::start().await;
            let backend_url = backend.url().to_string();
            let config = AppConfig::from_lookup(|key| match key {
                "BACKEND_URL" => Some(backend_url.clone()),
                "OPEN_BROWSER" => Some("false".to_string()),
                _ => None,
            })
            .unwrap();
            let gateway = Gateway::from_config(&config).unwrap();
            let (tx, _rx) = oneshot::channel();
            let app_state = AppState::new(config, SessionController::new(gateway), tx);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, create_router(app_state)).await.unwrap();
            });

            Self {
                backend,
                base: format!("http://{addr}"),
                client: reqwest::Client::new(),
            }
        }

        async fn upload(&self, filename: &str, bytes: &[u8]) -> reqwest::Response {
            let part = Part::bytes(bytes.to_vec()).file_name(filename.to_string());
            self.client
                .post(format!("{}/api/upload", self.base))
                .multipart(Form::new().part("file", part))
                .send()
                .await
                .unwrap()
        }

        async fn get(&self, path: &str) -> Value {
            self.client
                .get(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn invalid_file_is_rejected_locally() {
        let h = Harness::start().await;

        let resp = h.upload("data.txt", b"a,b\n1,2").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Por favor, sube un fichero CSV");

        let resp = h.upload("vacio.csv", b"").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(h.backend.hits("upload"), 0);
        let state = h.get("/api/state").await;
        assert!(state["error"].is_null());
        assert!(state["dataset"].is_null());
    }

    #[tokio::test]
    async fn upload_returns_dataset_and_preview() {
        let h = Harness::start().await;

        let resp = h.upload("data.csv", b"a,b\n1,2\n3,4\n5,6").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["dataset"]["filename"], "data.csv");
        assert_eq!(body["dataset"]["rows"], 3);
        assert_eq!(body["preview"]["header"], serde_json::json!(["a", "b"]));
        assert_eq!(body["preview"]["rows"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn backend_upload_failure_sets_error_slot() {
        let h = Harness::start().await;
        h.backend.set_behavior("upload", MockBehavior::Status(500));

        let resp = h.upload("data.csv", b"a\n1").await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let state = h.get("/api/state").await;
        assert_eq!(state["error"], "No se pudo subir el dataset");
    }

    #[tokio::test]
    async fn pages_fetch_their_artifact_on_demand() {
        let h = Harness::start().await;

        let empty = h.get("/api/profiling").await;
        assert_eq!(empty["status"], "empty");
        assert!(empty["dataset"].is_null());
        assert_eq!(h.backend.hits("profile"), 0);

        h.upload("data.csv", b"a,b\n1,2\n3,4\n5,6").await;
        let page = h.get("/api/profiling").await;
        assert_eq!(page["status"], "ready");
        assert_eq!(page["data"]["rows"], 3);

        h.get("/api/profiling").await;
        assert_eq!(h.backend.hits("profile"), 1);

        let script = h.get("/api/script").await;
        assert_eq!(script["data"]["format"], "pandas");
    }

    #[tokio::test]
    async fn script_downloads_as_python_file() {
        let h = Harness::start().await;
        let url = format!("{}/api/script/download", h.base);

        let resp = h.client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        h.upload("data.csv", b"a,b\n1,2").await;
        let resp = h.client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers[header::CONTENT_TYPE].to_str().unwrap(), "text/x-python");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION].to_str().unwrap(),
            "attachment; filename=\"clean_data.py\""
        );
        let code = resp.text().await.unwrap();
        assert!(code.starts_with("import pandas"));

        h.client.get(&url).send().await.unwrap();
        assert_eq!(h.backend.hits("script"), 1);
        let page = h.get("/api/script").await;
        assert_eq!(page["data"]["code"], code);
    }

    #[tokio::test]
    async fn failed_script_download_reports_backend_error() {
        let h = Harness::start().await;
        h.upload("data.csv", b"a\n1").await;
        h.backend.set_behavior("script", MockBehavior::Status(500));

        let resp = h
            .client
            .get(format!("{}/api/script/download", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn failing_risk_page_reports_its_own_error() {
        let h = Harness::start().await;
        h.upload("data.csv", b"a,b\n1,2").await;
        h.backend.set_behavior("risk", MockBehavior::Status(500));

        let overview = h.get("/api/overview").await;
        assert_eq!(overview["profiling"]["status"], "ready");
        assert_eq!(overview["numeric_columns"], 2);
        assert_eq!(overview["risk"]["status"], "failed");
        assert!(overview["critical_issues"].is_null());
        assert_eq!(overview["risk"]["error"], "No se pudo obtener la evaluación de riesgo");
        assert_eq!(overview["loading"], false);
    }

    #[tokio::test]
    async fn regenerate_needs_a_dataset() {
        let h = Harness::start().await;
        let resp = h
            .client
            .post(format!("{}/api/explanation/regenerate", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        h.upload("data.csv", b"a\n1").await;
        let first = h.get("/api/explanation").await;
        let regenerated: Value = h
            .client
            .post(format!("{}/api/explanation/regenerate", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(regenerated["status"], "ready");
        assert_ne!(first["data"], regenerated["data"]);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let h = Harness::start().await;
        h.upload("data.csv", b"a\n1").await;
        h.get("/api/comparison").await;

        let state: Value = h
            .client
            .post(format!("{}/api/reset", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(state["dataset"].is_null());
        assert_eq!(state["comparison"]["status"], "empty");
    }

    #[tokio::test]
    async fn health_is_proxied() {
        let h = Harness::start().await;
        let health = h.get("/api/health").await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["version"], "1.0");

        h.backend.set_behavior("health", MockBehavior::Status(503));
        let resp = h
            .client
            .get(format!("{}/api/health", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
