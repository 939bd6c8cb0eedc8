//! Controlador del estado de sesión: única fuente de verdad sobre el dataset
//! activo y los artefactos calculados para él, y único componente que habla
//! con el `Gateway`.
//!
//! Cada artefacto tiene su propia máquina de estados:
//!
//! ```text
//!   Empty ──fetch──▶ Loading ──ok──▶ Ready
//!                      │  ▲            │
//!                     err │ fetch      └─regenerate (sólo explicación)─▶ Loading
//!                      ▼  │
//!                     Failed
//! ```
//!
//! Cada petición lleva un token. Una respuesta sólo se aplica si su token
//! sigue siendo el vigente del slot y la generación del dataset no ha
//! cambiado; las peticiones sustituidas se abortan.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, warn};

use crate::gateway::{Gateway, GatewayError};
use crate::models::{
    ArtifactKind, CleaningScript, Comparison, Dataset, ProfilingResult, RiskAssessment,
    UploadFile, UploadResponse,
};

const UNEXPECTED_FAILURE: &str = "Error inesperado al contactar con el backend";

// --- Estado de cada artefacto ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Empty,
    Loading,
    Ready,
    Failed,
}

/// Vista inmutable de un slot, tal y como la consumen las páginas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactView<T> {
    pub status: ArtifactStatus,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ArtifactView<T> {
    pub fn is_empty(&self) -> bool {
        self.status == ArtifactStatus::Empty && self.data.is_none() && self.error.is_none()
    }
}

struct Slot<T> {
    status: ArtifactStatus,
    data: Option<T>,
    error: Option<String>,
    token: Option<u64>,
    task: Option<AbortHandle>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            status: ArtifactStatus::Empty,
            data: None,
            error: None,
            token: None,
            task: None,
        }
    }
}

impl<T: Clone> Slot<T> {
    /// Pasa a `Loading`. Durante una regeneración el valor anterior sigue visible.
    fn begin(&mut self, token: u64, task: AbortHandle) {
        self.abort();
        self.status = ArtifactStatus::Loading;
        self.error = None;
        self.token = Some(token);
        self.task = Some(task);
    }

    fn ready(&mut self, value: T) {
        self.status = ArtifactStatus::Ready;
        self.data = Some(value);
        self.error = None;
        self.token = None;
        self.task = None;
    }

    fn fail(&mut self, message: String) {
        self.status = ArtifactStatus::Failed;
        self.data = None;
        self.error = Some(message);
        self.token = None;
        self.task = None;
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn clear(&mut self) {
        self.abort();
        *self = Self::default();
    }

    fn view(&self) -> ArtifactView<T> {
        ArtifactView {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

#[derive(Default)]
struct SessionState {
    /// Se incrementa con cada subida correcta y con cada reset.
    generation: u64,
    next_token: u64,
    dataset: Option<Dataset>,
    upload_token: Option<u64>,
    upload_task: Option<AbortHandle>,
    /// Errores de subida. Los de artefactos viven en su propio slot.
    error: Option<String>,
    profiling: Slot<ProfilingResult>,
    risk: Slot<RiskAssessment>,
    explanation: Slot<String>,
    script: Slot<CleaningScript>,
    comparison: Slot<Comparison>,
}

impl SessionState {
    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn clear_artifacts(&mut self) {
        self.profiling.clear();
        self.risk.clear();
        self.explanation.clear();
        self.script.clear();
        self.comparison.clear();
    }

    fn abort_upload(&mut self) {
        self.upload_token = None;
        if let Some(task) = self.upload_task.take() {
            task.abort();
        }
    }

    fn any_loading(&self) -> bool {
        [
            self.profiling.status,
            self.risk.status,
            self.explanation.status,
            self.script.status,
            self.comparison.status,
        ]
        .contains(&ArtifactStatus::Loading)
    }
}

/// Copia completa del estado en un instante dado.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub dataset: Option<Dataset>,
    pub profiling: ArtifactView<ProfilingResult>,
    pub risk: ArtifactView<RiskAssessment>,
    pub explanation: ArtifactView<String>,
    pub script: ArtifactView<CleaningScript>,
    pub comparison: ArtifactView<Comparison>,
    pub uploading: bool,
    /// Derivado: hay una subida o algún artefacto en curso.
    pub loading: bool,
    pub error: Option<String>,
}

// --- Resultados de las operaciones ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Se hizo la petición y el resultado quedó en el slot.
    Fetched,
    /// El slot ya estaba `Ready`; no hubo petición.
    Cached,
    /// Ya había una petición en curso para este artefacto.
    InFlight,
    /// Una petición posterior, una subida o un reset dejaron obsoleta esta.
    Superseded,
    Failed(String),
    NoDataset,
    /// El `session_id` no corresponde al dataset activo.
    StaleSession,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Uploaded(Dataset),
    Failed(String),
    Superseded,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Sólo pide si el slot está `Empty` o `Failed`.
    Ensure,
    /// Pide siempre, sustituyendo cualquier petición en curso.
    Regenerate,
}

// ---------------------------------------------------------------------
// CONTROLADOR
// ---------------------------------------------------------------------

/// Controlador de sesión. Se crea una vez al arrancar y se comparte por
/// clonación (el estado vive detrás de un `Arc<Mutex<..>>`). El mutex nunca
/// se mantiene a través de un `.await`.
#[derive(Clone)]
pub struct SessionController {
    gateway: Gateway,
    state: Arc<Mutex<SessionState>>,
}

impl SessionController {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        let uploading = state.upload_token.is_some();
        SessionSnapshot {
            dataset: state.dataset.clone(),
            profiling: state.profiling.view(),
            risk: state.risk.view(),
            explanation: state.explanation.view(),
            script: state.script.view(),
            comparison: state.comparison.view(),
            uploading,
            loading: uploading || state.any_loading(),
            error: state.error.clone(),
        }
    }

    pub fn active_dataset_id(&self) -> Option<String> {
        self.lock().dataset.as_ref().map(|d| d.id.clone())
    }

    // ---------------------------------------------------------------------
    // SUBIDA Y RESET
    // ---------------------------------------------------------------------

    /// Sube un fichero. No valida nada (eso es cosa de la capa de
    /// presentación). Si va bien, sustituye el dataset e invalida los cinco
    /// artefactos; si falla, sólo se toca el slot de error.
    ///
    /// El resultado lo aplica la propia tarea de red, así que el estado queda
    /// coherente aunque quien llama deje de esperar.
    pub async fn upload_dataset(&self, file: UploadFile) -> UploadOutcome {
        let (token, handle) = {
            let mut state = self.lock();
            state.abort_upload();
            state.error = None;
            let token = state.issue_token();
            let gateway = self.gateway.clone();
            let shared = Arc::clone(&self.state);
            let handle = tokio::spawn(async move {
                let size = file.size();
                let result = gateway.upload(file.bytes, &file.filename).await;
                complete_upload(&shared, token, &file.filename, size, result)
            });
            state.upload_token = Some(token);
            state.upload_task = Some(handle.abort_handle());
            (token, handle)
        };

        match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_cancelled() => {
                debug!(token, "Subida abortada");
                UploadOutcome::Superseded
            }
            Err(join_err) => {
                let message = join_failure_message(&join_err);
                let mut state = self.lock();
                if state.upload_token != Some(token) {
                    return UploadOutcome::Superseded;
                }
                state.upload_token = None;
                state.upload_task = None;
                state.error = Some(message.clone());
                UploadOutcome::Failed(message)
            }
        }
    }

    /// Vuelve al estado inicial vacío, abortando todo lo que esté en curso.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.abort_upload();
        state.clear_artifacts();
        state.dataset = None;
        state.error = None;
        state.generation += 1;
        info!("Estado de sesión reiniciado");
    }

    // ---------------------------------------------------------------------
    // ARTEFACTOS
    // ---------------------------------------------------------------------

    pub async fn fetch_profiling(&self, session_id: &str) -> FetchOutcome {
        self.fetch(
            ArtifactKind::Profiling,
            session_id,
            FetchMode::Ensure,
            |s| &mut s.profiling,
            |gw, id| async move { gw.get_profiling(&id).await },
        )
        .await
    }

    pub async fn fetch_risk(&self, session_id: &str) -> FetchOutcome {
        self.fetch(
            ArtifactKind::Risk,
            session_id,
            FetchMode::Ensure,
            |s| &mut s.risk,
            |gw, id| async move { gw.get_risk(&id).await },
        )
        .await
    }

    pub async fn fetch_explanation(&self, session_id: &str) -> FetchOutcome {
        self.fetch_explanation_with(session_id, FetchMode::Ensure).await
    }

    /// Pide una explicación nueva aunque ya exista una. Si había otra
    /// petición en curso, se aborta y gana la última.
    pub async fn regenerate_explanation(&self, session_id: &str) -> FetchOutcome {
        self.fetch_explanation_with(session_id, FetchMode::Regenerate).await
    }

    async fn fetch_explanation_with(&self, session_id: &str, mode: FetchMode) -> FetchOutcome {
        self.fetch(
            ArtifactKind::Explanation,
            session_id,
            mode,
            |s| &mut s.explanation,
            |gw, id| async move { gw.get_explanation(&id).await },
        )
        .await
    }

    pub async fn fetch_script(&self, session_id: &str) -> FetchOutcome {
        self.fetch(
            ArtifactKind::Script,
            session_id,
            FetchMode::Ensure,
            |s| &mut s.script,
            |gw, id| async move { gw.get_script(&id).await.map(CleaningScript::pandas) },
        )
        .await
    }

    pub async fn fetch_comparison(&self, session_id: &str) -> FetchOutcome {
        self.fetch(
            ArtifactKind::Comparison,
            session_id,
            FetchMode::Ensure,
            |s| &mut s.comparison,
            |gw, id| async move { gw.get_comparison(&id).await },
        )
        .await
    }

    pub async fn fetch_kind(&self, kind: ArtifactKind, session_id: &str) -> FetchOutcome {
        match kind {
            ArtifactKind::Profiling => self.fetch_profiling(session_id).await,
            ArtifactKind::Risk => self.fetch_risk(session_id).await,
            ArtifactKind::Explanation => self.fetch_explanation(session_id).await,
            ArtifactKind::Script => self.fetch_script(session_id).await,
            ArtifactKind::Comparison => self.fetch_comparison(session_id).await,
        }
    }

    async fn fetch<T, F, Fut>(
        &self,
        kind: ArtifactKind,
        session_id: &str,
        mode: FetchMode,
        select: fn(&mut SessionState) -> &mut Slot<T>,
        request: F,
    ) -> FetchOutcome
    where
        T: Clone + Send + 'static,
        F: FnOnce(Gateway, String) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let (token, generation, handle) = {
            let mut state = self.lock();
            match state.dataset.as_ref() {
                None => return FetchOutcome::NoDataset,
                Some(d) if d.id != session_id => {
                    debug!(%kind, requested = session_id, active = %d.id, "Sesión obsoleta");
                    return FetchOutcome::StaleSession;
                }
                Some(_) => {}
            }

            let status = select(&mut state).status;
            if mode == FetchMode::Ensure {
                match status {
                    ArtifactStatus::Ready => return FetchOutcome::Cached,
                    ArtifactStatus::Loading => return FetchOutcome::InFlight,
                    ArtifactStatus::Empty | ArtifactStatus::Failed => {}
                }
            }

            let token = state.issue_token();
            let generation = state.generation;
            let pending = request(self.gateway.clone(), session_id.to_string());
            let shared = Arc::clone(&self.state);
            let owned_id = session_id.to_string();
            // La tarea no puede aplicar nada hasta que se suelte este lock,
            // así que el slot ya está en `Loading` cuando lo intente.
            let handle = tokio::spawn(async move {
                let result = pending.await;
                complete_fetch(&shared, kind, &owned_id, select, token, generation, result)
            });
            select(&mut state).begin(token, handle.abort_handle());
            debug!(%kind, token, "Petición lanzada");
            (token, generation, handle)
        };

        match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_cancelled() => {
                debug!(%kind, token, "Petición abortada");
                FetchOutcome::Superseded
            }
            Err(join_err) => {
                let message = join_failure_message(&join_err);
                let mut state = self.lock();
                if state.generation != generation || select(&mut state).token != Some(token) {
                    return FetchOutcome::Superseded;
                }
                select(&mut state).fail(message.clone());
                FetchOutcome::Failed(message)
            }
        }
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    // Ninguna sección crítica puede dejar el estado a medias, así que un
    // mutex envenenado se puede seguir usando.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Aplica la respuesta de una subida si su token sigue vigente.
fn complete_upload(
    shared: &Mutex<SessionState>,
    token: u64,
    filename: &str,
    size: u64,
    result: Result<UploadResponse, GatewayError>,
) -> UploadOutcome {
    let mut state = lock_state(shared);
    if state.upload_token != Some(token) {
        debug!(token, "Subida sustituida, se descarta la respuesta");
        return UploadOutcome::Superseded;
    }
    state.upload_token = None;
    state.upload_task = None;

    match result {
        Ok(resp) => {
            let dataset = Dataset {
                id: resp.session_id,
                filename: resp.filename,
                size,
                uploaded_at: Utc::now(),
                rows: resp.rows,
                columns: resp.columns,
                column_names: resp.column_names,
            };
            state.generation += 1;
            state.clear_artifacts();
            state.dataset = Some(dataset.clone());
            state.error = None;
            info!(session_id = %dataset.id, filename, "Nuevo dataset activo");
            UploadOutcome::Uploaded(dataset)
        }
        Err(err) => {
            warn!(filename, "Error subiendo el dataset: {err}");
            let message = err.user_message();
            state.error = Some(message.clone());
            UploadOutcome::Failed(message)
        }
    }
}

/// Aplica la respuesta de un artefacto si ni el token del slot ni la
/// generación del dataset han cambiado desde que se lanzó.
fn complete_fetch<T: Clone>(
    shared: &Mutex<SessionState>,
    kind: ArtifactKind,
    session_id: &str,
    select: fn(&mut SessionState) -> &mut Slot<T>,
    token: u64,
    generation: u64,
    result: Result<T, GatewayError>,
) -> FetchOutcome {
    let mut state = lock_state(shared);
    if state.generation != generation || select(&mut state).token != Some(token) {
        debug!(%kind, token, "Respuesta obsoleta descartada");
        return FetchOutcome::Superseded;
    }

    let slot = select(&mut state);
    match result {
        Ok(value) => {
            slot.ready(value);
            info!(%kind, session_id, "Artefacto disponible");
            FetchOutcome::Fetched
        }
        Err(err) => {
            warn!(%kind, session_id, "Fallo obteniendo artefacto: {err}");
            let message = err.user_message();
            slot.fail(message.clone());
            FetchOutcome::Failed(message)
        }
    }
}

fn join_failure_message(err: &JoinError) -> String {
    error!("La tarea de red terminó de forma inesperada: {err}");
    UNEXPECTED_FAILURE.to_string()
}
