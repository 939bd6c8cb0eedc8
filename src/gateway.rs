//! Cliente HTTP tipado contra el backend de análisis.
//!
//! API pública:
//!   - `Gateway::upload(bytes, filename)`
//!   - `Gateway::get_profiling / get_risk / get_explanation / get_script / get_comparison`
//!   - `Gateway::health_check()`
//!
//! El gateway no guarda estado ni reintenta: cada llamada es una única
//! petición/respuesta y los fallos se normalizan en `GatewayError`.

use std::time::Duration;

use reqwest::{multipart, Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{
    ArtifactKind, Comparison, ContractError, ExplanationResponse, HealthStatus, ProfilingResult,
    RiskAssessment, ScriptResponse, UploadResponse, Validate,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no se pudo subir el dataset: {detail}")]
    UploadFailed { detail: String },
    #[error("no se pudo obtener {kind}: {detail}")]
    FetchFailed { kind: ArtifactKind, detail: String },
    #[error("respuesta de '{operation}' con formato inválido")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("respuesta de '{operation}' no cumple el contrato")]
    Contract {
        operation: &'static str,
        #[source]
        source: ContractError,
    },
    #[error("el backend no está disponible: {detail}")]
    Unavailable { detail: String },
    #[error("URL de endpoint inválida")]
    InvalidUrl(#[from] url::ParseError),
    #[error("no se pudo crear el cliente HTTP")]
    Client(#[source] reqwest::Error),
}

impl GatewayError {
    /// Mensaje fijo y legible para el usuario. No incluye códigos de estado
    /// ni cuerpos de respuesta, que sólo quedan en los logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::UploadFailed { .. } => "No se pudo subir el dataset".to_string(),
            Self::FetchFailed { kind, .. } => fetch_failed_message(*kind).to_string(),
            Self::Decode { operation, .. } | Self::Contract { operation, .. } => {
                format!("El backend devolvió una respuesta inválida para '{operation}'")
            }
            Self::Unavailable { .. } => "El backend no está disponible".to_string(),
            Self::InvalidUrl(_) | Self::Client(_) => {
                "Error de configuración del cliente HTTP".to_string()
            }
        }
    }
}

fn fetch_failed_message(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Profiling => "No se pudieron obtener los resultados de profiling",
        ArtifactKind::Risk => "No se pudo obtener la evaluación de riesgo",
        ArtifactKind::Explanation => "No se pudo obtener la explicación",
        ArtifactKind::Script => "No se pudo obtener el script de limpieza",
        ArtifactKind::Comparison => "No se pudo obtener la comparación",
    }
}

fn transport_detail(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "tiempo de espera agotado".to_string()
    } else if err.is_connect() {
        "no se pudo conectar con el backend".to_string()
    } else {
        err.to_string()
    }
}

/// Gateway hacia el backend. Clonar es barato (el `Client` es un `Arc`).
#[derive(Debug, Clone)]
pub struct Gateway {
    client: Client,
    base_url: Url,
}

impl Gateway {
    /// `base_url` debe terminar en `/` para que `join` conserve el prefijo.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::Client)?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(cfg.backend_url.clone(), cfg.request_timeout)
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Ok(self.base_url.join(path)?)
    }

    // ---------------------------------------------------------------------
    // SUBIDA
    // ---------------------------------------------------------------------

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadResponse, GatewayError> {
        let url = self.endpoint("upload")?;
        let request_id = Uuid::new_v4();
        let size = bytes.len();

        let mime = mime_guess::from_path(filename).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime.essence_str())
            .map_err(|e| GatewayError::UploadFailed {
                detail: e.to_string(),
            })?;
        let form = multipart::Form::new().part("file", part);

        info!(%request_id, filename, size, "Subiendo dataset al backend");
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                warn!(%request_id, "Fallo de transporte en la subida: {e}");
                GatewayError::UploadFailed {
                    detail: transport_detail(&e),
                }
            })?;

        let response = ensure_success(response, request_id, "upload").map_err(|detail| {
            GatewayError::UploadFailed { detail }
        })?;
        let body = response.bytes().await.map_err(|e| GatewayError::UploadFailed {
            detail: transport_detail(&e),
        })?;

        let parsed: UploadResponse = decode("upload", &body)?;
        info!(%request_id, session_id = %parsed.session_id, rows = parsed.rows, "Dataset subido");
        Ok(parsed)
    }

    // ---------------------------------------------------------------------
    // ARTEFACTOS
    // ---------------------------------------------------------------------

    pub async fn get_profiling(&self, session_id: &str) -> Result<ProfilingResult, GatewayError> {
        self.get_artifact(ArtifactKind::Profiling, session_id).await
    }

    pub async fn get_risk(&self, session_id: &str) -> Result<RiskAssessment, GatewayError> {
        self.get_artifact(ArtifactKind::Risk, session_id).await
    }

    pub async fn get_explanation(&self, session_id: &str) -> Result<String, GatewayError> {
        let resp: ExplanationResponse =
            self.get_artifact(ArtifactKind::Explanation, session_id).await?;
        Ok(resp.explanation)
    }

    pub async fn get_script(&self, session_id: &str) -> Result<String, GatewayError> {
        let resp: ScriptResponse = self.get_artifact(ArtifactKind::Script, session_id).await?;
        Ok(resp.script)
    }

    pub async fn get_comparison(&self, session_id: &str) -> Result<Comparison, GatewayError> {
        self.get_artifact(ArtifactKind::Comparison, session_id).await
    }

    async fn get_artifact<T>(&self, kind: ArtifactKind, session_id: &str) -> Result<T, GatewayError>
    where
        T: DeserializeOwned + Validate,
    {
        let url = self.endpoint(kind.endpoint())?;
        let request_id = Uuid::new_v4();
        debug!(%request_id, %kind, session_id, "GET {url}");

        let response = self
            .client
            .get(url)
            .query(&[("session_id", session_id)])
            .send()
            .await
            .map_err(|e| {
                warn!(%request_id, %kind, "Fallo de transporte: {e}");
                GatewayError::FetchFailed {
                    kind,
                    detail: transport_detail(&e),
                }
            })?;

        let response = ensure_success(response, request_id, kind.endpoint())
            .map_err(|detail| GatewayError::FetchFailed { kind, detail })?;
        let body = response.bytes().await.map_err(|e| GatewayError::FetchFailed {
            kind,
            detail: transport_detail(&e),
        })?;

        decode(kind.endpoint(), &body)
    }

    // ---------------------------------------------------------------------
    // HEALTH
    // ---------------------------------------------------------------------

    /// Sonda de disponibilidad. No forma parte del flujo principal.
    pub async fn health_check(&self) -> Result<HealthStatus, GatewayError> {
        let url = self.endpoint("health")?;
        let request_id = Uuid::new_v4();

        let response = self.client.get(url).send().await.map_err(|e| {
            GatewayError::Unavailable {
                detail: transport_detail(&e),
            }
        })?;
        let response = ensure_success(response, request_id, "health")
            .map_err(|detail| GatewayError::Unavailable { detail })?;
        let body = response.bytes().await.map_err(|e| GatewayError::Unavailable {
            detail: transport_detail(&e),
        })?;

        decode("health", &body)
    }
}

/// Cualquier estado no-2xx es un fallo genérico. El estado sólo se registra.
fn ensure_success(response: Response, request_id: Uuid, operation: &str) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        warn!(%request_id, operation, status = status.as_u16(), "El backend respondió con error");
        Err(format!("el backend respondió {status}"))
    }
}

/// Frontera de validación: JSON tipado y después reglas semánticas.
fn decode<T>(operation: &'static str, body: &[u8]) -> Result<T, GatewayError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(body).map_err(|source| {
        warn!(operation, "Respuesta no deserializable: {source}");
        GatewayError::Decode { operation, source }
    })?;
    value.validate().map_err(|source| {
        warn!(operation, "Respuesta fuera de contrato: {source}");
        GatewayError::Contract { operation, source }
    })?;
    Ok(value)
}
