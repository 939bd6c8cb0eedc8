//! Modelos de dominio: descriptor del dataset y artefactos de análisis
//! devueltos por el backend, junto con su validación de contrato.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// --- Tipos de artefacto ---

/// Cada uno de los artefactos derivados que el backend calcula para una sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Profiling,
    Risk,
    Explanation,
    Script,
    Comparison,
}

impl ArtifactKind {
    /// Ruta del endpoint en el backend (relativa a la URL base).
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Profiling => "profile",
            Self::Risk => "risk",
            Self::Explanation => "explain",
            Self::Script => "script",
            Self::Comparison => "compare",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Profiling => "profiling",
            Self::Risk => "risk",
            Self::Explanation => "explanation",
            Self::Script => "script",
            Self::Comparison => "comparison",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// --- Dataset ---

/// Descriptor del dataset activo. Se crea con cada subida correcta y no
/// se modifica después.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    /// Token de sesión opaco emitido por el backend.
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub rows: u64,
    pub columns: u64,
    pub column_names: Vec<String>,
}

/// Fichero tal y como lo entrega el usuario.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

// --- Respuestas del backend ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub session_id: String,
    pub filename: String,
    pub rows: u64,
    pub columns: u64,
    pub column_names: Vec<String>,
    #[serde(default)]
    pub preview: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnAnalysis {
    pub name: String,
    pub dtype: String,
    pub missing_count: u64,
    pub missing_percentage: f64,
    pub unique_count: u64,
    pub unique_percentage: f64,
    // Estadísticos sólo presentes en columnas numéricas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ColumnAnalysis {
    pub fn is_numeric(&self) -> bool {
        self.mean.is_some() || self.median.is_some() || self.min.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingResult {
    #[serde(default)]
    pub session_id: Option<String>,
    pub rows: u64,
    pub columns: u64,
    pub duplicates: u64,
    pub duplicate_percentage: f64,
    pub memory_usage_mb: f64,
    pub columns_analysis: Vec<ColumnAnalysis>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskComponents {
    pub missing_value_rate: f64,
    pub duplicate_rate: f64,
    pub datatype_issue_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskIssue {
    pub severity: Severity,
    #[serde(rename = "type", default)]
    pub issue_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(default)]
    pub session_id: Option<String>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub components: RiskComponents,
    pub issues: Vec<RiskIssue>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

impl RiskAssessment {
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMetrics {
    pub rows: u64,
    pub columns: u64,
    pub missing_values: u64,
    pub missing_percentage: f64,
    pub duplicates: u64,
    pub duplicate_percentage: f64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Improvements {
    pub rows_removed: u64,
    pub missing_values_fixed: u64,
    pub duplicates_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub session_id: Option<String>,
    pub before: ComparisonMetrics,
    pub after: ComparisonMetrics,
    pub improvements: Improvements,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExplanationResponse {
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptResponse {
    pub script: String,
}

/// Script de limpieza generado. Lenguaje y formato son etiquetas opacas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningScript {
    pub code: String,
    pub language: String,
    pub format: String,
}

impl CleaningScript {
    pub fn pandas(code: String) -> Self {
        Self {
            code,
            language: "python".to_string(),
            format: "pandas".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

// ---------------------------------------------------------------------
// VALIDACIÓN DE CONTRATO
// ---------------------------------------------------------------------

/// Violaciones semánticas de una respuesta que sí se pudo deserializar.
#[derive(Debug, Error, PartialEq)]
pub enum ContractError {
    #[error("el campo '{field}' está fuera de rango: {value}")]
    OutOfRange { field: String, value: f64 },
    #[error("el campo '{0}' no puede estar vacío")]
    EmptyField(&'static str),
    #[error("respuesta incoherente: {0}")]
    Inconsistent(String),
    #[error("el backend rechazó la subida")]
    Rejected,
}

/// Reglas que una respuesta del backend debe cumplir antes de entrar en el estado.
pub trait Validate {
    fn validate(&self) -> Result<(), ContractError>;
}

fn check_percentage(field: &str, value: f64) -> Result<(), ContractError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ContractError::OutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), ContractError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ContractError::OutOfRange {
            field: field.to_string(),
            value,
        })
    }
}

impl Validate for UploadResponse {
    fn validate(&self) -> Result<(), ContractError> {
        if !self.success {
            return Err(ContractError::Rejected);
        }
        if self.session_id.trim().is_empty() {
            return Err(ContractError::EmptyField("session_id"));
        }
        if self.column_names.len() as u64 != self.columns {
            return Err(ContractError::Inconsistent(format!(
                "columns = {} pero column_names tiene {} elementos",
                self.columns,
                self.column_names.len()
            )));
        }
        Ok(())
    }
}

impl Validate for ProfilingResult {
    fn validate(&self) -> Result<(), ContractError> {
        check_percentage("duplicate_percentage", self.duplicate_percentage)?;
        check_non_negative("memory_usage_mb", self.memory_usage_mb)?;
        if self.duplicates > self.rows {
            return Err(ContractError::Inconsistent(format!(
                "{} duplicados en {} filas",
                self.duplicates, self.rows
            )));
        }
        if self.columns_analysis.len() as u64 != self.columns {
            return Err(ContractError::Inconsistent(format!(
                "columns = {} pero columns_analysis tiene {} elementos",
                self.columns,
                self.columns_analysis.len()
            )));
        }
        for col in &self.columns_analysis {
            check_percentage(&format!("{}.missing_percentage", col.name), col.missing_percentage)?;
            check_percentage(&format!("{}.unique_percentage", col.name), col.unique_percentage)?;
        }
        Ok(())
    }
}

impl Validate for RiskAssessment {
    fn validate(&self) -> Result<(), ContractError> {
        check_percentage("risk_score", self.risk_score)?;
        check_percentage("components.missing_value_rate", self.components.missing_value_rate)?;
        check_percentage("components.duplicate_rate", self.components.duplicate_rate)?;
        check_percentage(
            "components.datatype_issue_score",
            self.components.datatype_issue_score,
        )?;
        Ok(())
    }
}

impl Validate for ComparisonMetrics {
    fn validate(&self) -> Result<(), ContractError> {
        check_percentage("missing_percentage", self.missing_percentage)?;
        check_percentage("duplicate_percentage", self.duplicate_percentage)?;
        check_non_negative("memory_mb", self.memory_mb)
    }
}

impl Validate for Comparison {
    fn validate(&self) -> Result<(), ContractError> {
        self.before.validate()?;
        self.after.validate()
    }
}

impl Validate for ExplanationResponse {
    fn validate(&self) -> Result<(), ContractError> {
        if self.explanation.trim().is_empty() {
            return Err(ContractError::EmptyField("explanation"));
        }
        Ok(())
    }
}

impl Validate for ScriptResponse {
    fn validate(&self) -> Result<(), ContractError> {
        if self.script.trim().is_empty() {
            return Err(ContractError::EmptyField("script"));
        }
        Ok(())
    }
}

impl Validate for HealthStatus {
    fn validate(&self) -> Result<(), ContractError> {
        if self.status.trim().is_empty() {
            return Err(ContractError::EmptyField("status"));
        }
        if self.version.trim().is_empty() {
            return Err(ContractError::EmptyField("version"));
        }
        Ok(())
    }
}
