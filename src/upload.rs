//! Validación local de ficheros antes de subirlos y vista previa rápida.
//!
//! Nada de esto toca la red ni el estado de sesión. La vista previa es un
//! simple troceado por líneas y comas, no un parser de CSV.

use serde::Serialize;
use thiserror::Error;

pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
pub const ACCEPTED_EXTENSION: &str = ".csv";

/// Cabecera + 5 filas de datos.
pub const PREVIEW_LINES: usize = 6;
pub const PREVIEW_CELL_CHARS: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadValidationError {
    #[error("Por favor, sube un fichero CSV")]
    WrongFileType,
    #[error("El fichero debe ocupar menos de 50MB")]
    TooLarge,
    #[error("El fichero está vacío")]
    Empty,
}

/// Comprueba extensión y tamaño, en ese orden.
pub fn validate_upload(filename: &str, size: u64) -> Result<(), UploadValidationError> {
    if !filename.ends_with(ACCEPTED_EXTENSION) {
        return Err(UploadValidationError::WrongFileType);
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(UploadValidationError::TooLarge);
    }
    if size == 0 {
        return Err(UploadValidationError::Empty);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn build_preview(text: &str) -> Preview {
    let mut lines: Vec<&str> = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let mut table = lines
        .into_iter()
        .take(PREVIEW_LINES)
        .map(|line| line.split(',').map(truncate_cell).collect::<Vec<_>>());

    Preview {
        header: table.next().unwrap_or_default(),
        rows: table.collect(),
    }
}

fn truncate_cell(cell: &str) -> String {
    cell.chars().take(PREVIEW_CELL_CHARS).collect()
}
