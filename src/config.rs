//! Carga y gestión de configuración del panel (backend de análisis + servidor local).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend_url: Url,
    pub server_addr: String,
    pub request_timeout: Duration,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    /// Permite probar la carga sin tocar el entorno del proceso.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url_str =
            lookup("BACKEND_URL").unwrap_or_else(|| "http://localhost:8000".to_string());
        let backend_url = parse_backend_url(&backend_url_str)?;

        let server_addr =
            lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3000".to_string());

        let timeout_secs = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| anyhow!("REQUEST_TIMEOUT_SECS no es un número válido: {raw}"))?,
            None => 60,
        };
        if timeout_secs == 0 {
            return Err(anyhow!("REQUEST_TIMEOUT_SECS debe ser mayor que 0"));
        }

        let frontend_dir = lookup("FRONTEND_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("frontend"));

        let open_browser = match lookup("OPEN_BROWSER") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| anyhow!("OPEN_BROWSER debe ser true/false, recibido: {raw}"))?,
            None => true,
        };

        Ok(Self {
            backend_url,
            server_addr,
            request_timeout: Duration::from_secs(timeout_secs),
            frontend_dir,
            open_browser,
        })
    }
}

/// La URL base debe ser absoluta y http(s). Se normaliza con barra final
/// para que `Url::join` conserve los prefijos de ruta (p. ej. `/v1/`).
fn parse_backend_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| anyhow!("BACKEND_URL inválida ({raw}): {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("BACKEND_URL debe usar http o https: {raw}"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "si" | "sí" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
