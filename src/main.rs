// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod gateway;
mod models;
mod session;
mod upload;

#[cfg(test)]
mod mock_backend;

use crate::app_state::AppState;
use crate::gateway::Gateway;
use crate::session::SessionController;
use axum::Router;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env()?;
    info!("Backend de análisis en {}", cfg.backend_url);

    // 3. Gateway y controlador de sesión (uno por proceso)
    let gateway = Gateway::from_config(&cfg)?;
    let session = SessionController::new(gateway);

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), session, shutdown_tx);

    // 5. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&app_state.config.frontend_dir))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Panel EDA escuchando en {}", &server_url);

    if app_state.config.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
