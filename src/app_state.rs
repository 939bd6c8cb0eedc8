use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, session::SessionController};

/// Estado compartido por todos los handlers. El controlador de sesión se
/// crea una única vez al arrancar y vive lo que vive el proceso.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub session: SessionController,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        session: SessionController,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Self {
        Self {
            config,
            session,
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }
}
