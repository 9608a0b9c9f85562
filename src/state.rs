use crate::config::Config;
use crate::plugin::HookStageDispatcher;
use crate::session::SessionTransportRegistry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state handed to the web layer and the binary.
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub sessions: Arc<SessionTransportRegistry>,
    pub dispatcher: Arc<HookStageDispatcher>,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: Config,
        dispatcher: Arc<HookStageDispatcher>,
    ) -> (Arc<Self>, tokio::sync::broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(16);

        let state = Arc::new(Self {
            config: Arc::new(RwLock::new(config)),
            sessions: Arc::new(SessionTransportRegistry::new()),
            dispatcher,
            shutdown_tx,
        });

        (state, shutdown_rx)
    }

    pub async fn shutdown(&self) {
        tracing::info!("Initiating shutdown");
        let _ = self.shutdown_tx.send(());
    }
}
