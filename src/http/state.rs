//! Shared state handed to every request handler.

use std::sync::Arc;
use std::time::Duration;

use crate::admission::AdmissionController;
use crate::clients::ClientRegistry;
use crate::config::TurnstileConfig;
use crate::error::Result;
use crate::forward::{ForwardingExecutor, ReqwestTransport};

/// Everything a handler needs: who the clients are, whether to admit, and
/// how to forward.
#[derive(Clone)]
pub struct GatewayState {
    pub clients: Arc<ClientRegistry>,
    pub admission: Arc<AdmissionController>,
    pub executor: Arc<ForwardingExecutor>,
}

impl GatewayState {
    pub fn new(
        clients: ClientRegistry,
        admission: AdmissionController,
        executor: ForwardingExecutor,
    ) -> Self {
        Self {
            clients: Arc::new(clients),
            admission: Arc::new(admission),
            executor: Arc::new(executor),
        }
    }

    /// Build the production wiring: reqwest transport, tracing sink.
    pub fn from_config(config: &TurnstileConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(
            Duration::from_secs(config.upstream.request_timeout_secs),
            config.upstream.max_idle_connections,
        )?;
        let executor = ForwardingExecutor::new(Arc::new(transport), &config.upstream);
        let admission = AdmissionController::with_history(
            config.quotas.clone(),
            config.admission.history_capacity,
            Duration::from_secs(config.admission.history_window_secs),
        );
        let clients = ClientRegistry::new(config.clients.clone());

        Ok(Self::new(clients, admission, executor))
    }
}
