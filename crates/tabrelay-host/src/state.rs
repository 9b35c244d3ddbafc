//! State shared by the host's tasks.

use std::time::Instant;

use tokio::sync::watch;

use tabrelay_core::Endpoint;
use tabrelay_core::artifacts::ArtifactStore;
use tabrelay_core::client::{ClientError, RelayClient};
use tabrelay_core::supervisor::SupervisorStatus;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct HostState {
    pub endpoint: Endpoint,
    pub client: RelayClient,
    pub artifacts: ArtifactStore,
    /// Latest snapshot published by the relay supervisor.
    pub supervisor: watch::Receiver<SupervisorStatus>,
    pub started_at: Instant,
}

impl HostState {
    pub fn new(
        endpoint: Endpoint,
        artifacts: ArtifactStore,
        supervisor: watch::Receiver<SupervisorStatus>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: RelayClient::new(&endpoint)?,
            endpoint,
            artifacts,
            supervisor,
            started_at: Instant::now(),
        })
    }

    pub fn supervisor_status(&self) -> SupervisorStatus {
        self.supervisor.borrow().clone()
    }
}
