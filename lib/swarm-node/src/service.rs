//! Lifecycle shared by every role

use crate::error::Result;
use crate::shutdown::{ShutdownSignal, TaskSet};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

/// A long-running role: the dispatcher, a worker node or the data store
#[async_trait]
pub trait Service: Send {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Bind transports and spawn the background loops. Returns the address
    /// the reliable listener ended up bound to.
    async fn start(&mut self) -> Result<SocketAddr>;

    /// Signal every loop, close transports and join tasks. Idempotent.
    async fn stop(&mut self) -> Result<()>;
}

/// Start `service`, run it until Ctrl-C, then stop it
pub async fn run_until_ctrl_c<S: Service + ?Sized>(service: &mut S) -> Result<()> {
    let addr = service.start().await?;
    info!("{} listening on {}", service.name(), addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down {}...", service.name());
    service.stop().await
}

/// Handles of a started role
pub(crate) struct Running {
    pub shutdown: ShutdownSignal,
    pub tasks: TaskSet,
    pub local_addr: SocketAddr,
}

impl Running {
    /// Signal the loops and join them within `grace`
    pub async fn stop(self, name: &str, grace: Duration) {
        self.shutdown.trigger();
        let aborted = self.tasks.join(grace).await;
        if aborted > 0 {
            warn!("Aborted {} {} tasks after {:?}", aborted, name, grace);
        }
        info!("{} on {} stopped", name, self.local_addr);
    }
}
