use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, ServiceKind};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::handler::{self, ServiceHandler};
use crate::plugin::{Service, ServiceOptions};

/// Role of a service running a background worker loop.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Runs the loop until `shutdown` is cancelled.
    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// The `worker` transport.
#[derive(Default)]
pub struct WorkerService {
    shutdown: Mutex<CancellationToken>,
    worker: Mutex<Option<Arc<dyn WorkerApi>>>,
}

impl WorkerService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Service for WorkerService {
    fn name(&self) -> &str {
        ServiceKind::WORKER.as_str()
    }

    fn info(&self) -> Vec<Attribute> {
        vec![Attribute::string("service.mode", ServiceKind::WORKER.as_str())]
    }

    async fn initialize(&self, options: ServiceOptions) -> anyhow::Result<()> {
        options.roles.require::<dyn WorkerApi>()?;
        *self.shutdown.lock() = CancellationToken::new();
        Ok(())
    }

    async fn run(&self, handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()> {
        let worker = handler::roles(&handler)
            .get::<dyn WorkerApi>()
            .ok_or_else(|| anyhow::anyhow!("service object does not implement WorkerApi"))?;
        *self.worker.lock() = Some(Arc::clone(&worker));

        let shutdown = self.shutdown.lock().clone();
        worker.start(shutdown).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.lock().cancel();
        let worker = self.worker.lock().take();
        match worker {
            Some(worker) => worker.stop().await,
            None => Ok(()),
        }
    }
}
