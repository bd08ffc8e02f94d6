use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, ServiceKind};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::handler::{self, ServiceHandler};
use crate::plugin::{Service, ServiceOptions};

/// Role of a service that manages its own serving loop.
#[async_trait]
pub trait NativeApi: Send + Sync {
    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// The `native` transport.
#[derive(Default)]
pub struct NativeService {
    shutdown: Mutex<CancellationToken>,
    native: Mutex<Option<Arc<dyn NativeApi>>>,
}

impl NativeService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Service for NativeService {
    fn name(&self) -> &str {
        ServiceKind::NATIVE.as_str()
    }

    fn info(&self) -> Vec<Attribute> {
        vec![Attribute::string("service.mode", ServiceKind::NATIVE.as_str())]
    }

    async fn initialize(&self, options: ServiceOptions) -> anyhow::Result<()> {
        options.roles.require::<dyn NativeApi>()?;
        *self.shutdown.lock() = CancellationToken::new();
        Ok(())
    }

    async fn run(&self, handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()> {
        let native = handler::roles(&handler)
            .get::<dyn NativeApi>()
            .ok_or_else(|| anyhow::anyhow!("service object does not implement NativeApi"))?;
        *self.native.lock() = Some(Arc::clone(&native));

        let shutdown = self.shutdown.lock().clone();
        native.start(shutdown).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.lock().cancel();
        let native = self.native.lock().take();
        match native {
            Some(native) => native.stop().await,
            None => Ok(()),
        }
    }
}
