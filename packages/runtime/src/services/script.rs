use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, ServiceKind};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::handler::{self, ServiceHandler};
use crate::plugin::{Service, ServiceOptions};

/// Role of a one-shot service.
#[async_trait]
pub trait ScriptApi: Send + Sync {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()>;

    /// Called once during shutdown, after `run` returned.
    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// The `script` transport. It runs in the caller's task and is never
/// combined with another transport.
#[derive(Default)]
pub struct ScriptService {
    shutdown: Mutex<CancellationToken>,
    script: Mutex<Option<Arc<dyn ScriptApi>>>,
}

impl ScriptService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Service for ScriptService {
    fn name(&self) -> &str {
        ServiceKind::SCRIPT.as_str()
    }

    fn info(&self) -> Vec<Attribute> {
        vec![Attribute::string("service.mode", ServiceKind::SCRIPT.as_str())]
    }

    async fn initialize(&self, options: ServiceOptions) -> anyhow::Result<()> {
        options.roles.require::<dyn ScriptApi>()?;
        *self.shutdown.lock() = CancellationToken::new();
        Ok(())
    }

    async fn run(&self, handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()> {
        let script = handler::roles(&handler)
            .get::<dyn ScriptApi>()
            .ok_or_else(|| anyhow::anyhow!("service object does not implement ScriptApi"))?;
        *self.script.lock() = Some(Arc::clone(&script));

        let shutdown = self.shutdown.lock().clone();
        script.run(shutdown).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.lock().cancel();
        let script = self.script.lock().take();
        match script {
            Some(script) => script.cleanup().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::api::ApiSet;

    #[derive(Default)]
    struct Counter {
        runs: AtomicU32,
        cleanups: AtomicU32,
    }

    #[async_trait]
    impl ScriptApi for Counter {
        async fn run(&self, _shutdown: CancellationToken) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl ServiceHandler for Counter {
        fn expose(self: Arc<Self>, roles: &mut ApiSet) {
            roles.insert::<dyn ScriptApi>(self);
        }
    }

    #[tokio::test]
    async fn runs_once_then_cleans_up() {
        let counter = Arc::new(Counter::default());
        let script = ScriptService::new();

        script.run(Arc::clone(&counter) as Arc<dyn ServiceHandler>).await.unwrap();
        script.stop().await.unwrap();
        script.stop().await.unwrap();

        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert_eq!(counter.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_objects_without_the_role() {
        let script = ScriptService::new();
        let err = script.run(Arc::new(())).await.unwrap_err();
        assert!(err.to_string().contains("ScriptApi"));
        script.stop().await.unwrap();
    }
}
