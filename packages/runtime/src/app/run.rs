//! Run and shutdown.

use std::sync::Arc;
use std::time::Duration;

use keel_core::{Attribute, LoggerApi, ServiceKind};
use tokio::sync::mpsc;

use super::{App, AppState, ShutdownSignal};
use crate::error::AbortError;
use crate::handler::ServiceHandler;

pub(crate) const RUN_ERROR: &str = "could not execute service";

/// How long shutdown waits for transports to report failures after being
/// stopped.
const FAILURE_GRACE: Duration = Duration::from_secs(1);

/// Resolves on SIGINT, or SIGTERM on unix.
async fn termination_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

impl App {
    /// Bootstraps `service`, runs its transports until a shutdown signal or
    /// the first transport failure, then shuts down.
    ///
    /// In test deployment this returns right after bootstrap.
    ///
    /// # Errors
    ///
    /// Returns the [`AbortError`] of a failed bootstrap or run. It has
    /// already been logged at fatal severity.
    pub async fn run<S: ServiceHandler>(&mut self, service: S) -> Result<(), AbortError> {
        let mut service = Arc::new(service);
        if let Err(err) = self.bootstrap(&mut service).await {
            return Err(self.fail(err));
        }
        if let Err(e) = self.state.transition(AppState::Running) {
            return Err(self.fail(AbortError::new(RUN_ERROR, e)));
        }

        if self.envs.is_test() {
            return Ok(());
        }

        let service: Arc<dyn ServiceHandler> = service;
        let outcome = match self.run_services(Arc::clone(&service)).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        };
        self.shutdown(service.as_ref()).await;
        outcome
    }

    /// Like [`run`](Self::run), but exits the process with status 1 after an
    /// abort.
    pub async fn start<S: ServiceHandler>(mut self, service: S) {
        if self.run(service).await.is_err() {
            std::process::exit(1);
        }
    }

    async fn run_services(&mut self, service: Arc<dyn ServiceHandler>) -> Result<(), AbortError> {
        if self.definitions.is_service_type(&ServiceKind::SCRIPT) {
            let Some(script) = self.active.first().cloned() else {
                return Ok(());
            };
            self.logger.info("service is running", &script.info());
            return script
                .run(service)
                .await
                .map_err(|e| AbortError::new(RUN_ERROR, e));
        }

        let (tx, mut rx) = mpsc::channel::<AbortError>(self.active.len().max(1));
        for transport in &self.active {
            self.logger.info("service is running", &transport.info());

            let transport = Arc::clone(transport);
            let service = Arc::clone(&service);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.run(service).await {
                    let message = format!("{} service failed", transport.name());
                    let _ = tx.send(AbortError::new(message, e)).await;
                }
            });
        }
        drop(tx);

        let signal: ShutdownSignal = self
            .shutdown_signal
            .lock()
            .take()
            .unwrap_or_else(|| Box::pin(termination_signal()));

        let outcome = tokio::select! {
            Some(err) = rx.recv() => Err(err),
            () = signal => {
                self.logger.info("received termination signal", &[]);
                Ok(())
            }
        };
        *self.pending.lock() = Some(rx);
        outcome
    }

    /// Failures transports reported after the run ended, waiting at most
    /// [`FAILURE_GRACE`] for the ones still finishing.
    async fn drain_pending(&self) -> Vec<AbortError> {
        let Some(mut rx) = self.pending.lock().take() else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        let _ = tokio::time::timeout(FAILURE_GRACE, async {
            while let Some(err) = rx.recv().await {
                failures.push(err);
            }
        })
        .await;
        failures
    }

    /// Stops everything bootstrap started: the service's finish hook, then
    /// feature controllers in reverse initialization order, then every
    /// active transport. Failures are logged and collected; every component
    /// is still stopped.
    pub async fn shutdown(&self, service: &dyn ServiceHandler) -> Vec<anyhow::Error> {
        if self.state.get() == AppState::Running {
            let _ = self.state.transition(AppState::ShuttingDown);
        }

        service.on_finish().await;
        self.logger.info("stopping service", &[]);

        let mut errors = Vec::new();

        self.logger.debug("stopping dependent services", &[]);
        for err in self.features.cleanup_all().await {
            self.logger.error("could not clean up feature", &[Attribute::error(&err)]);
            errors.push(anyhow::Error::new(err));
        }

        for transport in &self.active {
            if let Err(e) = transport.stop().await {
                self.logger.error(
                    "could not stop service",
                    &[
                        Attribute::string("service.mode", transport.name().to_string()),
                        Attribute::string("error", format!("{e:#}")),
                    ],
                );
                errors.push(e);
            }
        }

        for failure in self.drain_pending().await {
            self.logger.error("service failed during shutdown", &failure.attributes());
            errors.push(anyhow::Error::new(failure));
        }

        if self.state.get() == AppState::ShuttingDown {
            let _ = self.state.transition(AppState::Stopped);
        }
        self.logger.info("service stopped", &[]);
        errors
    }
}
