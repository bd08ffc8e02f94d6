//! Outbound client coupling.
//!
//! A service binds a field to another service with a
//! `grpc_client=<binding>` annotation. The application registers a
//! [`GrpcClient`] descriptor under that binding; during bootstrap the
//! runtime resolves where the target lives, asks the [`ClientConnector`] to
//! establish the connection, and stores the client the descriptor builds.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Definitions, ServiceEnvs};

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Where an outbound client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    /// Name of the target service.
    pub service_name: String,
    pub host: String,
    pub port: u16,
}

impl ClientConnection {
    /// `{service}.{namespace}:{coupled port}`, unless `[clients.<service>]`
    /// overrides the host or port.
    #[must_use]
    pub fn resolve(service_name: &str, env: &ServiceEnvs, defs: &Definitions) -> Self {
        let namespace = env.coupled_namespace();
        let mut host = if namespace.is_empty() {
            service_name.to_string()
        } else {
            format!("{service_name}.{namespace}")
        };
        let mut port = env.coupled_port();

        if let Some(overrides) = defs.clients.get(service_name) {
            if let Some(h) = &overrides.host {
                host.clone_from(h);
            }
            if let Some(p) = overrides.port {
                port = p;
            }
        }

        Self {
            service_name: service_name.to_string(),
            host,
            port,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// A type-erased client descriptor.
pub trait ClientDescriptor: Any + Send + Sync {
    /// Service the client talks to.
    fn service_name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`ClientError::EmptyServiceName`] if the descriptor has no
    /// target service.
    fn validate(&self, binding: &str) -> Result<(), ClientError> {
        if self.service_name().is_empty() {
            return Err(ClientError::EmptyServiceName(binding.to_string()));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

/// Builds clients of type `T` once a connection is established.
pub struct GrpcClient<T> {
    pub service_name: String,
    pub new_client: Arc<dyn Fn(ClientConnection) -> T + Send + Sync>,
}

impl<T> GrpcClient<T> {
    pub fn new(
        service_name: impl Into<String>,
        new_client: impl Fn(ClientConnection) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            new_client: Arc::new(new_client),
        }
    }
}

impl<T: 'static> ClientDescriptor for GrpcClient<T> {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> fmt::Debug for GrpcClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcClient")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ClientConnector
// ---------------------------------------------------------------------------

/// Establishes outbound connections before clients are built.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, connection: &ClientConnection) -> anyhow::Result<()>;
}

/// Connects lazily: nothing is dialed until the client is first used.
#[derive(Debug, Clone, Copy, Default)]
pub struct LazyConnector;

#[async_trait]
impl ClientConnector for LazyConnector {
    async fn connect(&self, connection: &ClientConnection) -> anyhow::Result<()> {
        if connection.host.is_empty() {
            anyhow::bail!("empty host for service '{}'", connection.service_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use keel_core::definition::ClientDefinitions;

    use super::*;

    fn envs(vars: &[(&str, &str)]) -> (Definitions, ServiceEnvs) {
        let mut defs = Definitions::default();
        defs.name = "orders".into();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let env = ServiceEnvs::load(&defs, &vars).unwrap();
        (defs, env)
    }

    #[test]
    fn endpoint_uses_namespace_and_coupled_port() {
        let (defs, env) = envs(&[("KEEL_COUPLED_NAMESPACE", "shop"), ("KEEL_COUPLED_PORT", "9000")]);
        let conn = ClientConnection::resolve("billing", &env, &defs);
        assert_eq!(conn.endpoint(), "billing.shop:9000");
    }

    #[test]
    fn definitions_override_endpoint() {
        let (mut defs, env) = envs(&[]);
        defs.clients.insert(
            "billing".into(),
            ClientDefinitions {
                host: Some("localhost".into()),
                port: Some(5000),
            },
        );

        let conn = ClientConnection::resolve("billing", &env, &defs);
        assert_eq!(conn.endpoint(), "localhost:5000");
    }

    #[test]
    fn descriptor_validation() {
        let client = GrpcClient::new("", |conn: ClientConnection| conn.endpoint());
        assert!(matches!(
            client.validate("billing"),
            Err(ClientError::EmptyServiceName(b)) if b == "billing"
        ));
        assert!(GrpcClient::new("billing", |_| ()).validate("billing").is_ok());
    }

    #[tokio::test]
    async fn lazy_connector_accepts_any_host() {
        let conn = ClientConnection {
            service_name: "billing".into(),
            host: "billing".into(),
            port: 7070,
        };
        assert!(LazyConnector.connect(&conn).await.is_ok());
    }
}
