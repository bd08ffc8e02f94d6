use std::collections::HashMap;
use std::time::SystemTime;

use keel_core::{Definitions, ServiceDeploy, ServiceKind};

/// Identity of the running service, shared with every feature and
/// transport.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub name: String,
    pub product: String,
    pub version: String,
    pub kinds: Vec<ServiceKind>,
    pub deployment: ServiceDeploy,
    pub started_at: SystemTime,
}

impl ServiceContext {
    #[must_use]
    pub fn new(defs: &Definitions, deployment: ServiceDeploy) -> Self {
        Self {
            name: defs.service_name().to_string(),
            product: defs.product.clone(),
            version: defs.version.clone(),
            kinds: defs.service_types().into_iter().map(|(kind, _)| kind).collect(),
            deployment,
            started_at: SystemTime::now(),
        }
    }

    /// `hybrid` when more than one transport kind is declared.
    #[must_use]
    pub fn service_type(&self) -> String {
        match self.kinds.as_slice() {
            [single] => single.to_string(),
            [] => String::new(),
            _ => "hybrid".to_string(),
        }
    }

    /// Tags describing the service, handed to features and transports.
    #[must_use]
    pub fn tags(&self) -> HashMap<String, String> {
        HashMap::from([
            ("service.name".to_string(), self.name.clone()),
            ("service.type".to_string(), self.service_type()),
            ("service.version".to_string(), self.version.clone()),
            ("service.product".to_string(), self.product.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(types: &[&str]) -> ServiceContext {
        let mut defs = Definitions::default();
        defs.name = "orders".into();
        defs.product = "shop".into();
        defs.version = "v1".into();
        defs.types = types.iter().map(|t| (*t).to_string()).collect();
        ServiceContext::new(&defs, ServiceDeploy::Local)
    }

    #[test]
    fn single_kind_keeps_its_name() {
        let ctx = context(&["grpc:7000"]);
        assert_eq!(ctx.service_type(), "grpc");
        assert_eq!(ctx.tags()["service.name"], "orders");
    }

    #[test]
    fn several_kinds_are_hybrid() {
        assert_eq!(context(&["grpc", "worker"]).service_type(), "hybrid");
    }
}
