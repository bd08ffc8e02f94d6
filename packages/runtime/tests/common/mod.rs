#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{Attribute, Definitions};
use keel_runtime::plugin::{
    CanBeInitializedOptions, Feature, FeatureController, FeatureEntry, InitializeOptions,
    ServiceOptions,
};
use keel_runtime::{ApiSet, Service, ServiceHandler, ServiceSet};
use parking_lot::Mutex;

pub type OrderLog = Arc<Mutex<Vec<String>>>;

pub fn definitions(types: &[&str], extra: &str) -> Definitions {
    let types = types
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
        name = "orders"
        types = [{types}]
        version = "v1.0.0"
        product = "shop"
        {extra}
        "#
    )
    .parse()
    .unwrap()
}

pub fn vars(deploy: &str, extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut vars = HashMap::from([("KEEL_SERVICE_DEPLOY".to_string(), deploy.to_string())]);
    for (k, v) in extra {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    vars
}

pub trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

struct Greeting(String);

impl Greeter for Greeting {
    fn greet(&self) -> String {
        self.0.clone()
    }
}

/// A feature recording its lifecycle calls.
pub struct Recorder {
    entry: FeatureEntry,
    log: OrderLog,
    greeting: Option<String>,
    fail_cleanup: bool,
    pub initialized: AtomicU32,
}

impl Recorder {
    pub fn new(name: &str, log: &OrderLog) -> Self {
        Self {
            entry: FeatureEntry::new(name),
            log: Arc::clone(log),
            greeting: None,
            fail_cleanup: false,
            initialized: AtomicU32::new(0),
        }
    }

    pub fn greeting(mut self, text: &str) -> Self {
        self.greeting = Some(text.to_string());
        self
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }
}

#[async_trait]
impl Feature for Recorder {
    fn entry(&self) -> &FeatureEntry {
        &self.entry
    }

    fn can_be_initialized(&self, _options: &CanBeInitializedOptions<'_>) -> bool {
        true
    }

    async fn initialize(&self, _options: &InitializeOptions) -> anyhow::Result<()> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fields(&self) -> Vec<Attribute> {
        vec![Attribute::bool(format!("{}.enabled", self.entry.name()), true)]
    }

    fn service_api(&self) -> Option<ApiSet> {
        let text = self.greeting.clone()?;
        Some(ApiSet::new().with::<dyn Greeter>(Arc::new(Greeting(text))))
    }

    fn controller(&self) -> Option<&dyn FeatureController> {
        Some(self)
    }
}

#[async_trait]
impl FeatureController for Recorder {
    async fn start(&self, _service: &(dyn std::any::Any + Send + Sync)) -> anyhow::Result<()> {
        self.log.lock().push(format!("start:{}", self.entry.name()));
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("cleanup:{}", self.entry.name()));
        if self.fail_cleanup {
            anyhow::bail!("{} cleanup failed", self.entry.name());
        }
        Ok(())
    }
}

/// A transport that needs no role from the service object.
pub struct Idle;

#[async_trait]
impl Service for Idle {
    fn name(&self) -> &str {
        "idle"
    }

    fn info(&self) -> Vec<Attribute> {
        Vec::new()
    }

    async fn initialize(&self, _options: ServiceOptions) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(&self, _handler: Arc<dyn ServiceHandler>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn idle() -> ServiceSet {
    let transports = ServiceSet::new();
    transports.register(Idle);
    transports
}
