//! Support for testing services together with their features.
//!
//! [`App::setup_test`](crate::app::App::setup_test) lets every feature
//! implementing [`FeatureTester`](crate::plugin::FeatureTester) prepare its
//! test resources. The returned [`ServiceTesting`] runs the features' own
//! checks and tears everything down again.

use std::sync::Arc;

use keel_core::{Attribute, LoggerApi};
use parking_lot::Mutex;

use crate::plugin::{Feature, FeatureSet};

/// A named test run. Testers record failures on it instead of panicking so
/// that every tester gets to run.
#[derive(Debug)]
pub struct Testing {
    name: String,
    failures: Mutex<Vec<String>>,
}

impl Testing {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.failures.lock().push(message.into());
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        !self.failures.lock().is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestOptions {
    pub test_name: String,
    /// Runs every tester's `do_test` right after setup.
    pub run_feature_tests: bool,
}

/// Feature test resources of one test run.
pub struct ServiceTesting {
    testing: Arc<Testing>,
    testers: Vec<Arc<dyn Feature>>,
    service_name: String,
    logger: Arc<dyn LoggerApi>,
}

impl ServiceTesting {
    pub(crate) async fn setup(
        options: &TestOptions,
        features: &FeatureSet,
        service_name: &str,
        logger: Arc<dyn LoggerApi>,
    ) -> Self {
        let testing = Arc::new(Testing::new(options.test_name.clone()));
        let testers: Vec<_> = features
            .iter()
            .into_iter()
            .filter(|feature| feature.tester().is_some())
            .collect();

        for feature in &testers {
            if let Some(tester) = feature.tester() {
                tester.setup(&testing).await;
            }
        }

        let this = Self {
            testing,
            testers,
            service_name: service_name.to_string(),
            logger,
        };
        if options.run_feature_tests {
            this.run_feature_tests().await;
        }
        this
    }

    #[must_use]
    pub fn testing(&self) -> &Testing {
        &self.testing
    }

    /// Runs every tester's checks against the service, recording failures.
    pub async fn run_feature_tests(&self) {
        for feature in &self.testers {
            let Some(tester) = feature.tester() else {
                continue;
            };
            if let Err(e) = tester.do_test(&self.testing, &self.service_name).await {
                self.testing.fail(format!("{}: {e:#}", feature.entry().name()));
            }
        }
    }

    /// Tears down in reverse setup order and returns every recorded failure.
    pub async fn finish(self) -> Vec<String> {
        for feature in self.testers.iter().rev() {
            if let Some(tester) = feature.tester() {
                tester.teardown(&self.testing).await;
            }
        }

        let failures = self.testing.failures();
        for failure in &failures {
            self.logger
                .warn("feature test failed", &[Attribute::string("failure", failure.clone())]);
        }
        failures
    }
}

impl std::fmt::Debug for ServiceTesting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTesting")
            .field("test_name", &self.testing.name())
            .field("testers", &self.testers.len())
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}
