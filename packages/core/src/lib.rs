//! `keel` Core: service definitions, environment, error taxonomy, log attributes, and field tags.

pub mod attribute;
pub mod definition;
pub mod env;
pub mod errors;
pub mod logger;
pub mod tags;

pub use attribute::{to_json_object, AttrValue, Attribute};
pub use definition::{DefinitionError, Definitions, ServiceDeploy, ServiceKind};
pub use env::{EnvApi, EnvError, ProcessEnv, ServiceEnvs, VarSource};
pub use errors::{ErrorApi, ErrorBuilder, ErrorCode, ErrorFactory, ErrorKind, ServiceError};
pub use logger::{Level, LoggerApi};
pub use tags::Tag;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
