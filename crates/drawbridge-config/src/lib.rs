//! # Drawbridge Config
//!
//! Process-wide configuration, fixed at startup. The binary loads a
//! [`Config`] from TOML, applies CLI [`ConfigOverrides`], resolves paths
//! against the working directory and then shares it read-only.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
