//! Step config validation and binding.
//!
//! Each directive ships a JSON Schema (Draft 7) describing its config. Raw
//! config is validated against it first, reporting every violated constraint,
//! and only then bound into the directive's typed config struct.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, Violation};

/// A compiled config schema for one directive.
pub struct ConfigSchema {
    directive: String,
    document: Value,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for ConfigSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSchema")
            .field("directive", &self.directive)
            .finish_non_exhaustive()
    }
}

impl ConfigSchema {
    /// Compile a schema document.
    pub fn new(directive: &str, document: Value) -> Result<Self, ConfigError> {
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft7)
            .build(&document)
            .map_err(|e| ConfigError::Schema {
                directive: directive.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            directive: directive.to_string(),
            document,
            validator,
        })
    }

    /// Parse and compile an embedded schema file.
    pub fn from_json(directive: &str, raw: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(raw).map_err(|e| ConfigError::Schema {
            directive: directive.to_string(),
            message: e.to_string(),
        })?;
        Self::new(directive, document)
    }

    pub fn directive(&self) -> &str {
        &self.directive
    }

    /// The schema document, as published to config authors.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validate `config`, collecting every violation.
    pub fn validate(&self, config: &Value) -> Result<(), ConfigError> {
        let violations: Vec<Violation> = self
            .validator
            .iter_errors(config)
            .map(|err| Violation {
                path: err.instance_path.to_string(),
                message: err.to_string(),
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                directive: self.directive.clone(),
                violations,
            })
        }
    }
}

/// Validate `config` against `schema`.
pub fn validate(schema: &ConfigSchema, config: &Value) -> Result<(), ConfigError> {
    schema.validate(config)
}

/// Bind already-validated config into `T`.
///
/// A failure here means the schema and `T` disagree, which is a bug rather
/// than a user error.
pub fn bind<T: DeserializeOwned>(directive: &str, config: &Value) -> Result<T, ConfigError> {
    serde_json::from_value(config.clone()).map_err(|e| ConfigError::Bind {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}
