//! Directive registry and permission model.
//!
//! A [`DirectiveRegistry`] is built once at process start and passed to the
//! pipeline by reference. Each registration pairs a directive with the
//! explicit set of capabilities it is granted; the pipeline refuses to run a
//! step whose config needs a capability outside that set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::ConfigSchema;
use super::context::{StepContext, StepResult};
use crate::error::{DirectiveError, RegistryError};

/// Capability a directive may be granted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read-only access to Argo CD Applications.
    ArgoCdClient,
    /// Credential lookup.
    CredentialsDb,
    Custom(String),
}

impl Capability {
    fn as_policy_key(&self) -> String {
        match self {
            Self::ArgoCdClient => "argocd_client".to_string(),
            Self::CredentialsDb => "credentials_db".to_string(),
            Self::Custom(name) => format!("custom:{name}"),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_policy_key())
    }
}

/// Capabilities granted to a registered directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    granted: BTreeSet<Capability>,
}

impl Permissions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.granted.insert(capability);
        self
    }

    pub fn allows(&self, capability: &Capability) -> bool {
        self.granted.contains(capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.granted.iter()
    }
}

/// A reference from one step's config to an earlier step's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReference {
    pub alias: String,
    pub key: String,
}

impl StepReference {
    pub fn new(alias: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            key: key.into(),
        }
    }
}

/// A named, schema-validated operation a promotion step can run.
#[async_trait]
pub trait Directive: Send + Sync {
    /// Name steps use to select this directive.
    fn name(&self) -> &'static str;

    fn schema(&self) -> &ConfigSchema;

    /// Capabilities `config` needs to run.
    fn required_capabilities(&self, _config: &Value) -> Vec<Capability> {
        Vec::new()
    }

    /// Earlier step outputs `config` reads.
    fn step_references(&self, _config: &Value) -> Vec<StepReference> {
        Vec::new()
    }

    /// Run against already-validated `config`.
    async fn run(
        &self,
        ctx: &StepContext<'_>,
        config: &Value,
    ) -> Result<StepResult, DirectiveError>;
}

/// A registered directive and its permissions.
#[derive(Clone)]
pub struct Registration {
    pub directive: Arc<dyn Directive>,
    pub permissions: Permissions,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("directive", &self.directive.name())
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Append-only directive registry.
#[derive(Debug, Clone, Default)]
pub struct DirectiveRegistry {
    entries: HashMap<String, Registration>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        directive: Arc<dyn Directive>,
        permissions: Permissions,
    ) -> Result<(), RegistryError> {
        let name = directive.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        self.entries.insert(
            name,
            Registration {
                directive,
                permissions,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Registration> {
        self.entries.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
