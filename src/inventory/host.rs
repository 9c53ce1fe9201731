//! Host definition for the Herdsman inventory.
//!
//! A [`Host`] is a managed node: a stable name, the address to connect to,
//! SSH parameters, a set of role tags and its own host-scoped [`Cache`].

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;

/// Name used for the control node when a task runs locally
pub const LOCAL_HOST: &str = "LocalHost";

fn default_ssh_port() -> u16 {
    22
}

fn default_arch() -> String {
    "amd64".to_string()
}

/// A managed host in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host name (stable identity, used in logs and results)
    pub name: String,

    /// Address to connect to (defaults to the name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Cluster-internal address, if different from the connect address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_address: Option<String>,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// SSH password (discouraged, use keys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// SSH private key file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    /// CPU architecture
    #[serde(default = "default_arch")]
    pub arch: String,

    /// Role tags (master, etcd, worker, ...)
    #[serde(default)]
    pub roles: IndexSet<String>,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,

    /// Host-local facts stashed by actions
    #[serde(skip)]
    cache: Arc<Cache>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            internal_address: None,
            port: default_ssh_port(),
            user: None,
            password: None,
            private_key_file: None,
            arch: default_arch(),
            roles: IndexSet::new(),
            vars: IndexMap::new(),
            cache: Arc::new(Cache::new()),
        }
    }

    /// Create a new host with hostname/IP
    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut host = Self::new(name);
        host.address = Some(address.into());
        host
    }

    /// The control node, used by local tasks
    pub fn local() -> Self {
        Self::with_address(LOCAL_HOST, "127.0.0.1")
    }

    /// Builder-style role assignment
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Get the actual address to connect to
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// Get the cluster-internal address
    pub fn internal_address(&self) -> &str {
        self.internal_address
            .as_deref()
            .unwrap_or_else(|| self.address())
    }

    /// Add a role tag
    pub fn add_role(&mut self, role: impl Into<String>) {
        self.roles.insert(role.into());
    }

    /// Check if the host carries a role tag
    pub fn has_role(&self, role: &str) -> bool {
        role == "all" || self.roles.contains(role)
    }

    /// Get a variable from this host
    pub fn get_var(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.vars.get(key)
    }

    /// Set a variable on this host
    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// The host-scoped cache.
    ///
    /// Clones of a host share the same cache, so facts recorded while running
    /// one task are visible to later tasks on that host.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(addr) = &self.address {
            write!(f, " ({})", addr)?;
        }
        Ok(())
    }
}
