//! Inventory management for Herdsman.
//!
//! The inventory owns every [`Host`] and the role → hosts map used for host
//! selection. Tasks hold `Arc<Host>` references handed out by
//! [`Inventory::hosts_by_role`].
//!
//! Inventories load from YAML:
//!
//! ```yaml
//! hosts:
//!   - name: master1
//!     address: 10.0.0.2
//!     user: ubuntu
//!     roles: [master, etcd]
//!   - name: node1
//!     address: 10.0.0.3
//! role_groups:
//!   worker: [node1]
//! ```

pub mod host;

pub use host::{Host, LOCAL_HOST};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Implicit role naming every host
pub const ALL: &str = "all";

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Failed to read inventory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("duplicate host: {0}")]
    DuplicateHost(String),

    #[error("role group '{role}' references unknown host '{host}'")]
    UnknownRoleMember { role: String, host: String },
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    hosts: Vec<Host>,
    #[serde(default, alias = "roleGroups")]
    role_groups: IndexMap<String, Vec<String>>,
}

/// Hosts and their roles
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// All hosts indexed by name, in declaration order
    hosts: IndexMap<String, Arc<Host>>,

    /// Role name → member host names, in declaration order
    roles: IndexMap<String, Vec<String>>,

    /// Hosts removed from the run
    deprecated: HashSet<String>,

    /// Source file path
    source: Option<PathBuf>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an inventory from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut inventory = Self::from_yaml_str(&content)?;
        inventory.source = Some(path.to_path_buf());
        Ok(inventory)
    }

    /// Parse an inventory from YAML text
    pub fn from_yaml_str(content: &str) -> InventoryResult<Self> {
        let file: InventoryFile = serde_yaml::from_str(content)?;
        let mut hosts = file.hosts;

        for (role, members) in &file.role_groups {
            for member in members {
                let host = hosts
                    .iter_mut()
                    .find(|h| &h.name == member)
                    .ok_or_else(|| InventoryError::UnknownRoleMember {
                        role: role.clone(),
                        host: member.clone(),
                    })?;
                host.add_role(role.clone());
            }
        }

        let mut inventory = Self::new();
        for host in hosts {
            inventory.add_host(host)?;
        }
        debug!(hosts = inventory.len(), roles = inventory.roles.len(), "Inventory loaded");
        Ok(inventory)
    }

    /// Add a host; its role tags are indexed
    pub fn add_host(&mut self, host: Host) -> InventoryResult<()> {
        if self.hosts.contains_key(&host.name) {
            return Err(InventoryError::DuplicateHost(host.name));
        }
        for role in &host.roles {
            self.roles
                .entry(role.clone())
                .or_default()
                .push(host.name.clone());
        }
        self.hosts.insert(host.name.clone(), Arc::new(host));
        Ok(())
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts.get(name).cloned()
    }

    /// Every live host, in declaration order
    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts
            .values()
            .filter(|h| !self.deprecated.contains(&h.name))
            .cloned()
            .collect()
    }

    /// Live hosts carrying `role`, in declaration order. `all` selects every host.
    pub fn hosts_by_role(&self, role: &str) -> Vec<Arc<Host>> {
        if role == ALL {
            return self.all_hosts();
        }
        self.roles
            .get(role)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| !self.deprecated.contains(*n))
                    .filter_map(|n| self.hosts.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Role names known to the inventory
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Remove a host from every selection for the rest of the run
    pub fn delete_host(&mut self, name: &str) -> InventoryResult<()> {
        if !self.hosts.contains_key(name) {
            return Err(InventoryError::HostNotFound(name.to_string()));
        }
        self.deprecated.insert(name.to_string());
        Ok(())
    }

    /// Whether a host has been deleted
    pub fn is_deprecated(&self, name: &str) -> bool {
        self.deprecated.contains(name)
    }

    /// Number of live hosts
    pub fn len(&self) -> usize {
        self.hosts.len() - self.deprecated.len()
    }

    /// Whether there are no live hosts
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source path, if loaded from a file
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
