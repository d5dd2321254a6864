//! Target Registry
//!
//! Immutable, process-lifetime view of the configured remote machines.
//! Built once from the validated document; never mutated afterwards, so it is
//! shared across requests behind an `Arc` without locking.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{expand_home, CredentialConfig, TargetConfig};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Duplicate target name: {0}")]
    Duplicate(String),
}

/// Credential reference resolved from the configuration.
///
/// Key material is parsed lazily by the session on first connection.
#[derive(Clone)]
pub enum Credential {
    /// Inline private key material
    KeyMaterial {
        material: Zeroizing<String>,
        passphrase: Option<Zeroizing<String>>,
    },
    /// Private key file read at connect time
    KeyFile {
        path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    /// Discovered keys and agent only
    Ambient,
}

impl Credential {
    /// Short, secret-free description used in logs
    pub fn describe(&self) -> String {
        match self {
            Self::KeyMaterial { .. } => "inline key".to_string(),
            Self::KeyFile { path, .. } => format!("key file {}", mask_value(&path.display().to_string())),
            Self::Ambient => "ambient".to_string(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.describe())
    }
}

impl From<CredentialConfig> for Credential {
    fn from(config: CredentialConfig) -> Self {
        match config {
            CredentialConfig::Key {
                material,
                passphrase,
            } => Self::KeyMaterial {
                material: Zeroizing::new(material),
                passphrase: passphrase.map(Zeroizing::new),
            },
            CredentialConfig::KeyFile { path, passphrase } => Self::KeyFile {
                path: expand_home(&path),
                passphrase: passphrase.map(Zeroizing::new),
            },
            CredentialConfig::Ambient => Self::Ambient,
        }
    }
}

/// A configured remote machine
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub credential: Credential,
}

impl Target {
    pub fn from_config(config: &TargetConfig) -> Self {
        Self {
            name: config.name.trim().to_string(),
            host: config.host.clone(),
            user: config.user.clone(),
            port: config.port,
            credential: config.effective_credential().into(),
        }
    }

    /// Masked connection details for server-side debug logs
    pub fn masked_details(&self) -> String {
        format!(
            "HOST={}, USER={}, PORT={}, CREDENTIAL={}",
            mask_value(&self.host),
            mask_value(&self.user),
            self.port,
            self.credential.describe()
        )
    }
}

/// Read-only lookup of targets by name, preserving document order
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<Target>>,
    index: HashMap<String, usize>,
}

impl TargetRegistry {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for target in targets {
            if registry.index.contains_key(&target.name) {
                return Err(RegistryError::Duplicate(target.name));
            }
            registry
                .index
                .insert(target.name.clone(), registry.targets.len());
            registry.targets.push(Arc::new(target));
        }
        Ok(registry)
    }

    /// Target names in document order
    pub fn list_targets(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    /// Look up a target; absent names are an error, never a silent fallback
    pub fn credentials_for(&self, name: &str) -> Result<Arc<Target>, RegistryError> {
        self.index
            .get(name)
            .map(|&i| self.targets[i].clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Mask a value by replacing every other character with `*`.
pub fn mask_value(value: &str) -> String {
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i % 2 == 1 { '*' } else { c })
        .collect()
}
