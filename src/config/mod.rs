//! Configuration Management Module
//!
//! Serde shapes for the gateway document (targets, groups, users, settings)
//! and the loader used by the binary. The core consumes the parsed
//! [`ConfigDocument`]; it never reads files itself.

pub mod storage;
pub mod types;

pub use storage::{load_document, parse_document, StorageError};
pub use types::{
    expand_home, ConfigDocument, CredentialConfig, GatewaySettings, GroupConfig, TargetConfig,
    UserConfig, DEFAULT_SSH_PORT,
};
