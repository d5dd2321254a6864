//! sshgate - API-key authorized command execution on remote machines over SSH
//!
//! The library exposes the authorization and session core:
//! - [`config`]: the declarative targets/groups/users document
//! - [`registry`]: read-only target lookup
//! - [`permissions`]: validation and the API key → user → groups → targets model
//! - [`ssh`]: one-shot remote sessions (connect, run, upload, close)
//! - [`recorder`]: best-effort operation recording
//! - [`gateway`]: the authorized operations offered to a request layer

pub mod config;
pub mod gateway;
pub mod permissions;
pub mod recorder;
pub mod registry;
pub mod request;
pub mod ssh;

pub use gateway::{ExecutionReport, Gateway, GatewayError, Reachability, TargetDiagnostics};
pub use permissions::{PermissionSnapshot, SchemaError};
pub use recorder::{MemoryRecorder, OperationRecord, OperationRecorder, TracingRecorder};
pub use registry::{mask_value, Target, TargetRegistry};
pub use request::extract_api_key;
