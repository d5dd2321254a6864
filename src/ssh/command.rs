//! Command line construction and output capture types.
//!
//! Every command runs as `<login shell> -lc '<script>'` where `<script>` is:
//!
//! ```text
//! export NAME='value'; ...; cd '<dir>' || exit 1; <command>
//! ```
//!
//! Values are single-quoted so they reach the remote process literally. The
//! caller's `command` is opaque shell text and is not inspected.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Default interpreter for uploaded scripts
pub const DEFAULT_INTERPRETER: &str = "/bin/bash";

/// Remote directory used when a script has no explicit remote path
pub const DEFAULT_SCRIPT_DIR: &str = "/tmp";

/// Exit status reported when the remote sent none (killed by signal, channel dropped)
pub const UNKNOWN_EXIT_STATUS: i32 = -1;

/// Options for a single command execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Directory to change into before running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Variables exported before the command
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Bound on the command wait (connection setup has its own bound)
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_secs")]
    pub timeout: Option<Duration>,

    /// Request a pseudo terminal for the exec channel
    #[serde(default)]
    pub allocate_pty: bool,
}

impl RunOptions {
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for uploading and running a local script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptOptions {
    /// Remote destination (default `/tmp/<basename>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,

    /// Interpreter command, may include arguments (default `/bin/bash`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    #[serde(flatten)]
    pub run: RunOptions,
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Decode raw stream bytes as UTF-8, replacing undecodable sequences
    pub fn from_raw(stdout: &[u8], stderr: &[u8], exit_status: Option<u32>) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            exit_code: exit_status
                .map(|code| i32::try_from(code).unwrap_or(UNKNOWN_EXIT_STATUS))
                .unwrap_or(UNKNOWN_EXIT_STATUS),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Quote a string for POSIX shells.
///
/// Safe words are returned unchanged; everything else is wrapped in single
/// quotes with embedded single quotes spliced as `'"'"'`.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Environment names cannot be quoted, so they are checked instead
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build the full exec string for `command`.
pub fn build_exec_command(
    login_shell: &str,
    command: &str,
    options: &RunOptions,
) -> Result<String, SessionError> {
    let mut script = String::new();

    for (name, value) in &options.environment {
        if !is_valid_env_name(name) {
            return Err(SessionError::InvalidRequest(format!(
                "invalid environment variable name: {:?}",
                name
            )));
        }
        script.push_str(&format!("export {}={}; ", name, shell_quote(value)));
    }

    if let Some(dir) = options.working_directory.as_deref().filter(|d| !d.is_empty()) {
        script.push_str(&format!("cd {} || exit 1; ", shell_quote(dir)));
    }

    script.push_str(command);

    Ok(format!("{} -lc {}", shell_quote(login_shell), shell_quote(&script)))
}

/// Command that runs an uploaded script with `interpreter`
pub fn build_script_command(interpreter: &str, remote_path: &str) -> Result<String, SessionError> {
    let words: Vec<String> = interpreter.split_whitespace().map(shell_quote).collect();
    if words.is_empty() {
        return Err(SessionError::InvalidRequest(
            "interpreter cannot be empty".to_string(),
        ));
    }
    Ok(format!("{} {}", words.join(" "), shell_quote(remote_path)))
}

/// `/tmp/<basename>` for a local script path
pub fn default_remote_path(local_path: &Path) -> Result<String, SessionError> {
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            SessionError::InvalidRequest(format!(
                "script path has no file name: {}",
                local_path.display()
            ))
        })?;
    Ok(format!("{}/{}", DEFAULT_SCRIPT_DIR, name))
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64))
    }
}
