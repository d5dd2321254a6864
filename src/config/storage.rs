//! Configuration document loading
//!
//! The document is read once at process start and handed to the core as an
//! in-memory value; nothing here is consulted again afterwards.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use super::types::ConfigDocument;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a configuration document from JSON text
pub fn parse_document(text: &str) -> Result<ConfigDocument, serde_json::Error> {
    serde_json::from_str(text)
}

/// Read and parse the configuration document at `path`
pub fn load_document(path: impl AsRef<Path>) -> Result<ConfigDocument, StorageError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let text = std::fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: shown.clone(),
        source,
    })?;

    let document = parse_document(&text).map_err(|source| StorageError::Parse {
        path: shown.clone(),
        source,
    })?;

    info!(
        "Configuration loaded from {}: {} targets, {} groups, users section {}",
        shown,
        document.targets.len(),
        document.groups.as_ref().map_or(0, Vec::len),
        if document.users.is_some() { "present" } else { "absent" }
    );

    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_document_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"targets": [{{"name": "web", "host": "h", "user": "u"}}],
                "settings": {{"probe_timeout_secs": 1}}}}"#
        )
        .unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.targets[0].name, "web");
        assert_eq!(doc.settings.probe_timeout_secs, 1);
        assert_eq!(doc.settings.connect_timeout_secs, 15);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_document(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[test]
    fn test_load_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ targets: ").unwrap();
        let err = load_document(file.path()).unwrap_err();
        assert!(matches!(err, StorageError::Parse { .. }));
    }
}
