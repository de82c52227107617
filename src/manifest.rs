//! The deployment manifest (`coapps.json`).
//!
//! Names the target document and lists what to attach to it:
//!
//! ```json
//! {
//!   "documentName": "_design/app",
//!   "description": "My couchapp",
//!   "attachments": ["index.html"],
//!   "directories": ["static"]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Default manifest file name, looked up in the working directory.
pub const MANIFEST_FILE: &str = "coapps.json";

/// What to deploy, and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Id of the target document (e.g. `_design/app`).
    #[serde(alias = "document_name", alias = "name")]
    pub document_name: String,

    /// Free-form description, logged at batch start.
    #[serde(default)]
    pub description: String,

    /// Individual files to attach, in upload order.
    #[serde(default, alias = "attachmentList", alias = "attachment_list")]
    pub attachments: Vec<PathBuf>,

    /// Directories whose files are attached after `attachments`.
    #[serde(default, alias = "directoryList", alias = "directory_list")]
    pub directories: Vec<PathBuf>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(path: &Path, contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| DeployError::ConfigRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Read and parse the manifest at `path`.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let contents = std::fs::read_to_string(path).map_err(|e| DeployError::ConfigRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let manifest = Manifest::from_json(path, &contents)?;
    tracing::info!(
        path = %path.display(),
        document = %manifest.document_name,
        attachments = manifest.attachments.len(),
        directories = manifest.directories.len(),
        "Manifest read"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let json = r#"{
            "documentName": "_design/app",
            "description": "demo",
            "attachments": ["index.html", "app.js"],
            "directories": ["static"]
        }"#;
        let m = Manifest::from_json(Path::new("coapps.json"), json).unwrap();
        assert_eq!(m.document_name, "_design/app");
        assert_eq!(m.description, "demo");
        assert_eq!(m.attachments.len(), 2);
        assert_eq!(m.directories, vec![PathBuf::from("static")]);
    }

    #[test]
    fn test_missing_lists_default_to_empty() {
        let m = Manifest::from_json(Path::new("coapps.json"), r#"{"name": "doc"}"#).unwrap();
        assert_eq!(m.document_name, "doc");
        assert!(m.attachments.is_empty());
        assert!(m.directories.is_empty());
    }

    #[test]
    fn test_invalid_json_is_config_read_error() {
        let err = Manifest::from_json(Path::new("coapps.json"), "{ not json").unwrap_err();
        assert_eq!(err.kind(), "ConfigReadError");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_file_is_config_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_manifest(&dir.path().join(MANIFEST_FILE)).unwrap_err();
        assert!(matches!(err, DeployError::ConfigRead { .. }));
    }
}
