//! Engine configuration
//!
//! The storage roots and URL prefix are built once at process start and
//! handed to the engine constructor. The engine never reads them from
//! ambient global state, and they are read-only afterwards; moving roots
//! without migrating existing files breaks previously stored URLs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Filesystem roots and URL prefix for attachment storage.
///
/// `public_dir` holds browser-reachable files and maps to `url_prefix`;
/// `private_dir` holds originals that never get a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRoots {
    /// Directory for publicly accessible files, usually under the web root
    pub public_dir: PathBuf,
    /// Directory for private original versions of files
    pub private_dir: PathBuf,
    /// URL prefix mapping `public_dir` into browser space
    pub url_prefix: String,
}

impl AttachmentRoots {
    pub fn new(
        public_dir: impl Into<PathBuf>,
        private_dir: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let roots = Self {
            public_dir: public_dir.into(),
            private_dir: private_dir.into(),
            url_prefix: url_prefix.into(),
        };
        roots.validate()?;
        Ok(roots)
    }

    /// Load roots from `FILEATTACH_PUBLIC_DIR`, `FILEATTACH_PRIVATE_DIR`
    /// and `FILEATTACH_URL_PREFIX`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |key: &str| {
            std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
        };

        Self::new(
            var("FILEATTACH_PUBLIC_DIR")?,
            var("FILEATTACH_PRIVATE_DIR")?,
            var("FILEATTACH_URL_PREFIX")?,
        )
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    pub fn private_dir(&self) -> &Path {
        &self.private_dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.public_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "public_dir".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.private_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "private_dir".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.url_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "url_prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
