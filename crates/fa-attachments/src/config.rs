//! Per-attribute attachment configuration
//!
//! Each attachment attribute of a host entity is described by one
//! [`AttachmentConfig`], registered with the engine at startup and
//! validated there; configurations are immutable afterwards.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute registration error
#[derive(Debug, Error)]
pub enum AttachmentConfigError {
    #[error("Duplicate attachment attribute: {0}")]
    DuplicateAttribute(String),
    #[error("Invalid attribute name: {0:?}")]
    InvalidAttribute(String),
    #[error("Duplicate version name: {0}")]
    DuplicateVersion(String),
    #[error("Invalid version name {name:?}: {reason}")]
    InvalidVersionName { name: String, reason: &'static str },
    #[error("max_size must be greater than zero")]
    ZeroMaxSize,
    #[error("Invalid base directory {dir:?}: {reason}")]
    InvalidBaseDir { dir: String, reason: &'static str },
}

/// A single typed image operation, mapped onto ImageMagick's `convert`
/// flags by the shipped transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOp {
    Resize { width: u32, height: u32 },
    Thumbnail { width: u32, height: u32 },
    Crop { width: u32, height: u32, x: i32, y: i32 },
    Rotate { degrees: i32 },
    Quality { percent: u8 },
    Strip,
    Flip,
    Flop,
}

impl ImageOp {
    pub fn resize(width: u32, height: u32) -> Self {
        Self::Resize { width, height }
    }

    pub fn thumbnail(width: u32, height: u32) -> Self {
        Self::Thumbnail { width, height }
    }

    /// `convert` arguments for this operation
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Resize { width, height } => {
                vec!["-resize".to_string(), format!("{}x{}", width, height)]
            }
            Self::Thumbnail { width, height } => {
                vec!["-thumbnail".to_string(), format!("{}x{}", width, height)]
            }
            Self::Crop { width, height, x, y } => {
                vec![
                    "-crop".to_string(),
                    format!("{}x{}{:+}{:+}", width, height, x, y),
                ]
            }
            Self::Rotate { degrees } => vec!["-rotate".to_string(), degrees.to_string()],
            Self::Quality { percent } => vec!["-quality".to_string(), percent.to_string()],
            Self::Strip => vec!["-strip".to_string()],
            Self::Flip => vec!["-flip".to_string()],
            Self::Flop => vec!["-flop".to_string()],
        }
    }
}

/// How one named version is derived from the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSpec {
    /// Typed image operations, applied original -> output by the
    /// transformer
    Image(Vec<ImageOp>),
    /// Arbitrary program invocation; `{input}` and `{output}` placeholders
    /// in the arguments are substituted before spawning
    Command { program: String, args: Vec<String> },
}

impl VersionSpec {
    pub fn image(ops: impl IntoIterator<Item = ImageOp>) -> Self {
        Self::Image(ops.into_iter().collect())
    }

    pub fn command(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Command {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Configuration of one attachment attribute.
///
/// `public_original` mirrors the storage rule for versioned attachments:
/// when true and versions are configured, the original is kept in the
/// private area and only derived versions are published; when false the
/// original itself lands in the public area.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// Directory under the storage roots for this attribute; defaults to
    /// the attribute name
    pub base_dir: Option<String>,
    /// Maximum upload size in bytes
    pub max_size: Option<u64>,
    /// Require uploads to pass the backend's image check
    pub is_image: bool,
    /// Keep the original private when versions exist
    pub public_original: bool,
    /// Named versions in derivation order
    pub versions: Vec<(String, VersionSpec)>,
}

impl AttachmentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for an image attribute
    pub fn image() -> Self {
        Self {
            is_image: true,
            ..Self::default()
        }
    }

    pub fn base_dir(mut self, dir: impl Into<String>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn public_original(mut self, value: bool) -> Self {
        self.public_original = value;
        self
    }

    pub fn version(mut self, name: impl Into<String>, spec: VersionSpec) -> Self {
        self.versions.push((name.into(), spec));
        self
    }

    pub fn has_versions(&self) -> bool {
        !self.versions.is_empty()
    }

    pub fn has_version(&self, name: &str) -> bool {
        self.versions.iter().any(|(n, _)| n == name)
    }

    /// Directory for this attribute, falling back to the attribute name
    pub fn base_dir_for<'a>(&'a self, attribute: &'a str) -> &'a str {
        self.base_dir.as_deref().unwrap_or(attribute)
    }

    /// Registration-time validation; a config that fails here is rejected
    /// before the engine ever uses it.
    pub fn validate(&self) -> Result<(), AttachmentConfigError> {
        if self.max_size == Some(0) {
            return Err(AttachmentConfigError::ZeroMaxSize);
        }

        if let Some(dir) = &self.base_dir {
            if dir.is_empty() {
                return Err(AttachmentConfigError::InvalidBaseDir {
                    dir: dir.clone(),
                    reason: "must not be empty",
                });
            }
            if dir.starts_with('/') || dir.contains('\\') {
                return Err(AttachmentConfigError::InvalidBaseDir {
                    dir: dir.clone(),
                    reason: "must be relative",
                });
            }
            if dir.split('/').any(|segment| segment == "..") {
                return Err(AttachmentConfigError::InvalidBaseDir {
                    dir: dir.clone(),
                    reason: "must not contain '..'",
                });
            }
        }

        let mut seen = BTreeSet::new();
        for (name, _) in &self.versions {
            if name.is_empty() {
                return Err(AttachmentConfigError::InvalidVersionName {
                    name: name.clone(),
                    reason: "must not be empty",
                });
            }
            // '_' is excluded on top of '.' and separators so the
            // `{file_id}_{version}{ext}` form stays unambiguous
            if name.contains(['.', '/', '\\', '_']) {
                return Err(AttachmentConfigError::InvalidVersionName {
                    name: name.clone(),
                    reason: "must not contain '.', '_' or path separators",
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(AttachmentConfigError::DuplicateVersion(name.clone()));
            }
        }

        Ok(())
    }
}
