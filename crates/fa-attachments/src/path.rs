//! Relative path resolution for attachment files
//!
//! A [`FilePath`] identifies one logical attachment instance as a
//! `(dir, file_id, ext)` triple and composes every derived form from it:
//! the unversioned and versioned relative paths, the absolute public and
//! private paths, and the browser URL. All composition is pure string work;
//! no I/O happens here.
//!
//! Generated file ids are SHA-256 hex and therefore never contain `.`, `_`
//! or path separators; together with the version-name rules enforced at
//! configuration time this keeps the mapping from `(dir, file_id, ext,
//! version)` to relative paths injective.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use fa_core::HostIdentity;

/// Path resolution error
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Invalid path: {0}")]
    Invalid(String),
}

/// Identifier of one stored attachment instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    dir: String,
    file_id: String,
    ext: String,
}

impl FilePath {
    /// Parse a relative path (as stored on the host entity) into its
    /// dir/file_id/ext components.
    ///
    /// The input is normalized first: `.` segments and empty segments are
    /// dropped, `..` segments resolve against their parent. Absolute paths,
    /// paths escaping the storage root and paths without a usable file id
    /// are rejected.
    pub fn parse(relative: &str) -> Result<Self, PathError> {
        if relative.trim().is_empty() {
            return Err(PathError::Invalid("empty path".to_string()));
        }
        if relative.starts_with('/') {
            return Err(PathError::Invalid(format!("not a relative path: {relative}")));
        }
        if relative.contains('\\') {
            return Err(PathError::Invalid(format!(
                "backslash in path: {relative}"
            )));
        }

        let mut parts = normalize_segments(relative)?;
        let Some(basename) = parts.pop() else {
            return Err(PathError::Invalid(format!("no file name in: {relative}")));
        };
        let dir = parts.join("/");

        let file_id = basename.split('.').next().unwrap_or("");
        if file_id.is_empty() {
            return Err(PathError::Invalid(format!("no file id in: {relative}")));
        }
        let ext = match basename.rfind('.') {
            Some(idx) => &basename[idx..],
            None => "",
        };

        Ok(Self {
            dir,
            file_id: file_id.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Build a `FilePath` from explicit components.
    ///
    /// `file_id` must be non-empty and free of dots and separators; `ext`
    /// is either empty or a single `.xyz` suffix; `dir` is normalized the
    /// same way [`FilePath::parse`] normalizes it.
    pub fn from_parts(dir: &str, file_id: &str, ext: &str) -> Result<Self, PathError> {
        if file_id.is_empty() {
            return Err(PathError::Invalid("empty file id".to_string()));
        }
        if file_id.contains(['.', '/', '\\']) {
            return Err(PathError::Invalid(format!(
                "file id contains reserved characters: {file_id}"
            )));
        }
        if !ext.is_empty() {
            let rest = ext
                .strip_prefix('.')
                .ok_or_else(|| PathError::Invalid(format!("extension without leading dot: {ext}")))?;
            if rest.is_empty() || rest.contains(['.', '/', '\\']) {
                return Err(PathError::Invalid(format!("invalid extension: {ext}")));
            }
        }

        let dir = if dir.is_empty() {
            String::new()
        } else {
            if dir.starts_with('/') || dir.contains('\\') {
                return Err(PathError::Invalid(format!("invalid directory: {dir}")));
            }
            normalize_segments(dir)?.join("/")
        };

        Ok(Self {
            dir,
            file_id: file_id.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Derive a fresh identifier for a new upload.
    ///
    /// The file id is the SHA-256 hex digest of attribute name, host
    /// identity and the current timestamp at nanosecond precision; the
    /// directory is a `{base_dir}/{year}/{month}/{day}` bucket, which
    /// bounds directory fan-out. The extension is taken from the uploaded
    /// file's original name.
    pub fn generate(
        base_dir: &str,
        attribute: &str,
        identity: &HostIdentity,
        original_filename: &str,
    ) -> Result<Self, PathError> {
        let now = Utc::now();
        let dir = format!("{}/{}", base_dir, now.format("%Y/%m/%d"));

        let stamp = now.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let digest = Sha256::digest(format!("{attribute}{identity}{stamp}").as_bytes());
        let file_id = hex::encode(digest);

        let ext = match Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
        {
            Some(e) if !e.is_empty() => format!(".{e}"),
            _ => String::new(),
        };

        Self::from_parts(&dir, &file_id, &ext)
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    /// Relative path of the unversioned file
    pub fn unversioned(&self) -> String {
        self.versioned("")
    }

    /// Relative path of a versioned file; the empty version name denotes
    /// the unversioned original.
    pub fn versioned(&self, version: &str) -> String {
        let suffix = if version.is_empty() {
            String::new()
        } else {
            format!("_{version}")
        };
        if self.dir.is_empty() {
            format!("{}{}{}", self.file_id, suffix, self.ext)
        } else {
            format!("{}/{}{}{}", self.dir, self.file_id, suffix, self.ext)
        }
    }

    /// Relative path for an optional version name
    pub fn relative(&self, version: Option<&str>) -> String {
        self.versioned(version.unwrap_or(""))
    }

    /// Absolute path of a versioned file under the public root
    pub fn public_path(&self, public_dir: &Path, version: Option<&str>) -> PathBuf {
        public_dir.join(self.relative(version))
    }

    /// Absolute path of a versioned file under the private root
    pub fn private_path(&self, private_dir: &Path, version: Option<&str>) -> PathBuf {
        private_dir.join(self.relative(version))
    }

    /// Browser URL of a versioned file
    pub fn url(&self, url_prefix: &str, version: Option<&str>) -> String {
        format!(
            "{}/{}",
            url_prefix.trim_end_matches('/'),
            self.relative(version)
        )
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unversioned())
    }
}

fn normalize_segments(path: &str) -> Result<Vec<&str>, PathError> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(PathError::Invalid(format!(
                        "path escapes the storage root: {path}"
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts)
}
