//! # fa-attachments
//!
//! Attachment path & versioning engine for FileAttach RS.
//!
//! ## Features
//!
//! - Deterministic, collision-resistant relative file identifiers
//! - Public/private/URL path forms per named version
//! - Version derivation through an injected transformation backend
//! - Staged upload/removal operations committed with the host entity's
//!   save and reconciled with its destroy
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fa_attachments::{
//!     AttachmentConfig, AttachmentEngine, ImageOp, MagickTransformer,
//!     PendingChanges, UploadedFile, VersionSpec,
//! };
//! use fa_core::AttachmentRoots;
//!
//! let roots = AttachmentRoots::new("public/photo_data", "private", "/photo_data")?;
//! let mut engine = AttachmentEngine::new(roots, Arc::new(MagickTransformer::new()));
//! engine.attribute(
//!     "picture",
//!     AttachmentConfig::image()
//!         .max_size(500 * 1024)
//!         .version("tiny", VersionSpec::image([ImageOp::resize(15, 20)])),
//! )?;
//!
//! // Stage within the request, commit from the host's save path
//! let mut changes = PendingChanges::new();
//! changes.stage_upload("picture", UploadedFile::new("cat.png", bytes));
//! engine.commit(changes, &mut entity).await?;
//!
//! let url = engine.url(&entity, "picture", Some("tiny"))?;
//! ```

pub mod config;
pub mod engine;
pub mod path;
mod pipeline;
pub mod storage;
pub mod transform;
pub mod upload;

pub use config::{AttachmentConfig, AttachmentConfigError, ImageOp, VersionSpec};
pub use engine::{AttachmentEngine, AttributeErrors, EngineError, PendingChanges};
pub use path::{FilePath, PathError};
pub use storage::{DiskStore, StorageError};
pub use transform::{MagickTransformer, TransformError, Transformer};
pub use upload::UploadedFile;
