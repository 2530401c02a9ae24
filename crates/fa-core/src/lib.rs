//! # fa-core
//!
//! Core types shared across the FileAttach RS crates:
//! - Storage roots configuration (`AttachmentRoots`)
//! - Attribute-keyed validation errors (`ValidationErrors`)
//! - The host entity abstraction (`AttachmentHost`, `HostIdentity`)

pub mod config;
pub mod error;
pub mod host;

pub use config::{AttachmentRoots, ConfigError};
pub use error::ValidationErrors;
pub use host::{AttachmentHost, HostIdentity, Id, MemoryHost};
