//! Host entity abstraction
//!
//! The engine does not own the entity or its persistence transaction; it
//! only needs a string-keyed field store and a stable identity to mix into
//! fresh file ids.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

/// Primary key type of persisted host entities
pub type Id = i64;

/// Identity mixed into fresh file id digests.
///
/// New records have no primary key yet; they contribute a per-instance
/// token instead so ids stay unique before the first save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostIdentity {
    Persisted(Id),
    Transient(Uuid),
}

impl HostIdentity {
    pub fn transient() -> Self {
        Self::Transient(Uuid::new_v4())
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

impl From<Id> for HostIdentity {
    fn from(id: Id) -> Self {
        Self::Persisted(id)
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "{}", id),
            Self::Transient(token) => write!(f, "{}", token.simple()),
        }
    }
}

/// String-keyed field store exposed by the host entity.
///
/// For each configured attachment attribute `attr` the engine reads and
/// writes one field named `{attr}_path` holding the unversioned relative
/// path; a missing or empty value means "no file".
pub trait AttachmentHost {
    fn identity(&self) -> HostIdentity;

    fn field(&self, name: &str) -> Option<&str>;

    fn set_field(&mut self, name: &str, value: Option<String>);
}

/// In-memory host entity for testing
#[derive(Debug, Clone)]
pub struct MemoryHost {
    identity: HostIdentity,
    fields: HashMap<String, String>,
}

impl MemoryHost {
    pub fn new(id: Id) -> Self {
        Self {
            identity: HostIdentity::Persisted(id),
            fields: HashMap::new(),
        }
    }

    /// Host for a record that has not been saved yet
    pub fn transient() -> Self {
        Self {
            identity: HostIdentity::transient(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl AttachmentHost for MemoryHost {
    fn identity(&self) -> HostIdentity {
        self.identity.clone()
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn set_field(&mut self, name: &str, value: Option<String>) {
        match value {
            Some(v) => {
                self.fields.insert(name.to_string(), v);
            }
            None => {
                self.fields.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_identity_display() {
        let identity = HostIdentity::Persisted(42);
        assert_eq!(identity.to_string(), "42");
        assert!(identity.is_persisted());
    }

    #[test]
    fn test_transient_identities_differ() {
        let a = HostIdentity::transient();
        let b = HostIdentity::transient();
        assert_ne!(a, b);
        assert!(!a.is_persisted());
        assert!(!a.to_string().is_empty());
    }

    #[test]
    fn test_memory_host_fields() {
        let mut host = MemoryHost::new(1).with_field("picture_path", "2024/01/01/abc.png");

        assert_eq!(host.field("picture_path"), Some("2024/01/01/abc.png"));
        assert_eq!(host.field("avatar_path"), None);

        host.set_field("picture_path", None);
        assert_eq!(host.field("picture_path"), None);

        host.set_field("avatar_path", Some("2024/02/02/def.jpg".to_string()));
        assert_eq!(host.field("avatar_path"), Some("2024/02/02/def.jpg"));
    }
}
