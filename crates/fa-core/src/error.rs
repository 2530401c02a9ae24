//! Attribute-keyed validation errors
//!
//! Collected during the pre-save validation phase and surfaced to the
//! caller per attachment attribute; an attribute with errors never reaches
//! the commit write path.

use std::collections::BTreeMap;

use thiserror::Error;

/// Validation errors keyed by attachment attribute name.
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
#[error("Validation failed: {}", self.full_messages().join(", "))]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(attribute.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// Check if there are errors for a specific attribute
    pub fn has(&self, attribute: &str) -> bool {
        self.errors.contains_key(attribute)
    }

    /// Get errors for a specific attribute
    pub fn get(&self, attribute: &str) -> Option<&[String]> {
        self.errors.get(attribute).map(Vec::as_slice)
    }

    /// Attributes that have at least one error, in name order
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for (attribute, attribute_messages) in &self.errors {
            for msg in attribute_messages {
                messages.push(format!("{} {}", attribute, msg));
            }
        }
        messages
    }
}
