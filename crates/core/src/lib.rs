//! reconkit core types: resource identities, payloads, errors and retry policy.

#![forbid(unsafe_code)]

mod backoff;
mod document;
mod error;
mod identity;
mod payload;

use serde::{Deserialize, Serialize};

pub use backoff::Backoff;
pub use document::Document;
pub use error::{Error, PathError, Result};
pub use identity::{pluralize, ResourceIdentity, ResourceType};
pub use payload::Payload;

/// How dependents of a deleted resource are handled by the control plane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PropagationPolicy {
    /// Dependents are removed before the owner disappears.
    Foreground,
    /// Owner disappears immediately; dependents are collected afterwards.
    #[default]
    Background,
    /// Dependents are left in place.
    Orphan,
}

impl PropagationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationPolicy::Foreground => "Foreground",
            PropagationPolicy::Background => "Background",
            PropagationPolicy::Orphan => "Orphan",
        }
    }
}

pub mod prelude {
    pub use super::{Backoff, Document, Error, Payload, PropagationPolicy, ResourceIdentity, ResourceType, Result};
}
