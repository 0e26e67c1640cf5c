use thiserror::Error;

use super::CfgObjType;
use crate::reply::ItemResult;
use crate::status;

/// Per-object failures of the configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// An object with this name already exists in the schema.
    #[error("cfgobj '{name}' already exists.")]
    Exists {
        /// Schema searched.
        schema: CfgObjType,
        /// Conflicting name.
        name: String,
    },
    /// No object has this name.
    #[error("cfgobj '{name}' not found.")]
    NotFound {
        /// Schema searched.
        schema: CfgObjType,
        /// Missing name.
        name: String,
    },
    /// An attribute is missing, unknown or of the wrong type.
    #[error("{message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
    /// The object is enabled and cannot be changed in this way.
    #[error("cfgobj '{name}' is enabled.")]
    Busy {
        /// Object name.
        name: String,
    },
    /// The requester neither owns the object nor is root.
    #[error("Permission denied.")]
    PermissionDenied {
        /// Object name.
        name: String,
    },
}

impl RegistryError {
    /// Creates an invalid-attribute error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Status reported for the object.
    #[must_use]
    pub const fn status(&self) -> i32 {
        match self {
            Self::Exists { .. } => status::EEXIST,
            Self::NotFound { .. } => status::ENOENT,
            Self::Invalid { .. } => status::EINVAL,
            Self::Busy { .. } => status::EBUSY,
            Self::PermissionDenied { .. } => status::EACCES,
        }
    }
}

impl From<RegistryError> for ItemResult {
    fn from(error: RegistryError) -> Self {
        Self::failed(error.status(), Some(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;

    #[rstest]
    fn not_found_uses_protocol_text() {
        let error = RegistryError::NotFound {
            schema: CfgObjType::Updtr,
            name: "u1".into(),
        };
        assert_eq!(
            Value::from(ItemResult::from(error)),
            json!({ "status": status::ENOENT, "msg": "cfgobj 'u1' not found." })
        );
    }
}
