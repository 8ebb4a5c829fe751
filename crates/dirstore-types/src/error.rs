use thiserror::Error;

/// Errors produced by type construction and decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid DN {dn:?}: {reason}")]
    InvalidDn { dn: String, reason: String },

    #[error("entry ID must be non-zero")]
    ZeroEntryId,

    #[error("invalid entry ID encoding: expected 8 bytes, got {0}")]
    InvalidEntryIdLength(usize),

    #[error("invalid tree name {name:?}: {reason}")]
    InvalidTreeName { name: String, reason: String },
}

impl TypeError {
    pub(crate) fn invalid_dn(dn: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDn {
            dn: dn.to_string(),
            reason: reason.into(),
        }
    }
}
