use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Name of a keyspace inside a storage engine.
///
/// A tree name pairs the base DN a backend serves with the name of one index
/// under it, e.g. `("dc_example_dc_com", "dn2id")`. Unrelated indexes never
/// share a tree, so their keys cannot collide.
///
/// The string form is `base/index`; parsing splits on the first `/`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeName {
    base_dn: String,
    index_id: String,
}

impl TreeName {
    /// Create a tree name. Both parts must be non-empty and the base part
    /// must not contain `/`.
    pub fn new(base_dn: impl Into<String>, index_id: impl Into<String>) -> Result<Self, TypeError> {
        let base_dn = base_dn.into();
        let index_id = index_id.into();
        let invalid = |reason: &str| TypeError::InvalidTreeName {
            name: format!("{base_dn}/{index_id}"),
            reason: reason.to_string(),
        };
        if base_dn.is_empty() {
            return Err(invalid("base DN part must not be empty"));
        }
        if index_id.is_empty() {
            return Err(invalid("index part must not be empty"));
        }
        if base_dn.contains('/') {
            return Err(invalid("base DN part must not contain '/'"));
        }
        Ok(Self { base_dn, index_id })
    }

    /// The base DN scope.
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// The index name within the scope.
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// Another index under the same base DN scope.
    pub fn sibling(&self, index_id: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(self.base_dn.clone(), index_id)
    }
}

impl FromStr for TreeName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, index) = s.split_once('/').ok_or_else(|| TypeError::InvalidTreeName {
            name: s.to_string(),
            reason: "expected 'base/index'".into(),
        })?;
        Self::new(base, index)
    }
}

impl fmt::Debug for TreeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeName({self})")
    }
}

impl fmt::Display for TreeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_dn, self.index_id)
    }
}
