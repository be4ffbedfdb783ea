//! The two fixed document collections.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical group a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Countries,
    States,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Countries, Collection::States];

    /// Name of the master index table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Countries => "Countries",
            Self::States => "States",
        }
    }

    /// Lowercase form used in URLs.
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Countries => "countries",
            Self::States => "states",
        }
    }

    /// Table name of the entity bucket for `storage_key`.
    ///
    /// Buckets are namespaced by collection so that a country and a state
    /// sharing a name (Georgia) never share a bucket.
    pub fn entity_table_name(&self, storage_key: &str) -> String {
        format!("{}/{}", self.as_str(), storage_key)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "countries" | "country" => Ok(Self::Countries),
            "states" | "state" => Ok(Self::States),
            other => Err(format!(
                "unknown collection '{}'; expected one of countries, states",
                other
            )),
        }
    }
}
