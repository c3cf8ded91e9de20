//! Logical-to-commercial instance type translation
//!
//! Claims name GPU classes by short logical names ("l4"); the Scaleway API
//! wants commercial type identifiers ("L4-1-24G"). The mapping is a closed
//! table loaded once at startup, so a claim naming an unknown class is a
//! user error rather than something to guess at.

use std::collections::HashMap;

use crate::Error;

/// Read-only mapping from logical GPU class names to Scaleway commercial types
///
/// Lookup is case-insensitive on the logical name: "l4", "L4", and "l4"
/// embedded in differently-cased NodePool manifests all resolve to the same
/// commercial type. The table is built once (defaults or a YAML file) and
/// shared read-only by every reconciliation.
#[derive(Clone, Debug)]
pub struct InstanceTypeTable {
    // Keys are stored lowercased; translate() folds its input the same way.
    entries: HashMap<String, String>,
}

impl Default for InstanceTypeTable {
    fn default() -> Self {
        Self::from_entries([
            ("l4".to_string(), "L4-1-24G".to_string()),
            ("l40s".to_string(), "L40S-1-48G".to_string()),
        ])
    }
}

impl InstanceTypeTable {
    /// Build a table from logical-name/commercial-type pairs
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(logical, commercial)| (logical.to_lowercase(), commercial))
                .collect(),
        }
    }

    /// Load a table from a YAML string map, replacing the defaults entirely
    ///
    /// The file shape is flat: `l4: L4-1-24G`. An empty map is rejected
    /// because a controller that can translate nothing satisfies no claims.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let entries: HashMap<String, String> = serde_yaml::from_str(yaml).map_err(|e| {
            Error::serialization(format!("invalid instance type table: {}", e))
        })?;

        if entries.is_empty() {
            return Err(Error::validation("instance type table has no entries"));
        }

        Ok(Self::from_entries(entries))
    }

    /// Translate a logical GPU class name to its Scaleway commercial type
    ///
    /// Unknown names fail with a validation error naming the rejected input.
    pub fn translate(&self, logical: &str) -> crate::Result<&str> {
        self.entries
            .get(&logical.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| Error::validation(format!("unsupported instance type: {}", logical)))
    }

    /// Logical names this table can translate, sorted for stable log output
    pub fn supported(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
