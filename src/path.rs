// 🌳 Path Builder - taxonomy path from the profile's parent chain
// The profile's chain is authoritative. The vendor breadcrumb only adds
// leaf-level detail when the profile itself is shallow.

use crate::payload::VendorPayload;
use crate::profile::Profile;
use crate::registry::normalize_token;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_DELIMITER: &str = " > ";

/// Ordered category names plus their delimited form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPath {
    pub names: Vec<String>,
    pub path: String,
}

impl CategoryPath {
    pub fn leaf(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }
}

#[derive(Debug, Clone)]
pub struct PathBuilder {
    delimiter: String,
}

impl Default for PathBuilder {
    fn default() -> Self {
        PathBuilder::new(DEFAULT_DELIMITER)
    }
}

impl PathBuilder {
    pub fn new(delimiter: impl Into<String>) -> Self {
        PathBuilder {
            delimiter: delimiter.into(),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn build(&self, profile: &Profile, payload: &VendorPayload) -> CategoryPath {
        let mut names: Vec<String> = profile.parent_chain.clone();

        if profile.parent_chain.len() <= 1 {
            let mut seen: HashSet<String> = names.iter().map(|n| normalize_token(n)).collect();
            for segment in &payload.breadcrumb {
                let segment = segment.trim();
                if segment.is_empty() {
                    continue;
                }
                if seen.insert(normalize_token(segment)) {
                    names.push(segment.to_string());
                }
            }
        }

        CategoryPath {
            path: names.join(&self.delimiter),
            names,
        }
    }
}
