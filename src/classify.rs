// 🧭 Classifier - Resolver → Extractor → Path Builder
// One implementation shared by intake and the reindexer, so an item
// classified at ingestion and the same item reindexed later can only
// differ when the profile set differs.

use crate::error::PayloadError;
use crate::extractor::{AttributeExtractor, AttributeValue, CoercionWarning};
use crate::path::{PathBuilder, DEFAULT_DELIMITER};
use crate::payload::VendorPayload;
use crate::registry::ProfileSet;
use crate::resolver::{CategoryResolver, Resolution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Classification-owned columns, in write order
pub const OWNED_FIELDS: [&str; 6] = [
    "category_id",
    "category_source_name",
    "category_path",
    "category_path_names",
    "attributes",
    "unknown_parameters",
];

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category_id: String,
    /// Vendor's own deepest label, kept for audit
    pub category_source_name: Option<String>,
    pub category_path: String,
    pub category_path_names: Vec<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub unknown_parameters: BTreeMap<String, Value>,
    pub warnings: Vec<CoercionWarning>,
    pub resolution: Resolution,
}

impl Classification {
    /// Storage form of the owned fields. Maps and lists become JSON text;
    /// maps are key-sorted so identical classifications give identical text.
    pub fn columns(&self) -> Result<ClassificationColumns, serde_json::Error> {
        Ok(ClassificationColumns {
            category_id: Some(self.category_id.clone()),
            category_source_name: self.category_source_name.clone(),
            category_path: Some(self.category_path.clone()),
            category_path_names: Some(serde_json::to_string(&self.category_path_names)?),
            attributes: Some(serde_json::to_string(&self.attributes)?),
            unknown_parameters: Some(serde_json::to_string(&self.unknown_parameters)?),
        })
    }
}

/// Owned fields exactly as stored. `None` is SQL NULL (never classified).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationColumns {
    pub category_id: Option<String>,
    pub category_source_name: Option<String>,
    pub category_path: Option<String>,
    pub category_path_names: Option<String>,
    pub attributes: Option<String>,
    pub unknown_parameters: Option<String>,
}

/// One owned field whose value would change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

impl ClassificationColumns {
    fn get(&self, field: &str) -> Option<&str> {
        match field {
            "category_id" => self.category_id.as_deref(),
            "category_source_name" => self.category_source_name.as_deref(),
            "category_path" => self.category_path.as_deref(),
            "category_path_names" => self.category_path_names.as_deref(),
            "attributes" => self.attributes.as_deref(),
            "unknown_parameters" => self.unknown_parameters.as_deref(),
            _ => None,
        }
    }

    /// Fields that differ between `self` (stored) and `new`, in write order
    pub fn diff(&self, new: &ClassificationColumns) -> Vec<FieldChange> {
        OWNED_FIELDS
            .iter()
            .filter(|field| self.get(field) != new.get(field))
            .map(|field| FieldChange {
                field: field.to_string(),
                old: column_value(field, self.get(field)),
                new: column_value(field, new.get(field)),
            })
            .collect()
    }
}

fn is_json_column(field: &str) -> bool {
    matches!(field, "category_path_names" | "attributes" | "unknown_parameters")
}

/// Readable value for reports; unparseable stored JSON is shown as text
fn column_value(field: &str, text: Option<&str>) -> Value {
    match text {
        None => Value::Null,
        Some(t) if is_json_column(field) => {
            serde_json::from_str(t).unwrap_or_else(|_| Value::String(t.to_string()))
        }
        Some(t) => Value::String(t.to_string()),
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct Classifier {
    profiles: Arc<ProfileSet>,
    resolver: CategoryResolver,
    extractor: AttributeExtractor,
    paths: PathBuilder,
}

impl Classifier {
    pub fn new(profiles: Arc<ProfileSet>) -> Self {
        Classifier::with_delimiter(profiles, DEFAULT_DELIMITER)
    }

    pub fn with_delimiter(profiles: Arc<ProfileSet>, delimiter: &str) -> Self {
        Classifier {
            resolver: CategoryResolver::new(Arc::clone(&profiles)),
            extractor: AttributeExtractor::new(Arc::clone(&profiles)),
            paths: PathBuilder::new(delimiter),
            profiles,
        }
    }

    pub fn profiles(&self) -> &Arc<ProfileSet> {
        &self.profiles
    }

    /// Classify a stored raw payload
    pub fn classify(&self, raw: &str) -> Result<Classification, PayloadError> {
        let payload = VendorPayload::parse(raw)?;
        Ok(self.classify_payload(&payload))
    }

    pub fn classify_value(&self, raw: &Value) -> Result<Classification, PayloadError> {
        let payload = VendorPayload::from_value(raw)?;
        Ok(self.classify_payload(&payload))
    }

    pub fn classify_payload(&self, payload: &VendorPayload) -> Classification {
        let (profile, resolution) = self.resolver.resolve_profile(payload);
        let extraction = self.extractor.extract(profile, payload);
        let path = self.paths.build(profile, payload);

        Classification {
            category_id: profile.id.clone(),
            category_source_name: payload.source_name().map(str::to_string),
            category_path: path.path,
            category_path_names: path.names,
            attributes: extraction.attributes,
            unknown_parameters: extraction.unknown_parameters,
            warnings: extraction.warnings,
            resolution,
        }
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Small profile set shared by the classifier, store and reindex tests
#[cfg(test)]
pub(crate) fn sample_profiles() -> ProfileSet {
    use crate::profile::ProfileDocument;

    let resistor: ProfileDocument = serde_yaml::from_str(
        r#"
id: resistor
source_categories: [Resistors, Chip Resistor - Surface Mount]
attribute_schema:
  - canonical_name: resistance
    aliases: [Resistance]
    description_pattern: '\b(\d+(?:\.\d+)?[kmr])\b'
  - canonical_name: tolerance
    aliases: [Tolerance]
    description_pattern: '±?(\d+(?:\.\d+)?%)'
  - canonical_name: package
    aliases: [Package / Case]
    description_pattern: '\b(0201|0402|0603|0805|1206)\b'
parent_chain: [Passive Components, Resistors]
"#,
    )
    .unwrap();

    let capacitor: ProfileDocument = serde_yaml::from_str(
        r#"
id: capacitor
source_categories: [Capacitors, Ceramic Capacitors]
attribute_schema:
  - canonical_name: capacitance_f
    aliases: [Capacitance]
    value_type: quantity
    unit_rule: { unit: F }
  - canonical_name: voltage_v
    aliases: [Voltage - Rated]
    value_type: quantity
    unit_rule: { unit: V }
parent_chain: [Passive Components, Capacitors]
"#,
    )
    .unwrap();

    ProfileSet::build(
        vec![
            ("resistor.yaml".to_string(), resistor),
            ("capacitor.yaml".to_string(), capacitor),
        ],
        None,
    )
    .unwrap()
}

// ============================================================================
// TESTS
// ============================================================================
