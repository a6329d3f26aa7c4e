// 🏛️ Classification Profiles - rule bundles as data
// A profile says which vendor categories it claims, how to pull typed
// attributes out of the parameter list, and where it sits in the taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved id of the fallback profile
pub const UNKNOWN_PROFILE_ID: &str = "unknown";

/// Root segment of the fallback profile's path
pub const UNKNOWN_SEGMENT: &str = "Unknown";

// ============================================================================
// VALUE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Number,
    Text,
    Boolean,
    /// Number with a unit, normalized through a `UnitRule`
    Quantity,
    /// "2.7V ~ 5.5V": two quantities sharing one `UnitRule`
    Range,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Number => "number",
            ValueType::Text => "text",
            ValueType::Boolean => "boolean",
            ValueType::Quantity => "quantity",
            ValueType::Range => "range",
        }
    }

    /// Types that need a `UnitRule`
    pub fn needs_unit(&self) -> bool {
        matches!(self, ValueType::Quantity | ValueType::Range)
    }
}

fn default_value_type() -> ValueType {
    ValueType::Text
}

/// Unit normalization for quantity attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRule {
    /// Canonical base unit symbol (e.g. "ohm", "F", "V", "A", "W", "Hz")
    pub unit: String,

    /// Other spellings of the base unit (e.g. "Ω", "ohms")
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl UnitRule {
    pub fn new(unit: impl Into<String>) -> Self {
        UnitRule {
            unit: unit.into(),
            synonyms: Vec::new(),
        }
    }

    pub fn with_synonym(mut self, synonym: impl Into<String>) -> Self {
        self.synonyms.push(synonym.into());
        self
    }
}

// ============================================================================
// ATTRIBUTE RULE
// ============================================================================

/// One extraction rule of a profile's attribute schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRule {
    /// Key used in the recognized attribute map
    pub canonical_name: String,

    /// Vendor parameter names that feed this attribute
    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default = "default_value_type")]
    pub value_type: ValueType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_rule: Option<UnitRule>,

    /// Regex with one capture group, tried against the description when no
    /// parameter supplies the attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_pattern: Option<String>,
}

impl AttributeRule {
    pub fn new(canonical_name: impl Into<String>, value_type: ValueType) -> Self {
        AttributeRule {
            canonical_name: canonical_name.into(),
            aliases: Vec::new(),
            value_type,
            unit_rule: None,
            description_pattern: None,
        }
    }

    /// Builder: add a source alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Builder: set unit rule
    pub fn with_unit(mut self, rule: UnitRule) -> Self {
        self.unit_rule = Some(rule);
        self
    }

    /// Builder: set description fallback pattern
    pub fn with_description_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.description_pattern = Some(pattern.into());
        self
    }

    /// Names this rule answers to, canonical name first
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

// ============================================================================
// TRAITS (derived attributes)
// ============================================================================

/// Normalizations that derive extra attributes from a parameter's text.
/// A trait reads a value without claiming the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitKind {
    /// "0402 (1005 Metric)" -> package_code "0402", package_metric "1005"
    PackageCode,
    /// "Surface Mount" -> "SMD", "Through Hole" -> "TH"
    MountingType,
    /// "-55°C ~ 155°C" -> operating_temp_min_c, operating_temp_max_c
    OperatingTemp,
    /// "±1%" -> 1.0
    TolerancePct,
    /// "±100ppm/°C" -> 100.0
    Ppm,
}

impl TraitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraitKind::PackageCode => "package_code",
            TraitKind::MountingType => "mounting_type",
            TraitKind::OperatingTemp => "operating_temp",
            TraitKind::TolerancePct => "tolerance_pct",
            TraitKind::Ppm => "temperature_coefficient_ppm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitRule {
    pub kind: TraitKind,

    /// Parameter names (or canonical attribute names) read in order;
    /// the first one present supplies the value
    #[serde(default)]
    pub sources: Vec<String>,

    /// Output key for single-valued kinds; defaults to the kind's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Vendor spelling -> normalized value (mounting type)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub synonyms: BTreeMap<String, String>,
}

impl TraitRule {
    pub fn new(kind: TraitKind) -> Self {
        TraitRule {
            kind,
            sources: Vec::new(),
            target: None,
            synonyms: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(self.kind.as_str())
    }
}

// ============================================================================
// PROFILE DOCUMENTS (as written in configuration)
// ============================================================================

/// Attribute rule as written on disk; required fields are checked by the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeRuleDocument {
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub value_type: Option<ValueType>,
    pub unit_rule: Option<UnitRule>,
    pub description_pattern: Option<String>,
}

/// Profile document, one per category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub id: Option<String>,

    /// Leaf display name; defaults to the last parent chain segment
    pub name: Option<String>,

    /// Explicit tie-break; higher is evaluated first
    pub priority: Option<i32>,

    /// Profile whose schema (and chain, when none is declared) this one builds on
    pub extends: Option<String>,

    #[serde(default)]
    pub source_categories: Vec<String>,

    #[serde(default)]
    pub source_category_patterns: Vec<String>,

    #[serde(default)]
    pub attribute_schema: Vec<AttributeRuleDocument>,

    /// Derived attributes, appended to the inherited ones
    #[serde(default)]
    pub traits: Vec<TraitRule>,

    pub parent_chain: Option<Vec<String>>,
}

/// Optional `registry.yaml` next to the profile documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryManifest {
    /// Free-form version label of the ruleset
    pub version: Option<String>,

    /// Configuration order of profile ids
    #[serde(default)]
    pub order: Vec<String>,

    /// Tokens too generic for substring matching (exact matches only)
    pub generic_tokens: Option<Vec<String>>,
}

// ============================================================================
// PROFILE (composed, validated)
// ============================================================================

/// A validated profile with its inherited schema fully composed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub priority: Option<i32>,
    pub source_categories: Vec<String>,
    pub source_category_patterns: Vec<String>,
    pub attribute_schema: Vec<AttributeRule>,
    #[serde(default)]
    pub traits: Vec<TraitRule>,
    /// Ancestor names, root to this profile's leaf
    pub parent_chain: Vec<String>,
}

impl Profile {
    /// The reserved fallback; always matches, claims nothing
    pub fn unknown() -> Self {
        Profile {
            id: UNKNOWN_PROFILE_ID.to_string(),
            name: UNKNOWN_SEGMENT.to_string(),
            priority: None,
            source_categories: Vec::new(),
            source_category_patterns: Vec::new(),
            attribute_schema: Vec::new(),
            traits: Vec::new(),
            parent_chain: vec![UNKNOWN_SEGMENT.to_string()],
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_PROFILE_ID
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Get schema rule by canonical name
    pub fn rule(&self, canonical_name: &str) -> Option<&AttributeRule> {
        self.attribute_schema
            .iter()
            .find(|r| r.canonical_name == canonical_name)
    }
}
