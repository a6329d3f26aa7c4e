// 🔬 Attribute Extractor - recognized vs unknown
// Splits the payload's parameter list per the resolved profile's schema.
// Every parameter lands in exactly one place: claimed by a rule (and
// coerced into a typed attribute) or copied verbatim into unknown
// parameters. Coercion failures keep the raw text and raise a warning.
// Traits then derive normalized attributes without claiming anything.

use crate::payload::{Parameter, VendorPayload};
use crate::profile::{AttributeRule, Profile, TraitKind, TraitRule, UnitRule, ValueType};
use crate::registry::{normalize_token, ProfileSet};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)\s*(.*)$").unwrap()
});

static PLAIN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$").unwrap());

static RANGE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:~|\bto\b|–|—)\s*").unwrap());

// A hyphen only separates when it sits between two numbers ("1-10V", not "-55°C")
static HYPHEN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d(\s*-\s*)[+.\d]").unwrap());

static TEMPERATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+(?:\.\d+)?").unwrap());

static PACKAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([0-9A-Za-z.\-]+)\s*(?:\(([\d\s]+)\s*Metric\))?").unwrap()
});

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^±?\s*(\d+(?:\.\d+)?)\s*%$").unwrap());

static PPM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^±?\s*(\d+(?:\.\d+)?)\s*ppm(?:\s*/\s*°?\s*[CK])?$").unwrap()
});

/// Source label used when an attribute comes from the description
pub const DESCRIPTION_SOURCE: &str = "description";

// ============================================================================
// VALUES & WARNINGS
// ============================================================================

/// A recognized attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Number(f64),
    Quantity { value: f64, unit: String },
    Range { min: f64, max: f64, unit: String },
    Text(String),
}

/// Non-fatal: a recognized value did not fit its declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionWarning {
    pub canonical_name: String,
    pub source_key: String,
    pub value_type: ValueType,
    pub raw_value: String,
    pub message: String,
}

impl std::fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (from '{}'): '{}' is not a valid {}: {}",
            self.canonical_name,
            self.source_key,
            self.raw_value,
            self.value_type.as_str(),
            self.message
        )
    }
}

/// Result of splitting one payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub attributes: BTreeMap<String, AttributeValue>,
    pub unknown_parameters: BTreeMap<String, Value>,
    /// Parameter key -> canonical name of the rule that claimed it
    pub claimed: BTreeMap<String, String>,
    pub warnings: Vec<CoercionWarning>,
}

// ============================================================================
// COERCION
// ============================================================================

/// SI prefix multiplier; prefixes are case-sensitive except kilo
fn si_multiplier(prefix: char) -> Option<f64> {
    match prefix {
        'T' => Some(1e12),
        'G' => Some(1e9),
        'M' => Some(1e6),
        'k' | 'K' => Some(1e3),
        'm' => Some(1e-3),
        'u' | 'µ' | 'μ' => Some(1e-6),
        'n' => Some(1e-9),
        'p' => Some(1e-12),
        'f' => Some(1e-15),
        _ => None,
    }
}

fn unit_matches(word: &str, rule: &UnitRule) -> bool {
    let word = word.to_lowercase();
    let singular: &str = if word.chars().count() > 1 {
        word.strip_suffix('s').unwrap_or(word.as_str())
    } else {
        word.as_str()
    };

    std::iter::once(&rule.unit)
        .chain(rule.synonyms.iter())
        .map(|u| u.to_lowercase())
        .any(|u| u == word || u == singular)
}

fn parse_number(text: &str) -> Result<f64, String> {
    let t = text.trim().replace(',', "");
    if !PLAIN_NUMBER.is_match(&t) {
        return Err("not a number".to_string());
    }
    t.parse::<f64>().map_err(|e| e.to_string())
}

fn parse_boolean(text: &str) -> Result<bool, String> {
    match text.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Ok(true),
        "false" | "no" | "n" | "0" | "off" => Ok(false),
        _ => Err("expected yes/no or true/false".to_string()),
    }
}

/// "10 kOhms", "0.022µF", "2.5A", "10k" -> value in base units.
/// Anything after the unit word is an error, never silently dropped.
fn parse_quantity(text: &str, rule: &UnitRule) -> Result<f64, String> {
    let caps = LEADING_NUMBER
        .captures(text)
        .ok_or_else(|| "no leading number".to_string())?;

    let number: f64 = caps[1].parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
    let word = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    if word.is_empty() {
        return Ok(number);
    }
    if word.split_whitespace().nth(1).is_some() {
        return Err(format!("unexpected text after the value: '{}'", word));
    }
    if unit_matches(word, rule) {
        return Ok(number);
    }

    let mut chars = word.chars();
    if let Some(prefix) = chars.next() {
        if let Some(mult) = si_multiplier(prefix) {
            let unit = chars.as_str();
            if unit.is_empty() || unit_matches(unit, rule) {
                return Ok(number * mult);
            }
        }
    }

    Err(format!("unit '{}' is not compatible with '{}'", word, rule.unit))
}

/// Split "-55°C ~ 125°C", "2.7V to 5.5V", "1-10" into its two bounds
fn split_range(text: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = RANGE_SEPARATOR.split(text).collect();
    match parts.len() {
        2 => return Some((parts[0].trim(), parts[1].trim())),
        1 => {}
        _ => return None,
    }

    let mut hits = HYPHEN_SEPARATOR.captures_iter(text);
    let sep = hits.next()?.get(1)?;
    if hits.next().is_some() {
        return None;
    }
    Some((text[..sep.start()].trim(), text[sep.end()..].trim()))
}

/// Both bounds in base units; a single value is a degenerate range
fn parse_range(text: &str, rule: &UnitRule) -> Result<(f64, f64), String> {
    if RANGE_SEPARATOR.split(text).count() > 2 {
        return Err("more than two bounds".to_string());
    }
    match split_range(text) {
        Some((low, high)) => Ok((parse_quantity(low, rule)?, parse_quantity(high, rule)?)),
        None => parse_quantity(text, rule).map(|v| (v, v)),
    }
}

/// Coerce one raw value per the rule. On failure the raw text is kept.
pub fn coerce(rule: &AttributeRule, raw: &str) -> Result<AttributeValue, String> {
    let text = raw.trim();
    match rule.value_type {
        ValueType::Text => Ok(AttributeValue::Text(text.to_string())),
        ValueType::Number => parse_number(text).map(AttributeValue::Number),
        ValueType::Boolean => parse_boolean(text).map(AttributeValue::Boolean),
        ValueType::Quantity => {
            let unit_rule = rule
                .unit_rule
                .as_ref()
                .ok_or_else(|| "quantity rule has no unit".to_string())?;
            parse_quantity(text, unit_rule).map(|value| AttributeValue::Quantity {
                value,
                unit: unit_rule.unit.clone(),
            })
        }
        ValueType::Range => {
            let unit_rule = rule
                .unit_rule
                .as_ref()
                .ok_or_else(|| "range rule has no unit".to_string())?;
            parse_range(text, unit_rule).map(|(min, max)| AttributeValue::Range {
                min,
                max,
                unit: unit_rule.unit.clone(),
            })
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// "0402 (1005 Metric)" -> ("0402", Some("1005"))
fn parse_package(text: &str) -> Result<(String, Option<String>), String> {
    let caps = PACKAGE
        .captures(text)
        .ok_or_else(|| "no package code".to_string())?;
    let code = caps[1].to_string();
    let metric = caps
        .get(2)
        .map(|m| m.as_str().split_whitespace().collect::<String>())
        .filter(|m| !m.is_empty());
    Ok((code, metric))
}

fn parse_temperature(text: &str) -> Result<f64, String> {
    let found = TEMPERATURE
        .find(text)
        .ok_or_else(|| format!("no temperature in '{}'", text))?;
    found.as_str().parse::<f64>().map_err(|e| e.to_string())
}

fn normalize_mounting(text: &str, synonyms: &BTreeMap<String, String>) -> String {
    let text = text.trim();
    let mapped = synonyms
        .iter()
        .find(|(spelling, _)| spelling.trim().eq_ignore_ascii_case(text))
        .map(|(_, normalized)| normalized.as_str())
        .unwrap_or(text);

    let lower = mapped.to_lowercase();
    if lower.contains("surface mount") || lower == "smd" || lower == "smt" {
        "SMD".to_string()
    } else if lower.contains("through") || lower == "th" || lower == "tht" {
        "TH".to_string()
    } else {
        mapped.to_string()
    }
}

fn capture_number(regex: &Regex, text: &str, what: &str) -> Result<f64, String> {
    let caps = regex
        .captures(text.trim())
        .ok_or_else(|| format!("not a single {} value", what))?;
    caps[1].parse::<f64>().map_err(|e| e.to_string())
}

/// Attributes one trait derives from a raw value, keyed by output name
pub fn derive_attributes(
    rule: &TraitRule,
    raw: &str,
) -> Result<Vec<(String, AttributeValue)>, String> {
    let target = rule.target();
    match rule.kind {
        TraitKind::PackageCode => {
            let (code, metric) = parse_package(raw)?;
            let mut out = vec![(target.to_string(), AttributeValue::Text(code))];
            if let Some(metric) = metric {
                let stem = target.strip_suffix("_code").unwrap_or(target);
                out.push((format!("{}_metric", stem), AttributeValue::Text(metric)));
            }
            Ok(out)
        }
        TraitKind::MountingType => Ok(vec![(
            target.to_string(),
            AttributeValue::Text(normalize_mounting(raw, &rule.synonyms)),
        )]),
        TraitKind::OperatingTemp => {
            let (low, high) = split_range(raw.trim()).ok_or_else(|| "not a range".to_string())?;
            Ok(vec![
                (format!("{}_min_c", target), AttributeValue::Number(parse_temperature(low)?)),
                (format!("{}_max_c", target), AttributeValue::Number(parse_temperature(high)?)),
            ])
        }
        TraitKind::TolerancePct => Ok(vec![(
            target.to_string(),
            AttributeValue::Number(capture_number(&PERCENT, raw, "percent")?),
        )]),
        TraitKind::Ppm => Ok(vec![(
            target.to_string(),
            AttributeValue::Number(capture_number(&PPM, raw, "ppm")?),
        )]),
    }
}

fn trait_value_type(kind: TraitKind) -> ValueType {
    match kind {
        TraitKind::PackageCode | TraitKind::MountingType => ValueType::Text,
        TraitKind::OperatingTemp => ValueType::Range,
        TraitKind::TolerancePct | TraitKind::Ppm => ValueType::Number,
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct AttributeExtractor {
    profiles: Arc<ProfileSet>,
    /// Compiled description patterns per (profile id, canonical name)
    description_patterns: HashMap<(String, String), Regex>,
}

impl AttributeExtractor {
    pub fn new(profiles: Arc<ProfileSet>) -> Self {
        let mut description_patterns = HashMap::new();
        for profile in profiles.profiles() {
            for rule in &profile.attribute_schema {
                if let Some(pattern) = &rule.description_pattern {
                    // Patterns are validated when the registry loads
                    if let Ok(regex) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                        description_patterns
                            .insert((profile.id.clone(), rule.canonical_name.clone()), regex);
                    }
                }
            }
        }

        AttributeExtractor {
            profiles,
            description_patterns,
        }
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    /// Split the payload's parameters per `profile`'s schema
    pub fn extract(&self, profile: &Profile, payload: &VendorPayload) -> Extraction {
        let mut out = Extraction::default();
        let mut taken = vec![false; payload.parameters.len()];

        for rule in &profile.attribute_schema {
            if let Some(idx) = find_parameter(rule, &payload.parameters, &taken) {
                taken[idx] = true;
                let param = &payload.parameters[idx];
                let raw = param.value_text().unwrap_or_default();
                out.claimed
                    .insert(param.key.clone(), rule.canonical_name.clone());
                self.record(&mut out, rule, &param.key, &raw);
                continue;
            }

            let key = (profile.id.clone(), rule.canonical_name.clone());
            if let (Some(regex), Some(description)) =
                (self.description_patterns.get(&key), payload.description.as_deref())
            {
                if let Some(caps) = regex.captures(description) {
                    let found = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str());
                    if let Some(raw) = found.filter(|s| !s.trim().is_empty()) {
                        self.record(&mut out, rule, DESCRIPTION_SOURCE, raw);
                    }
                }
            }
        }

        for (param, claimed) in payload.parameters.iter().zip(taken) {
            if !claimed {
                out.unknown_parameters
                    .insert(param.key.clone(), param.value.clone());
            }
        }

        for rule in &profile.traits {
            self.apply_trait(&mut out, rule, payload);
        }

        out
    }

    /// Derived attributes overwrite a rule's attribute of the same name
    fn apply_trait(&self, out: &mut Extraction, rule: &TraitRule, payload: &VendorPayload) {
        let Some((source_key, raw)) = trait_source(rule, payload, &out.attributes) else {
            return;
        };

        match derive_attributes(rule, &raw) {
            Ok(values) => out.attributes.extend(values),
            Err(message) => {
                let warning = CoercionWarning {
                    canonical_name: rule.target().to_string(),
                    source_key,
                    value_type: trait_value_type(rule.kind),
                    raw_value: raw,
                    message,
                };
                tracing::debug!("Trait warning: {}", warning);
                out.warnings.push(warning);
            }
        }
    }

    fn record(&self, out: &mut Extraction, rule: &AttributeRule, source_key: &str, raw: &str) {
        let value = match coerce(rule, raw) {
            Ok(value) => value,
            Err(message) => {
                let warning = CoercionWarning {
                    canonical_name: rule.canonical_name.clone(),
                    source_key: source_key.to_string(),
                    value_type: rule.value_type,
                    raw_value: raw.to_string(),
                    message,
                };
                tracing::debug!("Coercion warning: {}", warning);
                out.warnings.push(warning);
                AttributeValue::Text(raw.trim().to_string())
            }
        };
        out.attributes.insert(rule.canonical_name.clone(), value);
    }
}

/// First unclaimed, non-placeholder parameter answering to the rule's names,
/// trying the canonical name first and then each alias in order
fn find_parameter(rule: &AttributeRule, params: &[Parameter], taken: &[bool]) -> Option<usize> {
    for name in rule.source_names() {
        let wanted = normalize_token(name);
        let hit = params.iter().enumerate().position(|(idx, p)| {
            !taken[idx] && !p.is_placeholder() && normalize_token(&p.key) == wanted
        });
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// First trait source present, as a parameter or else as a text attribute
fn trait_source(
    rule: &TraitRule,
    payload: &VendorPayload,
    attributes: &BTreeMap<String, AttributeValue>,
) -> Option<(String, String)> {
    for source in &rule.sources {
        let wanted = normalize_token(source);
        let param = payload
            .parameters
            .iter()
            .find(|p| !p.is_placeholder() && normalize_token(&p.key) == wanted);
        if let Some(param) = param {
            if let Some(text) = param.value_text() {
                return Some((param.key.clone(), text));
            }
        }
        if let Some(AttributeValue::Text(text)) = attributes.get(source.trim()) {
            return Some((source.trim().to_string(), text.clone()));
        }
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================
