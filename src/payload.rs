// 📦 Vendor Payload - one fixed vendor schema, two encodings
// Turns a stored raw document into the text fields and parameter list
// that the resolver and extractor work on. The raw document itself is
// never modified.

use crate::error::PayloadError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// TEXT FIELDS
// ============================================================================

/// Payload text fields, in resolver precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Category,
    Subcategory,
    Description,
}

impl TextField {
    /// Fixed precedence used by the resolver
    pub const PRECEDENCE: [TextField; 3] = [
        TextField::Category,
        TextField::Subcategory,
        TextField::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TextField::Category => "category",
            TextField::Subcategory => "subcategory",
            TextField::Description => "description",
        }
    }
}

// ============================================================================
// PARAMETER
// ============================================================================

/// One vendor parameter, key and value exactly as supplied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: Value,
}

impl Parameter {
    /// Text form of a scalar value. `None` for null and non-scalar values.
    pub fn value_text(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Vendor placeholders ("", "-") count as "not supplied"
    pub fn is_placeholder(&self) -> bool {
        match self.value_text() {
            Some(text) => {
                let t = text.trim();
                t.is_empty() || t == "-"
            }
            None => true,
        }
    }
}

// ============================================================================
// VENDOR PAYLOAD
// ============================================================================

/// Parsed view over a raw vendor payload.
///
/// Accepts the product envelope returned by the vendor API
/// (`{"Product": {"Category": {...}, "Parameters": [...]}}`) and the
/// flattened form (`{"category": ..., "parameters": {...}}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorPayload {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    /// Vendor breadcrumb, root to leaf
    pub breadcrumb: Vec<String>,
    /// Parameter collection, one entry per distinct key
    pub parameters: Vec<Parameter>,
    /// Manufacturer part number, used to select items for a reindex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpn: Option<String>,
}

impl VendorPayload {
    /// Parse the stored raw text
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, PayloadError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PayloadError::NotAnObject(json_kind(value)))?;

        match obj.get("Product") {
            Some(Value::Object(product)) => Self::from_envelope(product),
            Some(Value::Null) | None => Self::from_flat(obj),
            Some(other) => Err(PayloadError::Malformed {
                field: "Product".to_string(),
                message: format!("expected object, got {}", json_kind(other)),
            }),
        }
    }

    fn from_envelope(product: &Map<String, Value>) -> Result<Self, PayloadError> {
        let breadcrumb = match product.get("Category") {
            Some(Value::Object(node)) => category_tree_names(node)?,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(PayloadError::Malformed {
                    field: "Product.Category".to_string(),
                    message: format!("expected object, got {}", json_kind(other)),
                })
            }
        };

        let category = breadcrumb.first().cloned();
        let subcategory = if breadcrumb.len() > 1 {
            breadcrumb.last().cloned()
        } else {
            None
        };

        let description = match product.get("Description") {
            Some(Value::Object(desc)) => {
                let short = text_field(desc, "ProductDescription", "Product.Description")?;
                let detailed = text_field(desc, "DetailedDescription", "Product.Description")?;
                match (short, detailed) {
                    (Some(s), Some(d)) if s != d => Some(format!("{} {}", s, d)),
                    (Some(s), _) => Some(s),
                    (None, d) => d,
                }
            }
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(PayloadError::Malformed {
                    field: "Product.Description".to_string(),
                    message: format!("expected object, got {}", json_kind(other)),
                })
            }
        };

        let parameters = match product.get("Parameters") {
            Some(value) => parse_parameters(value, "Product.Parameters")?,
            None => Vec::new(),
        };

        Ok(VendorPayload {
            category,
            subcategory,
            description,
            breadcrumb,
            parameters,
            mpn: text_field(product, "ManufacturerProductNumber", "Product")?,
        })
    }

    fn from_flat(obj: &Map<String, Value>) -> Result<Self, PayloadError> {
        let breadcrumb = match obj.get("breadcrumb") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    other => Err(PayloadError::Malformed {
                        field: "breadcrumb".to_string(),
                        message: format!("expected string segment, got {}", json_kind(other)),
                    }),
                })
                .filter(|seg| !matches!(seg, Ok(s) if s.is_empty()))
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::String(s)) => split_breadcrumb(s),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(PayloadError::Malformed {
                    field: "breadcrumb".to_string(),
                    message: format!("expected list or string, got {}", json_kind(other)),
                })
            }
        };

        let parameters = match obj.get("parameters") {
            Some(value) => parse_parameters(value, "parameters")?,
            None => Vec::new(),
        };

        Ok(VendorPayload {
            category: text_field(obj, "category", "")?,
            subcategory: text_field(obj, "subcategory", "")?,
            description: text_field(obj, "description", "")?,
            breadcrumb,
            parameters,
            mpn: text_field(obj, "mpn", "")?,
        })
    }

    /// Text for one resolver field, if present
    pub fn text(&self, field: TextField) -> Option<&str> {
        match field {
            TextField::Category => self.category.as_deref(),
            TextField::Subcategory => self.subcategory.as_deref(),
            TextField::Description => self.description.as_deref(),
        }
    }

    /// The vendor's own deepest category label, kept for audit
    pub fn source_name(&self) -> Option<&str> {
        self.subcategory.as_deref().or(self.category.as_deref())
    }

    /// Full raw parameter set as a map (original key -> raw value)
    pub fn parameter_map(&self) -> std::collections::BTreeMap<String, Value> {
        self.parameters
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read an optional scalar field as trimmed text. Empty strings become `None`.
fn text_field(
    obj: &Map<String, Value>,
    key: &str,
    parent: &str,
) -> Result<Option<String>, PayloadError> {
    let text = match obj.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => {
            let field = if parent.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", parent, key)
            };
            return Err(PayloadError::Malformed {
                field,
                message: format!("expected text, got {}", json_kind(other)),
            });
        }
    };

    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Walk a `{Name, ChildCategories}` tree along the first child at each level
fn category_tree_names(node: &Map<String, Value>) -> Result<Vec<String>, PayloadError> {
    let mut names = Vec::new();
    let mut current = Some(node);

    while let Some(n) = current {
        if let Some(name) = text_field(n, "Name", "Product.Category")? {
            names.push(name);
        }
        current = match n.get("ChildCategories") {
            Some(Value::Array(children)) => children.first().and_then(Value::as_object),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(PayloadError::Malformed {
                    field: "Product.Category.ChildCategories".to_string(),
                    message: format!("expected list, got {}", json_kind(other)),
                })
            }
        };
    }

    Ok(names)
}

fn split_breadcrumb(s: &str) -> Vec<String> {
    let sep = if s.contains('>') { '>' } else { '/' };
    s.split(sep)
        .map(|seg| seg.trim().to_string())
        .filter(|seg| !seg.is_empty())
        .collect()
}

/// Parameters as an object (`{"Resistance": "10k"}`) or a list of
/// `{ParameterText, ValueText}` / `{name, value}` entries. A repeated key
/// keeps its last value.
fn parse_parameters(value: &Value, field: &str) -> Result<Vec<Parameter>, PayloadError> {
    let mut params: Vec<Parameter> = Vec::new();

    let mut push = |key: String, value: Value| {
        if let Some(existing) = params.iter_mut().find(|p| p.key == key) {
            tracing::debug!("Repeated parameter key '{}', keeping last value", key);
            existing.value = value;
        } else {
            params.push(Parameter { key, value });
        }
    };

    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, value) in map {
                if key.trim().is_empty() {
                    return Err(PayloadError::Malformed {
                        field: field.to_string(),
                        message: "empty parameter key".to_string(),
                    });
                }
                push(key.clone(), value.clone());
            }
        }
        Value::Array(entries) => {
            for (idx, entry) in entries.iter().enumerate() {
                let obj = entry.as_object().ok_or_else(|| PayloadError::Malformed {
                    field: format!("{}[{}]", field, idx),
                    message: format!("expected object, got {}", json_kind(entry)),
                })?;

                let key = obj
                    .get("ParameterText")
                    .or_else(|| obj.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| PayloadError::Malformed {
                        field: format!("{}[{}]", field, idx),
                        message: "missing parameter name".to_string(),
                    })?;

                let value = obj
                    .get("ValueText")
                    .or_else(|| obj.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null);

                push(key, value);
            }
        }
        other => {
            return Err(PayloadError::Malformed {
                field: field.to_string(),
                message: format!("expected object or list, got {}", json_kind(other)),
            })
        }
    }

    Ok(params)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_payload() {
        let payload = VendorPayload::from_value(&json!({
            "category": "  Resistors ",
            "description": "10k 0402 ±1%",
            "parameters": {"Power (Watts)": "0.063W", "Composition": "Thick Film"}
        }))
        .unwrap();

        assert_eq!(payload.category.as_deref(), Some("Resistors"));
        assert_eq!(payload.subcategory, None);
        assert_eq!(payload.source_name(), Some("Resistors"));
        assert_eq!(payload.parameters.len(), 2);
        assert_eq!(payload.mpn, None);
    }

    #[test]
    fn test_envelope_payload() {
        let payload = VendorPayload::from_value(&json!({
            "Product": {
                "ManufacturerProductNumber": "RC0402FR-0710KL",
                "Category": {
                    "Name": "Resistors",
                    "ChildCategories": [{"Name": "Chip Resistor - Surface Mount", "ChildCategories": []}]
                },
                "Description": {"ProductDescription": "RES 10K OHM 1% 1/16W 0402"},
                "Parameters": [
                    {"ParameterText": "Resistance", "ValueText": "10 kOhms"},
                    {"ParameterText": "Tolerance", "ValueText": "±1%"}
                ]
            }
        }))
        .unwrap();

        assert_eq!(payload.category.as_deref(), Some("Resistors"));
        assert_eq!(payload.subcategory.as_deref(), Some("Chip Resistor - Surface Mount"));
        assert_eq!(payload.source_name(), Some("Chip Resistor - Surface Mount"));
        assert_eq!(payload.breadcrumb, vec!["Resistors", "Chip Resistor - Surface Mount"]);
        assert_eq!(payload.description.as_deref(), Some("RES 10K OHM 1% 1/16W 0402"));
        assert_eq!(payload.parameters[0].key, "Resistance");
        assert_eq!(payload.mpn.as_deref(), Some("RC0402FR-0710KL"));
    }

    #[test]
    fn test_missing_text_fields_are_fine() {
        let payload = VendorPayload::from_value(&json!({})).unwrap();
        assert_eq!(payload, VendorPayload::default());
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(
            VendorPayload::parse("not json"),
            Err(PayloadError::InvalidJson(_))
        ));
        assert_eq!(
            VendorPayload::parse("[1, 2]"),
            Err(PayloadError::NotAnObject("array"))
        );
        assert!(matches!(
            VendorPayload::from_value(&json!({"parameters": "oops"})),
            Err(PayloadError::Malformed { .. })
        ));
        assert!(matches!(
            VendorPayload::from_value(&json!({"parameters": [{"ValueText": "1"}]})),
            Err(PayloadError::Malformed { .. })
        ));
    }

    #[test]
    fn test_breadcrumb_string() {
        let payload = VendorPayload::from_value(&json!({
            "breadcrumb": "Sensors > Environmental > Humidity"
        }))
        .unwrap();
        assert_eq!(payload.breadcrumb, vec!["Sensors", "Environmental", "Humidity"]);
    }

    #[test]
    fn test_placeholder_values() {
        let dash = Parameter { key: "Ratings".into(), value: json!("-") };
        let null = Parameter { key: "Ratings".into(), value: Value::Null };
        let real = Parameter { key: "Ratings".into(), value: json!(12) };
        assert!(dash.is_placeholder());
        assert!(null.is_placeholder());
        assert!(!real.is_placeholder());
        assert_eq!(real.value_text().as_deref(), Some("12"));
    }

    #[test]
    fn test_repeated_parameter_keeps_last() {
        let payload = VendorPayload::from_value(&json!({
            "parameters": [
                {"name": "Voltage", "value": "5V"},
                {"name": "Voltage", "value": "3.3V"}
            ]
        }))
        .unwrap();
        assert_eq!(payload.parameters.len(), 1);
        assert_eq!(payload.parameters[0].value, json!("3.3V"));
    }
}
