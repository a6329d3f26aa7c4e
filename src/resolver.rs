// 🏷️ Category Resolver - first match by registry order
// Walks the profile set's evaluation order and returns the first entry
// whose token matches one of the payload's text fields. No scoring: the
// registry order alone decides ambiguous payloads.

use crate::payload::{TextField, VendorPayload};
use crate::profile::Profile;
use crate::registry::{normalize_token, MatchEntry, MatchMode, ProfileSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub profile_id: String,

    /// How the profile was reached; `Fallback` means nothing matched
    pub mode: MatchMode,

    /// Payload field that matched
    pub matched_field: Option<TextField>,

    /// Configured token or pattern that matched
    pub matched_token: Option<String>,
}

impl Resolution {
    fn fallback(profile_id: &str) -> Self {
        Resolution {
            profile_id: profile_id.to_string(),
            mode: MatchMode::Fallback,
            matched_field: None,
            matched_token: None,
        }
    }

    /// True when resolved through a configured token rather than the fallback
    pub fn is_explicit(&self) -> bool {
        self.mode != MatchMode::Fallback
    }

    pub fn is_fallback(&self) -> bool {
        self.mode == MatchMode::Fallback
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct CategoryResolver {
    profiles: Arc<ProfileSet>,
}

impl CategoryResolver {
    pub fn new(profiles: Arc<ProfileSet>) -> Self {
        CategoryResolver { profiles }
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    /// Map a payload to exactly one profile
    pub fn resolve(&self, payload: &VendorPayload) -> Resolution {
        for (entry, matcher) in self.profiles.entries() {
            if entry.mode == MatchMode::Fallback {
                break;
            }

            for field in TextField::PRECEDENCE {
                let text = match payload.text(field) {
                    Some(text) => text,
                    None => continue,
                };

                if entry_matches(entry, matcher, text) {
                    return Resolution {
                        profile_id: entry.profile_id.clone(),
                        mode: entry.mode,
                        matched_field: Some(field),
                        matched_token: Some(entry.token.clone()),
                    };
                }
            }
        }

        Resolution::fallback(&self.profiles.unknown().id)
    }

    /// Resolve and look up the profile in one step
    pub fn resolve_profile(&self, payload: &VendorPayload) -> (&Profile, Resolution) {
        let resolution = self.resolve(payload);
        let profile = self
            .profiles
            .get(&resolution.profile_id)
            .unwrap_or_else(|| self.profiles.unknown());
        (profile, resolution)
    }
}

fn entry_matches(entry: &MatchEntry, matcher: Option<&Regex>, text: &str) -> bool {
    match (entry.mode, matcher) {
        (MatchMode::Exact, _) => normalize_token(text) == normalize_token(&entry.token),
        (MatchMode::Alias, Some(regex)) | (MatchMode::Pattern, Some(regex)) => {
            regex.is_match(text.trim())
        }
        (MatchMode::Fallback, _) => true,
        _ => false,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileDocument;
    use serde_json::json;

    fn doc(id: &str, tokens: &[&str], chain: &[&str]) -> ProfileDocument {
        ProfileDocument {
            id: Some(id.to_string()),
            source_categories: tokens.iter().map(|t| t.to_string()).collect(),
            parent_chain: Some(chain.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    fn resolver(docs: Vec<ProfileDocument>) -> CategoryResolver {
        let labeled = docs
            .into_iter()
            .enumerate()
            .map(|(i, d)| (format!("{}.yaml", i), d))
            .collect();
        CategoryResolver::new(Arc::new(ProfileSet::build(labeled, None).unwrap()))
    }

    fn payload(value: serde_json::Value) -> VendorPayload {
        VendorPayload::from_value(&value).unwrap()
    }

    #[test]
    fn test_exact_match_case_insensitive_and_trimmed() {
        let r = resolver(vec![doc("resistor", &["Resistors"], &["Passive Components", "Resistors"])]);
        let res = r.resolve(&payload(json!({"category": "  RESISTORS "})));

        assert_eq!(res.profile_id, "resistor");
        assert_eq!(res.mode, MatchMode::Exact);
        assert_eq!(res.matched_field, Some(TextField::Category));
        assert!(res.is_explicit());
    }

    #[test]
    fn test_field_precedence() {
        let r = resolver(vec![doc("cap", &["Ceramic Capacitors"], &["Passive", "Capacitors"])]);

        // Only the description mentions the token
        let res = r.resolve(&payload(json!({
            "category": "Passives",
            "description": "Ceramic Capacitors 100nF"
        })));
        assert_eq!(res.profile_id, "cap");
        assert_eq!(res.mode, MatchMode::Alias);
        assert_eq!(res.matched_field, Some(TextField::Description));
    }

    #[test]
    fn test_exact_wins_over_earlier_alias() {
        let r = resolver(vec![
            doc("tvs", &["TVS Diodes"], &["Discrete", "TVS"]),
            doc("tvs_array", &["TVS Diodes Array"], &["Discrete", "TVS Arrays"]),
        ]);
        let res = r.resolve(&payload(json!({"category": "TVS Diodes Array"})));
        assert_eq!(res.profile_id, "tvs_array");
        assert_eq!(res.mode, MatchMode::Exact);
    }

    #[test]
    fn test_alias_prefers_more_specific_token() {
        let r = resolver(vec![
            doc("sensor", &["Sensors"], &["Sensors"]),
            doc("humidity", &["Humidity Sensors"], &["Sensors", "Humidity"]),
        ]);
        let res = r.resolve(&payload(json!({"category": "Digital Humidity Sensors, I2C"})));
        assert_eq!(res.profile_id, "humidity");
    }

    #[test]
    fn test_alias_requires_word_boundary() {
        let r = resolver(vec![doc("fuse", &["Fuse"], &["Circuit Protection", "Fuses"])]);
        let res = r.resolve(&payload(json!({"category": "Fusebox Accessories"})));
        assert!(res.is_fallback());
    }

    #[test]
    fn test_pattern_match() {
        let mut d = doc("mcu", &[], &["ICs", "Microcontrollers"]);
        d.source_category_patterns = vec![r"^microcontrollers?\b".to_string()];
        let r = resolver(vec![d]);

        let res = r.resolve(&payload(json!({"subcategory": "Microcontrollers - 32 bit"})));
        assert_eq!(res.profile_id, "mcu");
        assert_eq!(res.mode, MatchMode::Pattern);
    }

    #[test]
    fn test_no_match_falls_back_to_unknown() {
        let r = resolver(vec![doc("resistor", &["Resistors"], &["Passive Components", "Resistors"])]);

        let res = r.resolve(&payload(json!({"category": "Obscure Sensor XYZ"})));
        assert_eq!(res.profile_id, "unknown");
        assert!(res.is_fallback());

        let (profile, _) = r.resolve_profile(&payload(json!({})));
        assert!(profile.is_unknown());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let r = resolver(vec![
            doc("a", &["Alpha Widgets"], &["A"]),
            doc("b", &["Widgets"], &["B"]),
        ]);
        let p = payload(json!({"description": "alpha widgets, bulk"}));
        let first = r.resolve(&p);
        for _ in 0..20 {
            assert_eq!(r.resolve(&p), first);
        }
        assert_eq!(first.profile_id, "a");
    }

    #[test]
    fn test_first_match_by_registry_order() {
        // Same specificity: configuration order decides
        let r = resolver(vec![
            doc("first", &["Relay"], &["Electromechanical", "Relays"]),
            doc("second", &["Timer"], &["Electromechanical", "Timers"]),
        ]);
        let res = r.resolve(&payload(json!({"description": "Timer Relay 12V"})));
        assert_eq!(res.profile_id, "first");
    }
}
