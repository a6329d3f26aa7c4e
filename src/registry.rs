// 🗂️ Profile Registry - load, validate, order
// Profiles live as YAML/JSON documents in one directory. Loading composes
// `extends` inheritance once, rejects conflicting or cyclic definitions and
// freezes an explicit evaluation order for the resolver.

use crate::error::ConfigError;
use crate::profile::{
    AttributeRule, Profile, ProfileDocument, RegistryManifest, TraitRule, ValueType,
    UNKNOWN_PROFILE_ID,
};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File names treated as the manifest rather than a profile
const MANIFEST_FILES: [&str; 3] = ["registry.yaml", "registry.yml", "registry.json"];

/// Generic words that only ever match exactly, unless the manifest says otherwise
const DEFAULT_GENERIC_TOKENS: [&str; 18] = [
    "capacitors",
    "capacitor",
    "resistors",
    "resistor",
    "connectors",
    "connector",
    "inductors",
    "inductor",
    "diodes",
    "diode",
    "led",
    "leds",
    "module",
    "modules",
    "ic",
    "ics",
    "semiconductors",
    "other",
];

// ============================================================================
// MATCH ENTRIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Whole field equals the token
    Exact,
    /// Token appears in the field on word boundaries
    Alias,
    /// Regex from `source_category_patterns`
    Pattern,
    /// The reserved Unknown profile
    Fallback,
}

/// One step of the resolver's evaluation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchEntry {
    pub profile_id: String,
    pub token: String,
    pub mode: MatchMode,
    pub priority: i32,
    /// Token length in characters; longer tokens are more specific
    pub specificity: usize,
}

/// Lowercased, trimmed form used for every text comparison
pub fn normalize_token(s: &str) -> String {
    s.trim().to_lowercase()
}

fn alias_regex(token: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}]){}(?:$|[^\p{{L}}\p{{N}}])",
        regex::escape(token.trim())
    ))
}

fn pattern_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

// ============================================================================
// PROFILE SET
// ============================================================================

/// Immutable, validated set of profiles plus its evaluation order.
///
/// Shared as `Arc<ProfileSet>`; a reload builds a new set and never touches
/// one that is already in use.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSet {
    version: Option<String>,
    /// Configuration order; the Unknown profile is always last
    profiles: Vec<Profile>,
    evaluation_order: Vec<MatchEntry>,
    generic_tokens: Vec<String>,
    fingerprint: String,

    #[serde(skip)]
    fallback: Profile,

    /// Compiled matcher per evaluation entry (None for exact/fallback)
    #[serde(skip)]
    matchers: Vec<Option<Regex>>,
}

impl ProfileSet {
    /// Validate and compose profile documents.
    ///
    /// `documents` pairs a source label (file name) with each document and
    /// must already be in configuration order; the manifest, when present,
    /// overrides that order.
    pub fn build(
        documents: Vec<(String, ProfileDocument)>,
        manifest: Option<RegistryManifest>,
    ) -> Result<Self, ConfigError> {
        let manifest = manifest.unwrap_or_default();

        // 1. Required fields and unique ids
        let mut by_id: HashMap<String, ProfileDocument> = HashMap::new();
        let mut config_order: Vec<String> = Vec::new();

        for (source, doc) in documents {
            let id = doc
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ConfigError::MissingField {
                    profile: source.clone(),
                    field: "id".to_string(),
                })?
                .to_string();

            if id == UNKNOWN_PROFILE_ID {
                return Err(ConfigError::ReservedProfile(id));
            }
            if by_id.contains_key(&id) {
                return Err(ConfigError::DuplicateProfile(id));
            }

            check_document(&id, &doc)?;
            config_order.push(id.clone());
            by_id.insert(id, doc);
        }

        // 2. Manifest order first, remaining profiles after in their given order
        if !manifest.order.is_empty() {
            let mut ordered: Vec<String> = Vec::with_capacity(config_order.len());
            for id in &manifest.order {
                if !by_id.contains_key(id) {
                    return Err(ConfigError::UnknownManifestEntry(id.clone()));
                }
                if !ordered.contains(id) {
                    ordered.push(id.clone());
                }
            }
            for id in config_order {
                if !ordered.contains(&id) {
                    warn!("Profile '{}' not listed in manifest order, appending", id);
                    ordered.push(id);
                }
            }
            config_order = ordered;
        }

        // 3. Compose `extends` once, at load time
        let mut composed: HashMap<String, Profile> = HashMap::new();
        for id in &config_order {
            compose(id, &by_id, &mut composed, &mut Vec::new())?;
        }

        let mut profiles: Vec<Profile> = config_order
            .iter()
            .filter_map(|id| composed.remove(id))
            .collect();

        // 4. Exact token conflicts
        check_token_conflicts(&profiles)?;

        // 5. Evaluation order
        let generic_tokens: Vec<String> = match manifest.generic_tokens {
            Some(tokens) => tokens.iter().map(|t| normalize_token(t)).collect(),
            None => DEFAULT_GENERIC_TOKENS.iter().map(|t| t.to_string()).collect(),
        };
        let (evaluation_order, matchers) = build_evaluation_order(&profiles, &generic_tokens)?;

        profiles.push(Profile::unknown());

        let mut set = ProfileSet {
            version: manifest.version,
            profiles,
            evaluation_order,
            generic_tokens,
            fingerprint: String::new(),
            fallback: Profile::unknown(),
            matchers,
        };
        set.fingerprint = set.compute_fingerprint();
        Ok(set)
    }

    /// Set containing only the Unknown profile
    pub fn empty() -> Self {
        ProfileSet::build(Vec::new(), None).unwrap_or_else(|_| ProfileSet {
            version: None,
            profiles: vec![Profile::unknown()],
            evaluation_order: vec![fallback_entry()],
            generic_tokens: Vec::new(),
            fingerprint: String::new(),
            fallback: Profile::unknown(),
            matchers: vec![None],
        })
    }

    fn compute_fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "version": self.version,
            "profiles": self.profiles,
            "evaluation_order": self.evaluation_order,
            "generic_tokens": self.generic_tokens,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string());
        format!("{:x}", hasher.finalize())
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// SHA-256 over the composed profiles and their order
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Profiles in configuration order, Unknown last
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// The reserved fallback profile
    pub fn unknown(&self) -> &Profile {
        &self.fallback
    }

    pub fn evaluation_order(&self) -> &[MatchEntry] {
        &self.evaluation_order
    }

    /// Evaluation entries with their compiled matchers
    pub fn entries(&self) -> impl Iterator<Item = (&MatchEntry, Option<&Regex>)> {
        self.evaluation_order
            .iter()
            .zip(self.matchers.iter().map(Option::as_ref))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.len() <= 1
    }
}

fn fallback_entry() -> MatchEntry {
    MatchEntry {
        profile_id: UNKNOWN_PROFILE_ID.to_string(),
        token: String::new(),
        mode: MatchMode::Fallback,
        priority: i32::MIN,
        specificity: 0,
    }
}

/// Per-document checks that do not need other profiles
fn check_document(id: &str, doc: &ProfileDocument) -> Result<(), ConfigError> {
    if doc.parent_chain.is_none() && doc.extends.is_none() {
        return Err(ConfigError::MissingField {
            profile: id.to_string(),
            field: "parent_chain".to_string(),
        });
    }

    for (idx, rule) in doc.attribute_schema.iter().enumerate() {
        let name = rule.canonical_name.as_deref().map(str::trim).unwrap_or("");
        if name.is_empty() {
            return Err(ConfigError::MissingField {
                profile: id.to_string(),
                field: format!("attribute_schema[{}].canonical_name", idx),
            });
        }
        if rule.value_type.map(|t| t.needs_unit()).unwrap_or(false) && rule.unit_rule.is_none() {
            return Err(ConfigError::MissingField {
                profile: id.to_string(),
                field: format!("attribute_schema[{}].unit_rule", idx),
            });
        }
        if let Some(pattern) = &rule.description_pattern {
            pattern_regex(pattern).map_err(|e| ConfigError::InvalidPattern {
                profile: id.to_string(),
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        }
    }

    for (idx, rule) in doc.traits.iter().enumerate() {
        if rule.sources.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::MissingField {
                profile: id.to_string(),
                field: format!("traits[{}].sources", idx),
            });
        }
    }

    for pattern in &doc.source_category_patterns {
        pattern_regex(pattern).map_err(|e| ConfigError::InvalidPattern {
            profile: id.to_string(),
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
    }

    Ok(())
}

/// Resolve one profile, composing its ancestors first.
///
/// `stack` holds the ids currently being composed; meeting one again is a cycle.
fn compose(
    id: &str,
    docs: &HashMap<String, ProfileDocument>,
    done: &mut HashMap<String, Profile>,
    stack: &mut Vec<String>,
) -> Result<Profile, ConfigError> {
    if let Some(profile) = done.get(id) {
        return Ok(profile.clone());
    }
    if stack.iter().any(|s| s == id) {
        let mut chain = stack.clone();
        chain.push(id.to_string());
        return Err(ConfigError::CyclicChain {
            profile: stack[0].clone(),
            chain: chain.join(" -> "),
        });
    }

    let doc = docs
        .get(id)
        .ok_or_else(|| ConfigError::UnknownAncestor {
            profile: stack.last().cloned().unwrap_or_default(),
            parent: id.to_string(),
        })?;

    stack.push(id.to_string());
    let parent = match &doc.extends {
        Some(parent_id) => Some(compose(parent_id, docs, done, stack)?),
        None => None,
    };
    stack.pop();

    let declared_chain: Option<Vec<String>> = doc
        .parent_chain
        .as_ref()
        .map(|chain| chain.iter().map(|s| s.trim().to_string()).collect());

    let name = doc
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| declared_chain.as_ref().and_then(|c| c.last().cloned()))
        .unwrap_or_else(|| id.to_string());

    let parent_chain = match (declared_chain, &parent) {
        (Some(chain), _) => chain,
        (None, Some(parent)) => {
            let mut chain = parent.parent_chain.clone();
            chain.push(name.clone());
            chain
        }
        (None, None) => Vec::new(),
    };
    check_chain(id, &parent_chain)?;

    // Inherited rules first; a rule with the same canonical name replaces it in place
    let mut schema: Vec<AttributeRule> = parent
        .as_ref()
        .map(|p| p.attribute_schema.clone())
        .unwrap_or_default();
    for rule_doc in &doc.attribute_schema {
        let rule = AttributeRule {
            canonical_name: rule_doc
                .canonical_name
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string(),
            aliases: rule_doc.aliases.iter().map(|a| a.trim().to_string()).collect(),
            value_type: rule_doc.value_type.unwrap_or(ValueType::Text),
            unit_rule: rule_doc.unit_rule.clone(),
            description_pattern: rule_doc.description_pattern.clone(),
        };
        match schema
            .iter_mut()
            .find(|r| r.canonical_name == rule.canonical_name)
        {
            Some(existing) => *existing = rule,
            None => schema.push(rule),
        }
    }

    // Same for traits, keyed by kind and output key
    let mut traits: Vec<TraitRule> = parent
        .as_ref()
        .map(|p| p.traits.clone())
        .unwrap_or_default();
    for rule in &doc.traits {
        match traits
            .iter_mut()
            .find(|t| t.kind == rule.kind && t.target() == rule.target())
        {
            Some(existing) => *existing = rule.clone(),
            None => traits.push(rule.clone()),
        }
    }

    let profile = Profile {
        id: id.to_string(),
        name,
        priority: doc.priority,
        source_categories: doc
            .source_categories
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        source_category_patterns: doc.source_category_patterns.clone(),
        attribute_schema: schema,
        traits,
        parent_chain,
    };

    debug!(
        "Composed profile '{}' ({} rules, chain {:?})",
        profile.id,
        profile.attribute_schema.len(),
        profile.parent_chain
    );
    done.insert(id.to_string(), profile.clone());
    Ok(profile)
}

/// A chain must be non-empty and never revisit a segment
fn check_chain(id: &str, chain: &[String]) -> Result<(), ConfigError> {
    if chain.is_empty() || chain.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::MissingField {
            profile: id.to_string(),
            field: "parent_chain".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for segment in chain {
        if !seen.insert(normalize_token(segment)) {
            return Err(ConfigError::CyclicChain {
                profile: id.to_string(),
                chain: chain.join(" > "),
            });
        }
    }
    Ok(())
}

/// Profiles sharing an exact token must all sort at distinct effective
/// priorities, and at most one of them may leave its priority unset
fn check_token_conflicts(profiles: &[Profile]) -> Result<(), ConfigError> {
    let mut claimants: HashMap<String, Vec<&Profile>> = HashMap::new();

    for profile in profiles {
        let tokens: HashSet<String> = profile
            .source_categories
            .iter()
            .map(|t| normalize_token(t))
            .collect();

        for token in tokens {
            let others = claimants.entry(token.clone()).or_default();
            let clash = others
                .iter()
                .find(|other| other.effective_priority() == profile.effective_priority());
            if let Some(other) = clash {
                return Err(ConfigError::ConflictingToken {
                    token,
                    first: other.id.clone(),
                    second: profile.id.clone(),
                });
            }
            others.push(profile);
        }
    }
    Ok(())
}

/// Exact tier in configuration order, then alias/pattern tier by specificity,
/// then the fallback. Explicit priority sorts ahead within a tier.
fn build_evaluation_order(
    profiles: &[Profile],
    generic_tokens: &[String],
) -> Result<(Vec<MatchEntry>, Vec<Option<Regex>>), ConfigError> {
    let mut exact: Vec<MatchEntry> = Vec::new();
    let mut fuzzy: Vec<(MatchEntry, Regex)> = Vec::new();

    for profile in profiles {
        let priority = profile.effective_priority();
        let mut seen = HashSet::new();

        for token in &profile.source_categories {
            let norm = normalize_token(token);
            if !seen.insert(norm.clone()) {
                continue;
            }
            exact.push(MatchEntry {
                profile_id: profile.id.clone(),
                token: token.clone(),
                mode: MatchMode::Exact,
                priority,
                specificity: norm.chars().count(),
            });

            if generic_tokens.contains(&norm) {
                continue;
            }
            let regex = alias_regex(token).map_err(|e| ConfigError::InvalidPattern {
                profile: profile.id.clone(),
                pattern: token.clone(),
                message: e.to_string(),
            })?;
            fuzzy.push((
                MatchEntry {
                    profile_id: profile.id.clone(),
                    token: token.clone(),
                    mode: MatchMode::Alias,
                    priority,
                    specificity: norm.chars().count(),
                },
                regex,
            ));
        }

        for pattern in &profile.source_category_patterns {
            let regex = pattern_regex(pattern).map_err(|e| ConfigError::InvalidPattern {
                profile: profile.id.clone(),
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            fuzzy.push((
                MatchEntry {
                    profile_id: profile.id.clone(),
                    token: pattern.clone(),
                    mode: MatchMode::Pattern,
                    priority,
                    specificity: pattern.chars().count(),
                },
                regex,
            ));
        }
    }

    // Stable sorts keep configuration order among equals
    exact.sort_by(|a, b| b.priority.cmp(&a.priority));
    fuzzy.sort_by(|(a, _), (b, _)| {
        b.priority
            .cmp(&a.priority)
            .then(b.specificity.cmp(&a.specificity))
    });

    let mut entries = Vec::with_capacity(exact.len() + fuzzy.len() + 1);
    let mut matchers = Vec::with_capacity(entries.capacity());

    for entry in exact {
        entries.push(entry);
        matchers.push(None);
    }
    for (entry, regex) in fuzzy {
        entries.push(entry);
        matchers.push(Some(regex));
    }
    entries.push(fallback_entry());
    matchers.push(None);

    Ok((entries, matchers))
}

// ============================================================================
// DIRECTORY LOADER
// ============================================================================

fn is_profile_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e, "yaml" | "yml" | "json"))
        .unwrap_or(false)
}

fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let parsed = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    };

    parsed.map_err(|message| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    })
}

/// Load every profile document in `dir` (plus the optional manifest).
///
/// Without a manifest, configuration order is the lexical order of file names.
pub fn load_profile_dir(dir: &Path) -> Result<ProfileSet, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::MissingDirectory(dir.display().to_string()));
    }

    let entries = fs::read_dir(dir).map_err(|e| ConfigError::Read {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Read {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if path.is_file() && is_profile_file(&path) {
            files.push(path);
        }
    }
    files.sort();

    let mut manifest: Option<RegistryManifest> = None;
    let mut documents: Vec<(String, ProfileDocument)> = Vec::new();

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if MANIFEST_FILES.contains(&file_name.as_str()) {
            manifest = Some(read_document(&path)?);
            continue;
        }
        let doc: ProfileDocument = read_document(&path)?;
        debug!("Read profile document {}", path.display());
        documents.push((file_name, doc));
    }

    if documents.is_empty() {
        return Err(ConfigError::Empty(dir.display().to_string()));
    }

    let set = ProfileSet::build(documents, manifest)?;
    info!(
        "Loaded {} profiles from {} (fingerprint {})",
        set.len() - 1,
        dir.display(),
        &set.fingerprint()[..12]
    );
    Ok(set)
}

// ============================================================================
// PROFILE REGISTRY
// ============================================================================

/// Holder of the current profile set for a profiles directory
pub struct ProfileRegistry {
    dir: PathBuf,
    current: Arc<ProfileSet>,
}

impl ProfileRegistry {
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ConfigError> {
        let dir = dir.as_ref().to_path_buf();
        let current = Arc::new(load_profile_dir(&dir)?);
        Ok(ProfileRegistry { dir, current })
    }

    /// Wrap an already built set
    pub fn from_set(set: ProfileSet) -> Self {
        ProfileRegistry {
            dir: PathBuf::new(),
            current: Arc::new(set),
        }
    }

    /// Snapshot to hand to a resolver or a run
    pub fn current(&self) -> Arc<ProfileSet> {
        Arc::clone(&self.current)
    }

    /// Re-read the directory. On error the previous set stays current.
    pub fn reload(&mut self) -> Result<Arc<ProfileSet>, ConfigError> {
        let set = load_profile_dir(&self.dir)?;
        self.current = Arc::new(set);
        Ok(self.current())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ============================================================================
// TESTS
// ============================================================================
