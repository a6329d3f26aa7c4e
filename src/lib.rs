// Part Taxonomy - Core Library
// Profile registry, category resolver, attribute extractor, path builder
// and reindexer. Used by the CLI and by tests.

pub mod error;
pub mod payload;
pub mod profile;
pub mod registry;
pub mod resolver;
pub mod extractor;
pub mod path;
pub mod classify;
pub mod db;
pub mod reindex;
pub mod config;

// Re-export commonly used types
pub use error::{ConfigError, Error, PayloadError, Result, StoreError};
pub use payload::{Parameter, TextField, VendorPayload};
pub use profile::{
    AttributeRule, Profile, ProfileDocument, RegistryManifest, TraitKind, TraitRule, UnitRule,
    ValueType, UNKNOWN_PROFILE_ID,
};
pub use registry::{load_profile_dir, MatchEntry, MatchMode, ProfileRegistry, ProfileSet};
pub use resolver::{CategoryResolver, Resolution};
pub use extractor::{AttributeExtractor, AttributeValue, CoercionWarning, Extraction};
pub use path::{CategoryPath, PathBuilder};
pub use classify::{Classification, ClassificationColumns, Classifier, FieldChange};
pub use db::{
    CatalogItem, CategoryRow, Event, ReindexCursor,
    open_database, setup_database, insert_item, get_item, fetch_batch, fetch_batch_matching,
    count_items, category_counts, write_classification, list_categories, cleanup_unused_categories,
    get_cursor, save_cursor, insert_event, get_events_for_entity, write_backup_csv,
};
pub use reindex::{FieldDiff, ItemFailure, ReindexOptions, ReindexReport, Reindexer};
pub use config::{AppConfig, ConfigOverrides};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
