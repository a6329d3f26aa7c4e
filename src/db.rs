// 🗄️ Catalog Store - SQLite persistence for items, categories, audit events
// raw_payload is write-once (enforced by trigger). Classification columns are
// the only thing this crate ever rewrites, always in one transaction guarded
// by classification_version.

use crate::classify::{Classification, ClassificationColumns, FieldChange};
use crate::error::StoreError;
use crate::payload::VendorPayload;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

type Result<T> = std::result::Result<T, StoreError>;

pub const ITEM_ENTITY: &str = "catalog_item";

// ============================================================================
// ROW TYPES
// ============================================================================

/// A stored catalog item: immutable identity + classification-owned columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub item_uuid: String,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
    pub columns: ClassificationColumns,
    /// Bumped by every classification write; used for optimistic checks
    pub classification_version: i64,
    pub profile_fingerprint: Option<String>,
    /// Manufacturer part number read from the payload at intake
    pub mpn: Option<String>,
}

impl CatalogItem {
    pub fn is_classified(&self) -> bool {
        self.columns.category_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub category_id: String,
    pub source_name: String,
    pub category_path: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Named resume position of a reindex run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexCursor {
    pub name: String,
    pub last_item_id: i64,
    pub profile_fingerprint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open_database<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode so readers keep going during a reindex
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Catalog Items (identity + classification-owned columns)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_uuid TEXT UNIQUE NOT NULL,
            raw_payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            category_id TEXT,
            category_source_name TEXT,
            category_path TEXT,
            category_path_names TEXT,
            attributes TEXT,
            unknown_parameters TEXT,
            classification_version INTEGER NOT NULL DEFAULT 0,
            profile_fingerprint TEXT,
            updated_at TEXT,
            mpn TEXT
        )",
        [],
    )?;

    // Catalogs created before the mpn column existed
    let has_mpn: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('catalog_items') WHERE name = 'mpn'",
        [],
        |row| row.get(0),
    )?;
    if has_mpn == 0 {
        conn.execute("ALTER TABLE catalog_items ADD COLUMN mpn TEXT", [])?;
    }

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS catalog_items_identity_immutable
         BEFORE UPDATE OF item_uuid, raw_payload, created_at, mpn ON catalog_items
         BEGIN
             SELECT RAISE(ABORT, 'catalog item identity and raw_payload are immutable');
         END",
        [],
    )?;

    // ==========================================================================
    // Categories (one row per category id + vendor label)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            category_id TEXT NOT NULL,
            source_name TEXT NOT NULL DEFAULT '',
            category_path TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            PRIMARY KEY (category_id, source_name)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Reindex Cursors (resume state, readable by any process)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reindex_cursors (
            name TEXT PRIMARY KEY,
            last_item_id INTEGER NOT NULL,
            profile_fingerprint TEXT,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_category ON catalog_items(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_mpn ON catalog_items(mpn)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const ITEM_COLUMNS: &str = "id, item_uuid, raw_payload, created_at,
    category_id, category_source_name, category_path, category_path_names,
    attributes, unknown_parameters, classification_version, profile_fingerprint, mpn";

fn item_from_row(row: &Row) -> rusqlite::Result<CatalogItem> {
    let created_at: String = row.get(3)?;

    Ok(CatalogItem {
        id: row.get(0)?,
        item_uuid: row.get(1)?,
        raw_payload: row.get(2)?,
        created_at: parse_timestamp(3, &created_at)?,
        columns: ClassificationColumns {
            category_id: row.get(4)?,
            category_source_name: row.get(5)?,
            category_path: row.get(6)?,
            category_path_names: row.get(7)?,
            attributes: row.get(8)?,
            unknown_parameters: row.get(9)?,
        },
        classification_version: row.get(10)?,
        profile_fingerprint: row.get(11)?,
        mpn: row.get(12)?,
    })
}

// ============================================================================
// INTAKE
// ============================================================================

/// Store a new item with its raw payload and, when available, its first
/// classification. Returns the new item id.
pub fn insert_item(
    conn: &Connection,
    raw_payload: &str,
    classification: Option<&Classification>,
    profile_fingerprint: Option<&str>,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    let now = Utc::now().to_rfc3339();
    let item_uuid = uuid::Uuid::new_v4().to_string();
    // Unparseable payloads are still stored; they surface as reindex failures
    let mpn = VendorPayload::parse(raw_payload).ok().and_then(|p| p.mpn);

    tx.execute(
        "INSERT INTO catalog_items (item_uuid, raw_payload, created_at, mpn)
         VALUES (?1, ?2, ?3, ?4)",
        params![item_uuid, raw_payload, now, mpn],
    )?;
    let id = tx.last_insert_rowid();

    let mut event_data = serde_json::json!({ "item_uuid": item_uuid });

    if let Some(classification) = classification {
        let columns = classification.columns()?;
        update_columns(&tx, id, 0, &columns, profile_fingerprint)?;
        upsert_category(&tx, &columns)?;
        event_data["category_id"] = serde_json::json!(classification.category_id);
    }

    insert_event(
        &tx,
        &Event::new("item_ingested", ITEM_ENTITY, &id.to_string(), event_data, "intake"),
    )?;

    tx.commit()?;
    Ok(id)
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn get_item(conn: &Connection, id: i64) -> Result<Option<CatalogItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM catalog_items WHERE id = ?1", ITEM_COLUMNS),
            params![id],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

/// Next `limit` items with id greater than `after_id`, in id order
pub fn fetch_batch(conn: &Connection, after_id: i64, limit: usize) -> Result<Vec<CatalogItem>> {
    fetch_batch_matching(conn, after_id, limit, None)
}

/// Same as `fetch_batch`, restricted to MPNs matching a LIKE pattern
/// (`%` and `_` wildcards, ASCII case-insensitive)
pub fn fetch_batch_matching(
    conn: &Connection,
    after_id: i64,
    limit: usize,
    mpn_pattern: Option<&str>,
) -> Result<Vec<CatalogItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM catalog_items
         WHERE id > ?1 AND (?3 IS NULL OR mpn LIKE ?3)
         ORDER BY id ASC LIMIT ?2",
        ITEM_COLUMNS
    ))?;

    let items = stmt
        .query_map(params![after_id, limit as i64, mpn_pattern], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(items)
}

pub fn count_items(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM catalog_items", [], |row| row.get(0))?;
    Ok(count)
}

/// Item count per category id, largest first
pub fn category_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(category_id, '(unclassified)'), COUNT(*)
         FROM catalog_items
         GROUP BY category_id
         ORDER BY COUNT(*) DESC, category_id ASC",
    )?;

    let counts = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(counts)
}

// ============================================================================
// CLASSIFICATION WRITES
// ============================================================================

fn update_columns(
    conn: &Connection,
    item_id: i64,
    expected_version: i64,
    columns: &ClassificationColumns,
    profile_fingerprint: Option<&str>,
) -> Result<i64> {
    let updated = conn.execute(
        "UPDATE catalog_items SET
            category_id = ?1,
            category_source_name = ?2,
            category_path = ?3,
            category_path_names = ?4,
            attributes = ?5,
            unknown_parameters = ?6,
            profile_fingerprint = ?7,
            classification_version = classification_version + 1,
            updated_at = ?8
         WHERE id = ?9 AND classification_version = ?10",
        params![
            columns.category_id,
            columns.category_source_name,
            columns.category_path,
            columns.category_path_names,
            columns.attributes,
            columns.unknown_parameters,
            profile_fingerprint,
            Utc::now().to_rfc3339(),
            item_id,
            expected_version,
        ],
    )?;

    if updated == 0 {
        return Err(StoreError::WriteConflict { item_id });
    }
    Ok(expected_version + 1)
}

fn upsert_category(conn: &Connection, columns: &ClassificationColumns) -> Result<()> {
    let category_id = match &columns.category_id {
        Some(id) => id,
        None => return Ok(()),
    };
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO categories (category_id, source_name, category_path, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(category_id, source_name) DO UPDATE SET
            category_path = excluded.category_path,
            last_seen = excluded.last_seen",
        params![
            category_id,
            columns.category_source_name.as_deref().unwrap_or(""),
            columns.category_path.as_deref().unwrap_or(""),
            now,
        ],
    )?;
    Ok(())
}

/// Overwrite the classification-owned columns of one item.
///
/// Runs in a single transaction: the columns, the category upsert and the
/// audit event commit together or not at all. Fails with `WriteConflict`
/// when the row's classification_version is no longer `expected_version`.
pub fn write_classification(
    conn: &Connection,
    item_id: i64,
    expected_version: i64,
    columns: &ClassificationColumns,
    changes: &[FieldChange],
    profile_fingerprint: Option<&str>,
    actor: &str,
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;

    let version = update_columns(&tx, item_id, expected_version, columns, profile_fingerprint)?;
    upsert_category(&tx, columns)?;

    let event = Event::new(
        "classification_updated",
        ITEM_ENTITY,
        &item_id.to_string(),
        serde_json::json!({
            "changes": changes,
            "classification_version": version,
            "profile_fingerprint": profile_fingerprint,
        }),
        actor,
    );
    insert_event(&tx, &event)?;

    tx.commit()?;
    Ok(version)
}

// ============================================================================
// CATEGORIES
// ============================================================================

pub fn list_categories(conn: &Connection) -> Result<Vec<CategoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT category_id, source_name, category_path, first_seen, last_seen
         FROM categories
         ORDER BY category_id, source_name",
    )?;

    let rows = stmt
        .query_map([], |row| {
            let first_seen: String = row.get(3)?;
            let last_seen: String = row.get(4)?;
            Ok(CategoryRow {
                category_id: row.get(0)?,
                source_name: row.get(1)?,
                category_path: row.get(2)?,
                first_seen: parse_timestamp(3, &first_seen)?,
                last_seen: parse_timestamp(4, &last_seen)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

/// Delete category rows no item points at any more
pub fn cleanup_unused_categories(conn: &Connection) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM categories
         WHERE NOT EXISTS (
            SELECT 1 FROM catalog_items i
            WHERE i.category_id = categories.category_id
              AND COALESCE(i.category_source_name, '') = categories.source_name
         )",
        [],
    )?;
    Ok(removed)
}

// ============================================================================
// REINDEX CURSORS
// ============================================================================

pub fn get_cursor(conn: &Connection, name: &str) -> Result<Option<ReindexCursor>> {
    let cursor = conn
        .query_row(
            "SELECT name, last_item_id, profile_fingerprint, updated_at
             FROM reindex_cursors WHERE name = ?1",
            params![name],
            |row| {
                let updated_at: String = row.get(3)?;
                Ok(ReindexCursor {
                    name: row.get(0)?,
                    last_item_id: row.get(1)?,
                    profile_fingerprint: row.get(2)?,
                    updated_at: parse_timestamp(3, &updated_at)?,
                })
            },
        )
        .optional()?;
    Ok(cursor)
}

pub fn save_cursor(
    conn: &Connection,
    name: &str,
    last_item_id: i64,
    profile_fingerprint: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO reindex_cursors (name, last_item_id, profile_fingerprint, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(name) DO UPDATE SET
            last_item_id = excluded.last_item_id,
            profile_fingerprint = excluded.profile_fingerprint,
            updated_at = excluded.updated_at",
        params![name, last_item_id, profile_fingerprint, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

// ============================================================================
// BACKUP
// ============================================================================

#[derive(Debug, Serialize)]
struct BackupRow<'a> {
    id: i64,
    item_uuid: &'a str,
    classification_version: i64,
    category_id: Option<&'a str>,
    category_source_name: Option<&'a str>,
    category_path: Option<&'a str>,
    category_path_names: Option<&'a str>,
    attributes: Option<&'a str>,
    unknown_parameters: Option<&'a str>,
}

/// Write the current classification of `items` to a CSV snapshot
pub fn write_backup_csv<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    items: &[CatalogItem],
) -> std::result::Result<usize, csv::Error> {
    for item in items {
        writer.serialize(BackupRow {
            id: item.id,
            item_uuid: &item.item_uuid,
            classification_version: item.classification_version,
            category_id: item.columns.category_id.as_deref(),
            category_source_name: item.columns.category_source_name.as_deref(),
            category_path: item.columns.category_path.as_deref(),
            category_path_names: item.columns.category_path_names.as_deref(),
            attributes: item.columns.attributes.as_deref(),
            unknown_parameters: item.columns.unknown_parameters.as_deref(),
        })?;
    }
    writer.flush()?;
    Ok(items.len())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{sample_profiles, Classifier};
    use std::sync::Arc;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn classifier() -> Classifier {
        Classifier::new(Arc::new(sample_profiles()))
    }

    #[test]
    fn test_insert_and_fetch_item() {
        let conn = setup();
        let c = classifier();
        let raw = r#"{"category": "Resistors", "description": "10k 0402 ±1%"}"#;
        let classification = c.classify(raw).unwrap();

        let id = insert_item(&conn, raw, Some(&classification), Some("fp")).unwrap();
        let item = get_item(&conn, id).unwrap().unwrap();

        assert_eq!(item.raw_payload, raw);
        assert_eq!(item.classification_version, 1);
        assert_eq!(item.columns, classification.columns().unwrap());
        assert_eq!(item.profile_fingerprint.as_deref(), Some("fp"));
        assert!(item.is_classified());

        let events = get_events_for_entity(&conn, ITEM_ENTITY, &id.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "item_ingested");

        println!("✅ Insert/fetch item test PASSED");
    }

    #[test]
    fn test_raw_payload_is_immutable() {
        let conn = setup();
        let id = insert_item(&conn, r#"{"category": "X"}"#, None, None).unwrap();

        let result = conn.execute(
            "UPDATE catalog_items SET raw_payload = '{}' WHERE id = ?1",
            params![id],
        );
        assert!(result.is_err());

        let item = get_item(&conn, id).unwrap().unwrap();
        assert_eq!(item.raw_payload, r#"{"category": "X"}"#);
        assert!(!item.is_classified());
    }

    #[test]
    fn test_mpn_filter() {
        let conn = setup();
        let a = insert_item(&conn, r#"{"category": "Resistors", "mpn": "RC0402FR-0710KL"}"#, None, None).unwrap();
        let _b = insert_item(&conn, r#"{"category": "Capacitors", "mpn": "GRM155R71C104KA88D"}"#, None, None).unwrap();
        let c = insert_item(
            &conn,
            r#"{"Product": {"ManufacturerProductNumber": "rc0603fr-0710kl"}}"#,
            None,
            None,
        )
        .unwrap();
        let _d = insert_item(&conn, "not json", None, None).unwrap();

        assert_eq!(get_item(&conn, a).unwrap().unwrap().mpn.as_deref(), Some("RC0402FR-0710KL"));

        let hits = fetch_batch_matching(&conn, 0, 10, Some("RC%")).unwrap();
        assert_eq!(hits.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a, c]);

        assert_eq!(fetch_batch_matching(&conn, a, 10, Some("RC%")).unwrap().len(), 1);
        assert_eq!(fetch_batch_matching(&conn, 0, 10, None).unwrap().len(), 4);

        // mpn is part of the item's identity
        assert!(conn
            .execute("UPDATE catalog_items SET mpn = 'X' WHERE id = ?1", params![a])
            .is_err());
    }

    #[test]
    fn test_setup_adds_mpn_to_older_catalogs() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE catalog_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_uuid TEXT UNIQUE NOT NULL,
                raw_payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                category_id TEXT,
                category_source_name TEXT,
                category_path TEXT,
                category_path_names TEXT,
                attributes TEXT,
                unknown_parameters TEXT,
                classification_version INTEGER NOT NULL DEFAULT 0,
                profile_fingerprint TEXT,
                updated_at TEXT
            )",
            [],
        )
        .unwrap();

        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let id = insert_item(&conn, r#"{"mpn": "LM358"}"#, None, None).unwrap();
        assert_eq!(get_item(&conn, id).unwrap().unwrap().mpn.as_deref(), Some("LM358"));
    }

    #[test]
    fn test_fetch_batch_is_id_ordered() {
        let conn = setup();
        let ids: Vec<i64> = (0..5)
            .map(|i| insert_item(&conn, &format!(r#"{{"category": "C{}"}}"#, i), None, None).unwrap())
            .collect();

        let first = fetch_batch(&conn, 0, 2).unwrap();
        assert_eq!(first.iter().map(|i| i.id).collect::<Vec<_>>(), ids[..2].to_vec());

        let rest = fetch_batch(&conn, ids[1], 10).unwrap();
        assert_eq!(rest.iter().map(|i| i.id).collect::<Vec<_>>(), ids[2..].to_vec());
        assert_eq!(count_items(&conn).unwrap(), 5);
    }

    #[test]
    fn test_write_classification_and_conflict() {
        let conn = setup();
        let c = classifier();
        let raw = r#"{"category": "Ceramic Capacitors", "parameters": {"Capacitance": "1uF"}}"#;
        let id = insert_item(&conn, raw, None, None).unwrap();
        let item = get_item(&conn, id).unwrap().unwrap();

        let columns = c.classify(raw).unwrap().columns().unwrap();
        let changes = item.columns.diff(&columns);

        let version = write_classification(&conn, id, 0, &columns, &changes, Some("fp"), "test").unwrap();
        assert_eq!(version, 1);

        // Stale version is rejected and nothing changes
        let err = write_classification(&conn, id, 0, &ClassificationColumns::default(), &[], None, "test")
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict { item_id } if item_id == id));

        let stored = get_item(&conn, id).unwrap().unwrap();
        assert_eq!(stored.columns, columns);
        assert_eq!(stored.classification_version, 1);

        let events = get_events_for_entity(&conn, ITEM_ENTITY, &id.to_string()).unwrap();
        assert_eq!(events[0].event_type, "classification_updated");
        assert_eq!(events[0].data["changes"].as_array().map(|a| a.len()), Some(6));

        println!("✅ Optimistic write test PASSED");
    }

    #[test]
    fn test_categories_upsert_and_cleanup() {
        let conn = setup();
        let c = classifier();

        let raw = r#"{"category": "Resistors"}"#;
        let id = insert_item(&conn, raw, Some(&c.classify(raw).unwrap()), None).unwrap();
        assert_eq!(list_categories(&conn).unwrap().len(), 1);

        // Reclassify to something else; the old category row becomes unused
        let item = get_item(&conn, id).unwrap().unwrap();
        let other = c.classify(r#"{"category": "Capacitors"}"#).unwrap().columns().unwrap();
        write_classification(&conn, id, item.classification_version, &other, &[], None, "test").unwrap();

        assert_eq!(list_categories(&conn).unwrap().len(), 2);
        assert_eq!(cleanup_unused_categories(&conn).unwrap(), 1);

        let remaining = list_categories(&conn).unwrap();
        assert_eq!(remaining[0].category_id, "capacitor");
        assert_eq!(remaining[0].category_path, "Passive Components > Capacitors");
    }

    #[test]
    fn test_cursor_roundtrip() {
        let conn = setup();
        assert!(get_cursor(&conn, "default").unwrap().is_none());

        save_cursor(&conn, "default", 10, Some("abc")).unwrap();
        save_cursor(&conn, "default", 42, Some("abc")).unwrap();

        let cursor = get_cursor(&conn, "default").unwrap().unwrap();
        assert_eq!(cursor.last_item_id, 42);
        assert_eq!(cursor.profile_fingerprint.as_deref(), Some("abc"));
    }

    #[test]
    fn test_backup_csv() {
        let conn = setup();
        let c = classifier();
        let raw = r#"{"category": "Resistors", "parameters": {"Resistance": "10k"}}"#;
        insert_item(&conn, raw, Some(&c.classify(raw).unwrap()), None).unwrap();
        insert_item(&conn, "{}", None, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.csv");
        let items = fetch_batch(&conn, 0, 10).unwrap();

        let mut writer = csv::Writer::from_path(&path).unwrap();
        assert_eq!(write_backup_csv(&mut writer, &items).unwrap(), 2);
        drop(writer);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "id");
        assert_eq!(&headers[3], "category_id");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "resistor");
        assert_eq!(&rows[1][3], "");
    }

    #[test]
    fn test_event_log() {
        let conn = setup();

        let event = Event::new(
            "test_event",
            ITEM_ENTITY,
            "test_id_123",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, ITEM_ENTITY, "test_id_123").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "test_event");
        assert_eq!(events[0].actor, "test_actor");

        println!("✅ Event log test PASSED");
    }
}
