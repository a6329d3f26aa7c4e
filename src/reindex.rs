// 🔁 Reindexer - re-derive classification from stored raw payloads
// Walks catalog items in id order, reclassifies each with the current
// profile set and writes only the items whose owned fields changed.
// Dry-run reports the full diff and never writes.
//
// Per-item failures (bad payload, write conflict) are recorded and the run
// goes on. The last confirmed id is always reported and, in apply mode,
// persisted as a named cursor so any process can resume.

use crate::classify::{Classification, ClassificationColumns, Classifier, FieldChange};
use crate::db::{self, CatalogItem};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_CURSOR: &str = "default";
pub const DEFAULT_BATCH_SIZE: usize = 200;

const ACTOR: &str = "reindexer";

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexOptions {
    /// Report only, zero writes
    pub dry_run: bool,
    /// Process at most this many items
    pub limit: Option<usize>,
    /// Start after this item id
    pub resume_from: Option<i64>,
    pub batch_size: usize,
    /// Classification threads per batch
    pub workers: usize,
    pub cursor_name: String,
    /// CSV snapshot of the rows before they are rewritten (apply only)
    pub backup_csv: Option<PathBuf>,
    pub cleanup_unused_categories: bool,
    /// SQL LIKE pattern on the item's MPN; a filtered run leaves the cursor alone
    #[serde(default)]
    pub mpn_filter: Option<String>,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        ReindexOptions {
            dry_run: false,
            limit: None,
            resume_from: None,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            cursor_name: DEFAULT_CURSOR.to_string(),
            backup_csv: None,
            cleanup_unused_categories: false,
            mpn_filter: None,
        }
    }
}

impl ReindexOptions {
    pub fn dry_run() -> Self {
        ReindexOptions {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn apply() -> Self {
        ReindexOptions::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_resume_from(mut self, item_id: i64) -> Self {
        self.resume_from = Some(item_id);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mpn_filter(mut self, pattern: impl Into<String>) -> Self {
        self.mpn_filter = Some(pattern.into());
        self
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// One owned field that changed (or would change) on one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub item_id: i64,
    pub field: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemOutcome {
    Unchanged,
    Changed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexReport {
    pub run_id: String,
    pub dry_run: bool,
    pub processed: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Coercion warnings across all processed items
    pub warnings: usize,
    /// Populated in dry-run only
    pub diffs: Vec<FieldDiff>,
    pub failures: Vec<ItemFailure>,
    pub field_change_counts: BTreeMap<String, usize>,
    /// Last item id confirmed by this run
    pub last_item_id: Option<i64>,
    pub cancelled: bool,
    pub profile_fingerprint: String,
    pub profile_version: Option<String>,
    pub backup_rows: usize,
    pub categories_removed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReindexReport {
    fn new(dry_run: bool, classifier: &Classifier) -> Self {
        let now = Utc::now();
        ReindexReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            dry_run,
            processed: 0,
            changed: 0,
            unchanged: 0,
            failed: 0,
            warnings: 0,
            diffs: Vec::new(),
            failures: Vec::new(),
            field_change_counts: BTreeMap::new(),
            last_item_id: None,
            cancelled: false,
            profile_fingerprint: classifier.profiles().fingerprint().to_string(),
            profile_version: classifier.profiles().version().map(str::to_string),
            backup_rows: 0,
            categories_removed: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn record_failure(&mut self, item_id: i64, reason: String) {
        warn!("Item {} failed: {}", item_id, reason);
        self.failed += 1;
        self.failures.push(ItemFailure { item_id, reason });
    }

    fn record_changes(&mut self, item_id: i64, changes: &[FieldChange], keep_diffs: bool) {
        for change in changes {
            *self.field_change_counts.entry(change.field.clone()).or_insert(0) += 1;
            debug!(
                "Item {} {}: {} -> {}",
                item_id, change.field, change.old, change.new
            );
            if keep_diffs {
                self.diffs.push(FieldDiff {
                    item_id,
                    field: change.field.clone(),
                    old: change.old.clone(),
                    new: change.new.clone(),
                });
            }
        }
    }
}

// ============================================================================
// ITEM EVALUATION
// ============================================================================

/// Recomputed classification of one item, before any write
pub(crate) enum Evaluation {
    Classified {
        columns: ClassificationColumns,
        changes: Vec<FieldChange>,
        warnings: usize,
    },
    Failed(String),
}

pub(crate) fn evaluate(classifier: &Classifier, item: &CatalogItem) -> Evaluation {
    let classification: Classification = match classifier.classify(&item.raw_payload) {
        Ok(c) => c,
        Err(e) => return Evaluation::Failed(e.to_string()),
    };

    match classification.columns() {
        Ok(columns) => Evaluation::Classified {
            changes: item.columns.diff(&columns),
            warnings: classification.warnings.len(),
            columns,
        },
        Err(e) => Evaluation::Failed(format!("Serialization error: {}", e)),
    }
}

/// Apply one evaluation against the store (or just count it in dry-run)
pub(crate) fn settle_item(
    conn: &Connection,
    item: &CatalogItem,
    evaluation: Evaluation,
    report: &mut ReindexReport,
) -> ItemOutcome {
    report.processed += 1;

    let (columns, changes, warnings) = match evaluation {
        Evaluation::Failed(reason) => {
            report.record_failure(item.id, reason);
            return ItemOutcome::Failed;
        }
        Evaluation::Classified {
            columns,
            changes,
            warnings,
        } => (columns, changes, warnings),
    };
    report.warnings += warnings;

    if changes.is_empty() {
        report.unchanged += 1;
        return ItemOutcome::Unchanged;
    }

    if !report.dry_run {
        let write = db::write_classification(
            conn,
            item.id,
            item.classification_version,
            &columns,
            &changes,
            Some(&report.profile_fingerprint),
            ACTOR,
        );
        if let Err(e) = write {
            report.record_failure(item.id, e.to_string());
            return ItemOutcome::Failed;
        }
    }

    let keep_diffs = report.dry_run;
    report.record_changes(item.id, &changes, keep_diffs);
    report.changed += 1;
    ItemOutcome::Changed
}

// ============================================================================
// REINDEXER
// ============================================================================

pub struct Reindexer {
    classifier: Arc<Classifier>,
    cancel: Arc<AtomicBool>,
}

impl Reindexer {
    pub fn new(classifier: Classifier) -> Self {
        Reindexer {
            classifier: Arc::new(classifier),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Shared flag; setting it stops the run before the next item
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Classify a batch on `pool`, each worker taking one disjoint slice
    fn evaluate_batch(&self, pool: &rayon::ThreadPool, items: &[CatalogItem], workers: usize) -> Vec<Evaluation> {
        let chunk_size = items.len().div_ceil(workers.max(1)).max(1);
        let classifier = &self.classifier;

        let per_chunk: Vec<Vec<Evaluation>> = pool.install(|| {
            items
                .par_chunks(chunk_size)
                .map(|chunk| chunk.iter().map(|item| evaluate(classifier, item)).collect())
                .collect()
        });

        per_chunk.into_iter().flatten().collect()
    }

    pub fn run(&self, conn: &Connection, options: &ReindexOptions) -> Result<ReindexReport> {
        let mut report = ReindexReport::new(options.dry_run, &self.classifier);
        let workers = options.workers.max(1);
        let batch_size = options.batch_size.max(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("reindex-worker-{}", i))
            .build()?;

        let mut backup = match (&options.backup_csv, options.dry_run) {
            (Some(path), false) => Some(csv::Writer::from_path(path)?),
            _ => None,
        };

        info!(
            "Reindex run {} starting ({}, fingerprint {}, resume after {:?}, limit {:?}, mpn {:?})",
            report.run_id,
            if options.dry_run { "dry-run" } else { "apply" },
            &report.profile_fingerprint[..12.min(report.profile_fingerprint.len())],
            options.resume_from,
            options.limit,
            options.mpn_filter
        );

        let mut after_id = options.resume_from.unwrap_or(0);

        'batches: loop {
            let remaining = match options.limit {
                Some(limit) if report.processed >= limit => break,
                Some(limit) => limit - report.processed,
                None => usize::MAX,
            };
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let items = db::fetch_batch_matching(
                conn,
                after_id,
                batch_size.min(remaining),
                options.mpn_filter.as_deref(),
            )?;
            if items.is_empty() {
                break;
            }

            if let Some(writer) = backup.as_mut() {
                report.backup_rows += db::write_backup_csv(writer, &items)?;
            }

            let evaluations = self.evaluate_batch(&pool, &items, workers);

            for (item, evaluation) in items.iter().zip(evaluations) {
                if self.is_cancelled() {
                    report.cancelled = true;
                    break 'batches;
                }
                settle_item(conn, item, evaluation, &mut report);
                report.last_item_id = Some(item.id);
                after_id = item.id;
            }

            self.persist_cursor(conn, options, &report)?;
        }

        // Cancelled mid-batch: the cursor still has to reflect the last confirmed item
        self.persist_cursor(conn, options, &report)?;

        if options.cleanup_unused_categories && !options.dry_run {
            report.categories_removed = db::cleanup_unused_categories(conn)?;
        }

        report.finished_at = Utc::now();
        info!(
            "Reindex run {} finished: processed {}, changed {}, unchanged {}, failed {}{}",
            report.run_id,
            report.processed,
            report.changed,
            report.unchanged,
            report.failed,
            if report.cancelled { " (cancelled)" } else { "" }
        );

        Ok(report)
    }

    fn persist_cursor(&self, conn: &Connection, options: &ReindexOptions, report: &ReindexReport) -> Result<()> {
        if options.dry_run || options.mpn_filter.is_some() {
            return Ok(());
        }
        if let Some(last) = report.last_item_id {
            db::save_cursor(
                conn,
                &options.cursor_name,
                last,
                Some(&report.profile_fingerprint),
            )
            .map_err(Error::from)?;
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::sample_profiles;
    use crate::db::{get_cursor, get_item, insert_item, setup_database};
    use crate::profile::ProfileDocument;
    use crate::registry::ProfileSet;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn reindexer() -> Reindexer {
        Reindexer::new(Classifier::new(Arc::new(sample_profiles())))
    }

    /// Profile set without the capacitor profile, as an older ruleset
    fn resistor_only() -> Classifier {
        let doc: ProfileDocument = serde_yaml::from_str(
            "id: resistor\nsource_categories: [Resistors]\nparent_chain: [Passive Components, Resistors]\n",
        )
        .unwrap();
        let set = ProfileSet::build(vec![("resistor.yaml".to_string(), doc)], None).unwrap();
        Classifier::new(Arc::new(set))
    }

    fn seed(conn: &Connection, classifier: &Classifier, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                let raw = if i % 2 == 0 {
                    format!(r#"{{"category": "Resistors", "description": "Resistor #{}"}}"#, i)
                } else {
                    format!(r#"{{"category": "Ceramic Capacitors", "parameters": {{"Capacitance": "{}nF"}}}}"#, i)
                };
                let c = classifier.classify(&raw).unwrap();
                insert_item(conn, &raw, Some(&c), Some(classifier.profiles().fingerprint())).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_mpn_filter_restricts_run() {
        let conn = setup();
        let old = resistor_only();
        let raws = [
            r#"{"category": "Ceramic Capacitors", "mpn": "GRM155R71C104KA88D", "parameters": {"Capacitance": "100nF"}}"#,
            r#"{"category": "Ceramic Capacitors", "mpn": "CL05B104KO5NNNC", "parameters": {"Capacitance": "100nF"}}"#,
            r#"{"category": "Ceramic Capacitors", "mpn": "GRM188R71H103KA01D", "parameters": {"Capacitance": "10nF"}}"#,
        ];
        let ids: Vec<i64> = raws
            .iter()
            .map(|raw| {
                let c = old.classify(raw).unwrap();
                insert_item(&conn, raw, Some(&c), Some(old.profiles().fingerprint())).unwrap()
            })
            .collect();

        let options = ReindexOptions::apply().with_mpn_filter("grm%");
        let report = reindexer().run(&conn, &options).unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.changed, 2);
        assert_eq!(report.last_item_id, Some(ids[2]));
        let category = |id: i64| get_item(&conn, id).unwrap().unwrap().columns.category_id;
        assert_eq!(category(ids[0]).as_deref(), Some("capacitor"));
        assert_eq!(category(ids[1]).as_deref(), Some("unknown"));
        assert_eq!(category(ids[2]).as_deref(), Some("capacitor"));

        // A targeted run does not move the shared cursor
        assert!(get_cursor(&conn, DEFAULT_CURSOR).unwrap().is_none());
    }

    #[test]
    fn test_dry_run_on_converged_catalog() {
        let conn = setup();
        let r = reindexer();
        seed(&conn, r.classifier(), 10);

        let report = r.run(&conn, &ReindexOptions::dry_run()).unwrap();

        assert_eq!(report.processed, 10);
        assert_eq!(report.changed, 0);
        assert_eq!(report.unchanged, 10);
        assert!(report.diffs.is_empty());
        assert!(!report.has_failures());

        println!("✅ Converged dry-run test PASSED");
    }

    #[test]
    fn test_dry_run_reports_without_writing() {
        let conn = setup();
        let ids = seed(&conn, &resistor_only(), 4);
        let before = get_item(&conn, ids[1]).unwrap().unwrap();
        assert_eq!(before.columns.category_id.as_deref(), Some("unknown"));

        let report = reindexer().run(&conn, &ReindexOptions::dry_run()).unwrap();

        // The two capacitor items would move out of Unknown
        assert_eq!(report.changed, 2);
        assert!(report.diffs.iter().any(|d| d.item_id == ids[1]
            && d.field == "category_id"
            && d.new == serde_json::json!("capacitor")));

        let after = get_item(&conn, ids[1]).unwrap().unwrap();
        assert_eq!(after, before);
        assert!(get_cursor(&conn, DEFAULT_CURSOR).unwrap().is_none());
    }

    #[test]
    fn test_apply_then_second_pass_is_idempotent() {
        let conn = setup();
        let ids = seed(&conn, &resistor_only(), 6);
        let r = reindexer();

        let first = r.run(&conn, &ReindexOptions::apply()).unwrap();
        assert_eq!(first.changed, 3);
        assert!(first.diffs.is_empty());
        assert_eq!(first.field_change_counts.get("category_id"), Some(&3));

        let item = get_item(&conn, ids[1]).unwrap().unwrap();
        assert_eq!(item.columns.category_id.as_deref(), Some("capacitor"));
        assert_eq!(item.classification_version, 2);

        let second = r.run(&conn, &ReindexOptions::apply()).unwrap();
        assert_eq!(second.processed, 6);
        assert_eq!(second.changed, 0);

        println!("✅ Idempotent apply test PASSED");
    }

    #[test]
    fn test_identity_is_never_touched() {
        let conn = setup();
        let ids = seed(&conn, &resistor_only(), 3);
        let before: Vec<CatalogItem> = ids.iter().map(|id| get_item(&conn, *id).unwrap().unwrap()).collect();

        reindexer().run(&conn, &ReindexOptions::apply()).unwrap();

        for old in before {
            let new = get_item(&conn, old.id).unwrap().unwrap();
            assert_eq!(new.id, old.id);
            assert_eq!(new.item_uuid, old.item_uuid);
            assert_eq!(new.raw_payload, old.raw_payload);
            assert_eq!(new.created_at, old.created_at);
        }
    }

    #[test]
    fn test_limit_processes_first_items_by_id() {
        let conn = setup();
        let ids: Vec<i64> = (0..120)
            .map(|i| insert_item(&conn, &format!(r#"{{"category": "Resistors", "description": "{}"}}"#, i), None, None).unwrap())
            .collect();

        let options = ReindexOptions::apply().with_limit(50).with_batch_size(16).with_workers(3);
        let report = reindexer().run(&conn, &options).unwrap();

        assert_eq!(report.processed, 50);
        assert_eq!(report.changed, 50);
        assert_eq!(report.last_item_id, Some(ids[49]));
        assert!(get_item(&conn, ids[49]).unwrap().unwrap().is_classified());
        assert!(!get_item(&conn, ids[50]).unwrap().unwrap().is_classified());

        let cursor = get_cursor(&conn, DEFAULT_CURSOR).unwrap().unwrap();
        assert_eq!(cursor.last_item_id, ids[49]);
    }

    #[test]
    fn test_resume_from_cursor() {
        let conn = setup();
        let ids: Vec<i64> = (0..10)
            .map(|_| insert_item(&conn, r#"{"category": "Resistors"}"#, None, None).unwrap())
            .collect();
        let r = reindexer();

        r.run(&conn, &ReindexOptions::apply().with_limit(4)).unwrap();
        let cursor = get_cursor(&conn, DEFAULT_CURSOR).unwrap().unwrap();

        let rest = r
            .run(&conn, &ReindexOptions::apply().with_resume_from(cursor.last_item_id))
            .unwrap();
        assert_eq!(rest.processed, 6);
        assert_eq!(rest.last_item_id, ids.last().copied());
        assert!(ids.iter().all(|id| get_item(&conn, *id).unwrap().unwrap().is_classified()));
    }

    #[test]
    fn test_bad_payload_is_isolated() {
        let conn = setup();
        let good = insert_item(&conn, r#"{"category": "Resistors"}"#, None, None).unwrap();
        let bad = insert_item(&conn, "{not json", None, None).unwrap();
        let also_good = insert_item(&conn, r#"{"category": "Capacitors"}"#, None, None).unwrap();

        let report = reindexer().run(&conn, &ReindexOptions::apply()).unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.changed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].item_id, bad);
        assert!(report.has_failures());
        assert!(get_item(&conn, good).unwrap().unwrap().is_classified());
        assert!(get_item(&conn, also_good).unwrap().unwrap().is_classified());
        assert!(!get_item(&conn, bad).unwrap().unwrap().is_classified());
    }

    #[test]
    fn test_write_conflict_is_item_failure() {
        let conn = setup();
        let r = reindexer();
        let id = insert_item(&conn, r#"{"category": "Resistors"}"#, None, None).unwrap();
        let stale = get_item(&conn, id).unwrap().unwrap();

        // Someone else classifies the item after we read it
        let fresh = r.classifier().classify(r#"{"category": "Capacitors"}"#).unwrap();
        db::write_classification(&conn, id, 0, &fresh.columns().unwrap(), &[], None, "other").unwrap();

        let mut report = ReindexReport::new(false, r.classifier());
        let evaluation = evaluate(r.classifier(), &stale);
        let outcome = settle_item(&conn, &stale, evaluation, &mut report);

        assert_eq!(outcome, ItemOutcome::Failed);
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].reason.contains("conflict"));

        // The concurrent write survives untouched
        let stored = get_item(&conn, id).unwrap().unwrap();
        assert_eq!(stored.columns.category_id.as_deref(), Some("capacitor"));
        assert_eq!(stored.classification_version, 1);
    }

    #[test]
    fn test_cancelled_run_stops_before_first_item() {
        let conn = setup();
        seed(&conn, &resistor_only(), 5);
        let r = reindexer();
        r.cancel_flag().store(true, Ordering::Relaxed);

        let report = r.run(&conn, &ReindexOptions::apply()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert_eq!(report.last_item_id, None);
    }

    #[test]
    fn test_workers_give_same_result_as_sequential() {
        let conn_a = setup();
        let conn_b = setup();
        seed(&conn_a, &resistor_only(), 37);
        seed(&conn_b, &resistor_only(), 37);

        let r = reindexer();
        let seq = r.run(&conn_a, &ReindexOptions::dry_run().with_batch_size(10)).unwrap();
        let par = r
            .run(&conn_b, &ReindexOptions::dry_run().with_batch_size(10).with_workers(4))
            .unwrap();

        assert_eq!(seq.changed, par.changed);
        assert_eq!(seq.diffs, par.diffs);
    }

    #[test]
    fn test_backup_and_cleanup() {
        let conn = setup();
        seed(&conn, &resistor_only(), 4);
        let dir = tempfile::tempdir().unwrap();
        let backup = dir.path().join("before.csv");

        let options = ReindexOptions {
            backup_csv: Some(backup.clone()),
            cleanup_unused_categories: true,
            ..ReindexOptions::apply()
        };
        let report = reindexer().run(&conn, &options).unwrap();

        assert_eq!(report.backup_rows, 4);
        // Unknown/"Ceramic Capacitors" rows are no longer referenced
        assert_eq!(report.categories_removed, 1);

        let mut reader = csv::Reader::from_path(&backup).unwrap();
        let unknown_rows = reader
            .records()
            .map(|r| r.unwrap())
            .filter(|r| &r[3] == "unknown")
            .count();
        assert_eq!(unknown_rows, 2);
    }
}
