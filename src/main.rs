use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use part_taxonomy::{
    category_counts, count_items, get_cursor, insert_item, open_database, AppConfig, Classifier,
    ConfigOverrides, ProfileRegistry, ReindexOptions, ReindexReport, Reindexer,
};

#[derive(Parser, Debug)]
#[command(name = "part-taxonomy")]
#[command(about = "Rule-based parts taxonomy classifier and reindexer")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, env = "PART_TAXONOMY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite catalog database
    #[arg(long, env = "PART_TAXONOMY_DB")]
    db: Option<PathBuf>,

    /// Directory of profile documents
    #[arg(long, env = "PART_TAXONOMY_PROFILES")]
    profiles: Option<PathBuf>,

    /// Category path delimiter
    #[arg(long, env = "PART_TAXONOMY_PATH_DELIMITER")]
    delimiter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the catalog tables (WAL mode)
    InitDb,

    /// Classify and store vendor payloads (one object or an array per file)
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Classify one payload file and print the result, no writes
    Classify { file: PathBuf },

    /// Print the profile evaluation order and fingerprint
    Profiles,

    /// Item counts per category
    Stats,

    /// Re-derive classifications from stored raw payloads
    Reindex(ReindexArgs),
}

#[derive(Args, Debug)]
struct ReindexArgs {
    /// Report the diff without writing
    #[arg(long)]
    dry_run: bool,

    /// Process at most N items
    #[arg(long)]
    limit: Option<usize>,

    /// Start after this item id
    #[arg(long, conflicts_with = "resume")]
    resume_from: Option<i64>,

    /// Start after the saved cursor
    #[arg(long)]
    resume: bool,

    #[arg(long, env = "PART_TAXONOMY_WORKERS")]
    workers: Option<usize>,

    #[arg(long, env = "PART_TAXONOMY_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Named resume cursor
    #[arg(long, env = "PART_TAXONOMY_CURSOR")]
    cursor: Option<String>,

    /// CSV snapshot of the rows before they are rewritten
    #[arg(long)]
    backup_csv: Option<PathBuf>,

    #[arg(long)]
    cleanup_unused_categories: bool,

    /// Only items whose MPN matches this LIKE pattern (e.g. %TPS7A%)
    #[arg(long)]
    mpn_filter: Option<String>,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "part_taxonomy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut overrides = ConfigOverrides {
        db_path: cli.db.clone(),
        profiles_dir: cli.profiles.clone(),
        path_delimiter: cli.delimiter.clone(),
        ..Default::default()
    };
    if let Command::Reindex(args) = &cli.command {
        overrides.workers = args.workers;
        overrides.batch_size = args.batch_size;
        overrides.cursor_name = args.cursor.clone();
    }

    let config = AppConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .with_overrides(overrides);

    match cli.command {
        Command::InitDb => run_init_db(&config),
        Command::Ingest { files } => run_ingest(&config, &files),
        Command::Classify { file } => run_classify(&config, &file),
        Command::Profiles => run_profiles(&config),
        Command::Stats => run_stats(&config),
        Command::Reindex(args) => run_reindex(&config, &args),
    }
}

fn load_classifier(config: &AppConfig) -> Result<Classifier> {
    let registry = ProfileRegistry::load(&config.profiles_dir).with_context(|| {
        format!("Failed to load profiles from {}", config.profiles_dir.display())
    })?;
    Ok(Classifier::with_delimiter(registry.current(), &config.path_delimiter))
}

fn open_db(config: &AppConfig) -> Result<rusqlite::Connection> {
    open_database(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))
}

fn run_init_db(config: &AppConfig) -> Result<()> {
    println!("🔧 Setting up database...");
    let conn = open_db(config)?;
    println!("✓ {} ready (WAL mode)", config.db_path.display());
    println!("✓ Items: {}", count_items(&conn)?);
    Ok(())
}

/// Raw text of each payload in a file: the whole file for one object,
/// each element's original text for an array
fn read_payloads(file: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    split_payloads(&content).with_context(|| format!("{} is not valid JSON", file.display()))
}

fn split_payloads(content: &str) -> serde_json::Result<Vec<String>> {
    if content.trim_start().starts_with('[') {
        let items: Vec<Box<RawValue>> = serde_json::from_str(content)?;
        return Ok(items.into_iter().map(|raw| raw.get().to_string()).collect());
    }
    // Validate only; the text is stored untouched
    serde_json::from_str::<&RawValue>(content)?;
    Ok(vec![content.to_string()])
}

fn run_ingest(config: &AppConfig, files: &[PathBuf]) -> Result<()> {
    let classifier = load_classifier(config)?;
    let fingerprint = classifier.profiles().fingerprint().to_string();
    let conn = open_db(config)?;

    let mut inserted = 0;
    let mut rejected = 0;

    for file in files {
        println!("\n📂 Ingesting {}...", file.display());
        for raw in read_payloads(file)? {
            match classifier.classify(&raw) {
                Ok(classification) => {
                    let id = insert_item(&conn, &raw, Some(&classification), Some(&fingerprint))?;
                    info!("Item {} → {}", id, classification.category_path);
                    inserted += 1;
                }
                Err(e) => {
                    eprintln!("❌ Skipped payload: {}", e);
                    rejected += 1;
                }
            }
        }
    }

    println!("\n✓ Inserted: {} items", inserted);
    if rejected > 0 {
        println!("✗ Rejected: {} payloads", rejected);
        std::process::exit(1);
    }
    Ok(())
}

fn run_classify(config: &AppConfig, file: &Path) -> Result<()> {
    let classifier = load_classifier(config)?;

    for raw in read_payloads(file)? {
        let classification = classifier
            .classify(&raw)
            .context("Payload could not be classified")?;
        println!("{}", serde_json::to_string_pretty(&classification)?);
    }
    Ok(())
}

fn run_profiles(config: &AppConfig) -> Result<()> {
    let classifier = load_classifier(config)?;
    let set = classifier.profiles();

    println!("🏛️  Profiles: {}", set.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Version:     {}", set.version().unwrap_or("-"));
    println!("Fingerprint: {}", set.fingerprint());
    println!("\nEvaluation order:");
    for (i, entry) in set.evaluation_order().iter().enumerate() {
        println!(
            "{:>4}. {:<9} {:<20} {}",
            i + 1,
            format!("{:?}", entry.mode).to_lowercase(),
            entry.profile_id,
            entry.token
        );
    }
    Ok(())
}

fn run_stats(config: &AppConfig) -> Result<()> {
    let conn = open_db(config)?;
    println!("📊 Items: {}", count_items(&conn)?);
    for (category, count) in category_counts(&conn)? {
        println!("{:>8}  {}", count, category);
    }
    Ok(())
}

fn run_reindex(config: &AppConfig, args: &ReindexArgs) -> Result<()> {
    let classifier = load_classifier(config)?;
    let conn = open_db(config)?;

    let resume_from = if args.resume {
        let cursor = get_cursor(&conn, &config.cursor_name)?;
        match cursor {
            Some(c) => Some(c.last_item_id),
            None => {
                println!("⚠️  No saved cursor '{}', starting from the beginning", config.cursor_name);
                None
            }
        }
    } else {
        args.resume_from
    };

    let options = ReindexOptions {
        dry_run: args.dry_run,
        limit: args.limit,
        resume_from,
        batch_size: config.batch_size,
        workers: config.workers,
        cursor_name: config.cursor_name.clone(),
        backup_csv: args.backup_csv.clone(),
        cleanup_unused_categories: args.cleanup_unused_categories,
        mpn_filter: args.mpn_filter.clone(),
    };

    let reindexer = Reindexer::new(classifier);
    ctrlc::set_handler(interrupt_handler(reindexer.cancel_flag()))
        .context("Failed to install the Ctrl-C handler")?;
    let report = reindexer.run(&conn, &options).context("Reindex run aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        std::process::exit(2);
    }
    Ok(())
}

/// First Ctrl-C stops the run before the next item; the cursor keeps the
/// last confirmed id
fn interrupt_handler(cancel: Arc<AtomicBool>) -> impl Fn() + Send + 'static {
    move || {
        warn!("Interrupt received, stopping after the current item");
        cancel.store(true, Ordering::Relaxed);
    }
}

fn print_report(report: &ReindexReport) {
    println!(
        "🔁 Reindex {} ({})",
        report.run_id,
        if report.dry_run { "dry-run" } else { "apply" }
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Profiles:   {}", report.profile_fingerprint);
    println!("Processed:  {}", report.processed);
    println!("Changed:    {}", report.changed);
    println!("Unchanged:  {}", report.unchanged);
    println!("Failed:     {}", report.failed);
    println!("Warnings:   {}", report.warnings);
    match report.last_item_id {
        Some(id) => println!("Last item:  {}", id),
        None => println!("Last item:  -"),
    }

    if !report.field_change_counts.is_empty() {
        println!("\nChanged fields:");
        for (field, count) in &report.field_change_counts {
            println!("  {:<22} {}", field, count);
        }
    }

    if report.dry_run {
        for diff in report.diffs.iter().take(50) {
            println!("  #{} {}: {} → {}", diff.item_id, diff.field, diff.old, diff.new);
        }
        if report.diffs.len() > 50 {
            println!("  … {} more (use --json for the full diff)", report.diffs.len() - 50);
        }
    }

    for failure in &report.failures {
        println!("❌ Item {}: {}", failure.item_id, failure.reason);
    }
    if report.backup_rows > 0 {
        println!("✓ Backed up {} rows", report.backup_rows);
    }
    if report.categories_removed > 0 {
        println!("✓ Removed {} unused categories", report.categories_removed);
    }
    if report.cancelled {
        println!("⚠️  Run cancelled; resume with --resume");
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.has_failures() {
        println!("✗ Completed with {} failures", report.failed);
    } else {
        println!("✅ Completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use part_taxonomy::{insert_item, setup_database, ProfileSet};

    #[test]
    fn test_interrupt_cancels_reindex() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        for i in 0..3 {
            insert_item(&conn, &format!(r#"{{"category": "C{}"}}"#, i), None, None).unwrap();
        }

        let reindexer = Reindexer::new(Classifier::new(Arc::new(ProfileSet::empty())));
        let on_interrupt = interrupt_handler(reindexer.cancel_flag());
        on_interrupt();

        let report = reindexer.run(&conn, &ReindexOptions::apply()).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert_eq!(count_items(&conn).unwrap(), 3);
    }

    #[test]
    fn test_payload_text_is_kept_verbatim() {
        let single = "{\"parameters\": {\"b\": 1, \"a\": 12345678901234567890123},\n \"category\": \"Resistors\"}\n";
        assert_eq!(split_payloads(single).unwrap(), vec![single.to_string()]);

        let array = r#"[ {"z": 1, "a": 0.10000000000000000555}, {"category":"Capacitors"} ]"#;
        assert_eq!(
            split_payloads(array).unwrap(),
            vec![
                r#"{"z": 1, "a": 0.10000000000000000555}"#.to_string(),
                r#"{"category":"Capacitors"}"#.to_string(),
            ]
        );

        assert!(split_payloads("{not json").is_err());
        assert!(split_payloads("[{}, ").is_err());
    }
}
