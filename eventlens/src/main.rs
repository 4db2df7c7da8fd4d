//! eventlens - behavioral analytics reports from the command line
//!
//! Imports event exports into the local store and prints the dashboard
//! report as terminal text, Markdown or JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use eventlens_core::analytics::{create_default_engine, Report, SectionContext, SectionRunResult};
use eventlens_core::{Config, Database, Event, MetricRow, Profile};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "eventlens")]
#[command(about = "Behavioral analytics over an app interaction event log")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Database path (default: $XDG_DATA_HOME/eventlens/data.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Reporting window in days (overrides analytics.reporting_days)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    days: Option<u32>,

    /// Export format (md = markdown, json = JSON)
    #[arg(long)]
    export: Option<String>,

    /// Only run sections with this name or name prefix (e.g. "growth")
    #[arg(long)]
    section: Option<String>,

    /// Compute the report as of this RFC 3339 instant instead of now
    #[arg(long, value_parser = parse_timestamp)]
    now: Option<DateTime<Utc>>,

    /// List available sections without running the report
    #[arg(long)]
    list_sections: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import newline-delimited JSON records into the store
    Import {
        /// File with one `{"kind": "event" | "signup" | "entity", ...}` record per line
        file: PathBuf,
    },
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

/// One line of an import file.
#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ImportRecord {
    Event(Event),
    Signup(SignupRecord),
    Entity(EntityRecord),
}

#[derive(Deserialize, Debug)]
struct SignupRecord {
    user_id: String,
    signup_time: DateTime<Utc>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize, Debug)]
struct EntityRecord {
    entity_type: String,
    id: String,
    name: String,
    /// Containing entity, e.g. a city's country
    #[serde(default)]
    parent_id: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(days) = args.days {
        config.analytics.reporting_days = days;
    }

    // Initialize logging
    let _log_guard =
        eventlens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let engine = create_default_engine(&config.analytics);

    // List sections mode
    if args.list_sections {
        println!("Available sections:");
        for name in engine.section_names() {
            println!("  - {}", name);
        }
        return Ok(());
    }

    // Open database
    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    if let Some(Command::Import { file }) = &args.command {
        return import(&db, file);
    }

    let now = args.now.unwrap_or_else(Utc::now);
    let ctx = SectionContext::new(&db, &config.analytics, now);
    let report = engine.run_matching(&ctx, args.section.as_deref());

    if report.sections.is_empty() {
        if let Some(prefix) = &args.section {
            anyhow::bail!("No section matches '{}'. Use --list-sections", prefix);
        }
    }

    // Output based on export format
    match args.export.as_deref() {
        Some("json") => print_json(&report)?,
        Some("md") => print_markdown(&report),
        Some(other) => anyhow::bail!("Unknown export format: {}. Use 'md' or 'json'", other),
        None => print_terminal(&report),
    }

    Ok(())
}

fn import(db: &Database, path: &Path) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open import file {}", path.display()))?;

    let mut events = Vec::new();
    let mut signups = 0usize;
    let mut entities = 0usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ImportRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid record on line {}", index + 1))?;

        match record {
            ImportRecord::Event(event) => events.push(event),
            ImportRecord::Signup(signup) => {
                db.upsert_profile(&Profile {
                    id: signup.user_id,
                    first_name: signup.first_name,
                    username: signup.username,
                    created_at: signup.signup_time,
                })
                .context("failed to store signup")?;
                signups += 1;
            }
            ImportRecord::Entity(entity) => {
                db.upsert_entity_with_parent(
                    &entity.entity_type,
                    &entity.id,
                    &entity.name,
                    entity.parent_id.as_deref(),
                )
                .context("failed to store entity")?;
                entities += 1;
            }
        }
    }

    let inserted = db.insert_events(&events).context("failed to store events")?;

    tracing::info!(
        path = %path.display(),
        events = inserted,
        signups,
        entities,
        "Import complete"
    );

    println!("Import complete:");
    println!("  Events:   {}", inserted);
    println!("  Signups:  {}", signups);
    println!("  Entities: {}", entities);
    Ok(())
}

fn format_window(report: &Report) -> String {
    format!(
        "{} to {}",
        report.window.since.format("%Y-%m-%d %H:%M"),
        report.window.until.format("%Y-%m-%d %H:%M")
    )
}

fn format_values(row: &MetricRow) -> String {
    match (row.numerator, row.denominator, row.rate) {
        (Some(n), Some(d), Some(rate)) => format!("{n:>8} / {d:<8} {rate:>4.0}%"),
        (Some(n), Some(d), None) => format!("{n:>8} / {d}"),
        (Some(n), None, _) => format!("{n:>8}"),
        (None, Some(count), None) => format!("{count:>8}"),
        (None, Some(count), Some(rate)) => format!("{count:>8}  {rate:.1}"),
        (None, None, Some(value)) => format!("{value:>8.1}"),
        (None, None, None) => "       -".to_string(),
    }
}

fn section_gap(section: &SectionRunResult) -> String {
    format!(
        "{}: {}",
        section.status.as_str(),
        section.error_message.as_deref().unwrap_or("no detail")
    )
}

fn print_terminal(report: &Report) {
    let title = format!("EVENTLENS REPORT  {}", format_window(report));

    // Header
    println!();
    println!("╭{}╮", "─".repeat(60));
    println!("│{:^60}│", title);
    println!("╰{}╯", "─".repeat(60));

    for section in &report.sections {
        println!();
        println!("{}  [{}]", section.title.to_uppercase(), section.name);

        if !section.is_ready() {
            println!("   ({})", section_gap(section));
            continue;
        }
        if section.rows.is_empty() {
            println!("   No data for this period.");
            continue;
        }
        for row in &section.rows {
            println!("   {:<44} {}", row.key, format_values(row));
        }
    }

    let gaps = report.gaps().count();
    println!();
    if gaps > 0 {
        println!("{} of {} sections unavailable", gaps, report.sections.len());
        println!();
    }
}

fn markdown_cell(value: Option<i64>) -> String {
    value.map_or_else(String::new, |v| v.to_string())
}

fn print_markdown(report: &Report) {
    println!("# eventlens report");
    println!();
    println!("Window: {} (UTC)", format_window(report));

    for section in &report.sections {
        println!();
        println!("## {}", section.title);
        println!();

        if !section.is_ready() {
            println!("> {}", section_gap(section));
            continue;
        }
        if section.rows.is_empty() {
            println!("_No data for this period._");
            continue;
        }

        println!("| Key | Numerator | Count | Rate |");
        println!("|-----|----------:|------:|-----:|");
        for row in &section.rows {
            println!(
                "| {} | {} | {} | {} |",
                row.key.replace('|', "\\|"),
                markdown_cell(row.numerator),
                markdown_cell(row.denominator),
                row.rate.map_or_else(String::new, |r| format!("{r:.0}"))
            );
        }
    }
}

fn print_json(report: &Report) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    println!("{}", json);
    Ok(())
}
