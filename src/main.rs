use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::Path;

use student_dedup::{
    duplicate_stats, find_duplicates, get_all_students, insert_event, insert_students, load_csv,
    setup_database, verify_count, DetectionOptions, Event,
};

const DEFAULT_DB: &str = "students.db";

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") => run_import(&args[2..]),
        Some("scan") => run_scan(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("student-dedup {}", student_dedup::VERSION);
    println!();
    println!("Usage:");
    println!("  student-dedup import <students.csv> [db]");
    println!("  student-dedup scan [db] [--json] [--min-similarity N] [--exact-only]");
}

fn run_import(args: &[String]) -> Result<()> {
    let Some(csv_arg) = args.first() else {
        eprintln!("❌ Missing CSV path");
        eprintln!("   Usage: student-dedup import <students.csv> [db]");
        std::process::exit(1);
    };
    let db_arg = args.get(1).map(String::as_str).unwrap_or(DEFAULT_DB);

    println!("🗄️  Importing students - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n📂 Loading CSV...");
    let students = load_csv(Path::new(csv_arg))?;
    println!("✓ Loaded {} students from CSV", students.len());

    println!("\n🔧 Setting up database...");
    let conn = Connection::open(Path::new(db_arg))?;
    setup_database(&conn)?;
    println!("✓ Database initialized with WAL mode");

    println!("\n💾 Inserting students...");
    insert_students(&conn, &students)?;

    println!("\n🔍 Verifying database...");
    let count = verify_count(&conn)?;
    println!("✓ Database contains {} students", count);

    Ok(())
}

fn run_scan(args: &[String]) -> Result<()> {
    let mut db_arg = DEFAULT_DB.to_string();
    let mut as_json = false;
    let mut options = DetectionOptions::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => as_json = true,
            "--exact-only" => options.include_exact_only = true,
            "--min-similarity" => {
                let value = iter.next().and_then(|v| v.parse::<u8>().ok());
                match value {
                    Some(v) if v <= 100 => options.min_similarity = v,
                    _ => {
                        eprintln!("❌ --min-similarity expects a number 0-100");
                        std::process::exit(1);
                    }
                }
            }
            other => db_arg = other.to_string(),
        }
    }

    let db_path = Path::new(&db_arg);
    if !db_path.exists() {
        eprintln!("❌ Database not found: {}", db_arg);
        eprintln!("   Run: student-dedup import <students.csv>");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path)?;
    let students = get_all_students(&conn)?;

    let groups = find_duplicates(&students, &options);
    let stats = duplicate_stats(&groups);

    // Record the scan in the audit trail
    let event = Event::new(
        "duplicate_scan",
        serde_json::json!({
            "students_scanned": students.len(),
            "total_groups": stats.total_groups,
            "total_duplicates": stats.total_duplicates,
            "min_similarity": options.min_similarity,
            "include_exact_only": options.include_exact_only,
        }),
        "cli",
    );
    insert_event(&conn, &event)?;

    if as_json {
        let report = serde_json::json!({
            "groups": groups,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🔍 Duplicate scan - {} students", students.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if groups.is_empty() {
        println!("\n✅ No duplicate groups found");
        return Ok(());
    }

    for group in &groups {
        println!(
            "\n📋 Group #{} - {}% {} (via {})",
            group.id,
            group.overall_similarity,
            group.match_type.as_str(),
            group.primary_field.label(),
        );
        for student in &group.students {
            println!("   • {} ({})", student.display_name(), student.id);
        }
        for m in &group.matches {
            println!(
                "     {} {}%: {:?} ≈ {:?}",
                m.label, m.similarity, m.value_a, m.value_b
            );
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Groups: {}", stats.total_groups);
    println!("✓ Students involved: {}", stats.total_duplicates);
    println!(
        "✓ By strength: {} exact, {} high, {} medium, {} low",
        stats.exact_matches, stats.high_similarity, stats.medium_similarity, stats.low_similarity
    );
    for (field, count) in &stats.by_field {
        println!("✓ Primary field {}: {}", field, count);
    }

    Ok(())
}
