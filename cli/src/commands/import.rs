use std::path::Path;

use anyhow::{Context, Result};

use sillage_core::catalog_import::{import_catalog, parse_catalog_csv};
use sillage_core::db::Database;

use super::helpers::json_error;

pub(crate) fn cmd_import_catalog(db: &Database, path: &Path, dry_run: bool, json: bool) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let rows = parse_catalog_csv(file)
        .with_context(|| format!("Failed to parse catalog CSV: {}", path.display()))?;

    if rows.is_empty() {
        if json {
            println!("{}", json_error("No rows found in CSV file"));
        } else {
            eprintln!("No rows found in CSV file.");
        }
        return Ok(());
    }

    let summary = import_catalog(db, &rows, dry_run)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dry_run": dry_run,
                "rows_parsed": summary.rows_parsed,
                "brands_created": summary.brands_created,
                "perfumes_created": summary.perfumes_created,
                "perfumes_skipped": summary.perfumes_skipped,
                "notes_linked": summary.notes_linked,
            })
        );
    } else if dry_run {
        println!("Dry run, no changes made.\n");
        println!("  Rows parsed:        {}", summary.rows_parsed);
        println!("  Brands to create:   {}", summary.brands_created);
        println!("  Perfumes to create: {}", summary.perfumes_created);
        println!("  Already present:    {}", summary.perfumes_skipped);
        println!("  Notes to link:      {}", summary.notes_linked);
    } else {
        println!("Import complete.\n");
        println!("  Rows parsed:      {}", summary.rows_parsed);
        println!("  Brands created:   {}", summary.brands_created);
        println!("  Perfumes created: {}", summary.perfumes_created);
        println!("  Already present:  {}", summary.perfumes_skipped);
        println!("  Notes linked:     {}", summary.notes_linked);
    }

    Ok(())
}
