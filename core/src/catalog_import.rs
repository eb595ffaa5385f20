//! Seed the catalog from a CSV file.
//!
//! Expected header (case-insensitive, extra columns ignored):
//! `Brand,Perfume,Year,Gender,Family,Top Notes,Heart Notes,Base Notes,Image URL,Description`
//!
//! Only `Brand` and `Perfume` are required. Note columns hold `;`-separated
//! note names.

use std::collections::HashSet;
use std::io::Read;

use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{NewPerfume, NoteKind};

#[derive(Debug, Clone, Default)]
pub struct CatalogRow {
    pub brand: String,
    pub name: String,
    pub release_year: Option<i64>,
    pub gender: Option<String>,
    pub family: Option<String>,
    pub top_notes: Vec<String>,
    pub heart_notes: Vec<String>,
    pub base_notes: Vec<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
}

impl CatalogRow {
    fn notes(&self) -> impl Iterator<Item = (NoteKind, &str)> {
        let top = self.top_notes.iter().map(|n| (NoteKind::Top, n.as_str()));
        let heart = self.heart_notes.iter().map(|n| (NoteKind::Heart, n.as_str()));
        let base = self.base_notes.iter().map(|n| (NoteKind::Base, n.as_str()));
        top.chain(heart).chain(base)
    }

    fn note_count(&self) -> usize {
        self.top_notes.len() + self.heart_notes.len() + self.base_notes.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogImportSummary {
    pub rows_parsed: usize,
    pub brands_created: usize,
    pub perfumes_created: usize,
    pub perfumes_skipped: usize,
    pub notes_linked: usize,
}

fn split_notes(cell: Option<&str>) -> Vec<String> {
    cell.map(|c| {
        c.split(';')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn non_empty(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn parse_catalog_csv<R: Read>(reader: R) -> Result<Vec<CatalogRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let idx_brand =
        col("Brand").ok_or_else(|| Error::Validation("Missing required column: Brand".into()))?;
    let idx_name = col("Perfume")
        .or_else(|| col("Name"))
        .ok_or_else(|| Error::Validation("Missing required column: Perfume".into()))?;
    let idx_year = col("Year");
    let idx_gender = col("Gender");
    let idx_family = col("Family");
    let idx_top = col("Top Notes");
    let idx_heart = col("Heart Notes");
    let idx_base = col("Base Notes");
    let idx_image = col("Image URL");
    let idx_desc = col("Description");

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result?;
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i));

        let brand = record.get(idx_brand).unwrap_or("").trim().to_string();
        let name = record.get(idx_name).unwrap_or("").trim().to_string();
        if brand.is_empty() || name.is_empty() {
            continue;
        }

        let release_year = match non_empty(cell(idx_year)) {
            Some(y) => Some(y.parse::<i64>().map_err(|_| {
                Error::Validation(format!("Invalid year '{y}' on CSV row {}", line_num + 2))
            })?),
            None => None,
        };

        rows.push(CatalogRow {
            brand,
            name,
            release_year,
            gender: non_empty(cell(idx_gender)),
            family: non_empty(cell(idx_family)),
            top_notes: split_notes(cell(idx_top)),
            heart_notes: split_notes(cell(idx_heart)),
            base_notes: split_notes(cell(idx_base)),
            image_url: non_empty(cell(idx_image)),
            description: non_empty(cell(idx_desc)),
        });
    }

    Ok(rows)
}

/// Import parsed rows. Perfumes that already exist for the same brand are
/// skipped. With `dry_run` nothing is written and the summary reports what
/// would happen. A real import is all-or-nothing.
pub fn import_catalog(
    db: &Database,
    rows: &[CatalogRow],
    dry_run: bool,
) -> Result<CatalogImportSummary> {
    if dry_run {
        return preview_import(db, rows);
    }

    let summary = db.in_transaction(|db| {
        let mut summary = CatalogImportSummary {
            rows_parsed: rows.len(),
            ..CatalogImportSummary::default()
        };
        for row in rows {
            let (brand_id, brand_created) = db.get_or_create_brand(&row.brand)?;
            if brand_created {
                summary.brands_created += 1;
            }
            if db.find_perfume(brand_id, &row.name)?.is_some() {
                summary.perfumes_skipped += 1;
                continue;
            }

            let gender_id = row
                .gender
                .as_deref()
                .map(|g| db.get_or_create_gender(g).map(|(id, _)| id))
                .transpose()?;
            let family_id = row
                .family
                .as_deref()
                .map(|f| db.get_or_create_family(f).map(|(id, _)| id))
                .transpose()?;

            let perfume = db.create_perfume(&NewPerfume {
                name: row.name.clone(),
                brand_id,
                release_year: row.release_year,
                gender_id,
                olfactory_family_id: family_id,
                image_url: row.image_url.clone(),
                description: row.description.clone(),
            })?;
            summary.perfumes_created += 1;

            for (kind, note) in row.notes() {
                db.add_perfume_note(perfume.id, note, kind)?;
                summary.notes_linked += 1;
            }
        }
        Ok(summary)
    })?;

    tracing::info!(
        perfumes = summary.perfumes_created,
        brands = summary.brands_created,
        skipped = summary.perfumes_skipped,
        "catalog import complete"
    );
    Ok(summary)
}

fn preview_import(db: &Database, rows: &[CatalogRow]) -> Result<CatalogImportSummary> {
    let mut summary = CatalogImportSummary {
        rows_parsed: rows.len(),
        ..CatalogImportSummary::default()
    };
    let mut new_brands: HashSet<String> = HashSet::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for row in rows {
        let key = (row.brand.to_lowercase(), row.name.to_lowercase());
        let existing_brand = db.find_brand_by_name(&row.brand)?;
        let exists = match &existing_brand {
            Some(brand) => db.find_perfume(brand.id, &row.name)?.is_some(),
            None => false,
        };
        if existing_brand.is_none() && new_brands.insert(key.0.clone()) {
            summary.brands_created += 1;
        }
        if exists || !seen.insert(key) {
            summary.perfumes_skipped += 1;
            continue;
        }
        summary.perfumes_created += 1;
        summary.notes_linked += row.note_count();
    }

    Ok(summary)
}
