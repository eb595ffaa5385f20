use anyhow::Result;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use sillage_core::db::Database;
use sillage_core::models::{Brand, NewBrand, Perfume, PerfumeFilter};

use super::helpers::{print_perfume_table, truncate};

pub(crate) fn cmd_brand_list(db: &Database, json: bool) -> Result<()> {
    let brands = db.list_brands()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&brands)?);
        return Ok(());
    }
    if brands.is_empty() {
        eprintln!("No brands yet. Use `sillage brand add` to create one.");
        return Ok(());
    }

    let perfumes = db.list_perfumes(&PerfumeFilter::default())?;

    #[derive(Tabled)]
    struct BrandRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Perfumes")]
        perfumes: usize,
        #[tabled(rename = "Description")]
        description: String,
    }

    let rows: Vec<BrandRow> = brands
        .iter()
        .map(|b| BrandRow {
            id: b.id,
            name: b.name.clone(),
            perfumes: perfumes.iter().filter(|p| p.brand_id == b.id).count(),
            description: b
                .description
                .as_deref()
                .map(|d| truncate(d, 40))
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_brand_add(
    db: &Database,
    name: &str,
    description: Option<String>,
    json: bool,
) -> Result<()> {
    let brand = db.create_brand(&NewBrand {
        name: name.to_string(),
        description,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&brand)?);
    } else {
        println!("Added brand {} (id {})", brand.name, brand.id);
    }
    Ok(())
}

pub(crate) fn cmd_brand_show(db: &Database, id: i64, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct Detail {
        #[serde(flatten)]
        brand: Brand,
        perfumes: Vec<Perfume>,
    }

    let detail = Detail {
        brand: db.get_brand(id)?,
        perfumes: db.list_perfumes_by_brand(id)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("{} (id {})", detail.brand.name, detail.brand.id);
    if let Some(ref d) = detail.brand.description {
        println!("  {d}");
    }
    if detail.perfumes.is_empty() {
        println!("\nNo perfumes for this brand yet.");
    } else {
        println!();
        print_perfume_table(&detail.perfumes);
    }
    Ok(())
}
