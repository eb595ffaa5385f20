use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use sillage_core::db::Database;
use sillage_core::models::{NewPerfume, NoteKind, Perfume, PerfumeFilter, PerfumeNote, RatingSummary};

use super::helpers::print_perfume_table;

/// Catalog fields accepted by `sillage perfume add`.
pub(crate) struct PerfumeArgs {
    pub name: String,
    pub brand: String,
    pub year: Option<i64>,
    pub gender: Option<String>,
    pub family: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
}

pub(crate) fn cmd_perfume_list(db: &Database, search: Option<String>, json: bool) -> Result<()> {
    let filter = PerfumeFilter {
        search,
        ..PerfumeFilter::default()
    };
    let perfumes = db.list_perfumes(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&perfumes)?);
    } else if perfumes.is_empty() {
        eprintln!("No perfumes found. Use `sillage perfume add` or `sillage import catalog`.");
    } else {
        print_perfume_table(&perfumes);
    }
    Ok(())
}

pub(crate) fn cmd_perfume_show(db: &Database, id: i64, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct Detail {
        #[serde(flatten)]
        perfume: Perfume,
        notes: Vec<PerfumeNote>,
        rating: RatingSummary,
    }

    let detail = Detail {
        perfume: db.get_perfume(id)?,
        notes: db.list_perfume_notes(id)?,
        rating: db.perfume_rating_summary(id)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let p = &detail.perfume;
    println!(
        "{} by {}",
        p.name,
        p.brand_name.as_deref().unwrap_or("unknown brand")
    );
    if let Some(year) = p.release_year {
        println!("  Year:    {year}");
    }
    if let Some(ref g) = p.gender_name {
        println!("  Gender:  {g}");
    }
    if let Some(ref f) = p.family_name {
        println!("  Family:  {f}");
    }
    match detail.rating.average {
        Some(avg) => println!("  Rating:  {avg:.1}/5 ({} reviews)", detail.rating.count),
        None => println!("  Rating:  no reviews yet"),
    }
    if let Some(ref d) = p.description {
        println!("\n{d}");
    }

    if !detail.notes.is_empty() {
        #[derive(Tabled)]
        struct NoteRow {
            #[tabled(rename = "Level")]
            level: &'static str,
            #[tabled(rename = "Note")]
            note: String,
        }
        let rows: Vec<NoteRow> = detail
            .notes
            .iter()
            .map(|n| NoteRow {
                level: n.kind.as_str(),
                note: n.value.clone(),
            })
            .collect();
        let table = Table::new(&rows).with(Style::rounded()).to_string();
        println!("\n{table}");
    }
    Ok(())
}

pub(crate) fn cmd_perfume_add(db: &Database, args: PerfumeArgs, json: bool) -> Result<()> {
    let perfume = db.in_transaction(|db| {
        let (brand_id, _) = db.get_or_create_brand(&args.brand)?;
        let gender_id = args
            .gender
            .as_deref()
            .map(|g| db.get_or_create_gender(g).map(|(id, _)| id))
            .transpose()?;
        let family_id = args
            .family
            .as_deref()
            .map(|f| db.get_or_create_family(f).map(|(id, _)| id))
            .transpose()?;
        db.create_perfume(&NewPerfume {
            name: args.name,
            brand_id,
            release_year: args.year,
            gender_id,
            olfactory_family_id: family_id,
            image_url: args.image_url,
            description: args.description,
        })
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&perfume)?);
    } else {
        println!(
            "Added perfume {} (id {}) by {}",
            perfume.name,
            perfume.id,
            perfume.brand_name.as_deref().unwrap_or("?")
        );
    }
    Ok(())
}

pub(crate) fn cmd_perfume_delete(db: &Database, id: i64, json: bool) -> Result<()> {
    db.delete_perfume(id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted perfume {id}");
    }
    Ok(())
}

pub(crate) fn cmd_perfume_add_note(
    db: &Database,
    id: i64,
    note: &str,
    kind: &str,
    json: bool,
) -> Result<()> {
    let kind: NoteKind = kind.parse()?;
    let added = db
        .add_perfume_note(id, note, kind)
        .with_context(|| format!("Failed to add note '{note}' to perfume {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&added)?);
    } else {
        println!(
            "Linked {} as a {} note of perfume {id}",
            added.value,
            added.kind.as_str()
        );
    }
    Ok(())
}
