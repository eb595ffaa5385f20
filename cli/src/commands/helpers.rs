use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use sillage_core::db::Database;
use sillage_core::models::{Perfume, User};

/// Read one trimmed line from stdin after printing `label` on stderr.
pub(crate) fn prompt_line(label: &str) -> Result<String> {
    eprint!("{label}");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(line.trim().to_string())
}

/// Ask for a 1-based pick among `count` entries; returns the 0-based index.
pub(crate) fn prompt_choice(label: &str, count: usize) -> Result<usize> {
    let line = prompt_line(&format!("\n{label} (1-{count}): "))?;
    parse_choice(&line, count)
}

fn parse_choice(input: &str, count: usize) -> Result<usize> {
    let n: usize = input.trim().parse().context("Invalid number")?;
    if n < 1 || n > count {
        bail!("Selection out of range");
    }
    Ok(n - 1)
}

/// Split "rose, Boisé ,,vanille" into its non-empty entries.
pub(crate) fn parse_tag_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Look a user up by numeric id or by email.
pub(crate) fn resolve_user(db: &Database, key: &str) -> Result<User> {
    if let Ok(id) = key.trim().parse::<i64>() {
        return Ok(db.get_user(id)?);
    }
    db.find_user_by_email(&key.trim().to_lowercase())?
        .with_context(|| format!("No user with email '{key}'"))
}

pub(crate) fn print_perfume_table(perfumes: &[Perfume]) {
    #[derive(Tabled)]
    struct PerfumeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Year")]
        year: String,
        #[tabled(rename = "Gender")]
        gender: String,
        #[tabled(rename = "Family")]
        family: String,
    }

    let rows: Vec<PerfumeRow> = perfumes
        .iter()
        .map(|p| PerfumeRow {
            id: p.id,
            name: truncate(&p.name, 35),
            brand: p
                .brand_name
                .as_deref()
                .map(|b| truncate(b, 20))
                .unwrap_or_default(),
            year: p.release_year.map_or("-".into(), |y| y.to_string()),
            gender: p.gender_name.clone().unwrap_or_default(),
            family: p
                .family_name
                .as_deref()
                .map(|f| truncate(f, 20))
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
