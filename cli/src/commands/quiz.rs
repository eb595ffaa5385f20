use std::collections::BTreeSet;

use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use sillage_core::db::Database;
use sillage_core::models::PerfumeFilter;
use sillage_core::quiz::{
    QUESTIONS, QuizChoice, QuizSession, ScoredPerfume, normalize_tags, resolve_answers,
};

use super::helpers::{parse_tag_list, prompt_choice, truncate};

/// Walk the question bank on the terminal.
fn ask_questions() -> Result<Vec<QuizChoice>> {
    let mut choices = Vec::with_capacity(QUESTIONS.len());
    for question in &QUESTIONS {
        eprintln!("\n{}", question.text);
        for (i, option) in question.options.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, option.label);
        }
        let option_index = prompt_choice("Votre choix", question.options.len())?;
        choices.push(QuizChoice {
            question_id: question.id,
            option_index,
        });
    }
    Ok(choices)
}

pub(crate) fn recommend(db: &Database, answers: &[BTreeSet<String>]) -> Result<Vec<ScoredPerfume>> {
    let catalog = db.list_perfumes(&PerfumeFilter::default())?;
    let mut session = QuizSession::new(catalog);
    Ok(session.recommend(db, answers))
}

pub(crate) fn cmd_quiz(db: &Database, tags: Option<&str>, json: bool) -> Result<()> {
    let answers = match tags {
        Some(list) => vec![normalize_tags(parse_tag_list(list))],
        None => resolve_answers(&ask_questions()?)?,
    };

    let results = recommend(db, &answers)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        eprintln!("No perfume matches these preferences.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct ResultRow {
        #[tabled(rename = "#")]
        rank: usize,
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Score")]
        score: u32,
    }

    let rows: Vec<ResultRow> = results
        .iter()
        .enumerate()
        .map(|(i, r)| ResultRow {
            rank: i + 1,
            id: r.perfume.id,
            name: truncate(&r.perfume.name, 35),
            brand: r.perfume.brand_name.clone().unwrap_or_default(),
            score: r.score,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
