//! The perfume quiz: a fixed question bank and a tag-overlap recommender.
//!
//! Each quiz option carries a set of tags. The answers of one session are
//! flattened into a single tag set and compared against every perfume's
//! note names. A note equal to a user tag earns `exact` points; on top of
//! that every user tag that contains the note, or is contained by it, earns
//! `partial` points. An exact match therefore also collects the partial
//! bonus for itself.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::Perfume;

/// Number of perfumes returned by a recommendation.
pub const RECOMMENDATION_LIMIT: usize = 6;

#[derive(Debug, Serialize)]
pub struct QuizOption {
    pub label: &'static str,
    pub tags: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct QuizQuestion {
    pub id: u32,
    pub text: &'static str,
    pub options: &'static [QuizOption],
}

pub static QUESTIONS: [QuizQuestion; 5] = [
    QuizQuestion {
        id: 1,
        text: "Quelle ambiance te parle le plus ?",
        options: &[
            QuizOption {
                label: "Un jardin fleuri au printemps",
                tags: &["rose", "jasmin", "floral"],
            },
            QuizOption {
                label: "Une forêt humide après la pluie",
                tags: &["cèdre", "vétiver", "mousse", "boisé"],
            },
            QuizOption {
                label: "Une plage au coucher du soleil",
                tags: &["ambre gris", "sel", "aquatique"],
            },
            QuizOption {
                label: "Un marché d’épices oriental",
                tags: &["vanille", "cannelle", "ambre", "oriental"],
            },
            QuizOption {
                label: "Une bibliothèque ancienne",
                tags: &["cuir", "tabac"],
            },
        ],
    },
    QuizQuestion {
        id: 2,
        text: "Quel premier geste t’attire le matin ?",
        options: &[
            QuizOption {
                label: "Un bouquet sur la table",
                tags: &["muguet", "pivoine", "floral"],
            },
            QuizOption {
                label: "Café corsé / bois torréfié",
                tags: &["café", "boisé"],
            },
            QuizOption {
                label: "Douche fraîche vivifiante",
                tags: &["citron", "bergamote", "hespéridé", "frais"],
            },
            QuizOption {
                label: "Thé chaud aux épices",
                tags: &["cardamome", "épices"],
            },
            QuizOption {
                label: "Enfiler un blouson cuir",
                tags: &["cuir"],
            },
        ],
    },
    QuizQuestion {
        id: 3,
        text: "Ta tenue de cœur ?",
        options: &[
            QuizOption {
                label: "Légère & aérienne",
                tags: &["pivoine", "floral"],
            },
            QuizOption {
                label: "Matières brutes",
                tags: &["cèdre", "vétiver", "boisé"],
            },
            QuizOption {
                label: "Linen oversize + sneakers",
                tags: &["hespéridé", "citron", "frais"],
            },
            QuizOption {
                label: "Riche & opulent",
                tags: &["ambre", "vanille", "oriental"],
            },
            QuizOption {
                label: "Cuir noir minimal",
                tags: &["cuir"],
            },
        ],
    },
    QuizQuestion {
        id: 4,
        text: "Le mood d’une soirée parfaite ?",
        options: &[
            QuizOption {
                label: "Terrasse au bord de l’eau",
                tags: &["aquatique"],
            },
            QuizOption {
                label: "Feu de camp entre amis",
                tags: &["encens", "boisé"],
            },
            QuizOption {
                label: "Bar à cocktails épicés",
                tags: &["poivre", "épices"],
            },
            QuizOption {
                label: "Cinéma & plaid cozy",
                tags: &["gourmand", "vanille", "fève tonka"],
            },
            QuizOption {
                label: "Soirée chic & feutrée",
                tags: &["ambre", "oriental"],
            },
        ],
    },
    QuizQuestion {
        id: 5,
        text: "Quel parfum te suit au quotidien ?",
        options: &[
            QuizOption {
                label: "Frais, propre, lumineux",
                tags: &["hespéridé", "citron", "frais"],
            },
            QuizOption {
                label: "Crémeux, réconfortant",
                tags: &["gourmand", "vanille"],
            },
            QuizOption {
                label: "Fleurs, pétales, bouquet",
                tags: &["rose", "jasmin", "floral"],
            },
            QuizOption {
                label: "Bois, mousse, résines",
                tags: &["cèdre", "mousse", "boisé"],
            },
            QuizOption {
                label: "Épices, ambre, vanille",
                tags: &["épices", "ambre", "vanille", "oriental"],
            },
        ],
    },
];

/// One answered question: the option picked, by zero-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct QuizChoice {
    pub question_id: u32,
    pub option_index: usize,
}

#[must_use]
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Normalizes, drops empties and deduplicates.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| normalize_tag(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Turn question/option picks into one tag set per answered question.
pub fn resolve_answers(choices: &[QuizChoice]) -> Result<Vec<BTreeSet<String>>> {
    choices
        .iter()
        .map(|choice| {
            let question = QUESTIONS
                .iter()
                .find(|q| q.id == choice.question_id)
                .ok_or_else(|| {
                    Error::Validation(format!("Unknown quiz question {}", choice.question_id))
                })?;
            let option = question.options.get(choice.option_index).ok_or_else(|| {
                Error::Validation(format!(
                    "Question {} has no option {}",
                    question.id, choice.option_index
                ))
            })?;
            Ok(normalize_tags(option.tags.iter()))
        })
        .collect()
}

/// Points awarded per matching note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub exact: u32,
    pub partial: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            exact: 2,
            partial: 1,
        }
    }
}

/// Where the scorer gets a perfume's note names from.
pub trait NoteSource {
    fn note_names(&self, perfume_id: i64) -> Result<Vec<String>>;
}

impl NoteSource for Database {
    fn note_names(&self, perfume_id: i64) -> Result<Vec<String>> {
        Ok(self
            .list_perfume_notes(perfume_id)?
            .into_iter()
            .map(|n| n.value)
            .collect())
    }
}

/// Perfume id to its normalized note tags.
#[derive(Debug, Clone, Default)]
pub struct NoteIndex {
    tags: HashMap<i64, BTreeSet<String>>,
}

impl NoteIndex {
    /// One lookup per perfume. A perfume whose notes cannot be read is left
    /// out of the index and therefore never recommended.
    pub fn build<S: NoteSource + ?Sized>(catalog: &[Perfume], source: &S) -> Self {
        let mut tags = HashMap::with_capacity(catalog.len());
        for perfume in catalog {
            match source.note_names(perfume.id) {
                Ok(names) => {
                    tags.insert(perfume.id, normalize_tags(names));
                }
                Err(e) => {
                    tracing::warn!(perfume_id = perfume.id, error = %e, "skipping perfume notes");
                }
            }
        }
        tracing::debug!(perfumes = tags.len(), "note index built");
        Self { tags }
    }

    pub fn insert(&mut self, perfume_id: i64, tags: BTreeSet<String>) {
        self.tags.insert(perfume_id, tags);
    }

    #[must_use]
    pub fn get(&self, perfume_id: i64) -> Option<&BTreeSet<String>> {
        self.tags.get(&perfume_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredPerfume {
    #[serde(flatten)]
    pub perfume: Perfume,
    pub score: u32,
}

#[must_use]
pub fn score_perfume(
    notes: &BTreeSet<String>,
    user_tags: &BTreeSet<String>,
    weights: &ScoreWeights,
) -> u32 {
    let mut score = 0;
    for note in notes {
        if user_tags.contains(note) {
            score += weights.exact;
        }
        for tag in user_tags {
            if note.contains(tag.as_str()) || tag.contains(note.as_str()) {
                score += weights.partial;
            }
        }
    }
    score
}

/// Rank `catalog` against the answers. Perfumes scoring zero are dropped;
/// equal scores keep catalog order. At most [`RECOMMENDATION_LIMIT`] results.
#[must_use]
pub fn rank(
    answers: &[BTreeSet<String>],
    index: &NoteIndex,
    catalog: &[Perfume],
    weights: &ScoreWeights,
) -> Vec<ScoredPerfume> {
    let user_tags: BTreeSet<String> = answers.iter().flatten().cloned().collect();
    if user_tags.is_empty() || index.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<ScoredPerfume> = catalog
        .iter()
        .filter_map(|perfume| {
            let notes = index.get(perfume.id)?;
            let score = score_perfume(notes, &user_tags, weights);
            (score > 0).then(|| ScoredPerfume {
                perfume: perfume.clone(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(RECOMMENDATION_LIMIT);
    scored
}

/// State for one quiz run: the catalog snapshot and a note index built on
/// first use.
#[derive(Debug, Clone)]
pub struct QuizSession {
    catalog: Vec<Perfume>,
    index: Option<NoteIndex>,
    weights: ScoreWeights,
}

impl QuizSession {
    #[must_use]
    pub fn new(catalog: Vec<Perfume>) -> Self {
        Self::with_weights(catalog, ScoreWeights::default())
    }

    #[must_use]
    pub fn with_weights(catalog: Vec<Perfume>, weights: ScoreWeights) -> Self {
        Self {
            catalog,
            index: None,
            weights,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &[Perfume] {
        &self.catalog
    }

    pub fn note_index<S: NoteSource + ?Sized>(&mut self, source: &S) -> &NoteIndex {
        self.index
            .get_or_insert_with(|| NoteIndex::build(&self.catalog, source))
    }

    pub fn recommend<S: NoteSource + ?Sized>(
        &mut self,
        source: &S,
        answers: &[BTreeSet<String>],
    ) -> Vec<ScoredPerfume> {
        if self.catalog.is_empty() {
            return Vec::new();
        }
        let Self {
            catalog,
            index,
            weights,
        } = self;
        let index = index.get_or_insert_with(|| NoteIndex::build(catalog, source));
        rank(answers, index, catalog, weights)
    }
}
