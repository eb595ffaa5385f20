use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use sillage_core::db::Database;
use sillage_core::models::{Actor, NewReview, ReviewPolicy, Role};

use super::helpers::{resolve_user, truncate};

/// The local operator acts with admin rights over reviews.
const OPERATOR: Actor = Actor {
    user_id: 0,
    role: Role::Admin,
};

pub(crate) fn cmd_review_list(db: &Database, perfume_id: Option<i64>, json: bool) -> Result<()> {
    let reviews = match perfume_id {
        Some(id) => {
            db.get_perfume(id)?;
            db.list_reviews_for_perfume(id)?
        }
        None => db.list_reviews()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&reviews)?);
        return Ok(());
    }
    if reviews.is_empty() {
        eprintln!("No reviews yet.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct ReviewRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Perfume")]
        perfume_id: i64,
        #[tabled(rename = "User")]
        user: String,
        #[tabled(rename = "Rating")]
        rating: String,
        #[tabled(rename = "Comment")]
        comment: String,
    }

    let rows: Vec<ReviewRow> = reviews
        .iter()
        .map(|r| ReviewRow {
            id: r.id,
            perfume_id: r.perfume_id,
            user: r.username.clone(),
            rating: format!("{}/5", r.rating),
            comment: truncate(&r.comment, 50),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_review_add(
    db: &Database,
    user: &str,
    perfume_id: i64,
    rating: i64,
    comment: &str,
    unique: bool,
    json: bool,
) -> Result<()> {
    let author = resolve_user(db, user)?;
    let policy = ReviewPolicy {
        one_per_user_per_perfume: unique,
        ..ReviewPolicy::default()
    };
    let review = db.create_review(
        &NewReview {
            perfume_id,
            user_id: author.id,
            rating,
            comment: comment.to_string(),
        },
        &policy,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&review)?);
    } else {
        println!(
            "Added review {} ({}/5) by {} for perfume {}",
            review.id, review.rating, review.username, review.perfume_id
        );
    }
    Ok(())
}

pub(crate) fn cmd_review_delete(db: &Database, id: i64, json: bool) -> Result<()> {
    db.delete_review(id, OPERATOR, &ReviewPolicy::default())?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted review {id}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sillage_core::models::{NewPerfume, NewUser};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&NewUser {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "correct horse battery".to_string(),
        })
        .unwrap();
        let (brand_id, _) = db.get_or_create_brand("Guerlain").unwrap();
        let p = db
            .create_perfume(&NewPerfume {
                name: "Shalimar".to_string(),
                brand_id,
                ..NewPerfume::default()
            })
            .unwrap();
        (db, p.id)
    }

    #[test]
    fn test_add_and_delete_review() {
        let (db, p) = setup();
        cmd_review_add(&db, "alice@example.com", p, 5, "Sublime", false, true).unwrap();
        let reviews = db.list_reviews_for_perfume(p).unwrap();
        assert_eq!(reviews.len(), 1);

        cmd_review_delete(&db, reviews[0].id, true).unwrap();
        assert!(db.list_reviews().unwrap().is_empty());
    }

    #[test]
    fn test_unique_flag_blocks_second_review() {
        let (db, p) = setup();
        cmd_review_add(&db, "alice@example.com", p, 4, "Beau", true, true).unwrap();
        assert!(cmd_review_add(&db, "alice@example.com", p, 2, "Bof", true, true).is_err());
        assert!(cmd_review_add(&db, "alice@example.com", p, 2, "Bof", false, true).is_ok());
    }

    #[test]
    fn test_list_for_unknown_perfume_fails() {
        let (db, _) = setup();
        assert!(cmd_review_list(&db, Some(99), true).is_err());
    }
}
