use rusqlite::{OptionalExtension, params};

use super::{Database, now_timestamp};
use crate::error::{Error, Result};
use crate::models::{
    Actor, NewReview, RatingSummary, Review, ReviewPolicy, UpdateReview, validate_id,
    validate_rating,
};

const REVIEW_SELECT: &str = "SELECT r.id, r.perfume_id, r.user_id, u.username, r.rating, r.comment,
            r.created_at, r.updated_at
     FROM review r
     JOIN users u ON r.user_id = u.id";

fn validate_comment(comment: &str) -> Result<String> {
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("Review comment must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn check_review_owner(review: &Review, actor: Actor, policy: &ReviewPolicy) -> Result<()> {
    if policy.author_only && review.user_id != actor.user_id && !actor.is_admin() {
        return Err(Error::Forbidden(
            "Only the author can modify this review".to_string(),
        ));
    }
    Ok(())
}

impl Database {
    fn review_from_row(row: &rusqlite::Row) -> rusqlite::Result<Review> {
        Ok(Review {
            id: row.get(0)?,
            perfume_id: row.get(1)?,
            user_id: row.get(2)?,
            username: row.get(3)?,
            rating: row.get(4)?,
            comment: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub fn list_reviews(&self) -> Result<Vec<Review>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{REVIEW_SELECT} ORDER BY r.created_at DESC, r.id DESC"))?;
        let reviews = stmt
            .query_map([], Self::review_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reviews)
    }

    pub fn list_reviews_for_perfume(&self, perfume_id: i64) -> Result<Vec<Review>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REVIEW_SELECT} WHERE r.perfume_id = ?1 ORDER BY r.created_at DESC, r.id DESC"
        ))?;
        let reviews = stmt
            .query_map(params![perfume_id], Self::review_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reviews)
    }

    pub fn get_review(&self, id: i64) -> Result<Review> {
        self.conn
            .query_row(
                &format!("{REVIEW_SELECT} WHERE r.id = ?1"),
                params![id],
                Self::review_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("Review", id))
    }

    pub fn create_review(&self, review: &NewReview, policy: &ReviewPolicy) -> Result<Review> {
        validate_id("perfume_id", review.perfume_id)?;
        validate_id("user_id", review.user_id)?;
        let rating = validate_rating(review.rating)?;
        let comment = validate_comment(&review.comment)?;

        if !self.perfume_exists(review.perfume_id)? {
            return Err(Error::not_found("Perfume", review.perfume_id));
        }
        if !self.user_exists(review.user_id)? {
            return Err(Error::not_found("User", review.user_id));
        }

        if policy.one_per_user_per_perfume {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM review WHERE user_id = ?1 AND perfume_id = ?2)",
                params![review.user_id, review.perfume_id],
                |row| row.get(0),
            )?;
            if exists {
                return Err(Error::Conflict(
                    "You have already reviewed this perfume".to_string(),
                ));
            }
        }

        self.conn.execute(
            "INSERT INTO review (perfume_id, user_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                review.perfume_id,
                review.user_id,
                rating,
                comment,
                now_timestamp()
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(review_id = id, perfume_id = review.perfume_id, "review created");
        self.get_review(id)
    }

    pub fn update_review(
        &self,
        id: i64,
        actor: Actor,
        update: &UpdateReview,
        policy: &ReviewPolicy,
    ) -> Result<Review> {
        let rating = update.rating.map(validate_rating).transpose()?;
        let comment = update.comment.as_deref().map(validate_comment).transpose()?;

        let current = self.get_review(id)?;
        check_review_owner(&current, actor, policy)?;

        self.conn.execute(
            "UPDATE review SET rating = ?1, comment = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                rating.unwrap_or(current.rating),
                comment.unwrap_or(current.comment),
                now_timestamp(),
                id
            ],
        )?;
        tracing::info!(review_id = id, "review updated");
        self.get_review(id)
    }

    pub fn delete_review(&self, id: i64, actor: Actor, policy: &ReviewPolicy) -> Result<()> {
        let current = self.get_review(id)?;
        check_review_owner(&current, actor, policy)?;
        self.conn
            .execute("DELETE FROM review WHERE id = ?1", params![id])?;
        tracing::info!(review_id = id, "review deleted");
        Ok(())
    }

    pub fn perfume_rating_summary(&self, perfume_id: i64) -> Result<RatingSummary> {
        let (count, average): (i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), AVG(rating) FROM review WHERE perfume_id = ?1",
            params![perfume_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(RatingSummary {
            perfume_id,
            count,
            average,
        })
    }
}
