use rusqlite::{OptionalExtension, params};

use super::catalog::{PERFUME_COLUMNS, PERFUME_JOINS};
use super::{Database, now_timestamp};
use crate::error::{Error, Result};
use crate::models::{
    CollectionEntry, CollectionItem, CollectionStatus, WISHLIST_LIMIT, validate_id,
};

impl Database {
    fn collection_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<CollectionItem> {
        Ok(CollectionItem {
            perfume: Self::perfume_from_row(row)?,
            status: row.get(12)?,
            added_at: row.get(13)?,
        })
    }

    fn list_collection_where(
        &self,
        user_id: i64,
        status: Option<CollectionStatus>,
    ) -> Result<Vec<CollectionItem>> {
        let sql = format!(
            "SELECT {PERFUME_COLUMNS}, uc.status, uc.added_at
             FROM user_collection uc
             JOIN perfume p ON uc.perfume_id = p.id
             {PERFUME_JOINS}
             WHERE uc.user_id = ?1 AND (?2 IS NULL OR uc.status = ?2)
             ORDER BY uc.added_at DESC, uc.perfume_id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![user_id, status], Self::collection_item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Perfumes the user holds at `status`, most recently added first.
    pub fn list_collection_by_status(
        &self,
        user_id: i64,
        status: CollectionStatus,
    ) -> Result<Vec<CollectionItem>> {
        validate_id("user_id", user_id)?;
        let items = self.list_collection_where(user_id, Some(status))?;
        tracing::debug!(user_id, %status, count = items.len(), "listed collection");
        Ok(items)
    }

    /// Every collection entry of the user, most recently added first.
    pub fn list_collection(&self, user_id: i64) -> Result<Vec<CollectionItem>> {
        validate_id("user_id", user_id)?;
        self.list_collection_where(user_id, None)
    }

    pub fn get_collection_entry(
        &self,
        user_id: i64,
        perfume_id: i64,
    ) -> Result<Option<CollectionEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT user_id, perfume_id, status, added_at
                 FROM user_collection WHERE user_id = ?1 AND perfume_id = ?2",
                params![user_id, perfume_id],
                |row| {
                    Ok(CollectionEntry {
                        user_id: row.get(0)?,
                        perfume_id: row.get(1)?,
                        status: row.get(2)?,
                        added_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn count_collection(&self, user_id: i64, status: CollectionStatus) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM user_collection WHERE user_id = ?1 AND status = ?2",
            params![user_id, status],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Assign `status` to (user, perfume), replacing any previous status and
    /// refreshing `added_at`.
    ///
    /// A transition into the wishlist is refused with
    /// [`Error::CapacityExceeded`] when the user already holds
    /// [`WISHLIST_LIMIT`] wishlist entries. Re-setting a perfume that is
    /// already on the wishlist never counts against the limit. The check and
    /// the write are a single statement, so concurrent writers cannot push
    /// the wishlist past the limit.
    pub fn set_collection_status(
        &self,
        user_id: i64,
        perfume_id: i64,
        status: CollectionStatus,
    ) -> Result<CollectionEntry> {
        validate_id("user_id", user_id)?;
        validate_id("perfume_id", perfume_id)?;
        if !self.user_exists(user_id)? {
            return Err(Error::not_found("User", user_id));
        }
        if !self.perfume_exists(perfume_id)? {
            return Err(Error::not_found("Perfume", perfume_id));
        }

        let now = now_timestamp();
        let rows = self.conn.execute(
            "INSERT INTO user_collection (user_id, perfume_id, status, added_at)
             SELECT ?1, ?2, ?3, ?4
             WHERE ?3 <> 'wishlist'
                OR EXISTS (
                    SELECT 1 FROM user_collection
                    WHERE user_id = ?1 AND perfume_id = ?2 AND status = 'wishlist'
                )
                OR (
                    SELECT COUNT(*) FROM user_collection
                    WHERE user_id = ?1 AND status = 'wishlist'
                ) < ?5
             ON CONFLICT (user_id, perfume_id)
             DO UPDATE SET status = excluded.status, added_at = excluded.added_at",
            params![user_id, perfume_id, status, now, WISHLIST_LIMIT],
        )?;

        if rows == 0 {
            tracing::warn!(user_id, perfume_id, "wishlist full, status not changed");
            return Err(Error::CapacityExceeded {
                limit: WISHLIST_LIMIT,
            });
        }

        tracing::info!(user_id, perfume_id, %status, "collection status set");
        self.get_collection_entry(user_id, perfume_id)?
            .ok_or_else(|| Error::not_found("Collection entry", perfume_id))
    }

    /// Remove (user, perfume) from the collection whatever its status.
    /// Returns `false` when there was nothing to remove.
    pub fn clear_collection_status(&self, user_id: i64, perfume_id: i64) -> Result<bool> {
        validate_id("user_id", user_id)?;
        validate_id("perfume_id", perfume_id)?;
        let rows = self.conn.execute(
            "DELETE FROM user_collection WHERE user_id = ?1 AND perfume_id = ?2",
            params![user_id, perfume_id],
        )?;
        if rows > 0 {
            tracing::info!(user_id, perfume_id, "collection entry cleared");
        }
        Ok(rows > 0)
    }
}
