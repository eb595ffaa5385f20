use rusqlite::{OptionalExtension, params};

use super::{Database, is_unique_violation, like_pattern, now_timestamp};
use crate::error::{Error, Result};
use crate::models::{
    Brand, Lookup, NewBrand, NewPerfume, NoteKind, Perfume, PerfumeFilter, PerfumeNote,
    UpdatePerfume, validate_id, validate_name, validate_release_year,
};

/// Columns 0-11 expected by `perfume_from_row`.
pub(super) const PERFUME_COLUMNS: &str = "p.id, p.name, p.brand_id, p.release_year, p.gender_id,
     p.olfactory_family_id, p.image_url, p.description, p.created_at,
     b.name, g.name, f.name";

pub(super) const PERFUME_JOINS: &str = "JOIN brand b ON p.brand_id = b.id
     LEFT JOIN gender g ON p.gender_id = g.id
     LEFT JOIN olfactory_family f ON p.olfactory_family_id = f.id";

/// The small name-only tables. Keeps table names out of user input.
#[derive(Debug, Clone, Copy)]
enum LookupTable {
    Gender,
    Family,
    Note,
}

impl LookupTable {
    fn table(self) -> &'static str {
        match self {
            Self::Gender => "gender",
            Self::Family => "olfactory_family",
            Self::Note => "olfactory_note",
        }
    }

    fn entity(self) -> &'static str {
        match self {
            Self::Gender => "Gender",
            Self::Family => "Olfactory family",
            Self::Note => "Olfactory note",
        }
    }
}

impl Database {
    // --- Row mapping helpers ---

    pub(super) fn perfume_from_row(row: &rusqlite::Row) -> rusqlite::Result<Perfume> {
        Ok(Perfume {
            id: row.get(0)?,
            name: row.get(1)?,
            brand_id: row.get(2)?,
            release_year: row.get(3)?,
            gender_id: row.get(4)?,
            olfactory_family_id: row.get(5)?,
            image_url: row.get(6)?,
            description: row.get(7)?,
            created_at: row.get(8)?,
            brand_name: row.get(9)?,
            gender_name: row.get(10)?,
            family_name: row.get(11)?,
        })
    }

    fn brand_from_row(row: &rusqlite::Row) -> rusqlite::Result<Brand> {
        Ok(Brand {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    // --- Brands ---

    pub fn list_brands(&self) -> Result<Vec<Brand>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description, created_at FROM brand ORDER BY name")?;
        let brands = stmt
            .query_map([], Self::brand_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(brands)
    }

    pub fn get_brand(&self, id: i64) -> Result<Brand> {
        self.conn
            .query_row(
                "SELECT id, name, description, created_at FROM brand WHERE id = ?1",
                params![id],
                Self::brand_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("Brand", id))
    }

    pub fn find_brand_by_name(&self, name: &str) -> Result<Option<Brand>> {
        let brand = self
            .conn
            .query_row(
                "SELECT id, name, description, created_at FROM brand WHERE name = ?1",
                params![name.trim()],
                Self::brand_from_row,
            )
            .optional()?;
        Ok(brand)
    }

    pub fn create_brand(&self, brand: &NewBrand) -> Result<Brand> {
        let name = validate_name("Brand name", &brand.name)?;
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO brand (name, description, created_at) VALUES (?1, ?2, ?3)",
                params![name, brand.description, now],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!("Brand '{name}' already exists"))
                } else {
                    e.into()
                }
            })?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(brand_id = id, %name, "brand created");
        self.get_brand(id)
    }

    pub fn update_brand(&self, id: i64, brand: &NewBrand) -> Result<Brand> {
        let name = validate_name("Brand name", &brand.name)?;
        let rows = self
            .conn
            .execute(
                "UPDATE brand SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, brand.description, id],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!("Brand '{name}' already exists"))
                } else {
                    e.into()
                }
            })?;
        if rows == 0 {
            return Err(Error::not_found("Brand", id));
        }
        self.get_brand(id)
    }

    /// Deletes the brand and, through the foreign key cascade, its perfumes.
    pub fn delete_brand(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM brand WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::not_found("Brand", id));
        }
        tracing::info!(brand_id = id, "brand deleted");
        Ok(())
    }

    /// Returns the brand id and whether it was created.
    pub fn get_or_create_brand(&self, name: &str) -> Result<(i64, bool)> {
        if let Some(existing) = self.find_brand_by_name(name)? {
            return Ok((existing.id, false));
        }
        let brand = self.create_brand(&NewBrand {
            name: name.to_string(),
            description: None,
        })?;
        Ok((brand.id, true))
    }

    // --- Perfumes ---

    pub fn list_perfumes(&self, filter: &PerfumeFilter) -> Result<Vec<Perfume>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        let sql = format!(
            "SELECT {PERFUME_COLUMNS} FROM perfume p {PERFUME_JOINS}
             WHERE (?1 IS NULL OR p.brand_id = ?1)
               AND (?2 IS NULL OR p.gender_id = ?2)
               AND (?3 IS NULL OR p.olfactory_family_id = ?3)
               AND (?4 IS NULL OR p.name LIKE ?4 ESCAPE '\\' OR b.name LIKE ?4 ESCAPE '\\')
             ORDER BY p.name, p.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let perfumes = stmt
            .query_map(
                params![filter.brand_id, filter.gender_id, filter.family_id, search],
                Self::perfume_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        tracing::debug!(count = perfumes.len(), "listed perfumes");
        Ok(perfumes)
    }

    pub fn list_perfumes_by_brand(&self, brand_id: i64) -> Result<Vec<Perfume>> {
        self.get_brand(brand_id)?;
        self.list_perfumes(&PerfumeFilter {
            brand_id: Some(brand_id),
            ..PerfumeFilter::default()
        })
    }

    pub fn get_perfume(&self, id: i64) -> Result<Perfume> {
        let sql = format!("SELECT {PERFUME_COLUMNS} FROM perfume p {PERFUME_JOINS} WHERE p.id = ?1");
        self.conn
            .query_row(&sql, params![id], Self::perfume_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("Perfume", id))
    }

    pub(crate) fn perfume_exists(&self, id: i64) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM perfume WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn check_perfume_refs(
        &self,
        brand_id: i64,
        gender_id: Option<i64>,
        family_id: Option<i64>,
    ) -> Result<()> {
        self.get_brand(brand_id)?;
        if let Some(id) = gender_id {
            self.get_lookup(LookupTable::Gender, id)?;
        }
        if let Some(id) = family_id {
            self.get_lookup(LookupTable::Family, id)?;
        }
        Ok(())
    }

    pub fn create_perfume(&self, perfume: &NewPerfume) -> Result<Perfume> {
        let name = validate_name("Perfume name", &perfume.name)?;
        validate_id("brand_id", perfume.brand_id)?;
        if let Some(year) = perfume.release_year {
            validate_release_year(year)?;
        }
        self.check_perfume_refs(
            perfume.brand_id,
            perfume.gender_id,
            perfume.olfactory_family_id,
        )?;

        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO perfume (name, brand_id, release_year, gender_id, olfactory_family_id, image_url, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                name,
                perfume.brand_id,
                perfume.release_year,
                perfume.gender_id,
                perfume.olfactory_family_id,
                perfume.image_url,
                perfume.description,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(perfume_id = id, %name, "perfume created");
        self.get_perfume(id)
    }

    pub fn update_perfume(&self, id: i64, update: &UpdatePerfume) -> Result<Perfume> {
        let current = self.get_perfume(id)?;

        let name = match update.name.as_deref() {
            Some(n) => validate_name("Perfume name", n)?,
            None => current.name,
        };
        if let Some(year) = update.release_year {
            validate_release_year(year)?;
        }
        let brand_id = update.brand_id.unwrap_or(current.brand_id);
        let gender_id = update.gender_id.or(current.gender_id);
        let family_id = update.olfactory_family_id.or(current.olfactory_family_id);
        self.check_perfume_refs(brand_id, gender_id, family_id)?;

        self.conn.execute(
            "UPDATE perfume SET name = ?1, brand_id = ?2, release_year = ?3, gender_id = ?4,
                 olfactory_family_id = ?5, image_url = ?6, description = ?7
             WHERE id = ?8",
            params![
                name,
                brand_id,
                update.release_year.or(current.release_year),
                gender_id,
                family_id,
                update.image_url.clone().or(current.image_url),
                update.description.clone().or(current.description),
                id,
            ],
        )?;
        tracing::info!(perfume_id = id, "perfume updated");
        self.get_perfume(id)
    }

    /// Notes, reviews and collection entries go with it.
    pub fn delete_perfume(&self, id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM perfume WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::not_found("Perfume", id));
        }
        tracing::info!(perfume_id = id, "perfume deleted");
        Ok(())
    }

    // --- Perfume notes ---

    pub fn list_perfume_notes(&self, perfume_id: i64) -> Result<Vec<PerfumeNote>> {
        if !self.perfume_exists(perfume_id)? {
            return Err(Error::not_found("Perfume", perfume_id));
        }
        let mut stmt = self.conn.prepare(
            "SELECT n.id, n.name, pn.kind
             FROM perfume_note pn
             JOIN olfactory_note n ON pn.note_id = n.id
             WHERE pn.perfume_id = ?1
             ORDER BY CASE pn.kind WHEN 'top' THEN 0 WHEN 'heart' THEN 1 ELSE 2 END, n.name",
        )?;
        let notes = stmt
            .query_map(params![perfume_id], |row| {
                Ok(PerfumeNote {
                    note_id: row.get(0)?,
                    value: row.get(1)?,
                    kind: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    /// Links a note (created on first use) to a perfume. Linking the same
    /// note twice at the same level is a no-op.
    pub fn add_perfume_note(
        &self,
        perfume_id: i64,
        note_name: &str,
        kind: NoteKind,
    ) -> Result<PerfumeNote> {
        if !self.perfume_exists(perfume_id)? {
            return Err(Error::not_found("Perfume", perfume_id));
        }
        let (note_id, _) = self.get_or_create_note(note_name)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO perfume_note (perfume_id, note_id, kind) VALUES (?1, ?2, ?3)",
            params![perfume_id, note_id, kind],
        )?;
        let note = self.get_lookup(LookupTable::Note, note_id)?;
        Ok(PerfumeNote {
            note_id,
            value: note.name,
            kind,
        })
    }

    pub fn remove_perfume_note(&self, perfume_id: i64, note_id: i64, kind: NoteKind) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM perfume_note WHERE perfume_id = ?1 AND note_id = ?2 AND kind = ?3",
            params![perfume_id, note_id, kind],
        )?;
        Ok(rows > 0)
    }

    // --- Genders, olfactory families and notes ---

    fn list_lookup(&self, table: LookupTable) -> Result<Vec<Lookup>> {
        let sql = format!("SELECT id, name FROM {} ORDER BY name", table.table());
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Lookup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_lookup(&self, table: LookupTable, id: i64) -> Result<Lookup> {
        let sql = format!("SELECT id, name FROM {} WHERE id = ?1", table.table());
        self.conn
            .query_row(&sql, params![id], |row| {
                Ok(Lookup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?
            .ok_or_else(|| Error::not_found(table.entity(), id))
    }

    fn get_or_create_lookup(&self, table: LookupTable, name: &str) -> Result<(i64, bool)> {
        let name = validate_name(table.entity(), name)?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {} WHERE name = ?1", table.table()),
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id, false));
        }
        self.conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1)", table.table()),
            params![name],
        )?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn list_genders(&self) -> Result<Vec<Lookup>> {
        self.list_lookup(LookupTable::Gender)
    }

    pub fn get_gender(&self, id: i64) -> Result<Lookup> {
        self.get_lookup(LookupTable::Gender, id)
    }

    pub fn get_or_create_gender(&self, name: &str) -> Result<(i64, bool)> {
        self.get_or_create_lookup(LookupTable::Gender, name)
    }

    pub fn list_olfactory_families(&self) -> Result<Vec<Lookup>> {
        self.list_lookup(LookupTable::Family)
    }

    pub fn get_olfactory_family(&self, id: i64) -> Result<Lookup> {
        self.get_lookup(LookupTable::Family, id)
    }

    pub fn get_or_create_family(&self, name: &str) -> Result<(i64, bool)> {
        self.get_or_create_lookup(LookupTable::Family, name)
    }

    pub fn list_olfactory_notes(&self) -> Result<Vec<Lookup>> {
        self.list_lookup(LookupTable::Note)
    }

    pub fn get_olfactory_note(&self, id: i64) -> Result<Lookup> {
        self.get_lookup(LookupTable::Note, id)
    }

    pub fn get_or_create_note(&self, name: &str) -> Result<(i64, bool)> {
        self.get_or_create_lookup(LookupTable::Note, name)
    }

    /// Find a perfume by brand and name, case-insensitively.
    pub fn find_perfume(&self, brand_id: i64, name: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM perfume WHERE brand_id = ?1 AND LOWER(name) = LOWER(?2)",
                params![brand_id, name.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
