use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of wishlist entries a single user may hold.
pub const WISHLIST_LIMIT: i64 = 10;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

pub const MIN_PASSWORD_LEN: usize = 8;

// --- Catalog ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBrand {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A row of one of the small lookup tables (gender, olfactory family,
/// olfactory note). They only carry a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookup {
    pub id: i64,
    pub name: String,
}

pub type Gender = Lookup;
pub type OlfactoryFamily = Lookup;
pub type OlfactoryNote = Lookup;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perfume {
    pub id: i64,
    pub name: String,
    pub brand_id: i64,
    pub release_year: Option<i64>,
    pub gender_id: Option<i64>,
    pub olfactory_family_id: Option<i64>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    // Joined fields for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPerfume {
    pub name: String,
    pub brand_id: i64,
    #[serde(default)]
    pub release_year: Option<i64>,
    #[serde(default)]
    pub gender_id: Option<i64>,
    #[serde(default)]
    pub olfactory_family_id: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update: `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePerfume {
    pub name: Option<String>,
    pub brand_id: Option<i64>,
    pub release_year: Option<i64>,
    pub gender_id: Option<i64>,
    pub olfactory_family_id: Option<i64>,
    pub image_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PerfumeFilter {
    pub brand_id: Option<i64>,
    pub gender_id: Option<i64>,
    pub family_id: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Top,
    Heart,
    Base,
}

impl NoteKind {
    pub const ALL: [NoteKind; 3] = [NoteKind::Top, NoteKind::Heart, NoteKind::Base];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Heart => "heart",
            Self::Base => "base",
        }
    }
}

impl FromStr for NoteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "heart" | "middle" => Ok(Self::Heart),
            "base" => Ok(Self::Base),
            _ => Err(Error::validation(format!(
                "Invalid note type '{s}'. Must be one of: top, heart, base"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerfumeNote {
    pub note_id: i64,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: NoteKind,
}

// --- Users ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(Error::validation(format!(
                "Invalid role '{s}'. Must be one of: user, admin"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: String,
}

impl User {
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            role: self.role,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

/// Whoever is performing a mutation. Used for ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// --- Reviews ---

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: i64,
    pub perfume_id: i64,
    pub user_id: i64,
    pub username: String,
    pub rating: i64,
    pub comment: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub perfume_id: i64,
    pub user_id: i64,
    pub rating: i64,
    pub comment: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReview {
    pub rating: Option<i64>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingSummary {
    pub perfume_id: i64,
    pub count: i64,
    pub average: Option<f64>,
}

/// Rules applied to review writes.
///
/// `one_per_user_per_perfume` rejects a second review of the same perfume by
/// the same user. `author_only` restricts update/delete to the author (admins
/// are always allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewPolicy {
    pub one_per_user_per_perfume: bool,
    pub author_only: bool,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            one_per_user_per_perfume: false,
            author_only: true,
        }
    }
}

pub fn validate_rating(rating: i64) -> Result<i64> {
    if (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(rating)
    } else {
        Err(Error::validation(format!(
            "Rating must be between {MIN_RATING} and {MAX_RATING} (got {rating})"
        )))
    }
}

// --- Collection ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Owned,
    Tested,
    Wishlist,
}

impl CollectionStatus {
    pub const ALL: [CollectionStatus; 3] = [
        CollectionStatus::Owned,
        CollectionStatus::Tested,
        CollectionStatus::Wishlist,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::Tested => "tested",
            Self::Wishlist => "wishlist",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "owned" => Ok(Self::Owned),
            "tested" => Ok(Self::Tested),
            "wishlist" => Ok(Self::Wishlist),
            _ => Err(Error::validation(format!(
                "Invalid collection status '{s}'. Must be one of: owned, tested, wishlist"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionEntry {
    pub user_id: i64,
    pub perfume_id: i64,
    pub status: CollectionStatus,
    pub added_at: String,
}

/// A collection entry joined with its perfume.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionItem {
    pub status: CollectionStatus,
    pub added_at: String,
    #[serde(flatten)]
    pub perfume: Perfume,
}

// --- Validation helpers ---

pub fn validate_id(field: &str, id: i64) -> Result<i64> {
    if id > 0 {
        Ok(id)
    } else {
        Err(Error::validation(format!(
            "{field} must be a positive integer (got {id})"
        )))
    }
}

pub fn validate_name(field: &str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub fn validate_release_year(year: i64) -> Result<i64> {
    use chrono::Datelike;
    let max = i64::from(chrono::Utc::now().year()) + 1;
    if (1700..=max).contains(&year) {
        Ok(year)
    } else {
        Err(Error::validation(format!(
            "Release year must be between 1700 and {max} (got {year})"
        )))
    }
}

pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(Error::validation(format!("Invalid email address '{email}'"))),
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

// --- SQLite conversions ---

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: Error| FromSqlError::Other(e.to_string().into()))
            }
        }
    };
}

text_enum_sql!(CollectionStatus);
text_enum_sql!(NoteKind);
text_enum_sql!(Role);
