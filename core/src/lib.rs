pub mod auth;
pub mod catalog_import;
pub mod db;
pub mod error;
pub mod models;
pub mod quiz;

pub use error::{Error, Result};
