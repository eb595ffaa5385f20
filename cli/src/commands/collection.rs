use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use sillage_core::db::Database;
use sillage_core::models::{CollectionStatus, WISHLIST_LIMIT};

use super::helpers::{resolve_user, truncate};

pub(crate) fn cmd_collection_list(
    db: &Database,
    user: &str,
    status: Option<&str>,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user)?;
    let status = status.map(str::parse::<CollectionStatus>).transpose()?;
    let items = match status {
        Some(s) => db.list_collection_by_status(user.id, s)?,
        None => db.list_collection(user.id)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        eprintln!("{} has nothing in this collection yet.", user.username);
        return Ok(());
    }

    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Added")]
        added: String,
    }

    let rows: Vec<ItemRow> = items
        .iter()
        .map(|i| ItemRow {
            id: i.perfume.id,
            name: truncate(&i.perfume.name, 35),
            brand: i.perfume.brand_name.clone().unwrap_or_default(),
            status: i.status.to_string(),
            added: i.added_at.chars().take(10).collect(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");

    let wishlist = db.count_collection(user.id, CollectionStatus::Wishlist)?;
    println!("Wishlist: {wishlist}/{WISHLIST_LIMIT}");
    Ok(())
}

pub(crate) fn cmd_collection_set(
    db: &Database,
    user: &str,
    perfume_id: i64,
    status: &str,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user)?;
    let status: CollectionStatus = status.parse()?;
    let entry = db.set_collection_status(user.id, perfume_id, status)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Perfume {} is now {} for {}",
            entry.perfume_id, entry.status, user.username
        );
    }
    Ok(())
}

pub(crate) fn cmd_collection_clear(
    db: &Database,
    user: &str,
    perfume_id: i64,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user)?;
    let removed = db.clear_collection_status(user.id, perfume_id)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "user_id": user.id, "perfume_id": perfume_id, "removed": removed })
        );
    } else if removed {
        println!("Removed perfume {perfume_id} from {}'s collection", user.username);
    } else {
        println!("Perfume {perfume_id} was not in {}'s collection", user.username);
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
    fn test_set_list_clear() {
        let (db, p) = setup();
        cmd_collection_set(&db, "alice@example.com", p, "Tested", true).unwrap();
        cmd_collection_list(&db, "alice@example.com", Some("tested"), true).unwrap();

        let alice = resolve_user(&db, "alice@example.com").unwrap();
        assert_eq!(
            db.count_collection(alice.id, CollectionStatus::Tested).unwrap(),
            1
        );

        cmd_collection_clear(&db, "alice@example.com", p, true).unwrap();
        cmd_collection_clear(&db, "alice@example.com", p, true).unwrap();
        assert!(db.list_collection(alice.id).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let (db, p) = setup();
        assert!(cmd_collection_set(&db, "alice@example.com", p, "borrowed", true).is_err());
        assert!(cmd_collection_list(&db, "alice@example.com", Some("borrowed"), true).is_err());
    }
}
