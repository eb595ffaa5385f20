use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use sillage_core::db::Database;
use sillage_core::models::{NewUser, Role};

use super::helpers::{prompt_line, resolve_user};

pub(crate) fn cmd_user_add(
    db: &Database,
    username: &str,
    email: &str,
    password: Option<String>,
    admin: bool,
    json: bool,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt_line("Password: ")?,
    };

    let user = db.in_transaction(|db| {
        let user = db.create_user(&NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password,
        })?;
        if admin {
            db.set_user_role(user.id, Role::Admin)
        } else {
            Ok(user)
        }
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!(
            "Created {} account {} (id {})",
            user.role.as_str(),
            user.username,
            user.id
        );
    }
    Ok(())
}

pub(crate) fn cmd_user_promote(db: &Database, user: &str, role: &str, json: bool) -> Result<()> {
    let role: Role = role.parse()?;
    let target = resolve_user(db, user)?;
    let updated = db.set_user_role(target.id, role)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("{} is now {}", updated.username, updated.role.as_str());
    }
    Ok(())
}

pub(crate) fn cmd_user_list(db: &Database, json: bool) -> Result<()> {
    let users = db.list_users()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }
    if users.is_empty() {
        eprintln!("No accounts yet. Use `sillage user add` to create one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Email")]
        email: String,
        #[tabled(rename = "Role")]
        role: &'static str,
        #[tabled(rename = "Since")]
        since: String,
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role.as_str(),
            since: u.created_at.chars().take(10).collect(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_admin_and_demote() {
        let db = Database::open_in_memory().unwrap();
        cmd_user_add(
            &db,
            "root",
            "root@example.com",
            Some("correct horse battery".to_string()),
            true,
            true,
        )
        .unwrap();
        let root = db.find_user_by_email("root@example.com").unwrap().unwrap();
        assert_eq!(root.role, Role::Admin);

        cmd_user_promote(&db, "root@example.com", "user", true).unwrap();
        assert_eq!(db.get_user(root.id).unwrap().role, Role::User);
    }

    #[test]
    fn test_promote_rejects_unknown_role() {
        let db = Database::open_in_memory().unwrap();
        cmd_user_add(
            &db,
            "alice",
            "alice@example.com",
            Some("correct horse battery".to_string()),
            false,
            true,
        )
        .unwrap();
        assert!(cmd_user_promote(&db, "alice@example.com", "owner", true).is_err());
    }

    #[test]
    fn test_add_with_short_password_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(
            cmd_user_add(&db, "bob", "bob@example.com", Some("short".into()), false, true)
                .is_err()
        );
        assert!(db.list_users().unwrap().is_empty());
    }
}
