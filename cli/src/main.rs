mod commands;
mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    PerfumeArgs, cmd_brand_add, cmd_brand_list, cmd_brand_show, cmd_collection_clear,
    cmd_collection_list, cmd_collection_set, cmd_import_catalog, cmd_perfume_add,
    cmd_perfume_add_note, cmd_perfume_delete, cmd_perfume_list, cmd_perfume_show, cmd_quiz,
    cmd_review_add, cmd_review_delete, cmd_review_list, cmd_user_add, cmd_user_list,
    cmd_user_promote,
};
use crate::config::Config;
use crate::server::ServerOptions;
use sillage_core::auth::SESSION_TTL_HOURS;
use sillage_core::db::Database;
use sillage_core::models::ReviewPolicy;

#[derive(Parser)]
#[command(
    name = "sillage",
    version,
    about = "Perfume discovery: catalog, collections, reviews and a scent quiz",
    long_about = "\n\n  ┌─┐┬┬  ┬  ┌─┐┌─┐┌─┐
  └─┐││  │  ├─┤│ ┬├┤
  └─┘┴┴─┘┴─┘┴ ┴└─┘└─┘
   find what you like to wear.
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Allow at most one review per user and perfume
        #[arg(long)]
        unique_reviews: bool,
        /// Let any signed-in user edit or delete any review
        #[arg(long)]
        allow_foreign_review_edits: bool,
        /// Lifetime of a login session, in hours
        #[arg(long, default_value_t = SESSION_TTL_HOURS)]
        session_ttl_hours: i64,
    },
    /// Browse and edit the perfume catalog
    Perfume {
        #[command(subcommand)]
        command: PerfumeCommands,
    },
    /// Manage perfume brands
    Brand {
        #[command(subcommand)]
        command: BrandCommands,
    },
    /// Import data from files
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },
    /// Answer the scent quiz and get recommendations
    Quiz {
        /// Skip the questions and score against these comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage a user's owned / tested / wishlist perfumes
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// Manage perfume reviews
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
}

#[derive(Subcommand)]
enum PerfumeCommands {
    /// List perfumes, optionally filtered by name or brand
    List {
        /// Search text matched against perfume and brand names
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a perfume with its notes and rating
    Show {
        /// Perfume ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a perfume (brand, gender and family are created when missing)
    Add {
        /// Perfume name
        name: String,
        /// Brand name
        #[arg(short, long)]
        brand: String,
        /// Release year
        #[arg(long)]
        year: Option<i64>,
        /// Gender (e.g. Femme, Homme, Mixte)
        #[arg(long)]
        gender: Option<String>,
        /// Olfactory family (e.g. Floral, Boisé)
        #[arg(long)]
        family: Option<String>,
        /// Image URL
        #[arg(long)]
        image_url: Option<String>,
        /// Description
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a perfume with its notes, reviews and collection entries
    Delete {
        /// Perfume ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Link an olfactory note to a perfume
    AddNote {
        /// Perfume ID
        id: i64,
        /// Note name (e.g. "Vanille")
        note: String,
        /// Pyramid level: top, heart, base
        #[arg(short = 't', long = "type", default_value = "heart")]
        kind: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BrandCommands {
    /// List brands
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a brand
    Add {
        /// Brand name
        name: String,
        /// Short description
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a brand and its perfumes
    Show {
        /// Brand ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ImportCommands {
    /// Seed the catalog from a CSV file
    Catalog {
        /// Path to the CSV file
        file: PathBuf,
        /// Preview import without making changes
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create an account
    Add {
        /// Username
        username: String,
        /// Email address (used to log in)
        email: String,
        /// Password (prompted on stdin when omitted)
        #[arg(long)]
        password: Option<String>,
        /// Grant the admin role
        #[arg(long)]
        admin: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a user's role
    Promote {
        /// User ID or email
        user: String,
        /// Role: admin or user
        #[arg(long, default_value = "admin")]
        role: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List accounts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// List a user's collection
    List {
        /// User ID or email
        #[arg(short, long)]
        user: String,
        /// Only this status: owned, tested, wishlist
        #[arg(short, long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put a perfume in a collection list (replaces its previous status)
    Set {
        /// User ID or email
        #[arg(short, long)]
        user: String,
        /// Perfume ID
        perfume_id: i64,
        /// Status: owned, tested, wishlist
        status: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a perfume from the user's collection
    Clear {
        /// User ID or email
        #[arg(short, long)]
        user: String,
        /// Perfume ID
        perfume_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List reviews, newest first
    List {
        /// Only reviews of this perfume
        #[arg(short, long)]
        perfume: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a review on behalf of a user
    Add {
        /// Author (user ID or email)
        #[arg(short, long)]
        user: String,
        /// Perfume ID
        perfume_id: i64,
        /// Rating from 1 to 5
        rating: i64,
        /// Review text
        comment: String,
        /// Refuse if the user already reviewed this perfume
        #[arg(long)]
        unique: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a review
    Delete {
        /// Review ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sillage=info,sillage_core=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    tracing::debug!(path = %config.db_path.display(), "database opened");

    match cli.command {
        Commands::Serve {
            port,
            bind,
            unique_reviews,
            allow_foreign_review_edits,
            session_ttl_hours,
        } => {
            let session_ttl = chrono::Duration::try_hours(session_ttl_hours)
                .filter(|ttl| *ttl > chrono::Duration::zero())
                .context("--session-ttl-hours must be a positive number of hours")?;
            let options = ServerOptions {
                review_policy: ReviewPolicy {
                    one_per_user_per_perfume: unique_reviews,
                    author_only: !allow_foreign_review_edits,
                },
                session_ttl,
            };
            server::start_server(db, port, &bind, options).await
        }
        Commands::Perfume { command } => match command {
            PerfumeCommands::List { search, json } => cmd_perfume_list(&db, search, json),
            PerfumeCommands::Show { id, json } => cmd_perfume_show(&db, id, json),
            PerfumeCommands::Add {
                name,
                brand,
                year,
                gender,
                family,
                image_url,
                description,
                json,
            } => cmd_perfume_add(
                &db,
                PerfumeArgs {
                    name,
                    brand,
                    year,
                    gender,
                    family,
                    image_url,
                    description,
                },
                json,
            ),
            PerfumeCommands::Delete { id, json } => cmd_perfume_delete(&db, id, json),
            PerfumeCommands::AddNote {
                id,
                note,
                kind,
                json,
            } => cmd_perfume_add_note(&db, id, &note, &kind, json),
        },
        Commands::Brand { command } => match command {
            BrandCommands::List { json } => cmd_brand_list(&db, json),
            BrandCommands::Add {
                name,
                description,
                json,
            } => cmd_brand_add(&db, &name, description, json),
            BrandCommands::Show { id, json } => cmd_brand_show(&db, id, json),
        },
        Commands::Import { command } => match command {
            ImportCommands::Catalog {
                file,
                dry_run,
                json,
            } => cmd_import_catalog(&db, &file, dry_run, json),
        },
        Commands::Quiz { tags, json } => cmd_quiz(&db, tags.as_deref(), json),
        Commands::User { command } => match command {
            UserCommands::Add {
                username,
                email,
                password,
                admin,
                json,
            } => cmd_user_add(&db, &username, &email, password, admin, json),
            UserCommands::Promote { user, role, json } => {
                cmd_user_promote(&db, &user, &role, json)
            }
            UserCommands::List { json } => cmd_user_list(&db, json),
        },
        Commands::Collection { command } => match command {
            CollectionCommands::List { user, status, json } => {
                cmd_collection_list(&db, &user, status.as_deref(), json)
            }
            CollectionCommands::Set {
                user,
                perfume_id,
                status,
                json,
            } => cmd_collection_set(&db, &user, perfume_id, &status, json),
            CollectionCommands::Clear {
                user,
                perfume_id,
                json,
            } => cmd_collection_clear(&db, &user, perfume_id, json),
        },
        Commands::Review { command } => match command {
            ReviewCommands::List { perfume, json } => cmd_review_list(&db, perfume, json),
            ReviewCommands::Add {
                user,
                perfume_id,
                rating,
                comment,
                unique,
                json,
            } => cmd_review_add(&db, &user, perfume_id, rating, &comment, unique, json),
            ReviewCommands::Delete { id, json } => cmd_review_delete(&db, id, json),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "sillage",
            "serve",
            "--port",
            "9000",
            "--unique-reviews",
            "--allow-foreign-review-edits",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                port,
                unique_reviews,
                allow_foreign_review_edits,
                session_ttl_hours,
                ..
            } => {
                assert_eq!(port, 9000);
                assert!(unique_reviews);
                assert!(allow_foreign_review_edits);
                assert_eq!(session_ttl_hours, SESSION_TTL_HOURS);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn add_note_type_flag() {
        let cli =
            Cli::try_parse_from(["sillage", "perfume", "add-note", "3", "Vanille", "--type", "base"])
                .unwrap();
        match cli.command {
            Commands::Perfume {
                command: PerfumeCommands::AddNote { id, note, kind, .. },
            } => {
                assert_eq!(id, 3);
                assert_eq!(note, "Vanille");
                assert_eq!(kind, "base");
            }
            _ => panic!("expected perfume add-note"),
        }
    }
}
