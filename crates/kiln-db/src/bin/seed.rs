//! # Seed Data Generator
//!
//! Populates a database with a small bakery for development: raw
//! materials, two recipes, opening purchases and one production order
//! part way through.
//!
//! ## Usage
//! ```bash
//! # Seed ./kiln_dev.db
//! cargo run -p kiln-db --bin seed
//!
//! # Specify database path
//! cargo run -p kiln-db --bin seed -- --db ./data/kiln.db
//!
//! # Read pool and retry settings from a config file
//! cargo run -p kiln-db --bin seed -- --config ./kiln.toml
//! ```

use std::env;
use std::path::PathBuf;

use chrono::Utc;
use kiln_core::{
    Item, ItemKind, NewItem, NewLedgerEntry, NewProductionOrder, NewRecipe, NewRecipeLine,
    OutputRecord, Percentage, Priority, Quantity, TransactionKind,
};
use kiln_db::{Database, EngineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const ACTOR: &str = "seed";

/// (sku, name, kind, category, unit, unit cost in cents, min stock, opening stock)
const ITEMS: &[(&str, &str, ItemKind, &str, &str, i64, i64, i64)] = &[
    ("FLOUR", "Wheat flour", ItemKind::RawMaterial, "dry", "kg", 250, 50, 500),
    ("SUGAR", "Caster sugar", ItemKind::RawMaterial, "dry", "kg", 180, 20, 200),
    ("BUTTER", "Unsalted butter", ItemKind::RawMaterial, "chilled", "kg", 900, 10, 80),
    ("EGGS", "Free range eggs", ItemKind::RawMaterial, "chilled", "pc", 35, 60, 360),
    ("COOKIES", "Butter cookies", ItemKind::FinishedGood, "baked", "pack", 0, 0, 0),
    ("SHORTBREAD", "Shortbread", ItemKind::FinishedGood, "baked", "pack", 0, 0, 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kiln Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file path (default: ./kiln_dev.db)");
                println!("  -c, --config <PATH>    Engine config file (kiln.toml)");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = EngineConfig::load(config_path)?;
    config.database.path = db_path.unwrap_or_else(|| PathBuf::from("./kiln_dev.db"));

    println!("Kiln Seed Data Generator");
    println!("========================");
    println!("Database: {}", config.database.path.display());
    println!();

    let db = Database::with_settings(config.db_config(), config.settings()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.items().count_active().await?;
    if existing > 0 {
        println!("⚠ Database already has {} items", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();

    // Items and opening stock
    let mut items: Vec<Item> = Vec::with_capacity(ITEMS.len());
    for &(sku, name, kind, category, unit, cost, min_stock, opening) in ITEMS {
        let item = db
            .items()
            .insert(&NewItem {
                sku: sku.to_string(),
                name: name.to_string(),
                kind,
                category: Some(category.to_string()),
                unit: unit.to_string(),
                unit_cost_cents: cost,
                min_stock: Quantity::from(min_stock),
            })
            .await?;

        if opening > 0 {
            db.ledger()
                .record(
                    &NewLedgerEntry::new(&item.id, TransactionKind::Purchase, Quantity::from(opening))
                        .unit_price_cents(cost)
                        .reference("opening-balance"),
                    ACTOR,
                )
                .await?;
        }
        items.push(item);
    }
    println!("✓ Created {} items", items.len());

    let id_of = |sku: &str| {
        items
            .iter()
            .find(|item| item.sku == sku)
            .map(|item| item.id.clone())
            .ok_or_else(|| format!("seed item {sku} missing"))
    };

    // Recipes
    let cookies = db
        .recipes()
        .create(&NewRecipe {
            name: "Butter cookies".to_string(),
            output_item_id: id_of("COOKIES")?,
            output_quantity: Quantity::from(10),
            output_unit: "pack".to_string(),
            lines: vec![
                NewRecipeLine::new(id_of("FLOUR")?, Quantity::from(2), "kg"),
                NewRecipeLine::new(id_of("SUGAR")?, Quantity::from(1), "kg"),
                NewRecipeLine::new(id_of("BUTTER")?, Quantity::from_parts(5, 1), "kg")
                    .with_wastage(Percentage::whole(5)?),
                NewRecipeLine::new(id_of("EGGS")?, Quantity::from(6), "pc"),
            ],
        })
        .await?;

    db.recipes()
        .create(&NewRecipe {
            name: "Shortbread".to_string(),
            output_item_id: id_of("SHORTBREAD")?,
            output_quantity: Quantity::from(12),
            output_unit: "pack".to_string(),
            lines: vec![
                NewRecipeLine::new(id_of("FLOUR")?, Quantity::from(3), "kg"),
                NewRecipeLine::new(id_of("SUGAR")?, Quantity::from(1), "kg"),
                NewRecipeLine::new(id_of("BUTTER")?, Quantity::from(2), "kg"),
            ],
        })
        .await?;
    println!("✓ Created 2 recipes");

    let cost = db.bom().cost(&cookies.recipe.id, Quantity::from(40)).await?;
    println!(
        "  40 packs of cookies cost {} ({} per pack)",
        cost.total_cost, cost.unit_cost
    );

    // One order part way through
    let order = db
        .production()
        .create(
            &NewProductionOrder {
                recipe_id: cookies.recipe.id.clone(),
                quantity: Quantity::from(40),
                planned_start: Utc::now().date_naive(),
                priority: Priority::High,
                assigned_to: Some("line-1".to_string()),
                notes: None,
                batch_number: Some("B-0001".to_string()),
            },
            ACTOR,
        )
        .await?;

    db.production()
        .record_output(&order.id, &OutputRecord::new(Quantity::from(10), "ana"))
        .await?;
    db.production()
        .record_output(
            &order.id,
            &OutputRecord::new(Quantity::from(10), "ben").quality_note("two packs underbaked"),
        )
        .await?;

    let progress = db.production().progress(&order.id).await?;
    println!(
        "✓ Order {} at {}% ({} of {})",
        order.batch_number.as_deref().unwrap_or(&order.id),
        progress.percent_complete,
        progress.completed_quantity,
        progress.requested_quantity
    );

    let low = db.items().list_low_stock().await?;
    for item in &low {
        println!("  Low stock: {} at {} {}", item.sku, item.current_stock, item.unit);
    }

    info!(elapsed = ?start.elapsed(), "Seed complete");
    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
