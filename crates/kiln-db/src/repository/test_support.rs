//! Fixtures shared by the repository tests.

use kiln_core::{
    Item, ItemKind, NewItem, NewLedgerEntry, NewRecipe, NewRecipeLine, Quantity,
    RecipeWithLines, TransactionKind,
};

use crate::{Database, DbConfig};

pub(crate) const ACTOR: &str = "tester";

pub(crate) async fn setup() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// Inserts an item and, when `stock` is positive, purchases it in.
pub(crate) async fn stocked_item(
    db: &Database,
    sku: &str,
    kind: ItemKind,
    stock: Quantity,
    unit_cost_cents: i64,
) -> Item {
    let item = db
        .items()
        .insert(&NewItem {
            sku: sku.to_string(),
            name: sku.to_lowercase(),
            kind,
            category: Some(match kind {
                ItemKind::RawMaterial => "raw".to_string(),
                ItemKind::FinishedGood => "finished".to_string(),
            }),
            unit: "kg".to_string(),
            unit_cost_cents,
            min_stock: Quantity::ZERO,
        })
        .await
        .unwrap();

    if stock.is_positive() {
        db.ledger()
            .record(
                &NewLedgerEntry::new(&item.id, TransactionKind::Purchase, stock)
                    .unit_price_cents(unit_cost_cents),
                ACTOR,
            )
            .await
            .unwrap();
    }

    db.items().get_active(&item.id).await.unwrap()
}

pub(crate) async fn raw(db: &Database, sku: &str, stock: i64, unit_cost_cents: i64) -> Item {
    stocked_item(db, sku, ItemKind::RawMaterial, Quantity::from(stock), unit_cost_cents).await
}

pub(crate) async fn finished(db: &Database, sku: &str) -> Item {
    stocked_item(db, sku, ItemKind::FinishedGood, Quantity::ZERO, 0).await
}

/// The Cookies recipe: 10 packs from 2 kg of flour, no wastage.
///
/// Returns `(recipe, flour, cookies)` with flour stocked at `flour_stock`
/// and costing 2.50 per kg.
pub(crate) async fn cookies(db: &Database, flour_stock: i64) -> (RecipeWithLines, Item, Item) {
    let flour = raw(db, "FLOUR", flour_stock, 250).await;
    let cookies = finished(db, "COOKIES").await;

    let recipe = db
        .recipes()
        .create(&NewRecipe {
            name: "Cookies".to_string(),
            output_item_id: cookies.id.clone(),
            output_quantity: Quantity::from(10),
            output_unit: "pack".to_string(),
            lines: vec![NewRecipeLine::new(&flour.id, Quantity::from(2), "kg")],
        })
        .await
        .unwrap();

    (recipe, flour, cookies)
}

pub(crate) async fn stock_of(db: &Database, item: &Item) -> Quantity {
    db.items()
        .get_by_id(&item.id)
        .await
        .unwrap()
        .unwrap()
        .current_stock
}
