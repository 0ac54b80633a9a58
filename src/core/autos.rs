//! Vehicle deduplication registry.
//!
//! Vehicles are identified by VIN, then by plate number. Writes that collide with
//! another unmerged record fold into it: the written record is flagged merged with
//! a pointer to the survivor, the survivor inherits a missing driver or customer,
//! and every order and task link is moved over.
//!
//! None of these functions open a transaction; callers run them inside one so a
//! merge and its relinking commit together.

use crate::{
    entities::{Auto, AutoKind, OrderAuto, Task, auto, order_auto, task},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*, sea_query::Expr};
use tracing::info;

/// Longest merge-pointer chain followed before giving up.
const MAX_MERGE_HOPS: usize = 32;

/// Vehicle data as submitted by a client; empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoCandidate {
    /// Manufacturer
    pub brand: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Vehicle identification number
    pub vin: Option<String>,
    /// Plate number
    pub number: Option<String>,
    /// Truck or trailer; new records default to a truck
    pub kind: Option<AutoKind>,
    /// Fleet owner
    pub customer_id: Option<i64>,
    /// Driver
    pub driver_id: Option<i64>,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl AutoCandidate {
    fn vin(&self) -> Option<&str> {
        present(self.vin.as_ref())
    }

    fn number(&self) -> Option<&str> {
        present(self.number.as_ref())
    }
}

/// Fetches a vehicle by id without following merge pointers.
pub async fn get_auto<C>(db: &C, auto_id: i64) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    Auto::find_by_id(auto_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Auto", auto_id))
}

/// Fetches a vehicle, following merge pointers to the surviving record.
pub async fn resolve<C>(db: &C, auto_id: i64) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    let mut current = get_auto(db, auto_id).await?;
    for _ in 0..MAX_MERGE_HOPS {
        match (current.is_merged, current.merged_to_id) {
            (true, Some(target)) => current = get_auto(db, target).await?,
            _ => return Ok(current),
        }
    }
    Err(Error::internal(format!(
        "Merge chain starting at auto {auto_id} is too long"
    )))
}

async fn find_unmerged_by<C>(
    db: &C,
    column: auto::Column,
    value: &str,
    exclude_id: Option<i64>,
) -> Result<Option<auto::Model>>
where
    C: ConnectionTrait,
{
    let mut query = Auto::find()
        .filter(column.eq(value))
        .filter(auto::Column::IsMerged.eq(false));
    if let Some(exclude_id) = exclude_id {
        query = query.filter(auto::Column::Id.ne(exclude_id));
    }
    query
        .order_by_asc(auto::Column::Id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds an unmerged vehicle with the same VIN, or failing that the same number.
async fn find_original<C>(
    db: &C,
    candidate: &AutoCandidate,
    exclude_id: Option<i64>,
) -> Result<Option<auto::Model>>
where
    C: ConnectionTrait,
{
    if let Some(vin) = candidate.vin() {
        if let Some(found) = find_unmerged_by(db, auto::Column::Vin, vin, exclude_id).await? {
            return Ok(Some(found));
        }
    }
    if let Some(number) = candidate.number() {
        return find_unmerged_by(db, auto::Column::Number, number, exclude_id).await;
    }
    Ok(None)
}

/// Returns the existing vehicle matching the candidate, updated with its data,
/// or inserts a new one.
pub async fn create_or_get<C>(db: &C, candidate: AutoCandidate) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = find_original(db, &candidate, None).await? {
        return update_auto(db, existing.id, candidate).await;
    }

    let created = auto::ActiveModel {
        customer_id: Set(candidate.customer_id),
        driver_id: Set(candidate.driver_id),
        brand: Set(present(candidate.brand.as_ref()).map(str::to_string)),
        model: Set(present(candidate.model.as_ref()).map(str::to_string)),
        vin: Set(candidate.vin().map(str::to_string)),
        number: Set(candidate.number().map(str::to_string)),
        kind: Set(candidate.kind.unwrap_or(AutoKind::Truck)),
        is_merged: Set(false),
        merged_to_id: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}

/// Applies changes to a vehicle, merging it into another record on VIN or number collision.
///
/// Returns the surviving record.
pub async fn update_auto<C>(db: &C, auto_id: i64, changes: AutoCandidate) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    let existing = resolve(db, auto_id).await?;

    let target = match find_original(db, &changes, Some(existing.id)).await? {
        Some(original) => merge_into(db, existing, original).await?,
        None => existing,
    };

    let mut model: auto::ActiveModel = target.clone().into();
    if let Some(customer_id) = changes.customer_id {
        model.customer_id = Set(Some(customer_id));
    }
    if let Some(driver_id) = changes.driver_id {
        model.driver_id = Set(Some(driver_id));
    }
    if let Some(brand) = present(changes.brand.as_ref()) {
        model.brand = Set(Some(brand.to_string()));
    }
    if let Some(model_name) = present(changes.model.as_ref()) {
        model.model = Set(Some(model_name.to_string()));
    }
    if let Some(vin) = changes.vin() {
        model.vin = Set(Some(vin.to_string()));
    }
    if let Some(number) = changes.number() {
        model.number = Set(Some(number.to_string()));
    }
    if let Some(kind) = changes.kind {
        model.kind = Set(kind);
    }
    if !model.is_changed() {
        return Ok(target);
    }
    model.update(db).await.map_err(Into::into)
}

/// Folds `duplicate` into `original` and returns the updated original.
async fn merge_into<C>(
    db: &C,
    duplicate: auto::Model,
    original: auto::Model,
) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    let duplicate_id = duplicate.id;
    let original_id = original.id;

    let backfill_driver = duplicate.driver_id.filter(|_| original.driver_id.is_none());
    let backfill_customer = duplicate
        .customer_id
        .filter(|_| original.customer_id.is_none());

    let mut merged: auto::ActiveModel = duplicate.into();
    merged.is_merged = Set(true);
    merged.merged_to_id = Set(Some(original_id));
    merged.update(db).await?;

    let survivor = if backfill_driver.is_some() || backfill_customer.is_some() {
        let mut model: auto::ActiveModel = original.into();
        if let Some(driver_id) = backfill_driver {
            model.driver_id = Set(Some(driver_id));
        }
        if let Some(customer_id) = backfill_customer {
            model.customer_id = Set(Some(customer_id));
        }
        model.update(db).await?
    } else {
        original
    };

    relink(db, duplicate_id, original_id).await?;
    info!(duplicate_id, original_id, "Merged duplicate auto");
    Ok(survivor)
}

/// Moves order and task links from the merged vehicle to the survivor.
///
/// An order that already lists the survivor just loses the duplicate entry;
/// otherwise the entry keeps its position and points at the survivor.
async fn relink<C>(db: &C, duplicate_id: i64, original_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let links = OrderAuto::find()
        .filter(order_auto::Column::AutoId.eq(duplicate_id))
        .all(db)
        .await?;

    for link in links {
        let already_linked = OrderAuto::find()
            .filter(order_auto::Column::OrderId.eq(link.order_id))
            .filter(order_auto::Column::AutoId.eq(original_id))
            .one(db)
            .await?
            .is_some();

        if already_linked {
            link.delete(db).await?;
        } else {
            let mut model: order_auto::ActiveModel = link.into();
            model.auto_id = Set(original_id);
            model.update(db).await?;
        }
    }

    Task::update_many()
        .col_expr(task::Column::AutoId, Expr::value(original_id))
        .filter(task::Column::AutoId.eq(duplicate_id))
        .exec(db)
        .await?;

    Ok(())
}
