//! Role-scoped reads of orders and their sub-resources.
//!
//! Who sees what:
//! - drivers and customers see orders they own,
//! - masters see their own orders and CREATED orders they were never removed from,
//! - admins see everything.

use crate::{
    core::{
        autos::{self, AutoCandidate},
        order_repository::{self, OrderFilter, OrderLoad, OrderView},
        users,
    },
    entities::{OrderStatus, UserRole, auto, order_status_change, user, user_info_change},
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, TransactionTrait, prelude::*};
use tracing::info;

/// Listing parameters; only admins may use the participant filters.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Allowed statuses
    pub statuses: Option<Vec<OrderStatus>>,
    /// Orders of this master
    pub master_id: Option<i64>,
    /// Orders of this customer
    pub customer_id: Option<i64>,
    /// Orders of this driver
    pub driver_id: Option<i64>,
    /// Orders listing this vehicle
    pub auto_id: Option<i64>,
    /// Orders in these regions
    pub region_ids: Option<Vec<i64>>,
    /// Orders this user takes part in
    pub user_id: Option<i64>,
    /// Maximum number of orders
    pub limit: Option<u64>,
}

async fn master_region<C>(db: &C, master: &user::Model) -> Result<i64>
where
    C: ConnectionTrait,
{
    users::region_of(db, master)
        .await?
        .ok_or_else(|| Error::forbidden("Master has no address"))
}

/// Orders visible to the actor.
pub async fn get_orders<C>(db: &C, actor: &user::Model, query: OrderQuery) -> Result<Vec<OrderView>>
where
    C: ConnectionTrait,
{
    let filter = match actor.role {
        UserRole::Driver => OrderFilter {
            statuses: query.statuses,
            driver_id: Some(actor.id),
            limit: query.limit,
            ..OrderFilter::default()
        },
        UserRole::Customer => OrderFilter {
            statuses: query.statuses,
            customer_id: Some(actor.id),
            limit: query.limit,
            ..OrderFilter::default()
        },
        UserRole::Master => {
            let region_id = master_region(db, actor).await?;
            return order_repository::list_for_master(
                db,
                actor.id,
                region_id,
                query.statuses,
                query.limit,
                OrderLoad::LISTING,
            )
            .await;
        }
        UserRole::Admin => OrderFilter {
            statuses: query.statuses,
            driver_id: query.driver_id,
            customer_id: query.customer_id,
            master_id: query.master_id,
            participant_id: query.user_id,
            region_ids: query.region_ids,
            auto_id: query.auto_id,
            limit: query.limit,
        },
    };
    order_repository::list(db, filter, OrderLoad::LISTING).await
}

/// Whether the actor may read the order.
///
/// `view` must carry the declined set.
#[must_use]
pub fn can_read(actor: &user::Model, view: &OrderView) -> bool {
    let order = &view.order;
    match actor.role {
        UserRole::Admin => true,
        UserRole::Master => {
            !view.declined_master_ids.contains(&actor.id)
                && (order.master_id == Some(actor.id) || order.status == OrderStatus::Created)
        }
        UserRole::Driver | UserRole::Customer => order.is_owner(actor.id),
    }
}

/// Fetches one order with every relation, if the actor may read it.
pub async fn get_order<C>(db: &C, actor: &user::Model, order_id: i64) -> Result<OrderView>
where
    C: ConnectionTrait,
{
    let view = order_repository::find(db, order_id, OrderLoad::FULL).await?;
    if !can_read(actor, &view) {
        return Err(Error::forbidden("No access to this order"));
    }
    Ok(view)
}

/// Status history of an order, oldest first.
///
/// Open to participants and admins, and to any master while the order is CREATED.
pub async fn status_history<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
) -> Result<Vec<order_status_change::Model>>
where
    C: ConnectionTrait,
{
    let order = order_repository::find_model(db, order_id).await?;
    let master_on_open_order =
        actor.role == UserRole::Master && order.status == OrderStatus::Created;
    if !master_on_open_order && !order.is_participant(actor.id) && !actor.is_admin() {
        return Err(Error::forbidden("No access to this order's history"));
    }
    order_repository::history(db, order_id).await
}

/// Profile change history of a user, read through an order both take part in.
pub async fn user_info_changes<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
    user_id: i64,
) -> Result<Vec<user_info_change::Model>>
where
    C: ConnectionTrait,
{
    let order = order_repository::find_model(db, order_id).await?;
    let both_in_order = order.is_participant(actor.id) && order.is_participant(user_id);
    if !both_in_order && !actor.is_admin() {
        return Err(Error::forbidden("No access to this user's history"));
    }
    users::user_info_changes(db, user_id).await
}

/// Checks that the actor may read the order and that the vehicle is on it or
/// belongs to the actor. Returns the vehicle with merge pointers followed.
async fn authorize_order_auto<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
    auto_id: i64,
) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    let auto = autos::resolve(db, auto_id).await?;
    if actor.is_admin() {
        return Ok(auto);
    }

    let view = order_repository::find(
        db,
        order_id,
        OrderLoad {
            autos: true,
            declined: true,
            ..OrderLoad::BARE
        },
    )
    .await?;
    if !can_read(actor, &view) {
        return Err(Error::forbidden("No access to this order"));
    }

    let in_order = view.autos.iter().any(|listed| listed.id == auto.id);
    let owns_auto = auto.driver_id == Some(actor.id) || auto.customer_id == Some(actor.id);
    if !in_order && !owns_auto {
        return Err(Error::forbidden("Vehicle is not part of this order"));
    }
    Ok(auto)
}

/// A vehicle of an order.
pub async fn get_order_auto<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
    auto_id: i64,
) -> Result<auto::Model>
where
    C: ConnectionTrait,
{
    authorize_order_auto(db, actor, order_id, auto_id).await
}

/// Edits the descriptive fields of an order's vehicle, merging it into a known
/// vehicle on VIN or number collision. Returns the surviving vehicle.
pub async fn update_order_auto(
    db: &DatabaseConnection,
    actor: &user::Model,
    order_id: i64,
    auto_id: i64,
    changes: AutoCandidate,
) -> Result<auto::Model> {
    let current = authorize_order_auto(db, actor, order_id, auto_id).await?;
    let changes = AutoCandidate {
        brand: changes.brand,
        model: changes.model,
        vin: changes.vin,
        number: changes.number,
        kind: changes.kind,
        ..AutoCandidate::default()
    };

    let txn = db.begin().await?;
    let survivor = autos::update_auto(&txn, current.id, changes).await?;
    txn.commit().await?;

    if survivor.id != current.id {
        info!(order_id, from = current.id, to = survivor.id, "Order vehicle merged");
    }
    Ok(survivor)
}

/// Orders listing a vehicle; open to its driver, its customer and admins.
pub async fn get_auto_orders<C>(db: &C, actor: &user::Model, auto_id: i64) -> Result<Vec<OrderView>>
where
    C: ConnectionTrait,
{
    let auto = autos::resolve(db, auto_id).await?;
    let owns_auto = auto.driver_id == Some(actor.id) || auto.customer_id == Some(actor.id);
    if !owns_auto && !actor.is_admin() {
        return Err(Error::forbidden("No access to this vehicle"));
    }
    order_repository::list(
        db,
        OrderFilter {
            auto_id: Some(auto.id),
            ..OrderFilter::default()
        },
        OrderLoad::LISTING,
    )
    .await
}
