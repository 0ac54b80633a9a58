//! Order repository - persistence and queries for orders and their history.
//!
//! Reads come in two modes that are never combined:
//! - relation-loaded reads ([`find`], [`list`], ...) take an [`OrderLoad`] naming
//!   exactly which relations to hydrate, fetched in batches after the order rows;
//! - locked reads ([`lock`]) fetch the bare order row `FOR UPDATE` and are the only
//!   way the workflow obtains an order it is about to mutate.

use crate::{
    entities::{
        Address, Auto, Order, OrderAuto, OrderDeclinedMaster, OrderStatus, OrderStatusChange,
        User, address, auto, order, order_auto, order_declined_master, order_status_change, user,
    },
    errors::{Error, Result},
};
use sea_orm::{
    Condition, Order as SortOrder, QueryOrder, QuerySelect, QueryTrait, Set,
    prelude::*,
    sea_query::{CaseStatement, OnConflict, SimpleExpr},
};
use std::collections::{HashMap, HashSet};

/// Relations a read hydrates alongside the order row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderLoad {
    /// Driver, customer and master user records
    pub parties: bool,
    /// Breakdown address
    pub address: bool,
    /// Vehicles in position order, merge pointers followed
    pub autos: bool,
    /// Ids of masters removed from the order
    pub declined: bool,
}

impl OrderLoad {
    /// Order row only.
    pub const BARE: Self = Self {
        parties: false,
        address: false,
        autos: false,
        declined: false,
    };

    /// What authorization checks need: the declined set and the address for region checks.
    pub const ACCESS: Self = Self {
        parties: false,
        address: true,
        autos: false,
        declined: true,
    };

    /// Feed listings: everything a client renders in an order card.
    pub const LISTING: Self = Self {
        parties: true,
        address: true,
        autos: true,
        declined: false,
    };

    /// Everything.
    pub const FULL: Self = Self {
        parties: true,
        address: true,
        autos: true,
        declined: true,
    };
}

/// An order with the relations requested by its [`OrderLoad`].
///
/// Relations that were not requested are left empty.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderView {
    /// The order row
    pub order: order::Model,
    /// Driver
    pub driver: Option<user::Model>,
    /// Customer
    pub customer: Option<user::Model>,
    /// Assigned master
    pub master: Option<user::Model>,
    /// Breakdown address
    pub address: Option<address::Model>,
    /// Vehicles in position order
    pub autos: Vec<auto::Model>,
    /// Masters removed from the order, in removal order
    pub declined_master_ids: Vec<i64>,
}

impl OrderView {
    fn bare(order: order::Model) -> Self {
        Self {
            order,
            driver: None,
            customer: None,
            master: None,
            address: None,
            autos: Vec::new(),
            declined_master_ids: Vec::new(),
        }
    }

    /// Region of the breakdown address, if the address was loaded.
    #[must_use]
    pub fn region_id(&self) -> Option<i64> {
        self.address.as_ref().map(|address| address.region_id)
    }
}

/// Filters for [`list`]; unset fields do not restrict.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Allowed statuses
    pub statuses: Option<Vec<OrderStatus>>,
    /// Exact driver
    pub driver_id: Option<i64>,
    /// Exact customer
    pub customer_id: Option<i64>,
    /// Exact master
    pub master_id: Option<i64>,
    /// Any participant (driver, customer or master)
    pub participant_id: Option<i64>,
    /// Breakdown address in one of these regions
    pub region_ids: Option<Vec<i64>>,
    /// Order lists this vehicle
    pub auto_id: Option<i64>,
    /// Maximum number of orders
    pub limit: Option<u64>,
}

/// Fields of a new order row
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Client idempotency key
    pub guarantee_id: String,
    /// Fleet owner
    pub customer_id: Option<i64>,
    /// Driver
    pub driver_id: i64,
    /// Breakdown address
    pub address_id: i64,
    /// Problem description
    pub description: String,
    /// Extra notes
    pub notes: Option<String>,
    /// Urgency label
    pub urgency: Option<String>,
    /// Towing needed
    pub need_evacuator: bool,
    /// Mobile crew needed
    pub need_mobile_team: bool,
}

/// Inserts a CREATED order.
pub async fn insert<C>(db: &C, new_order: NewOrder) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    let now = chrono::Utc::now();
    order::ActiveModel {
        guarantee_id: Set(new_order.guarantee_id),
        customer_id: Set(new_order.customer_id),
        driver_id: Set(new_order.driver_id),
        master_id: Set(None),
        address_id: Set(new_order.address_id),
        status: Set(OrderStatus::Created),
        description: Set(new_order.description),
        notes: Set(new_order.notes),
        urgency: Set(new_order.urgency),
        need_evacuator: Set(new_order.need_evacuator),
        need_mobile_team: Set(new_order.need_mobile_team),
        created_at: Set(now),
        updated_at: Set(now),
        last_status_update_time: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Fetches the bare order row.
pub async fn find_model<C>(db: &C, order_id: i64) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))
}

/// Fetches the order row under an exclusive row lock held until the transaction ends.
pub async fn lock<C>(db: &C, order_id: i64) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    Order::find_by_id(order_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))
}

/// Fetches an order with the requested relations.
pub async fn find<C>(db: &C, order_id: i64, load: OrderLoad) -> Result<OrderView>
where
    C: ConnectionTrait,
{
    let model = find_model(db, order_id).await?;
    let mut views = hydrate(db, vec![model], load).await?;
    views
        .pop()
        .ok_or_else(|| Error::internal(format!("Order {order_id} vanished during load")))
}

/// Finds the order created under a client idempotency key.
pub async fn find_by_guarantee_id<C>(db: &C, guarantee_id: &str) -> Result<Option<order::Model>>
where
    C: ConnectionTrait,
{
    Order::find()
        .filter(order::Column::GuaranteeId.eq(guarantee_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Writes a new status, master and status timestamp onto a (locked) order.
pub async fn update_status<C>(
    db: &C,
    current: order::Model,
    status: OrderStatus,
    master_id: Option<i64>,
) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    let now = chrono::Utc::now();
    let mut model: order::ActiveModel = current.into();
    model.status = Set(status);
    model.master_id = Set(master_id);
    model.last_status_update_time = Set(now);
    model.updated_at = Set(now);
    model.update(db).await.map_err(Into::into)
}

/// Appends a row to the order's status history.
pub async fn append_history<C>(
    db: &C,
    order: &order::Model,
    updated_by: i64,
    comment: Option<String>,
) -> Result<order_status_change::Model>
where
    C: ConnectionTrait,
{
    order_status_change::ActiveModel {
        order_id: Set(order.id),
        status: Set(order.status),
        updated_by: Set(updated_by),
        master_id: Set(order.master_id),
        comment: Set(comment),
        created_at: Set(order.last_status_update_time),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Status history of an order, oldest first.
pub async fn history<C>(db: &C, order_id: i64) -> Result<Vec<order_status_change::Model>>
where
    C: ConnectionTrait,
{
    OrderStatusChange::find()
        .filter(order_status_change::Column::OrderId.eq(order_id))
        .order_by_asc(order_status_change::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Masters removed from the order, in removal order.
pub async fn declined_master_ids<C>(db: &C, order_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let rows = OrderDeclinedMaster::find()
        .filter(order_declined_master::Column::OrderId.eq(order_id))
        .order_by_asc(order_declined_master::Column::Id)
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|row| row.master_id).collect())
}

/// Whether the master was ever removed from the order.
pub async fn is_declined<C>(db: &C, order_id: i64, master_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(OrderDeclinedMaster::find()
        .filter(order_declined_master::Column::OrderId.eq(order_id))
        .filter(order_declined_master::Column::MasterId.eq(master_id))
        .one(db)
        .await?
        .is_some())
}

/// Adds the master to the declined set; adding twice is a no-op.
pub async fn add_declined_master<C>(db: &C, order_id: i64, master_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let row = order_declined_master::ActiveModel {
        order_id: Set(order_id),
        master_id: Set(master_id),
        declined_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    OrderDeclinedMaster::insert(row)
        .on_conflict(
            OnConflict::columns([
                order_declined_master::Column::OrderId,
                order_declined_master::Column::MasterId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Links vehicles to an order after any it already has, skipping duplicates.
pub async fn attach_autos<C>(db: &C, order_id: i64, auto_ids: &[i64]) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = auto_ids_of(db, order_id).await?;
    let mut seen: HashSet<i64> = existing.iter().copied().collect();
    let mut position = i32::try_from(existing.len())
        .map_err(|_| Error::internal(format!("Order {order_id} has too many autos")))?;

    let mut rows = Vec::new();
    for &auto_id in auto_ids {
        if !seen.insert(auto_id) {
            continue;
        }
        rows.push(order_auto::ActiveModel {
            order_id: Set(order_id),
            auto_id: Set(auto_id),
            position: Set(position),
            ..Default::default()
        });
        position += 1;
    }

    if !rows.is_empty() {
        OrderAuto::insert_many(rows).exec_without_returning(db).await?;
    }
    Ok(())
}

/// Vehicle ids linked to an order, in position order.
pub async fn auto_ids_of<C>(db: &C, order_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let links = OrderAuto::find()
        .filter(order_auto::Column::OrderId.eq(order_id))
        .order_by_asc(order_auto::Column::Position)
        .order_by_asc(order_auto::Column::Id)
        .all(db)
        .await?;
    Ok(links.into_iter().map(|link| link.auto_id).collect())
}

/// `CASE status WHEN 'CREATED' THEN 0 ... END`, lifecycle order for listings.
fn status_priority() -> SimpleExpr {
    let mut case = CaseStatement::new();
    for (status, rank) in OrderStatus::PRIORITY.iter().zip(0_i32..) {
        case = case.case(order::Column::Status.eq(*status), rank);
    }
    case.finally(i32::MAX).into()
}

fn region_condition(region_ids: Vec<i64>) -> SimpleExpr {
    order::Column::AddressId.in_subquery(
        Address::find()
            .select_only()
            .column(address::Column::Id)
            .filter(address::Column::RegionId.is_in(region_ids))
            .into_query(),
    )
}

async fn fetch_sorted<C>(
    db: &C,
    condition: Condition,
    limit: Option<u64>,
    load: OrderLoad,
) -> Result<Vec<OrderView>>
where
    C: ConnectionTrait,
{
    let mut query = Order::find()
        .filter(condition)
        .order_by(status_priority(), SortOrder::Asc)
        .order_by_desc(order::Column::Id);
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    let models = query.all(db).await?;
    hydrate(db, models, load).await
}

/// Filtered listing ordered by lifecycle stage, newest first within a stage.
pub async fn list<C>(db: &C, filter: OrderFilter, load: OrderLoad) -> Result<Vec<OrderView>>
where
    C: ConnectionTrait,
{
    let mut condition = Condition::all();
    if let Some(statuses) = filter.statuses.filter(|s| !s.is_empty()) {
        condition = condition.add(order::Column::Status.is_in(statuses));
    }
    if let Some(driver_id) = filter.driver_id {
        condition = condition.add(order::Column::DriverId.eq(driver_id));
    }
    if let Some(customer_id) = filter.customer_id {
        condition = condition.add(order::Column::CustomerId.eq(customer_id));
    }
    if let Some(master_id) = filter.master_id {
        condition = condition.add(order::Column::MasterId.eq(master_id));
    }
    if let Some(user_id) = filter.participant_id {
        condition = condition.add(
            Condition::any()
                .add(order::Column::DriverId.eq(user_id))
                .add(order::Column::CustomerId.eq(user_id))
                .add(order::Column::MasterId.eq(user_id)),
        );
    }
    if let Some(region_ids) = filter.region_ids.filter(|r| !r.is_empty()) {
        condition = condition.add(region_condition(region_ids));
    }
    if let Some(auto_id) = filter.auto_id {
        condition = condition.add(
            order::Column::Id.in_subquery(
                OrderAuto::find()
                    .select_only()
                    .column(order_auto::Column::OrderId)
                    .filter(order_auto::Column::AutoId.eq(auto_id))
                    .into_query(),
            ),
        );
    }

    fetch_sorted(db, condition, filter.limit, load).await
}

/// A master's feed: their own orders plus CREATED orders in their region they
/// have not been removed from.
///
/// With a status filter, own orders are restricted to it and the regional
/// CREATED orders are only included when CREATED is among the statuses.
pub async fn list_for_master<C>(
    db: &C,
    master_id: i64,
    region_id: i64,
    statuses: Option<Vec<OrderStatus>>,
    limit: Option<u64>,
    load: OrderLoad,
) -> Result<Vec<OrderView>>
where
    C: ConnectionTrait,
{
    let statuses = statuses.filter(|s| !s.is_empty());
    let include_regional = statuses
        .as_ref()
        .is_none_or(|s| s.contains(&OrderStatus::Created));

    let mut own = Condition::all().add(order::Column::MasterId.eq(master_id));
    if let Some(statuses) = statuses {
        own = own.add(order::Column::Status.is_in(statuses));
    }

    let mut condition = Condition::any().add(own);
    if include_regional {
        condition = condition.add(
            Condition::all()
                .add(order::Column::Status.eq(OrderStatus::Created))
                .add(region_condition(vec![region_id]))
                .add(
                    order::Column::Id.not_in_subquery(
                        OrderDeclinedMaster::find()
                            .select_only()
                            .column(order_declined_master::Column::OrderId)
                            .filter(order_declined_master::Column::MasterId.eq(master_id))
                            .into_query(),
                    ),
                ),
        );
    }

    fetch_sorted(db, condition, limit, load).await
}

/// CREATED orders whose status has not changed since `cutoff`.
pub async fn created_before<C>(db: &C, cutoff: DateTimeUtc) -> Result<Vec<order::Model>>
where
    C: ConnectionTrait,
{
    Order::find()
        .filter(order::Column::Status.eq(OrderStatus::Created))
        .filter(order::Column::LastStatusUpdateTime.lt(cutoff))
        .order_by_desc(order::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Orders a master is working on whose status has not changed since `cutoff`.
pub async fn in_progress_unchanged_since<C>(
    db: &C,
    cutoff: DateTimeUtc,
) -> Result<Vec<order::Model>>
where
    C: ConnectionTrait,
{
    Order::find()
        .filter(order::Column::Status.is_in(OrderStatus::IN_PROGRESS))
        .filter(order::Column::LastStatusUpdateTime.lt(cutoff))
        .order_by_desc(order::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Attaches the requested relations to a batch of orders, preserving their order.
pub async fn hydrate<C>(
    db: &C,
    models: Vec<order::Model>,
    load: OrderLoad,
) -> Result<Vec<OrderView>>
where
    C: ConnectionTrait,
{
    let mut views: Vec<OrderView> = models.into_iter().map(OrderView::bare).collect();
    if views.is_empty() || load == OrderLoad::BARE {
        return Ok(views);
    }
    let order_ids: Vec<i64> = views.iter().map(|v| v.order.id).collect();

    if load.parties {
        let user_ids: HashSet<i64> = views
            .iter()
            .flat_map(|v| {
                [Some(v.order.driver_id), v.order.customer_id, v.order.master_id]
                    .into_iter()
                    .flatten()
            })
            .collect();
        let users: HashMap<i64, user::Model> = User::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        for view in &mut views {
            view.driver = users.get(&view.order.driver_id).cloned();
            view.customer = view.order.customer_id.and_then(|id| users.get(&id).cloned());
            view.master = view.order.master_id.and_then(|id| users.get(&id).cloned());
        }
    }

    if load.address {
        let address_ids: HashSet<i64> = views.iter().map(|v| v.order.address_id).collect();
        let addresses: HashMap<i64, address::Model> = Address::find()
            .filter(address::Column::Id.is_in(address_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        for view in &mut views {
            view.address = addresses.get(&view.order.address_id).cloned();
        }
    }

    if load.autos {
        let links = OrderAuto::find()
            .filter(order_auto::Column::OrderId.is_in(order_ids.clone()))
            .order_by_asc(order_auto::Column::Position)
            .order_by_asc(order_auto::Column::Id)
            .all(db)
            .await?;
        let auto_ids: HashSet<i64> = links.iter().map(|l| l.auto_id).collect();
        let autos: HashMap<i64, auto::Model> = Auto::find()
            .filter(auto::Column::Id.is_in(auto_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut by_order: HashMap<i64, Vec<auto::Model>> = HashMap::new();
        for link in links {
            let Some(linked) = autos.get(&link.auto_id) else {
                continue;
            };
            let resolved = if linked.is_merged {
                crate::core::autos::resolve(db, linked.id).await?
            } else {
                linked.clone()
            };
            by_order.entry(link.order_id).or_default().push(resolved);
        }
        for view in &mut views {
            view.autos = by_order.remove(&view.order.id).unwrap_or_default();
        }
    }

    if load.declined {
        let rows = OrderDeclinedMaster::find()
            .filter(order_declined_master::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_declined_master::Column::Id)
            .all(db)
            .await?;
        let mut by_order: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            by_order.entry(row.order_id).or_default().push(row.master_id);
        }
        for view in &mut views {
            view.declined_master_ids = by_order.remove(&view.order.id).unwrap_or_default();
        }
    }

    Ok(views)
}
