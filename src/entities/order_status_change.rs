//! Order status change entity - append-only audit of every status transition.
//!
//! Ordered by id, the rows of an order replay its status history; the last row's
//! `status` always equals the order's current status.
use super::order::OrderStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status change database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_status_changes")]
pub struct Model {
    /// Unique identifier, also the replay order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Order whose status changed
    #[sea_orm(indexed)]
    pub order_id: i64,
    /// Status after the change
    pub status: OrderStatus,
    /// User who triggered the change
    pub updated_by: i64,
    /// Master assigned after the change
    pub master_id: Option<i64>,
    /// Reason given for declines and cancellations
    pub comment: Option<String>,
    /// When the change happened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between the change and its order
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Change belongs to an order
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
