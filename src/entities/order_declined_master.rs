//! Declined-master set of an order.
//!
//! One row per (order, master) pair, enforced by a unique index; rows are never
//! removed, so a master declined once can never take the order again.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Declined master database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_declined_masters")]
pub struct Model {
    /// Unique identifier for the row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Order the master was removed from
    pub order_id: i64,
    /// Removed master
    pub master_id: i64,
    /// When the master was removed
    pub declined_at: DateTimeUtc,
}

/// Defines relationships between the row and the order
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Row belongs to an order
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
