//! Record of an admin notice about an order stuck in CREATED.
//!
//! Unique on (order, status time) so each idle period is reported once.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stale order notice database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stale_order_notices")]
pub struct Model {
    /// Unique identifier for the notice
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Reported order
    pub order_id: i64,
    /// Order's `last_status_update_time` when it was reported
    pub status_update_time: DateTimeUtc,
    /// When the notice was queued
    pub notified_at: DateTimeUtc,
}

/// Defines relationships between the notice and its order
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Notice belongs to an order
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
