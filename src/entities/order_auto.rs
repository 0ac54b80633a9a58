//! Order ↔ Auto link table. `position` keeps the vehicles in the order the client listed them.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Order-auto link database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_autos")]
pub struct Model {
    /// Unique identifier for the link
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Linked order
    pub order_id: i64,
    /// Linked vehicle
    pub auto_id: i64,
    /// Zero-based position within the order
    pub position: i32,
}

/// Defines relationships between the link and its ends
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Link belongs to an order
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    /// Link points at a vehicle
    #[sea_orm(
        belongs_to = "super::auto::Entity",
        from = "Column::AutoId",
        to = "super::auto::Column::Id"
    )]
    Auto,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::auto::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Auto.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
