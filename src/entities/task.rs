//! Task entity - an itemized piece of work on one vehicle of an order.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Task database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    /// Unique identifier for the task
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Order the work belongs to
    #[sea_orm(indexed)]
    pub order_id: i64,
    /// Vehicle the work is done on
    pub auto_id: i64,
    /// Short name of the work
    pub name: String,
    /// Details
    pub description: Option<String>,
    /// Price in kopecks
    pub price: Option<i64>,
    /// When the task was created
    pub created_at: DateTimeUtc,
    /// When the task last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Task and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each task belongs to one order
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    /// Each task is about one vehicle
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
