//! Region entity - a service area; masters only see orders in their own region.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Region database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "regions")]
pub struct Model {
    /// Unique identifier for the region
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-readable region name
    pub name: String,
}

/// Defines relationships between Region and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A region contains many addresses
    #[sea_orm(has_many = "super::address::Entity")]
    Address,
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
