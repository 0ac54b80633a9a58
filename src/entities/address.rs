//! Address entity - location of a breakdown or a master's base.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Address database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "addresses")]
pub struct Model {
    /// Unique identifier for the address
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Region the address belongs to
    #[sea_orm(indexed)]
    pub region_id: i64,
    /// City name
    pub city: Option<String>,
    /// Street and house
    pub street: Option<String>,
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
}

/// Defines relationships between Address and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each address lies in one region
    #[sea_orm(
        belongs_to = "super::region::Entity",
        from = "Column::RegionId",
        to = "super::region::Column::Id"
    )]
    Region,
}

impl Related<super::region::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Region.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
