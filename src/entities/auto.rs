//! Auto entity - a truck or trailer attached to orders.
//!
//! At most one unmerged record exists per VIN and per plate number. When an
//! update collides with another record the updated one is flagged `is_merged`
//! and `merged_to_id` points at the survivor; readers follow that pointer.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of vehicle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoKind {
    /// Tractor unit
    #[sea_orm(string_value = "TRUCK")]
    Truck,
    /// Trailer or semi-trailer
    #[sea_orm(string_value = "TRAILER")]
    Trailer,
}

/// Auto database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "autos")]
pub struct Model {
    /// Unique identifier for the vehicle
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Fleet owner, if known
    pub customer_id: Option<i64>,
    /// Last known driver
    pub driver_id: Option<i64>,
    /// Manufacturer
    pub brand: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Vehicle identification number
    #[sea_orm(indexed)]
    pub vin: Option<String>,
    /// Plate number
    #[sea_orm(indexed)]
    pub number: Option<String>,
    /// Truck or trailer
    pub kind: AutoKind,
    /// Set once this record has been folded into another one
    pub is_merged: bool,
    /// Surviving record when `is_merged` is set
    pub merged_to_id: Option<i64>,
}

/// Defines relationships between Auto and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Order links referencing this vehicle
    #[sea_orm(has_many = "super::order_auto::Entity")]
    OrderAuto,
}

impl Related<super::order_auto::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderAuto.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
