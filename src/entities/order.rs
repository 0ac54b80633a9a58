//! Order entity - the aggregate root of the workflow.
//!
//! Status moves along `CREATED → CALCULATING → REVIEWING → ACCEPTED → COMPLETED`,
//! with `CANCEL` reachable from any non-terminal state and a back-transition to
//! `CREATED` when the master is removed. `master_id` is set only while the status
//! is one of the master-held states. Orders are never deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Waiting for a master
    #[sea_orm(string_value = "CREATED")]
    Created,
    /// A master took the order and is pricing the work
    #[sea_orm(string_value = "CALCULATING")]
    Calculating,
    /// The owner is reviewing the master's estimate
    #[sea_orm(string_value = "REVIEWING")]
    Reviewing,
    /// The owner accepted the estimate
    #[sea_orm(string_value = "ACCEPTED")]
    Accepted,
    /// Work is done
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Order was cancelled
    #[sea_orm(string_value = "CANCEL")]
    Cancel,
}

impl OrderStatus {
    /// Listing order: earlier lifecycle stages first.
    pub const PRIORITY: [Self; 6] = [
        Self::Created,
        Self::Calculating,
        Self::Reviewing,
        Self::Accepted,
        Self::Completed,
        Self::Cancel,
    ];

    /// Statuses in which a master is assigned and still working.
    pub const IN_PROGRESS: [Self; 3] = [Self::Calculating, Self::Reviewing, Self::Accepted];

    /// `COMPLETED` and `CANCEL` admit no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancel)
    }
}

/// Order database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Unique identifier for the order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client-generated idempotency key
    #[sea_orm(unique)]
    pub guarantee_id: String,
    /// Fleet owner, if the order was placed by or for one
    pub customer_id: Option<i64>,
    /// Driver; always resolved at creation
    pub driver_id: i64,
    /// Assigned master
    #[sea_orm(indexed)]
    pub master_id: Option<i64>,
    /// Breakdown location
    pub address_id: i64,
    /// Current lifecycle status
    #[sea_orm(indexed)]
    pub status: OrderStatus,
    /// Free-form problem description
    pub description: String,
    /// Extra notes
    pub notes: Option<String>,
    /// Urgency label chosen by the client
    pub urgency: Option<String>,
    /// Vehicle needs towing
    pub need_evacuator: bool,
    /// On-site repair crew requested
    pub need_mobile_team: bool,
    /// When the order was created
    pub created_at: DateTimeUtc,
    /// When any field last changed
    pub updated_at: DateTimeUtc,
    /// When the status last changed
    #[sea_orm(indexed)]
    pub last_status_update_time: DateTimeUtc,
}

/// Defines relationships between Order and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each order happens at one address
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::AddressId",
        to = "super::address::Column::Id"
    )]
    Address,
    /// Vehicle links
    #[sea_orm(has_many = "super::order_auto::Entity")]
    OrderAuto,
    /// Masters removed from this order
    #[sea_orm(has_many = "super::order_declined_master::Entity")]
    DeclinedMaster,
    /// Status history
    #[sea_orm(has_many = "super::order_status_change::Entity")]
    StatusChange,
    /// Work items
    #[sea_orm(has_many = "super::task::Entity")]
    Task,
    /// Chat messages
    #[sea_orm(has_many = "super::order_message::Entity")]
    Message,
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl Related<super::order_auto::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderAuto.def()
    }
}

impl Related<super::order_declined_master::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeclinedMaster.def()
    }
}

impl Related<super::order_status_change::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusChange.def()
    }
}

impl Related<super::task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Task.def()
    }
}

impl Related<super::order_message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the user is the order's driver or customer.
    #[must_use]
    pub fn is_owner(&self, user_id: i64) -> bool {
        self.driver_id == user_id || self.customer_id == Some(user_id)
    }

    /// Whether the user is an owner or the assigned master.
    #[must_use]
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.is_owner(user_id) || self.master_id == Some(user_id)
    }

    /// Driver and customer ids, deduplicated.
    #[must_use]
    pub fn owner_ids(&self) -> Vec<i64> {
        let mut ids = vec![self.driver_id];
        if let Some(customer_id) = self.customer_id {
            if customer_id != self.driver_id {
                ids.push(customer_id);
            }
        }
        ids
    }
}
