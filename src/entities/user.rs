//! User entity - customers, drivers, masters and admins.
//!
//! A user's `balance` is the master's escrow account in kopecks; it is only ever
//! changed through [`crate::core::ledger`]. `password_epoch` is stamped into every
//! issued access token, so bumping it invalidates all of them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Role of a user in the marketplace
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    /// Fleet owner who orders assistance for their vehicles
    #[sea_orm(string_value = "CUSTOMER")]
    Customer,
    /// Driver of a vehicle in trouble
    #[sea_orm(string_value = "DRIVER")]
    Driver,
    /// Service provider who takes orders in their region
    #[sea_orm(string_value = "MASTER")]
    Master,
    /// Operator with access to everything
    #[sea_orm(string_value = "ADMIN")]
    Admin,
}

/// User database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Unique identifier for the user
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Marketplace role
    pub role: UserRole,
    /// Display name
    pub name: String,
    /// Login email; implicitly created drivers have none
    #[sea_orm(unique)]
    pub email: Option<String>,
    /// Contact phone, used to match drivers on order creation
    #[sea_orm(indexed)]
    pub phone: Option<String>,
    /// Taxpayer number
    pub inn: Option<String>,
    /// Balance in kopecks
    pub balance: i64,
    /// Home address; determines a master's region
    pub address_id: Option<i64>,
    /// Personal Telegram chat id, if the user linked the bot
    #[sea_orm(indexed)]
    pub telegram_id: Option<i64>,
    /// Milliseconds timestamp stamped into tokens
    pub password_epoch: i64,
    /// When the account was created
    pub registration_date: DateTimeUtc,
}

/// Defines relationships between User and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each user may have one home address
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::AddressId",
        to = "super::address::Column::Id"
    )]
    Address,
    /// Group chats linked to the user
    #[sea_orm(has_many = "super::user_chat::Entity")]
    UserChat,
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Address.def()
    }
}

impl Related<super::user_chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserChat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the user has the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
