//! Order message entity - one line of the chat attached to an order.
use super::user::UserRole;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Order message database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_messages")]
pub struct Model {
    /// Unique identifier for the message
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client-chosen key; unique within the order
    pub guarantee_id: String,
    /// Order the chat belongs to
    #[sea_orm(indexed)]
    pub order_id: i64,
    /// Author
    pub user_id: i64,
    /// Author's role when the message was sent
    pub user_role: UserRole,
    /// Message body
    pub text: String,
    /// When the message was sent
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `OrderMessage` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each message belongs to one order
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    /// Each message has one author
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
