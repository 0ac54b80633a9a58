//! User ↔ Telegram chat link; a set per user, unique on (user, chat).
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User chat link database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_chats")]
pub struct Model {
    /// Unique identifier for the link
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Linked user
    pub user_id: i64,
    /// Code of the linked chat
    pub chat_uuid: String,
}

/// Defines relationships between the link and its ends
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Link belongs to a user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    /// Link points at a chat
    #[sea_orm(
        belongs_to = "super::telegram_chat::Entity",
        from = "Column::ChatUuid",
        to = "super::telegram_chat::Column::ChatUuid"
    )]
    TelegramChat,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::telegram_chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TelegramChat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
