//! Telegram group chat registered with the bot under a shareable code.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Telegram chat database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "telegram_chats")]
pub struct Model {
    /// Code users enter to link the chat
    #[sea_orm(primary_key, auto_increment = false)]
    pub chat_uuid: String,
    /// Telegram's chat id
    pub telegram_chat_id: i64,
    /// Chat title at registration time
    pub title: Option<String>,
}

/// Defines relationships between the chat and its user links
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Users that linked this chat
    #[sea_orm(has_many = "super::user_chat::Entity")]
    UserChat,
}

impl Related<super::user_chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserChat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
