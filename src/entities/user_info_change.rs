//! User info change entity - audit row written whenever a profile changes.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User info change database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_info_changes")]
pub struct Model {
    /// Unique identifier for the change
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User whose profile changed
    #[sea_orm(indexed)]
    pub user_id: i64,
    /// Name before
    pub previous_name: String,
    /// Name after
    pub new_name: String,
    /// Phone before
    pub previous_phone: Option<String>,
    /// Phone after
    pub new_phone: Option<String>,
    /// Email before
    pub previous_email: Option<String>,
    /// Email after
    pub new_email: Option<String>,
    /// INN before
    pub previous_inn: Option<String>,
    /// INN after
    pub new_inn: Option<String>,
    /// When the change happened
    pub changed_at: DateTimeUtc,
}

/// Defines relationships between the change and its user
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Change belongs to a user
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
