//! Database configuration module.
//!
//! Handles connecting to the store and creating every table from the entity
//! definitions with `SeaORM`'s `Schema::create_table_from_entity`. Column-level
//! indexes come from the `indexed` attributes on the entities; composite unique
//! indexes that back the set semantics of the link tables are declared here.

use crate::entities::{
    Address, Auto, Order, OrderAuto, OrderDeclinedMaster, OrderMessage, OrderStatusChange,
    Region, StaleOrderNotice, Task, TelegramChat, User, UserChat, UserInfoChange, order_auto,
    order_declined_master, order_message, stale_order_notice, user_chat,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};

/// Default local `SQLite` file used when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://gruzhub.sqlite?mode=rwc";

/// Establishes a connection to the given database.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options.sqlx_logging(false);

    Database::connect(options).await.map_err(Into::into)
}

async fn create_entity_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(builder.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(builder.build(&index)).await?;
    }
    Ok(())
}

fn composite_unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("idx_order_autos_order_auto")
            .table(OrderAuto)
            .col(order_auto::Column::OrderId)
            .col(order_auto::Column::AutoId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_order_declined_masters_order_master")
            .table(OrderDeclinedMaster)
            .col(order_declined_master::Column::OrderId)
            .col(order_declined_master::Column::MasterId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_order_messages_order_guarantee")
            .table(OrderMessage)
            .col(order_message::Column::OrderId)
            .col(order_message::Column::GuaranteeId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_user_chats_user_chat")
            .table(UserChat)
            .col(user_chat::Column::UserId)
            .col(user_chat::Column::ChatUuid)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_stale_order_notices_order_time")
            .table(StaleOrderNotice)
            .col(stale_order_notice::Column::OrderId)
            .col(stale_order_notice::Column::StatusUpdateTime)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

/// Creates all tables and indexes. Safe to run against an existing schema.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_entity_table(db, &schema, Region).await?;
    create_entity_table(db, &schema, Address).await?;
    create_entity_table(db, &schema, User).await?;
    create_entity_table(db, &schema, UserInfoChange).await?;
    create_entity_table(db, &schema, TelegramChat).await?;
    create_entity_table(db, &schema, UserChat).await?;
    create_entity_table(db, &schema, Auto).await?;
    create_entity_table(db, &schema, Order).await?;
    create_entity_table(db, &schema, OrderAuto).await?;
    create_entity_table(db, &schema, OrderDeclinedMaster).await?;
    create_entity_table(db, &schema, OrderStatusChange).await?;
    create_entity_table(db, &schema, Task).await?;
    create_entity_table(db, &schema, OrderMessage).await?;
    create_entity_table(db, &schema, StaleOrderNotice).await?;

    for index in composite_unique_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{OrderModel, UserModel};
    use sea_orm::QuerySelect;

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        let _: Vec<UserModel> = User::find().limit(1).all(&db).await?;
        let _: Vec<OrderModel> = Order::find().limit(1).all(&db).await?;
        let _ = OrderDeclinedMaster::find().limit(1).all(&db).await?;
        let _ = StaleOrderNotice::find().limit(1).all(&db).await?;
        let _ = OrderMessage::find().limit(1).all(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }

    #[test]
    fn test_default_database_url() {
        assert!(DEFAULT_DATABASE_URL.starts_with("sqlite://"));
    }
}
