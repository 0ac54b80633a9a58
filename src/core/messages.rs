//! Order chat - messages exchanged between the participants of one order.
//!
//! Sends are idempotent per order on the client's guarantee id: resending the
//! same id returns the stored message and leaves its text untouched.

use crate::{
    core::order_repository,
    entities::{OrderMessage, order, order_message, user},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*, sea_query::OnConflict};
use tracing::info;

/// Longest message body accepted, in characters
pub const MAX_MESSAGE_CHARS: usize = 10_000;

fn validate(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::invalid_state("Message text cannot be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(Error::invalid_state("Message text is too long"));
    }
    Ok(text)
}

/// Loads the order and checks the actor may use its chat.
async fn chat_of<C>(db: &C, actor: &user::Model, order_id: i64) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    let order = order_repository::find_model(db, order_id).await?;
    if !order.is_participant(actor.id) && !actor.is_admin() {
        return Err(Error::forbidden("No access to this order's chat"));
    }
    Ok(order)
}

async fn find_by_guarantee_id<C>(
    db: &C,
    order_id: i64,
    guarantee_id: &str,
) -> Result<Option<order_message::Model>>
where
    C: ConnectionTrait,
{
    OrderMessage::find()
        .filter(order_message::Column::OrderId.eq(order_id))
        .filter(order_message::Column::GuaranteeId.eq(guarantee_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Posts a message to the order's chat, or returns the one already stored
/// under `guarantee_id`.
pub async fn send_message<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
    guarantee_id: &str,
    text: &str,
) -> Result<order_message::Model>
where
    C: ConnectionTrait,
{
    let order = chat_of(db, actor, order_id).await?;
    if guarantee_id.trim().is_empty() {
        return Err(Error::invalid_state("Guarantee id cannot be empty"));
    }
    if let Some(existing) = find_by_guarantee_id(db, order.id, guarantee_id).await? {
        return Ok(existing);
    }
    let text = validate(text)?;

    let message = order_message::ActiveModel {
        guarantee_id: Set(guarantee_id.to_string()),
        order_id: Set(order.id),
        user_id: Set(actor.id),
        user_role: Set(actor.role),
        text: Set(text.to_string()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    // A concurrent send with the same key loses here and reads the winner.
    let inserted = OrderMessage::insert(message)
        .on_conflict(
            OnConflict::columns([
                order_message::Column::OrderId,
                order_message::Column::GuaranteeId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    let stored = find_by_guarantee_id(db, order.id, guarantee_id)
        .await?
        .ok_or_else(|| Error::internal("Sent message disappeared"))?;
    if inserted > 0 {
        info!(message_id = stored.id, order_id = order.id, user_id = actor.id, "Message sent");
    }
    Ok(stored)
}

/// Messages of an order's chat, oldest first.
pub async fn list_messages<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
) -> Result<Vec<order_message::Model>>
where
    C: ConnectionTrait,
{
    let order = chat_of(db, actor, order_id).await?;
    OrderMessage::find()
        .filter(order_message::Column::OrderId.eq(order.id))
        .order_by_asc(order_message::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
