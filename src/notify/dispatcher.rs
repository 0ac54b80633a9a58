//! Notification queue and dispatcher.
//!
//! Workflow operations publish [`Notification`]s onto a bounded channel after
//! their transaction commits. A single [`NotificationDispatcher`] task owns its
//! own database handle, resolves who should hear about each event, and sends one
//! message per destination. Delivery is best effort: failures are logged and
//! never reach the operation that published the event.

use crate::{
    core::{
        identity::TokenService,
        order_repository::{self, OrderLoad, OrderView},
        users,
    },
    entities::{UserRole, user},
    errors::Result,
    notify::messenger::{MessageLink, Messenger},
};
use sea_orm::DatabaseConnection;
use std::{collections::HashSet, sync::Arc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// A workflow event worth telling someone about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// New order: masters in its region and admins
    OrderCreated {
        /// Order id
        order_id: i64,
    },
    /// A master took the order: its owners
    OrderTaken {
        /// Order id
        order_id: i64,
    },
    /// Estimate ready: the owners
    SentForReview {
        /// Order id
        order_id: i64,
    },
    /// Estimate accepted: the master
    Accepted {
        /// Order id
        order_id: i64,
    },
    /// Order completed: whoever did not complete it
    Completed {
        /// Order id
        order_id: i64,
        /// Role of the user who completed it
        by: UserRole,
    },
    /// Master removed by a decline or cancellation: that master and admins
    MasterRemoved {
        /// Order id
        order_id: i64,
        /// Removed master, if the order had one
        master_id: Option<i64>,
        /// Whether the order was cancelled rather than returned to the pool
        cancelled: bool,
    },
    /// Order waited too long for a master: admins
    StaleOrder {
        /// Order id
        order_id: i64,
        /// How long it has been waiting
        idle_minutes: i64,
    },
}

impl Notification {
    /// Order the event is about.
    #[must_use]
    pub const fn order_id(&self) -> i64 {
        match self {
            Self::OrderCreated { order_id }
            | Self::OrderTaken { order_id }
            | Self::SentForReview { order_id }
            | Self::Accepted { order_id }
            | Self::Completed { order_id, .. }
            | Self::MasterRemoved { order_id, .. }
            | Self::StaleOrder { order_id, .. } => *order_id,
        }
    }
}

/// Sending half of the notification channel; cheap to clone
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Creates a queue holding up to `capacity` pending events.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueues an event without waiting. A full or closed queue drops it with a warning.
    pub fn publish(&self, notification: Notification) {
        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(?dropped, "Notification queue full, dropping event");
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!(?dropped, "Notification dispatcher stopped, dropping event");
            }
        }
    }
}

/// Message addressed to one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient
    pub user_id: i64,
    /// Message text
    pub text: String,
}

/// Resolves recipients and sends messages for queued notifications
pub struct NotificationDispatcher {
    db: DatabaseConnection,
    messenger: Arc<dyn Messenger>,
    tokens: TokenService,
    application_url: String,
}

impl NotificationDispatcher {
    /// Creates a dispatcher with its own connection handle.
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        messenger: Arc<dyn Messenger>,
        tokens: TokenService,
        application_url: String,
    ) -> Self {
        Self {
            db,
            messenger,
            tokens,
            application_url,
        }
    }

    /// Drains the queue until every sender is dropped.
    pub async fn run(self, mut receiver: mpsc::Receiver<Notification>) {
        info!("Notification dispatcher started");
        while let Some(notification) = receiver.recv().await {
            match self.dispatch(&notification).await {
                Ok(sent) => debug!(?notification, sent, "Notification dispatched"),
                Err(e) => error!(?notification, "Failed to dispatch notification: {e}"),
            }
        }
        info!("Notification dispatcher stopped");
    }

    /// Sends one notification; returns how many messages went out.
    pub async fn dispatch(&self, notification: &Notification) -> Result<usize> {
        let order_id = notification.order_id();
        let deliveries = self.plan(notification).await?;

        let mut sent = 0;
        for delivery in deliveries {
            sent += self.deliver(&delivery, order_id).await;
        }
        Ok(sent)
    }

    /// Works out who receives what for a notification.
    pub async fn plan(&self, notification: &Notification) -> Result<Vec<Delivery>> {
        let order = order_repository::find(&self.db, notification.order_id(), OrderLoad::ACCESS)
            .await?;
        let id = order.order.id;

        let deliveries = match *notification {
            Notification::OrderCreated { .. } => {
                let text = format!("New order #{id}");
                let mut recipients = Vec::new();
                if let Some(region_id) = order.region_id() {
                    recipients.extend(users::masters_in_region(&self.db, region_id).await?);
                }
                recipients.extend(users::admins(&self.db).await?);
                to_users(recipients.iter().map(|u| u.id), &text)
            }
            Notification::OrderTaken { .. } => {
                let master_name = self.master_name(&order).await?;
                let text = format!("Master {master_name} took order #{id} into work");
                to_users(order.order.owner_ids(), &text)
            }
            Notification::SentForReview { .. } => {
                let text = format!("Order #{id}: the master has prepared an estimate for review");
                to_users(order.order.owner_ids(), &text)
            }
            Notification::Accepted { .. } => {
                let text = format!("Order #{id}: the estimate was accepted");
                to_users(order.order.master_id, &text)
            }
            Notification::Completed { by, .. } => {
                let text = format!("Order #{id} was completed");
                match by {
                    UserRole::Master => to_users(order.order.owner_ids(), &text),
                    UserRole::Driver | UserRole::Customer => {
                        to_users(order.order.master_id, &text)
                    }
                    UserRole::Admin => to_users(
                        order.order.owner_ids().into_iter().chain(order.order.master_id),
                        &text,
                    ),
                }
            }
            Notification::MasterRemoved {
                master_id,
                cancelled,
                ..
            } => {
                let (master_text, admin_text) = if cancelled {
                    (
                        format!("Order #{id} was cancelled, the fee was returned to your balance"),
                        format!("Order #{id} was cancelled"),
                    )
                } else {
                    (
                        format!(
                            "You were removed from order #{id}, the fee was returned to your balance"
                        ),
                        format!("Order #{id} was returned to master search"),
                    )
                };
                let admins = users::admins(&self.db).await?;
                let mut deliveries = to_users(master_id, &master_text);
                deliveries.extend(to_users(admins.iter().map(|u| u.id), &admin_text));
                deliveries
            }
            Notification::StaleOrder { idle_minutes, .. } => {
                let text = format!(
                    "Order #{id} has been waiting for a master for more than {idle_minutes} minutes"
                );
                let admins = users::admins(&self.db).await?;
                to_users(admins.iter().map(|u| u.id), &text)
            }
        };

        Ok(dedup(deliveries))
    }

    async fn master_name(&self, order: &OrderView) -> Result<String> {
        match order.order.master_id {
            Some(master_id) => Ok(users::get_user(&self.db, master_id).await?.name),
            None => Ok("(unassigned)".to_string()),
        }
    }

    fn access_link(&self, user: &user::Model, order_id: i64) -> Option<MessageLink> {
        match self.tokens.issue(user) {
            Ok(token) => Some(MessageLink {
                label: "View".to_string(),
                url: format!(
                    "{}?userId={}&accessToken={token}&orderId={order_id}",
                    self.application_url, user.id
                ),
            }),
            Err(e) => {
                warn!(user_id = user.id, "Could not issue access link: {e}");
                None
            }
        }
    }

    /// Sends to the user's own chat and every chat linked to them; returns messages sent.
    async fn deliver(&self, delivery: &Delivery, order_id: i64) -> usize {
        let user = match users::get_user(&self.db, delivery.user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!(user_id = delivery.user_id, "Skipping recipient: {e}");
                return 0;
            }
        };

        let mut destinations: Vec<i64> = user.telegram_id.into_iter().collect();
        match users::linked_chat_ids(&self.db, user.id).await {
            Ok(chats) => destinations.extend(chats),
            Err(e) => warn!(user_id = user.id, "Could not load linked chats: {e}"),
        }
        let mut seen = HashSet::new();
        destinations.retain(|chat_id| seen.insert(*chat_id));
        if destinations.is_empty() {
            return 0;
        }

        let link = self.access_link(&user, order_id);
        let mut sent = 0;
        for chat_id in destinations {
            match self
                .messenger
                .send_message(chat_id, &delivery.text, link.as_ref())
                .await
            {
                Ok(()) => sent += 1,
                Err(e) => error!(user_id = user.id, chat_id, "Failed to send notification: {e}"),
            }
        }
        sent
    }
}

fn to_users(user_ids: impl IntoIterator<Item = i64>, text: &str) -> Vec<Delivery> {
    user_ids
        .into_iter()
        .map(|user_id| Delivery {
            user_id,
            text: text.to_string(),
        })
        .collect()
}

/// Keeps the first delivery for each user.
fn dedup(deliveries: Vec<Delivery>) -> Vec<Delivery> {
    let mut seen = HashSet::new();
    deliveries
        .into_iter()
        .filter(|d| seen.insert(d.user_id))
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::OrderStatus;
    use crate::test_utils::*;

    async fn dispatcher(
        db: &DatabaseConnection,
    ) -> (NotificationDispatcher, Arc<RecordingMessenger>) {
        let messenger = Arc::new(RecordingMessenger::default());
        let dispatcher = NotificationDispatcher::new(
            db.clone(),
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            test_token_service(),
            "https://app.example".to_string(),
        );
        (dispatcher, messenger)
    }

    #[test]
    fn test_dedup_keeps_first() {
        let deliveries = vec![
            Delivery {
                user_id: 1,
                text: "a".to_string(),
            },
            Delivery {
                user_id: 1,
                text: "b".to_string(),
            },
            Delivery {
                user_id: 2,
                text: "c".to_string(),
            },
        ];
        let result = dedup(deliveries);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "a");
    }

    #[tokio::test]
    async fn test_queue_drops_when_full() {
        let (queue, mut receiver) = NotificationQueue::new(1);
        queue.publish(Notification::OrderCreated { order_id: 1 });
        queue.publish(Notification::OrderCreated { order_id: 2 });
        drop(queue);

        assert_eq!(
            receiver.recv().await,
            Some(Notification::OrderCreated { order_id: 1 })
        );
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_order_created_reaches_region_masters_and_admins() -> Result<()> {
        let db = setup_test_db().await?;
        let moscow = create_test_region(&db, "Moscow").await?;
        let kazan = create_test_region(&db, "Kazan").await?;
        let local = create_test_master_with_telegram(&db, moscow.id, 0, 1001).await?;
        create_test_master_with_telegram(&db, kazan.id, 0, 1002).await?;
        let admin = create_test_admin(&db).await?;
        let order = create_test_order(&db, moscow.id, &[]).await?;

        let (dispatcher, _) = dispatcher(&db).await;
        let plan = dispatcher
            .plan(&Notification::OrderCreated { order_id: order.id })
            .await?;
        let recipients: Vec<i64> = plan.iter().map(|d| d.user_id).collect();
        assert_eq!(recipients, vec![local.id, admin.id]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delivery_uses_telegram_id_linked_chats_and_access_link() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master_with_telegram(&db, region.id, 0, 555).await?;
        users::register_chat(&db, "crew", -777, None).await?;
        users::link_chat(&db, master.id, "crew").await?;
        let order = create_test_order(&db, region.id, &[]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Reviewing).await?;

        let (dispatcher, messenger) = dispatcher(&db).await;
        let sent = dispatcher
            .dispatch(&Notification::Accepted { order_id: order.id })
            .await?;
        assert_eq!(sent, 2);

        let messages = messenger.messages();
        let chats: Vec<i64> = messages.iter().map(|m| m.chat_id).collect();
        assert_eq!(chats, vec![555, -777]);
        let url = messages[0].link.clone().unwrap();
        assert!(url.starts_with("https://app.example?userId="));
        assert!(url.ends_with(&format!("&orderId={}", order.id)));
        Ok(())
    }

    #[tokio::test]
    async fn test_chat_shared_with_telegram_id_gets_one_message() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master_with_telegram(&db, region.id, 0, 555).await?;
        users::register_chat(&db, "crew", -777, None).await?;
        users::register_chat(&db, "self", 555, None).await?;
        users::link_chat(&db, master.id, "crew").await?;
        users::link_chat(&db, master.id, "self").await?;
        let order = create_test_order(&db, region.id, &[]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Reviewing).await?;

        let (dispatcher, messenger) = dispatcher(&db).await;
        let sent = dispatcher
            .dispatch(&Notification::Accepted { order_id: order.id })
            .await?;
        assert_eq!(sent, 2);

        let mut chats: Vec<i64> = messenger.messages().iter().map(|m| m.chat_id).collect();
        chats.sort_unstable();
        assert_eq!(chats, vec![-777, 555]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_send_is_swallowed() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master_with_telegram(&db, region.id, 0, 555).await?;
        let order = create_test_order(&db, region.id, &[]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Reviewing).await?;

        let messenger = Arc::new(RecordingMessenger::failing());
        let dispatcher = NotificationDispatcher::new(
            db.clone(),
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            test_token_service(),
            "https://app.example".to_string(),
        );
        let sent = dispatcher
            .dispatch(&Notification::Accepted { order_id: order.id })
            .await?;
        assert_eq!(sent, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_master_removed_reaches_master_and_admins() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 0).await?;
        let admin = create_test_admin(&db).await?;
        let order = create_test_order(&db, region.id, &[]).await?;

        let (dispatcher, _) = dispatcher(&db).await;
        let plan = dispatcher
            .plan(&Notification::MasterRemoved {
                order_id: order.id,
                master_id: Some(master.id),
                cancelled: true,
            })
            .await?;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].user_id, master.id);
        assert!(plan[0].text.contains("returned to your balance"));
        assert_eq!(plan[1].user_id, admin.id);
        assert!(plan[1].text.contains("cancelled"));
        Ok(())
    }

    #[tokio::test]
    async fn test_completed_by_owner_notifies_master() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 0).await?;
        let order = create_test_order(&db, region.id, &[]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Accepted).await?;

        let (dispatcher, _) = dispatcher(&db).await;
        let by_driver = dispatcher
            .plan(&Notification::Completed {
                order_id: order.id,
                by: UserRole::Driver,
            })
            .await?;
        assert_eq!(by_driver.len(), 1);
        assert_eq!(by_driver[0].user_id, master.id);

        let by_master = dispatcher
            .plan(&Notification::Completed {
                order_id: order.id,
                by: UserRole::Master,
            })
            .await?;
        assert_eq!(by_master.len(), 1);
        assert_eq!(by_master[0].user_id, order.driver_id);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_drains_until_senders_drop() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master_with_telegram(&db, region.id, 0, 555).await?;
        let order = create_test_order(&db, region.id, &[]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Reviewing).await?;

        let (dispatcher, messenger) = dispatcher(&db).await;
        let (queue, receiver) = NotificationQueue::new(8);
        let worker = tokio::spawn(dispatcher.run(receiver));

        queue.publish(Notification::Accepted { order_id: order.id });
        queue.publish(Notification::Accepted { order_id: 999_999 });
        drop(queue);
        worker.await.unwrap();

        assert_eq!(messenger.messages().len(), 1);
        Ok(())
    }
}
