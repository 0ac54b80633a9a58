//! Application wiring.
//!
//! [`App::build`] is the one place collaborators are constructed. Services get
//! what they need through their constructors; nothing is global.

use crate::{
    config::{AppConfig, app::NotificationConfig},
    core::{identity::TokenService, workflow::OrderWorkflow},
    notify::{
        LogMessenger, Messenger, Notification, NotificationDispatcher, NotificationQueue,
        TelegramMessenger,
    },
    sweeper::Sweeper,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::info;

/// Long-lived services of a running instance
pub struct App {
    /// Shared connection pool
    pub db: DatabaseConnection,
    /// Access token issuer and verifier
    pub tokens: TokenService,
    /// Order transitions
    pub workflow: OrderWorkflow,
    /// Background aging of stale orders
    pub sweeper: Sweeper,
}

/// The notification dispatcher together with the queue it drains
pub struct NotificationWorker {
    dispatcher: NotificationDispatcher,
    receiver: mpsc::Receiver<Notification>,
}

impl NotificationWorker {
    /// Starts draining the queue; the task ends once every [`App`] handle is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.dispatcher.run(self.receiver))
    }
}

impl App {
    /// Builds every service from configuration.
    #[must_use]
    pub fn build(
        config: &AppConfig,
        db: DatabaseConnection,
        messenger: Arc<dyn Messenger>,
    ) -> (Self, NotificationWorker) {
        let tokens = TokenService::new(
            &config.auth.jwt_secret,
            chrono::Duration::hours(config.auth.token_ttl_hours),
        );
        let (queue, receiver) = NotificationQueue::new(config.notifications.queue_capacity);

        let dispatcher = NotificationDispatcher::new(
            db.clone(),
            messenger,
            tokens.clone(),
            config.application_url.clone(),
        );
        let workflow = OrderWorkflow::new(
            db.clone(),
            queue.clone(),
            tokens.clone(),
            config.take_order_fee,
            config.master_start_balance,
        );
        let sweeper = Sweeper::new(
            db.clone(),
            workflow.clone(),
            queue,
            config.sweeper.clone(),
            config.admin.email.clone(),
        );

        let app = Self {
            db,
            tokens,
            workflow,
            sweeper,
        };
        (
            app,
            NotificationWorker {
                dispatcher,
                receiver,
            },
        )
    }
}

/// Telegram when a bot token is configured, otherwise log-only delivery.
#[must_use]
pub fn messenger_from_config(config: &NotificationConfig) -> Arc<dyn Messenger> {
    match config.telegram_bot_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            info!("Delivering notifications through Telegram");
            Arc::new(TelegramMessenger::new(&config.telegram_api_url, token))
        }
        None => {
            info!("No Telegram bot token configured, notifications are only logged");
            Arc::new(LogMessenger)
        }
    }
}
