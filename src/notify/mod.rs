//! Notifications - a bounded queue of workflow events and the worker that delivers them.

pub mod dispatcher;
pub mod messenger;

pub use dispatcher::{Notification, NotificationDispatcher, NotificationQueue};
pub use messenger::{LogMessenger, MessageLink, Messenger, TelegramMessenger};
