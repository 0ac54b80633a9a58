//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod address;
pub mod auto;
pub mod order;
pub mod order_auto;
pub mod order_declined_master;
pub mod order_message;
pub mod order_status_change;
pub mod region;
pub mod stale_order_notice;
pub mod task;
pub mod telegram_chat;
pub mod user;
pub mod user_chat;
pub mod user_info_change;

// Re-export specific types to avoid conflicts
pub use address::{Column as AddressColumn, Entity as Address, Model as AddressModel};
pub use auto::{AutoKind, Column as AutoColumn, Entity as Auto, Model as AutoModel};
pub use order::{Column as OrderColumn, Entity as Order, Model as OrderModel, OrderStatus};
pub use order_auto::{Column as OrderAutoColumn, Entity as OrderAuto, Model as OrderAutoModel};
pub use order_declined_master::{
    Column as OrderDeclinedMasterColumn, Entity as OrderDeclinedMaster,
    Model as OrderDeclinedMasterModel,
};
pub use order_message::{
    Column as OrderMessageColumn, Entity as OrderMessage, Model as OrderMessageModel,
};
pub use order_status_change::{
    Column as OrderStatusChangeColumn, Entity as OrderStatusChange,
    Model as OrderStatusChangeModel,
};
pub use region::{Column as RegionColumn, Entity as Region, Model as RegionModel};
pub use stale_order_notice::{
    Column as StaleOrderNoticeColumn, Entity as StaleOrderNotice, Model as StaleOrderNoticeModel,
};
pub use task::{Column as TaskColumn, Entity as Task, Model as TaskModel};
pub use telegram_chat::{
    Column as TelegramChatColumn, Entity as TelegramChat, Model as TelegramChatModel,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel, UserRole};
pub use user_chat::{Column as UserChatColumn, Entity as UserChat, Model as UserChatModel};
pub use user_info_change::{
    Column as UserInfoChangeColumn, Entity as UserInfoChange, Model as UserInfoChangeModel,
};
