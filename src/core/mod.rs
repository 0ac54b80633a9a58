//! Core business logic, independent of any transport.

pub mod addresses;
pub mod autos;
pub mod identity;
pub mod ledger;
pub mod messages;
pub mod order_repository;
pub mod queries;
pub mod tasks;
pub mod users;
pub mod workflow;
