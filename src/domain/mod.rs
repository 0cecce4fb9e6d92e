//! Marketplace records and the ports the application layer talks through.

pub mod ids;
pub mod job;
pub mod money;
pub mod payment;
pub mod ports;
pub mod review;
pub mod snapshot;
pub mod transaction;
pub mod user;
